//! End-to-end tests of the HTTP stack against a local mock server

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ticketing_bridge::auth::{Credentials, TokenStore};
use ticketing_bridge::cache::{UserCache, UserCacheConfig};
use ticketing_bridge::client::{RequestExecutor, RetryPolicy, TicketQuery, TicketingClient};
use ticketing_bridge::clock::{Clock, SystemClock};
use ticketing_bridge::transport::{ApiRequest, Method, ReqwestTransport, Transport, TransportError};
use ticketing_bridge::BridgeError;

const API: &str = "/api/PublicApi";

fn token_body(token: &str) -> serde_json::Value {
    let expires = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
    json!({"Result": {"Token": token, "Expires": expires}})
}

async fn mount_logon(server: &MockServer, token: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(format!("{}/logon/getauthenticationtoken", API)))
        .and(query_param("email", "bridge@example.com"))
        .and(query_param("password", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(token)))
        .up_to_n_times(times)
        .mount(server)
        .await;
}

fn client_for(server: &MockServer) -> TicketingClient {
    let base_url = format!("{}{}", server.uri(), API);
    let transport: Arc<dyn Transport> =
        Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let tokens = Arc::new(TokenStore::new(
        transport.clone(),
        clock.clone(),
        base_url.clone(),
        Credentials::new("bridge@example.com", "secret"),
        Duration::from_secs(300),
    ));
    let users = Arc::new(UserCache::new(clock, &UserCacheConfig::default()));
    let executor = RequestExecutor::new(
        transport,
        tokens.clone(),
        base_url,
        RetryPolicy::none(),
        true,
    );
    TicketingClient::new(executor, tokens, users)
}

#[tokio::test]
async fn test_logon_then_bearer_query() {
    let server = MockServer::start().await;
    mount_logon(&server, "first", 1).await;

    Mock::given(method("POST"))
        .and(path(format!("{}/GetEntityListByQuery", API)))
        .and(header("authorization", "Bearer first"))
        .and(body_partial_json(json!({"EntityType": "Ticket", "Page": 1})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"Data": [{"Id": 1, "BaseHeader": "VPN"}], "Total": 1})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let page = client.get_tickets(&TicketQuery::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.data[0]["BaseHeader"], "VPN");

    // Second call reuses the token
    client.get_tickets(&TicketQuery::default()).await.unwrap();
    assert!(client.tokens().info().has_token);
}

#[tokio::test]
async fn test_expired_token_is_replaced_after_401() {
    let server = MockServer::start().await;
    mount_logon(&server, "first", 1).await;
    mount_logon(&server, "second", 1).await;

    Mock::given(method("POST"))
        .and(path(format!("{}/GetEntityById", API)))
        .and(header("authorization", "Bearer first"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/GetEntityById", API)))
        .and(header("authorization", "Bearer second"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"Result": {"Id": 7, "BaseHeader": "Printer"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let ticket = client.get_ticket_by_id(7).await.unwrap();
    assert_eq!(ticket["BaseHeader"], "Printer");
    assert_eq!(client.tokens().credential().as_deref(), Some("second"));
}

#[tokio::test]
async fn test_rejected_logon_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/logon/getauthenticationtoken", API)))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.get_entity_types().await.unwrap_err();
    assert!(matches!(err, BridgeError::Auth(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_missing_entity_is_not_found() {
    let server = MockServer::start().await;
    mount_logon(&server, "first", 1).await;
    Mock::given(method("POST"))
        .and(path(format!("{}/GetEntityTypeInfo", API)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.get_entity_metadata("Nothing").await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new(Duration::from_millis(200)).unwrap();
    let err = transport
        .send(ApiRequest::new(Method::Get, format!("{}/slow", server.uri())))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout(_)), "got {:?}", err);
    assert!(err.is_transient());
}
