//! Authenticated request execution with retry.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::TokenStore;
use crate::error::{BridgeError, Result};
use crate::transport::{join_url, ApiRequest, ApiResponse, Method, Transport};

/// Exponential backoff settings for transient failures.
///
/// The wait after failed attempt `n` (1-based) is
/// `multiplier * 2^(n-1)`, clamped to `[min_wait, max_wait]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub multiplier: Duration,
    #[serde(with = "humantime_serde")]
    pub min_wait: Duration,
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            multiplier: Duration::from_secs(1),
            min_wait: Duration::from_secs(4),
            max_wait: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.multiplier
            .saturating_mul(factor)
            .max(self.min_wait)
            .min(self.max_wait)
    }
}

/// Whether an operation changes remote state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Read,
    Mutation,
}

/// Sends API requests with a valid bearer token.
///
/// Each attempt makes sure a token is held, re-authenticates once on a 401,
/// and maps the response to a JSON value or a [`BridgeError`]. Transient
/// failures are retried according to the policy of the operation kind.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenStore>,
    base_url: String,
    read_policy: RetryPolicy,
    mutation_policy: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenStore>,
        base_url: impl Into<String>,
        policy: RetryPolicy,
        retry_mutations: bool,
    ) -> Self {
        let mutation_policy = if retry_mutations {
            policy.clone()
        } else {
            RetryPolicy::none()
        };
        Self {
            transport,
            tokens,
            base_url: base_url.into(),
            read_policy: policy,
            mutation_policy,
        }
    }

    pub async fn execute(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        self.execute_with(OperationKind::Read, method, path, body)
            .await
    }

    pub async fn execute_with(
        &self,
        kind: OperationKind,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let policy = match kind {
            OperationKind::Read => &self.read_policy,
            OperationKind::Mutation => &self.mutation_policy,
        };

        let mut attempt = 1;
        loop {
            match self.attempt(method, path, body.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    let wait = policy.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        path, attempt, policy.max_attempts, e, wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        if !self.tokens.ensure_valid().await? {
            return Err(BridgeError::Auth("no valid token obtainable".to_string()));
        }

        let response = self.send(method, path, body.clone()).await?;
        let response = if response.status == 401 {
            warn!("{} returned 401, re-authenticating", path);
            if !self.tokens.authenticate().await? {
                return Err(BridgeError::Auth("re-authentication failed".to_string()));
            }
            self.send(method, path, body).await?
        } else {
            response
        };

        decode(path, response)
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<ApiResponse> {
        let credential = self
            .tokens
            .credential()
            .ok_or_else(|| BridgeError::Auth("no token held".to_string()))?;

        let request = ApiRequest::new(method, join_url(&self.base_url, path))
            .with_bearer(credential)
            .with_payload(body);

        debug!("{:?} {}", method, request.url);
        Ok(self.transport.send(request).await?)
    }
}

fn has_errors(body: &Value) -> bool {
    match body.get("Errors") {
        None | Some(Value::Null) => false,
        Some(Value::Array(errors)) => !errors.is_empty(),
        Some(Value::String(error)) => !error.is_empty(),
        Some(Value::Object(errors)) => !errors.is_empty(),
        Some(_) => true,
    }
}

fn decode(path: &str, response: ApiResponse) -> Result<Value> {
    let body = response.json();

    if response.status == 404 {
        return Err(BridgeError::NotFound(path.to_string()));
    }
    if !response.is_success() {
        return Err(BridgeError::Remote {
            status: response.status,
            body,
        });
    }

    match body {
        Some(body) if has_errors(&body) => Err(BridgeError::Remote {
            status: response.status,
            body: Some(body),
        }),
        Some(body) => Ok(body),
        None if response.body.trim().is_empty() => Ok(Value::Null),
        None => Err(BridgeError::Decode(format!(
            "{} returned a non-JSON body",
            path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, Token};
    use crate::clock::{Clock, ManualClock};
    use crate::transport::mock::{MockReply, MockTransport};
    use serde_json::json;

    const BASE: &str = "http://nsp.local/api/PublicApi";

    struct Fixture {
        transport: Arc<MockTransport>,
        tokens: Arc<TokenStore>,
        executor: RequestExecutor,
    }

    fn fixture(retry_mutations: bool) -> Fixture {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::default());
        let transport = Arc::new(MockTransport::new(clock.clone()));
        let tokens = Arc::new(TokenStore::new(
            transport.clone(),
            clock.clone(),
            BASE,
            Credentials::new("bridge@example.com", "secret"),
            Duration::from_secs(300),
        ));
        let expires = (clock.now() + chrono::Duration::hours(1))
            .format("%Y-%m-%dT%H:%M:%S%.6fZ")
            .to_string();
        tokens.replace(Token::new("held", expires));

        let executor = RequestExecutor::new(
            transport.clone(),
            tokens.clone(),
            BASE,
            RetryPolicy::default(),
            retry_mutations,
        );
        Fixture {
            transport,
            tokens,
            executor,
        }
    }

    #[test]
    fn test_delay_is_clamped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let f = fixture(true);
        f.transport
            .push_api(MockReply::Json(200, json!({"Data": [{"Id": 1}], "Total": 1})));

        let value = f
            .executor
            .execute(Method::Post, "GetEntityListByQuery", Some(json!({"EntityType": "Ticket"})))
            .await
            .unwrap();

        assert_eq!(value["Total"], 1);
        let requests = f.transport.api_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].bearer.as_deref(), Some("held"));
        assert_eq!(requests[0].url, format!("{}/GetEntityListByQuery", BASE));
        assert_eq!(requests[0].body, Some(json!({"EntityType": "Ticket"})));
    }

    #[tokio::test]
    async fn test_reauthenticates_once_on_401() {
        let f = fixture(true);
        f.transport.push_api(MockReply::Json(401, json!({})));
        f.transport
            .push_api(MockReply::Json(200, json!({"Data": [], "Total": 0})));

        f.executor
            .execute(Method::Post, "GetEntityListByQuery", None)
            .await
            .unwrap();

        assert_eq!(f.transport.auth_calls(), 1);
        assert_eq!(f.transport.api_calls(), 2);
        let requests = f.transport.api_requests();
        assert_eq!(requests[0].bearer.as_deref(), Some("held"));
        assert_eq!(requests[1].bearer.as_deref(), Some("token-1"));
    }

    #[tokio::test]
    async fn test_second_401_is_remote_error() {
        let f = fixture(true);
        f.transport.push_api(MockReply::Json(401, json!({})));
        f.transport.push_api(MockReply::Json(401, json!({})));

        let err = f
            .executor
            .execute(Method::Get, "GetEntityTypes", None)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Remote { status: 401, .. }));
        assert_eq!(f.transport.auth_calls(), 1);
        assert_eq!(f.transport.api_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_reauthentication_is_auth_error() {
        let f = fixture(true);
        f.transport.push_api(MockReply::Json(401, json!({})));
        f.transport.push_auth(MockReply::Json(403, json!({})));

        let err = f
            .executor
            .execute(Method::Get, "GetEntityTypes", None)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Auth(_)));
        assert_eq!(f.transport.api_calls(), 1);
    }

    #[tokio::test]
    async fn test_no_token_obtainable() {
        let f = fixture(true);
        f.tokens.clear();
        f.transport.push_auth(MockReply::Json(500, json!({})));

        let err = f
            .executor
            .execute(Method::Get, "GetEntityTypes", None)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Auth(_)));
        assert_eq!(f.transport.auth_calls(), 1);
        assert_eq!(f.transport.api_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_attempts() {
        let f = fixture(true);
        for _ in 0..3 {
            f.transport.push_api(MockReply::Timeout);
        }

        let err = f
            .executor
            .execute(Method::Post, "GetEntityListByQuery", None)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Transport(_)));
        assert_eq!(f.transport.api_calls(), 3);

        let times = f.transport.api_request_times();
        for pair in times.windows(2) {
            let wait = pair[1] - pair[0];
            assert!(wait >= Duration::from_secs(4), "waited {:?}", wait);
            assert!(wait <= Duration::from_secs(10), "waited {:?}", wait);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_then_success() {
        let f = fixture(true);
        f.transport.push_api(MockReply::Json(503, json!({})));
        f.transport.push_api(MockReply::Connect);
        f.transport
            .push_api(MockReply::Json(200, json!({"Data": [], "Total": 0})));

        let value = f
            .executor
            .execute(Method::Post, "GetEntityListByQuery", None)
            .await
            .unwrap();

        assert_eq!(value["Total"], 0);
        assert_eq!(f.transport.api_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_not_retried() {
        let f = fixture(true);
        f.transport
            .push_api(MockReply::Json(400, json!({"Errors": ["bad filter"]})));

        let err = f
            .executor
            .execute(Method::Post, "GetEntityListByQuery", None)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Remote { status: 400, .. }));
        assert!(err.detail().contains("bad filter"));
        assert_eq!(f.transport.api_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_follow_policy() {
        let retried = fixture(true);
        retried.transport.push_api(MockReply::Json(503, json!({})));
        retried
            .executor
            .execute_with(OperationKind::Mutation, Method::Post, "CreateEntity", None)
            .await
            .unwrap();
        assert_eq!(retried.transport.api_calls(), 2);

        let single = fixture(false);
        single.transport.push_api(MockReply::Json(503, json!({})));
        let err = single
            .executor
            .execute_with(OperationKind::Mutation, Method::Post, "CreateEntity", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Remote { status: 503, .. }));
        assert_eq!(single.transport.api_calls(), 1);
    }

    #[tokio::test]
    async fn test_not_found() {
        let f = fixture(true);
        f.transport.push_api(MockReply::Json(404, json!({})));

        let err = f
            .executor
            .execute(Method::Get, "GetEntityById", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_errors_field_on_success_is_remote() {
        let f = fixture(true);
        f.transport
            .push_api(MockReply::Json(200, json!({"Errors": ["Unknown entity type"]})));

        let err = f
            .executor
            .execute(Method::Post, "GetEntityListByQuery", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Remote { status: 200, .. }));

        f.transport
            .push_api(MockReply::Json(200, json!({"Data": [], "Errors": []})));
        assert!(f
            .executor
            .execute(Method::Post, "GetEntityListByQuery", None)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_get_payload_is_sent_as_query() {
        let f = fixture(true);
        f.executor
            .execute(Method::Get, "GetEntityById", Some(json!({"EntityType": "Ticket", "Id": 5})))
            .await
            .unwrap();

        let request = &f.transport.api_requests()[0];
        assert!(request.body.is_none());
        assert!(request.query.contains(&("Id".to_string(), "5".to_string())));
    }
}
