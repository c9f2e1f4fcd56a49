//! Scripted transport for unit tests.
//!
//! Authentication requests are answered with freshly issued tokens unless a
//! reply was queued with [`MockTransport::push_auth`]. API requests are
//! answered from the queue, then from persistent routes, then with an empty
//! `{Data: [], Total: 0}` page.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::auth::store::AUTH_PATH;
use crate::clock::Clock;

#[derive(Debug, Clone)]
pub(crate) enum MockReply {
    Json(u16, Value),
    Timeout,
    Connect,
    Broken,
}

struct Route {
    endpoint: String,
    entity_type: Option<String>,
    reply: MockReply,
}

pub(crate) struct MockTransport {
    clock: Arc<dyn Clock>,
    token_lifetime: Mutex<Duration>,
    auth_script: Mutex<VecDeque<MockReply>>,
    api_script: Mutex<VecDeque<MockReply>>,
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<(tokio::time::Instant, ApiRequest)>>,
    auth_calls: AtomicUsize,
    api_calls: AtomicUsize,
    issued: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            token_lifetime: Mutex::new(Duration::minutes(60)),
            auth_script: Mutex::new(VecDeque::new()),
            api_script: Mutex::new(VecDeque::new()),
            routes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            auth_calls: AtomicUsize::new(0),
            api_calls: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
        }
    }

    /// Lifetime of tokens issued by the default authentication reply
    pub(crate) fn set_token_lifetime(&self, lifetime: Duration) {
        *self.token_lifetime.lock() = lifetime;
    }

    pub(crate) fn push_auth(&self, reply: MockReply) {
        self.auth_script.lock().push_back(reply);
    }

    pub(crate) fn push_api(&self, reply: MockReply) {
        self.api_script.lock().push_back(reply);
    }

    /// Answer every request to `endpoint` (optionally only for one entity type)
    pub(crate) fn route(&self, endpoint: &str, entity_type: Option<&str>, reply: MockReply) {
        self.routes.lock().push(Route {
            endpoint: endpoint.to_string(),
            entity_type: entity_type.map(str::to_string),
            reply,
        });
    }

    pub(crate) fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn api_calls(&self) -> usize {
        self.api_calls.load(Ordering::SeqCst)
    }

    /// Every API (non-authentication) request received, in order
    pub(crate) fn api_requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|(_, r)| !is_auth(r))
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub(crate) fn auth_requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|(_, r)| is_auth(r))
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Arrival times of API requests
    pub(crate) fn api_request_times(&self) -> Vec<tokio::time::Instant> {
        self.requests
            .lock()
            .iter()
            .filter(|(_, r)| !is_auth(r))
            .map(|(at, _)| *at)
            .collect()
    }

    /// A successful authentication body expiring `lifetime` from now
    pub(crate) fn token_reply(&self, lifetime: Duration) -> MockReply {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let expires = (self.clock.now() + lifetime).format("%Y-%m-%dT%H:%M:%S%.6fZ");
        MockReply::Json(
            200,
            json!({"Result": {"Token": format!("token-{}", n), "Expires": expires.to_string()}}),
        )
    }

    fn route_reply(&self, request: &ApiRequest) -> Option<MockReply> {
        let entity_type = request
            .body
            .as_ref()
            .and_then(|b| b.get("EntityType"))
            .and_then(Value::as_str);
        self.routes
            .lock()
            .iter()
            .find(|route| {
                request.url.ends_with(&route.endpoint)
                    && route
                        .entity_type
                        .as_deref()
                        .map_or(true, |t| Some(t) == entity_type)
            })
            .map(|route| route.reply.clone())
    }
}

fn is_auth(request: &ApiRequest) -> bool {
    request.url.ends_with(AUTH_PATH)
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests
            .lock()
            .push((tokio::time::Instant::now(), request.clone()));

        let reply = if is_auth(&request) {
            self.auth_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.auth_script.lock().pop_front();
            match scripted {
                Some(reply) => reply,
                None => {
                    let lifetime = *self.token_lifetime.lock();
                    self.token_reply(lifetime)
                }
            }
        } else {
            self.api_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.api_script.lock().pop_front();
            scripted
                .or_else(|| self.route_reply(&request))
                .unwrap_or_else(|| MockReply::Json(200, json!({"Data": [], "Total": 0})))
        };

        match reply {
            MockReply::Json(status, body) => Ok(ApiResponse {
                status,
                body: body.to_string(),
            }),
            MockReply::Timeout => Err(TransportError::Timeout("mock timeout".to_string())),
            MockReply::Connect => Err(TransportError::Connect("mock refused".to_string())),
            MockReply::Broken => Err(TransportError::Request("mock malformed request".to_string())),
        }
    }
}
