//! ticketing-bridge: relay between a chatbot tool endpoint and an on-premise
//! ticketing REST API
//!
//! The bridge holds one service-account session against the remote API and
//! exposes a small set of ticket operations on top of it.
//!
//! # Architecture
//!
//! - **Transport**: the `Transport` trait performs one HTTP exchange;
//!   `ReqwestTransport` is the production implementation.
//! - **Auth**: `TokenStore` owns the bearer token and re-authenticates when it
//!   nears expiry. `TokenPrewarmer` refreshes it in the background ahead of
//!   expiry so callers rarely wait on a logon.
//! - **Cache**: `UserCache` keeps email → user record lookups with a TTL and a
//!   bounded size.
//! - **Client**: `RequestExecutor` adds the bearer token, retries transient
//!   failures and re-authenticates once on 401. `TicketingClient` builds the
//!   ticket queries and field mappings on top of it.
//! - **Service**: `BridgeService` routes named operations to the client and
//!   wraps every outcome in a uniform envelope.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ticketing_bridge::auth::{TokenPrewarmer, TokenStore};
//! use ticketing_bridge::cache::UserCache;
//! use ticketing_bridge::client::{RequestExecutor, TicketingClient};
//! use ticketing_bridge::clock::SystemClock;
//! use ticketing_bridge::config::Config;
//! use ticketing_bridge::service::{BridgeService, Request};
//! use ticketing_bridge::transport::ReqwestTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file(&"bridge.yaml".into())?;
//! let transport = Arc::new(ReqwestTransport::new(config.remote.timeout)?);
//! let clock = Arc::new(SystemClock);
//!
//! let tokens = Arc::new(TokenStore::new(
//!     transport.clone(),
//!     clock.clone(),
//!     config.remote.base_url.clone(),
//!     config.remote.credentials.clone(),
//!     config.token.expiry_buffer,
//! ));
//! let users = Arc::new(UserCache::new(clock, &config.cache));
//! let executor = RequestExecutor::new(
//!     transport,
//!     tokens.clone(),
//!     config.remote.base_url.clone(),
//!     config.retry.clone(),
//!     config.retry_mutations,
//! );
//! let client = Arc::new(TicketingClient::new(executor, tokens.clone(), users));
//! let service = BridgeService::new(client, TokenPrewarmer::new(tokens, config.prewarming.schedule));
//!
//! let reply = service
//!     .dispatch(Request::new("get_tickets", serde_json::json!({"page": 1})))
//!     .await;
//! println!("{}", serde_json::to_string(&reply)?);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod env;
pub mod error;
pub mod service;
pub mod transport;

pub use error::{BridgeError, Result};
