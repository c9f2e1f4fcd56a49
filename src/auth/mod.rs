//! Authentication against the ticketing API
//!
//! The bridge authenticates as a single service account and holds one bearer
//! token at a time:
//! - [`token`]: the token value and defensive expiry parsing
//! - [`store`]: acquisition, staleness checks and single-flight refresh
//! - [`prewarm`]: background refresh ahead of expiry

pub mod prewarm;
pub mod store;
pub mod token;

pub use prewarm::{PrewarmConfig, PrewarmSchedule, PrewarmStatus, TokenPrewarmer};
pub use store::{Credentials, TokenStore};
pub use token::{Token, TokenInfo};
