//! Background token pre-warming.
//!
//! Keeps a token available by refreshing it shortly before it expires, so
//! that interactive requests rarely pay for a logon round-trip.
//!
//! Only one timer is ever pending. Arming a timer cancels the previous one
//! and bumps a generation counter under the same lock; a timer that wakes up
//! with an outdated generation does nothing. The timer task only sleeps and
//! then hands the refresh to its own task.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::TokenStore;
use super::token::TokenInfo;
use crate::clock::Clock;
use crate::error::{BridgeError, Result};

/// Default lead time before expiry at which the token is refreshed (5 minutes).
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Default delay before retrying a failed refresh (5 minutes).
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration for the token pre-warmer
#[derive(Debug, Clone)]
pub struct PrewarmConfig {
    /// Refresh this long before the token expires
    pub refresh_buffer: Duration,
    /// Wait this long after a failed refresh
    pub retry_interval: Duration,
}

impl Default for PrewarmConfig {
    fn default() -> Self {
        Self {
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// When the current token expires and when it will be refreshed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrewarmSchedule {
    pub expires_at: DateTime<Utc>,
    pub refresh_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatus {
    pub expires_at: String,
    pub refresh_at: String,
    pub next_refresh_in_minutes: f64,
}

/// Diagnostic view of the pre-warmer
#[derive(Debug, Clone, Serialize)]
pub struct PrewarmStatus {
    pub active: bool,
    pub refresh_buffer_minutes: f64,
    pub token: TokenInfo,
    pub schedule: Option<ScheduleStatus>,
}

#[derive(Default)]
struct State {
    running: bool,
    schedule: Option<PrewarmSchedule>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl State {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }
}

struct Inner {
    tokens: Arc<TokenStore>,
    clock: Arc<dyn Clock>,
    config: PrewarmConfig,
    state: Mutex<State>,
    /// Set while a refresh is in flight
    refreshing: RwLock<bool>,
}

/// Refreshes the token ahead of expiry on a timer.
///
/// Cheap to clone; all clones share the same schedule.
#[derive(Clone)]
pub struct TokenPrewarmer {
    inner: Arc<Inner>,
}

impl TokenPrewarmer {
    pub fn new(tokens: Arc<TokenStore>, config: PrewarmConfig) -> Self {
        let clock = Arc::clone(tokens.clock());
        Self {
            inner: Arc::new(Inner {
                tokens,
                clock,
                config,
                state: Mutex::new(State::default()),
                refreshing: RwLock::new(false),
            }),
        }
    }

    /// Start pre-warming.
    ///
    /// Obtains a token first if none is valid. Returns `false` and stays
    /// stopped if that fails or if no refresh time can be derived from the
    /// token's expiry. Starting an active pre-warmer is a no-op.
    pub async fn start(&self) -> bool {
        if self.is_active() {
            debug!("Token pre-warming already active");
            return true;
        }

        if self.inner.tokens.is_stale() {
            match self.inner.tokens.ensure_valid().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("Token pre-warming not started: no valid token obtainable");
                    return false;
                }
                Err(e) => {
                    error!("Token pre-warming not started: {}", e);
                    return false;
                }
            }
        }

        self.inner.state.lock().running = true;
        if !self.inner.schedule(false) {
            let mut state = self.inner.state.lock();
            state.running = false;
            state.schedule = None;
            state.cancel_timer();
            warn!("Token pre-warming not started: token expiry is unreadable");
            return false;
        }

        info!(
            "Token pre-warming started (refresh {:?} before expiry)",
            self.inner.config.refresh_buffer
        );
        true
    }

    /// Stop pre-warming and cancel any pending refresh.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if !state.running && state.timer.is_none() {
            return;
        }
        state.running = false;
        state.schedule = None;
        state.cancel_timer();
        info!("Token pre-warming stopped");
    }

    /// Refresh the token now and schedule the next refresh.
    ///
    /// Does nothing while stopped or while another refresh is in flight.
    pub async fn refresh(&self) {
        self.inner.refresh().await;
    }

    /// Arm the timer from the current token's expiry.
    ///
    /// Returns `false` while stopped or if there is no token with a readable
    /// expiry.
    pub fn schedule_next_refresh(&self) -> bool {
        self.inner.schedule(false)
    }

    /// Cancel the pending timer and refresh immediately in the background.
    pub fn force_refresh(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if !state.running {
                return Err(BridgeError::NotActive);
            }
            state.cancel_timer();
        }

        info!("Forcing token refresh");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.refresh().await });
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.inner
            .state
            .lock()
            .timer
            .as_ref()
            .map_or(false, |timer| !timer.is_finished())
    }

    pub fn schedule(&self) -> Option<PrewarmSchedule> {
        self.inner.state.lock().schedule.clone()
    }

    pub fn status(&self) -> PrewarmStatus {
        let (active, schedule) = {
            let state = self.inner.state.lock();
            (state.running, state.schedule.clone())
        };
        let now = self.inner.clock.now();

        PrewarmStatus {
            active,
            refresh_buffer_minutes: minutes(self.inner.config.refresh_buffer.as_secs_f64()),
            token: self.inner.tokens.info(),
            schedule: schedule.map(|s| ScheduleStatus {
                expires_at: s.expires_at.to_rfc3339(),
                refresh_at: s.refresh_at.to_rfc3339(),
                next_refresh_in_minutes: minutes(
                    (s.refresh_at - now).num_milliseconds().max(0) as f64 / 1000.0,
                ),
            }),
        }
    }
}

/// Seconds to minutes, rounded to one decimal
fn minutes(secs: f64) -> f64 {
    (secs / 60.0 * 10.0).round() / 10.0
}

impl Inner {
    async fn refresh(self: &Arc<Self>) {
        if !self.state.lock().running {
            debug!("Token pre-warming stopped, skipping refresh");
            return;
        }

        {
            let mut refreshing = self.refreshing.write();
            if *refreshing {
                debug!("Token refresh already in progress, skipping");
                return;
            }
            *refreshing = true;
        }

        let _guard = scopeguard::guard((), |_| {
            *self.refreshing.write() = false;
        });

        info!("Pre-warming token");
        self.tokens.clear();

        let refreshed = match self.tokens.ensure_valid().await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                error!("Token pre-warming failed: {}", e);
                false
            }
        };

        if refreshed && self.schedule(true) {
            return;
        }

        if !refreshed {
            warn!(
                "Token refresh failed, retrying in {:?}",
                self.config.retry_interval
            );
        }
        let mut state = self.state.lock();
        if state.running {
            state.schedule = None;
            self.arm(&mut state, self.config.retry_interval);
        }
    }

    /// Compute the schedule from the held token and arm the timer.
    ///
    /// Right after a refresh, a refresh time that already passed is deferred
    /// by the retry interval instead of firing at once.
    fn schedule(self: &Arc<Self>, after_refresh: bool) -> bool {
        let Some(expires_at) = self.tokens.expiry() else {
            debug!("No token expiry to schedule from");
            return false;
        };

        let buffer = chrono::Duration::from_std(self.config.refresh_buffer)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let refresh_at = expires_at - buffer;
        let now = self.clock.now();

        let delay = if refresh_at > now {
            (refresh_at - now).to_std().unwrap_or(Duration::ZERO)
        } else if after_refresh {
            warn!(
                "Fresh token expires at {}, inside the refresh buffer; retrying in {:?}",
                expires_at, self.config.retry_interval
            );
            self.config.retry_interval
        } else {
            Duration::ZERO
        };

        let mut state = self.state.lock();
        if !state.running {
            return false;
        }
        state.schedule = Some(PrewarmSchedule {
            expires_at,
            refresh_at,
        });
        self.arm(&mut state, delay);
        debug!("Next token refresh in {:?} (at {})", delay, refresh_at);
        true
    }

    /// Replace the pending timer with one firing after `delay`.
    fn arm(self: &Arc<Self>, state: &mut State, delay: Duration) {
        state.cancel_timer();
        let generation = state.generation;
        let weak: Weak<Self> = Arc::downgrade(self);

        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire(generation);
            }
        }));
    }

    fn fire(self: &Arc<Self>, generation: u64) {
        {
            let mut state = self.state.lock();
            if !state.running || state.generation != generation {
                return;
            }
            state.timer = None;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.refresh().await });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().cancel_timer();
    }
}
