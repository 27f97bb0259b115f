//! Session freshness monitoring.
//!
//! The bearer token is a JWT whose `exp` claim is read without verifying the
//! signature. [`FreshnessGate`] turns that expiry into a [`Freshness`] state and
//! [`SessionMonitor`] drives the periodic refresh action.

use crate::domain::models::UnknownTokenPolicy;
use crate::infrastructure::config::SessionSettings;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_refresher::SessionRefresher;
use crate::infrastructure::token_source::TokenSource;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum UnknownReason {
    Missing,
    Unreadable(String),
    Malformed(String),
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownReason::Missing => write!(f, "no session token stored"),
            UnknownReason::Unreadable(detail) => write!(f, "session token unreadable: {detail}"),
            UnknownReason::Malformed(detail) => write!(f, "session token malformed: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Freshness {
    Fresh { expires_at: DateTime<Utc> },
    Stale { expires_at: DateTime<Utc> },
    Unknown { reason: UnknownReason },
}

impl Freshness {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Freshness::Fresh { expires_at } | Freshness::Stale { expires_at } => Some(*expires_at),
            Freshness::Unknown { .. } => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: Option<f64>,
}

/// Expiry instant from the `exp` claim of a JWT payload.
pub fn decode_token_expiry(token: &str) -> Result<DateTime<Utc>, UnknownReason> {
    let payload = token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| UnknownReason::Malformed("token has no payload segment".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|error| UnknownReason::Malformed(format!("payload is not base64url: {error}")))?;
    let claims: TokenClaims = serde_json::from_slice(&bytes)
        .map_err(|error| UnknownReason::Malformed(format!("payload is not JSON: {error}")))?;
    let exp = claims
        .exp
        .filter(|value| value.is_finite())
        .ok_or_else(|| UnknownReason::Malformed("payload has no exp claim".to_string()))?;
    DateTime::from_timestamp(exp as i64, 0)
        .ok_or_else(|| UnknownReason::Malformed(format!("exp {exp} is out of range")))
}

/// Whole minutes until `expires_at`, floored at zero.
pub fn minutes_remaining(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    ((expires_at - now).num_seconds() / 60).max(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessGate {
    margin: Duration,
    unknown_policy: UnknownTokenPolicy,
}

impl Default for FreshnessGate {
    fn default() -> Self {
        Self::new(Duration::seconds(300), UnknownTokenPolicy::OptimisticFresh)
    }
}

impl FreshnessGate {
    pub fn new(margin: Duration, unknown_policy: UnknownTokenPolicy) -> Self {
        Self {
            margin,
            unknown_policy,
        }
    }

    /// Fresh only when the token outlives `now` by strictly more than the margin.
    pub fn assess(&self, token: Option<&str>, now: DateTime<Utc>) -> Freshness {
        let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) else {
            return Freshness::Unknown {
                reason: UnknownReason::Missing,
            };
        };
        match decode_token_expiry(token) {
            Ok(expires_at) if expires_at > now + self.margin => Freshness::Fresh { expires_at },
            Ok(expires_at) => Freshness::Stale { expires_at },
            Err(reason) => Freshness::Unknown { reason },
        }
    }

    pub fn permits(&self, freshness: &Freshness) -> bool {
        match freshness {
            Freshness::Fresh { .. } => true,
            Freshness::Stale { .. } => false,
            Freshness::Unknown { .. } => self.unknown_policy == UnknownTokenPolicy::OptimisticFresh,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub freshness_margin: Duration,
    pub refresh_threshold: Duration,
    pub check_interval: std::time::Duration,
    pub unknown_policy: UnknownTokenPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

impl From<&SessionSettings> for MonitorConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            freshness_margin: Duration::seconds(settings.freshness_margin_seconds),
            refresh_threshold: Duration::minutes(settings.refresh_threshold_minutes),
            check_interval: std::time::Duration::from_secs(settings.check_interval_minutes.max(1) * 60),
            unknown_policy: settings.unknown_token_policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub freshness: Freshness,
    pub minutes_remaining: Option<i64>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Skipped { minutes_remaining: Option<i64> },
    Refreshed,
    /// `first_in_episode` is true only for the first failure since the last success.
    RefreshFailed { first_in_episode: bool },
}

pub struct SessionMonitor<T, R>
where
    T: TokenSource,
    R: SessionRefresher,
{
    token_source: Arc<T>,
    refresher: Arc<R>,
    config: MonitorConfig,
    now_provider: NowProvider,
    warned: AtomicBool,
    unreadable_warned: AtomicBool,
}

impl<T, R> SessionMonitor<T, R>
where
    T: TokenSource + 'static,
    R: SessionRefresher + 'static,
{
    pub fn new(token_source: Arc<T>, refresher: Arc<R>, config: MonitorConfig) -> Self {
        Self {
            token_source,
            refresher,
            config,
            now_provider: Arc::new(Utc::now),
            warned: AtomicBool::new(false),
            unreadable_warned: AtomicBool::new(false),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn gate(&self) -> FreshnessGate {
        FreshnessGate::new(self.config.freshness_margin, self.config.unknown_policy)
    }

    /// Never fails: an unreadable credential downgrades to `Unknown`.
    pub fn check_freshness(&self) -> Freshness {
        let now = (self.now_provider)();
        match self.token_source.load_token() {
            Ok(token) => {
                self.unreadable_warned.store(false, Ordering::SeqCst);
                self.gate().assess(token.as_deref(), now)
            }
            Err(error) => {
                if self.unreadable_warned.swap(true, Ordering::SeqCst) {
                    tracing::debug!(%error, "session token still unreadable");
                } else {
                    tracing::warn!(%error, "session token could not be read");
                }
                Freshness::Unknown {
                    reason: UnknownReason::Unreadable(error.to_string()),
                }
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        let freshness = self.check_freshness();
        let checked_at = (self.now_provider)();
        SessionStatus {
            minutes_remaining: freshness
                .expires_at()
                .map(|expires_at| minutes_remaining(expires_at, checked_at)),
            freshness,
            checked_at,
        }
    }

    /// Synchronous pre-flight check run before any booking fetch.
    pub fn ensure_usable(&self) -> Result<Freshness, InfraError> {
        let freshness = self.check_freshness();
        if self.gate().permits(&freshness) {
            if let Freshness::Unknown { reason } = &freshness {
                tracing::debug!(%reason, "session freshness unknown; proceeding");
            }
            return Ok(freshness);
        }
        match freshness {
            Freshness::Stale { expires_at } => Err(InfraError::SessionExpired { expires_at }),
            Freshness::Unknown { reason } => Err(InfraError::Credential(reason.to_string())),
            Freshness::Fresh { .. } => Ok(freshness),
        }
    }

    fn needs_refresh(&self, freshness: &Freshness, now: DateTime<Utc>) -> bool {
        match freshness.expires_at() {
            Some(expires_at) => expires_at - now < self.config.refresh_threshold,
            None => self.config.unknown_policy == UnknownTokenPolicy::Pessimistic,
        }
    }

    /// Run the blocking refresh action on the blocking pool.
    pub async fn refresh_now(&self) -> Result<bool, InfraError> {
        let refresher = Arc::clone(&self.refresher);
        tokio::task::spawn_blocking(move || refresher.refresh())
            .await
            .map_err(|error| InfraError::Refresh(format!("refresh task failed: {error}")))?
    }

    pub async fn tick(&self) -> TickOutcome {
        let now = (self.now_provider)();
        let freshness = self.check_freshness();
        if !self.needs_refresh(&freshness, now) {
            let remaining = freshness
                .expires_at()
                .map(|expires_at| minutes_remaining(expires_at, now));
            tracing::debug!(minutes_remaining = ?remaining, "session refresh not needed");
            return TickOutcome::Skipped {
                minutes_remaining: remaining,
            };
        }

        match self.refresh_now().await {
            Ok(true) => {
                if self.warned.swap(false, Ordering::SeqCst) {
                    tracing::info!("session refresh recovered");
                } else {
                    tracing::info!("session refreshed");
                }
                TickOutcome::Refreshed
            }
            Ok(false) => self.record_failure("refresh action reported failure".to_string()),
            Err(error) => self.record_failure(error.to_string()),
        }
    }

    fn record_failure(&self, detail: String) -> TickOutcome {
        let first_in_episode = !self.warned.swap(true, Ordering::SeqCst);
        if first_in_episode {
            tracing::warn!(%detail, "session refresh failed; retrying on next check");
        } else {
            tracing::debug!(%detail, "session refresh still failing");
        }
        TickOutcome::RefreshFailed { first_in_episode }
    }

    /// Tick immediately, then every `check_interval`, until `cancel` fires.
    /// A tick in progress always completes.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval_secs = self.config.check_interval.as_secs(),
            "session monitor started"
        );
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
        tracing::info!("session monitor stopped");
    }
}
