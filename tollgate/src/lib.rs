//! # Tollgate
//!
//! Tollgate protects authentication endpoints from credential stuffing, brute
//! force and account enumeration. It keeps all of its state in memory and
//! gives you:
//! - Fixed-window rate limits per action (login, register, password reset) by IP and by user
//! - An IP block list with automatic escalation for rapid login attempts
//! - A bounded log of authentication events with aggregate statistics
//! - Pattern detection over recent events, with alerts for high-risk findings
//!
//! State is per process. Running several instances behind a load balancer
//! gives each instance its own counters.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tollgate::{Action, ClientInfo, Scope, Tollgate};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tollgate::Error> {
//!     let tollgate = Tollgate::builder().build()?;
//!     let client = ClientInfo::new("203.0.113.9", "Mozilla/5.0");
//!
//!     if tollgate.check(Action::Login, Scope::Ip, &client.ip_address).is_allowed() {
//!         // verify credentials...
//!         tollgate.record_login_failed(&client, Some("alice@example.com"), "invalid_password");
//!     }
//!
//!     tollgate.shutdown(false).await;
//!     Ok(())
//! }
//! ```
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::JoinHandle};

pub mod builder;

pub use builder::TollgateBuilder;

/// Re-export core types from tollgate_core
///
/// These types are commonly used when working with the Tollgate API.
pub use tollgate_core::{
    Action, AlertDispatcher, AlertError, AuthEvent, AuthEventType, BackgroundDispatcher,
    BlockEntry, BlockStatus, ChannelAlertDispatcher, ClientInfo, ConfigError, Decision,
    EmergencyConfig, Error, EventId, EventStats, LimitDecision, LimitRule, LimitsConfig,
    PatternKind, Scope, SecurityAlert, StatsWindow, SuspiciousActivityPattern, SweepReport,
    TollgateConfig, TracingAlertDispatcher, WindowEntry, events::UNKNOWN,
};

use tollgate_core::{EventLog, PatternDetector, RateLimiter};

/// Why a login was refused before credentials were checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    RateLimit,
    AccountLocked,
}

impl BlockKind {
    fn event_type(&self) -> AuthEventType {
        match self {
            BlockKind::RateLimit => AuthEventType::LoginBlockedRateLimit,
            BlockKind::AccountLocked => AuthEventType::LoginBlockedAccountLocked,
        }
    }
}

struct TollgateInner {
    config: TollgateConfig,
    limiter: Arc<RateLimiter>,
    events: EventLog,
    detector: PatternDetector,
    alerts: BackgroundDispatcher,
    shutdown_tx: watch::Sender<bool>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

/// The abuse-protection service shared by all request handlers.
///
/// `Tollgate` is cheap to clone; clones share the same state. Create one with
/// [`Tollgate::builder`] and stop it with [`Tollgate::shutdown`].
#[derive(Clone)]
pub struct Tollgate {
    inner: Arc<TollgateInner>,
}

impl std::fmt::Debug for Tollgate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tollgate")
            .field("config", &self.inner.config)
            .field("events", &self.inner.events.len())
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl Tollgate {
    pub fn builder() -> TollgateBuilder {
        TollgateBuilder::new()
    }

    /// Build a service from `config` with the default alert dispatcher.
    pub fn new(config: TollgateConfig) -> Result<Self, Error> {
        TollgateBuilder::new().with_config(config).build()
    }

    pub(crate) fn from_parts(config: TollgateConfig, alerts: BackgroundDispatcher) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(TollgateInner {
                limiter: Arc::new(RateLimiter::from_config(&config)),
                events: EventLog::new(config.event_log_capacity),
                detector: PatternDetector::new(config.utc_offset()),
                alerts,
                shutdown_tx,
                sweep_task: Mutex::new(None),
                shut_down: AtomicBool::new(false),
                config,
            }),
        }
    }

    pub fn config(&self) -> &TollgateConfig {
        &self.inner.config
    }

    /// Direct access to the underlying limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn event_log(&self) -> &EventLog {
        &self.inner.events
    }

    // ------------------------------------------------------------------------
    // Decisions
    // ------------------------------------------------------------------------

    pub fn check(&self, action: Action, scope: Scope, identifier: &str) -> Decision {
        self.inner.limiter.check(action, scope, identifier)
    }

    pub fn check_at(
        &self,
        action: Action,
        scope: Scope,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Decision {
        self.inner.limiter.check_at(action, scope, identifier, now)
    }

    pub fn check_limit(
        &self,
        identifier: &str,
        scope: Scope,
        limit: u32,
        window: Duration,
    ) -> LimitDecision {
        self.inner.limiter.check_limit(identifier, scope, limit, window)
    }

    pub fn check_limit_at(
        &self,
        identifier: &str,
        scope: Scope,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> LimitDecision {
        self.inner
            .limiter
            .check_limit_at(identifier, scope, limit, window, now)
    }

    pub fn reset_limit(&self, action: Action, scope: Scope, identifier: &str) -> bool {
        self.inner.limiter.reset_limit(action, scope, identifier)
    }

    pub fn is_blocked(&self, ip_address: &str) -> BlockStatus {
        self.inner.limiter.is_blocked(ip_address)
    }

    pub fn block(&self, ip_address: &str, reason: &str, duration: Duration) -> BlockEntry {
        self.inner.limiter.block(ip_address, reason, duration)
    }

    pub fn unblock(&self, ip_address: &str) -> bool {
        self.inner.limiter.unblock(ip_address)
    }

    pub fn blocked(&self) -> HashMap<String, BlockEntry> {
        self.inner.limiter.blocked()
    }

    pub fn check_rapid_attempts(&self, ip_address: &str) -> bool {
        self.inner.limiter.check_rapid_attempts(ip_address)
    }

    // ------------------------------------------------------------------------
    // Event recording
    // ------------------------------------------------------------------------

    /// Record an authentication event and run pattern detection on it.
    ///
    /// Login events also feed the rapid-attempt tracker for their IP, and a
    /// successful login clears the login-by-user window. Returns the patterns
    /// the event triggered.
    pub fn record(&self, event: AuthEvent) -> Vec<SuspiciousActivityPattern> {
        let inner = &self.inner;

        if event.event_type == AuthEventType::LoginSuccess {
            for identifier in [event.user_id.as_deref(), event.email.as_deref()]
                .into_iter()
                .flatten()
            {
                inner
                    .limiter
                    .reset_limit(Action::Login, Scope::User, identifier);
            }
        }

        if is_login_event(event.event_type) && event.ip_address != UNKNOWN {
            inner
                .limiter
                .record_login_attempt_at(&event.ip_address, event.timestamp);
        }

        inner.events.append(event.clone());
        let findings = inner.detector.evaluate(&event, &inner.events);

        for finding in &findings {
            // Derived events skip detection
            inner.events.append(finding.to_event(&event));
            self.escalate(finding, &event);
        }

        findings
    }

    fn escalate(&self, finding: &SuspiciousActivityPattern, trigger: &AuthEvent) {
        let inner = &self.inner;

        if finding.risk_score >= inner.config.alert_risk_threshold {
            inner.alerts.dispatch(SecurityAlert::new(finding, trigger));
        }

        let should_block = inner
            .config
            .detector_block_threshold
            .is_some_and(|threshold| finding.risk_score >= threshold);
        if should_block && trigger.ip_address != UNKNOWN {
            inner.limiter.block_at(
                &trigger.ip_address,
                &format!("suspicious_activity: {}", finding.kind),
                inner.config.emergency.block_duration,
                trigger.timestamp,
            );
        }
    }

    pub fn record_login_success(
        &self,
        client: &ClientInfo,
        user_id: &str,
        email: Option<&str>,
    ) -> Vec<SuspiciousActivityPattern> {
        let mut event = AuthEvent::new(AuthEventType::LoginSuccess, client).with_user_id(user_id);
        if let Some(email) = email {
            event = event.with_email(email);
        }
        self.record(event)
    }

    pub fn record_login_failed(
        &self,
        client: &ClientInfo,
        email: Option<&str>,
        reason: &str,
    ) -> Vec<SuspiciousActivityPattern> {
        let mut event =
            AuthEvent::new(AuthEventType::LoginFailed, client).with_failure_reason(reason);
        if let Some(email) = email {
            event = event.with_email(email);
        }
        self.record(event)
    }

    pub fn record_login_blocked(
        &self,
        client: &ClientInfo,
        email: Option<&str>,
        kind: BlockKind,
    ) -> Vec<SuspiciousActivityPattern> {
        let event_type = kind.event_type();
        let mut event = AuthEvent::new(event_type, client).with_failure_reason(event_type.as_str());
        if let Some(email) = email {
            event = event.with_email(email);
        }
        self.record(event)
    }

    pub fn record_register_success(
        &self,
        client: &ClientInfo,
        user_id: &str,
        email: &str,
    ) -> Vec<SuspiciousActivityPattern> {
        self.record(
            AuthEvent::new(AuthEventType::RegisterSuccess, client)
                .with_user_id(user_id)
                .with_email(email),
        )
    }

    pub fn record_register_failed(
        &self,
        client: &ClientInfo,
        email: Option<&str>,
        reason: &str,
    ) -> Vec<SuspiciousActivityPattern> {
        let mut event =
            AuthEvent::new(AuthEventType::RegisterFailed, client).with_failure_reason(reason);
        if let Some(email) = email {
            event = event.with_email(email);
        }
        self.record(event)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn stats(&self, window: StatsWindow) -> EventStats {
        self.inner.events.stats(window)
    }

    pub fn stats_at(&self, window: StatsWindow, now: DateTime<Utc>) -> EventStats {
        self.inner.events.stats_at(window, now)
    }

    pub fn events_for_user(&self, user_id: &str, limit: usize) -> Vec<AuthEvent> {
        self.inner.events.for_user(user_id, limit)
    }

    pub fn events_for_ip(&self, ip_address: &str, limit: usize) -> Vec<AuthEvent> {
        self.inner.events.for_ip(ip_address, limit)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Remove expired windows and blocks as of `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        self.inner.limiter.sweep(now)
    }

    /// Start the periodic sweep on the current tokio runtime.
    ///
    /// Returns `false` if a sweep task is already running, the service has
    /// been shut down, or no runtime is available.
    pub fn start_sweep_task(&self) -> bool {
        if self.is_shut_down() {
            return false;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("No async runtime available, sweep task not started");
                return false;
            }
        };

        let mut task = self
            .inner
            .sweep_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return false;
        }

        let period = match self.inner.config.sweep_interval.to_std() {
            Ok(period) => period,
            Err(_) => {
                tracing::warn!(
                    sweep_interval = %self.inner.config.sweep_interval,
                    "Sweep interval is not a valid timer period; not starting the sweep task"
                );
                return false;
            }
        };
        let limiter = Arc::clone(&self.inner.limiter);
        let mut shutdown = self.inner.shutdown_tx.subscribe();

        *task = Some(handle.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval_timer = tokio::time::interval_at(start, period);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        limiter.sweep(Utc::now());
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down tollgate sweep task");
                        break;
                    }
                }
            }
        }));

        tracing::info!(
            interval_secs = period.as_secs(),
            "Started tollgate sweep task"
        );
        true
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Stop the sweep task and optionally drop all in-memory state.
    ///
    /// Safe to call more than once; later calls only apply `clear_state`.
    pub async fn shutdown(&self, clear_state: bool) {
        if !self.inner.shut_down.swap(true, Ordering::SeqCst) {
            let _ = self.inner.shutdown_tx.send(true);

            let task = self
                .inner
                .sweep_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(task) = task {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "Tollgate sweep task ended abnormally");
                }
            }

            tracing::info!(clear_state = clear_state, "Tollgate shut down");
        }

        if clear_state {
            self.inner.limiter.clear();
            self.inner.events.clear();
        }
    }
}

fn is_login_event(event_type: AuthEventType) -> bool {
    matches!(event_type, AuthEventType::LoginSuccess | AuthEventType::LoginFailed)
        || event_type.is_blocked_login()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn tollgate() -> Tollgate {
        Tollgate::builder()
            .with_background_sweep(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_record_appends_derived_events() {
        let tollgate = tollgate();
        let client = ClientInfo::new("1.2.3.4", "test-agent");

        let mut findings = Vec::new();
        for i in 0..5 {
            findings = tollgate.record(
                AuthEvent::new(AuthEventType::LoginFailed, &client)
                    .with_email("victim@example.com")
                    .at(t0() + Duration::minutes(i)),
            );
        }

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, PatternKind::MultipleFailedLoginsSameIp);

        let events = tollgate.events_for_ip("1.2.3.4", 10);
        assert_eq!(events.len(), 6);
        assert_eq!(events[0].event_type, AuthEventType::SuspiciousActivity);
        assert_eq!(events[0].risk_score, Some(5));
    }

    #[test]
    fn test_successful_login_resets_user_window() {
        let tollgate = tollgate();
        for _ in 0..5 {
            tollgate.check(Action::Login, Scope::User, "u1");
        }
        assert!(!tollgate.check(Action::Login, Scope::User, "u1").is_allowed());

        tollgate.record_login_success(&ClientInfo::new("1.1.1.1", "ua"), "u1", None);
        assert!(tollgate.check(Action::Login, Scope::User, "u1").is_allowed());
    }

    #[test]
    fn test_login_blocked_records_kind() {
        let tollgate = tollgate();
        let client = ClientInfo::new("1.1.1.1", "ua");
        tollgate.record_login_blocked(&client, Some("a@example.com"), BlockKind::AccountLocked);

        let events = tollgate.events_for_ip("1.1.1.1", 1);
        assert_eq!(events[0].event_type, AuthEventType::LoginBlockedAccountLocked);
        assert!(!events[0].success);
    }

    #[test]
    fn test_detector_block_threshold() {
        let tollgate = Tollgate::builder()
            .with_config(TollgateConfig::default().with_detector_block_threshold(9))
            .with_background_sweep(false)
            .build()
            .unwrap();
        let now = Utc::now();

        for (i, email) in ["a@x.io", "b@x.io", "c@x.io"].iter().enumerate() {
            tollgate.record(
                AuthEvent::new(AuthEventType::LoginFailed, &ClientInfo::new("7.7.7.7", "ua"))
                    .with_email(*email)
                    .at(now + Duration::seconds(i as i64)),
            );
        }

        let status = tollgate.is_blocked("7.7.7.7");
        assert!(status.blocked);
        assert_eq!(
            status.reason.as_deref(),
            Some("suspicious_activity: multiple_accounts_same_ip")
        );
    }

    #[test]
    fn test_unknown_ip_is_never_escalated() {
        let tollgate = tollgate();
        let client = ClientInfo::unknown();
        for i in 0..30 {
            let findings = tollgate.record_login_failed(
                &client,
                Some(&format!("user{i}@example.com")),
                "invalid_password",
            );
            assert!(findings.is_empty());
        }
        assert!(tollgate.blocked().is_empty());
        assert!(
            tollgate
                .events_for_ip(UNKNOWN, 100)
                .iter()
                .all(|e| e.event_type == AuthEventType::LoginFailed)
        );
    }

    #[test]
    fn test_start_sweep_task_requires_runtime() {
        assert!(!tollgate().start_sweep_task());
    }
}
