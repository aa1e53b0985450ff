//! Rate limiter composing the window store and the block list.
//!
//! This is the decision API the request layer calls before processing an
//! authentication attempt. The block list is always consulted before any
//! quota, and a block and an exhausted quota produce the same
//! [`Decision::Denied`] so callers cannot tell which one they hit.
//!
//! # Example
//!
//! ```rust
//! use tollgate_core::limiter::{Action, RateLimiter};
//! use tollgate_core::window::Scope;
//!
//! let limiter = RateLimiter::default();
//! let decision = limiter.check(Action::Login, Scope::Ip, "198.51.100.7");
//! assert!(decision.is_allowed());
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    block_list::{BlockEntry, BlockList, BlockStatus},
    config::{EmergencyConfig, LimitsConfig, TollgateConfig},
    window::{LimitDecision, Scope, WindowEntry, WindowStore},
};

const RAPID_NAMESPACE: &str = "rapid";

/// The named limit families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Login,
    Register,
    PasswordReset,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Login, Action::Register, Action::PasswordReset];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Login => "login",
            Action::Register => "register",
            Action::PasswordReset => "password_reset",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a rate-limit check as seen by the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    /// `remaining` and `reset_at` are `None` when no limit applies.
    Allowed {
        remaining: Option<u32>,
        reset_at: Option<DateTime<Utc>>,
    },
    Denied { retry_after_seconds: u64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Decision::Denied {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            Decision::Allowed { .. } => None,
        }
    }
}

impl From<LimitDecision> for Decision {
    fn from(decision: LimitDecision) -> Self {
        if decision.allowed {
            Decision::Allowed {
                remaining: Some(decision.remaining),
                reset_at: Some(decision.reset_at),
            }
        } else {
            Decision::Denied {
                retry_after_seconds: decision.retry_after_seconds.unwrap_or(0),
            }
        }
    }
}

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub windows: usize,
    pub blocks: usize,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: WindowStore,
    blocks: BlockList,
    limits: LimitsConfig,
    emergency: EmergencyConfig,
}

impl RateLimiter {
    pub fn new(limits: LimitsConfig, emergency: EmergencyConfig) -> Self {
        Self {
            windows: WindowStore::new(),
            blocks: BlockList::new(),
            limits,
            emergency,
        }
    }

    pub fn from_config(config: &TollgateConfig) -> Self {
        Self::new(config.limits.clone(), config.emergency.clone())
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    pub fn emergency(&self) -> &EmergencyConfig {
        &self.emergency
    }

    fn action_key(action: Action, identifier: &str) -> String {
        format!("{action}:{identifier}")
    }

    fn rapid_key(identifier: &str) -> String {
        format!("{RAPID_NAMESPACE}:{identifier}")
    }

    pub fn check(&self, action: Action, scope: Scope, identifier: &str) -> Decision {
        self.check_at(action, scope, identifier, Utc::now())
    }

    /// Decide whether an attempt may proceed, consuming quota if it may.
    ///
    /// IP checks consult the block list before any quota.
    pub fn check_at(
        &self,
        action: Action,
        scope: Scope,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Decision {
        let status = match scope {
            Scope::Ip => self.blocks.is_blocked_at(identifier, now),
            Scope::User => BlockStatus::default(),
        };
        if status.blocked {
            tracing::debug!(
                action = %action,
                scope = %scope,
                identifier = identifier,
                "Denied blocked identifier"
            );
            return Decision::Denied {
                retry_after_seconds: status.retry_after_seconds.unwrap_or(0),
            };
        }

        let Some(rule) = self.limits.rule(action, scope) else {
            return Decision::Allowed {
                remaining: None,
                reset_at: None,
            };
        };

        let decision: Decision = self
            .windows
            .check_limit_at(
                &Self::action_key(action, identifier),
                scope,
                rule.limit,
                rule.window,
                now,
            )
            .into();

        if !decision.is_allowed() {
            tracing::debug!(
                action = %action,
                scope = %scope,
                identifier = identifier,
                retry_after_seconds = ?decision.retry_after_seconds(),
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Raw fixed-window check against an arbitrary limit.
    pub fn check_limit(
        &self,
        identifier: &str,
        scope: Scope,
        limit: u32,
        window: Duration,
    ) -> LimitDecision {
        self.windows.check_limit(identifier, scope, limit, window)
    }

    pub fn check_limit_at(
        &self,
        identifier: &str,
        scope: Scope,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> LimitDecision {
        self.windows
            .check_limit_at(identifier, scope, limit, window, now)
    }

    pub fn record_attempt(&self, action: Action, scope: Scope, identifier: &str) {
        self.windows
            .record_attempt(&Self::action_key(action, identifier), scope);
    }

    /// Clear the counter for an action, e.g. after a successful login.
    pub fn reset_limit(&self, action: Action, scope: Scope, identifier: &str) -> bool {
        self.windows
            .reset_limit(&Self::action_key(action, identifier), scope)
    }

    pub fn stats(&self, action: Action, scope: Scope, identifier: &str) -> Option<WindowEntry> {
        self.windows
            .stats(&Self::action_key(action, identifier), scope)
    }

    pub fn stats_at(
        &self,
        action: Action,
        scope: Scope,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Option<WindowEntry> {
        self.windows
            .stats_at(&Self::action_key(action, identifier), scope, now)
    }

    pub fn is_blocked(&self, identifier: &str) -> BlockStatus {
        self.blocks.is_blocked(identifier)
    }

    pub fn is_blocked_at(&self, identifier: &str, now: DateTime<Utc>) -> BlockStatus {
        self.blocks.is_blocked_at(identifier, now)
    }

    pub fn block(&self, identifier: &str, reason: &str, duration: Duration) -> BlockEntry {
        self.blocks.block(identifier, reason, duration)
    }

    pub fn block_at(
        &self,
        identifier: &str,
        reason: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> BlockEntry {
        self.blocks.block_at(identifier, reason, duration, now)
    }

    pub fn unblock(&self, identifier: &str) -> bool {
        self.blocks.unblock(identifier)
    }

    /// Snapshot of all active blocks.
    pub fn blocked(&self) -> HashMap<String, BlockEntry> {
        self.blocks.list()
    }

    pub fn blocked_at(&self, now: DateTime<Utc>) -> HashMap<String, BlockEntry> {
        self.blocks.list_at(now)
    }

    pub fn record_login_attempt(&self, ip_address: &str) -> bool {
        self.record_login_attempt_at(ip_address, Utc::now())
    }

    /// Count a login attempt from `ip_address` and escalate if it is rapid.
    pub fn record_login_attempt_at(&self, ip_address: &str, now: DateTime<Utc>) -> bool {
        self.windows.hit_at(
            &Self::rapid_key(ip_address),
            Scope::Ip,
            self.emergency.rapid_window,
            now,
        );
        self.check_rapid_attempts_at(ip_address, now)
    }

    pub fn check_rapid_attempts(&self, identifier: &str) -> bool {
        self.check_rapid_attempts_at(identifier, Utc::now())
    }

    /// Block `identifier` if it crossed the rapid-attempt threshold.
    ///
    /// Returns `true` only for the call that performed the block: the
    /// tracking entry is consumed atomically before blocking.
    pub fn check_rapid_attempts_at(&self, identifier: &str, now: DateTime<Utc>) -> bool {
        let threshold = self.emergency.rapid_attempts_threshold;
        let rapid_window = self.emergency.rapid_window;

        let Some(entry) =
            self.windows
                .take_if_at(&Self::rapid_key(identifier), Scope::Ip, now, |entry| {
                    entry.count >= threshold
                        && entry.last_attempt_at - entry.window_started_at <= rapid_window
                })
        else {
            return false;
        };

        let seconds = (entry.last_attempt_at - entry.window_started_at)
            .num_seconds()
            .max(0);
        let reason = format!(
            "rapid_authentication_attempts: {} attempts in {} seconds",
            entry.count, seconds
        );
        self.blocks
            .block_at(identifier, &reason, self.emergency.block_duration, now);

        true
    }

    /// Sweep expired windows and blocks from both stores.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let report = SweepReport {
            windows: self.windows.sweep(now),
            blocks: self.blocks.sweep(now),
        };

        if report.windows > 0 || report.blocks > 0 {
            tracing::info!(
                windows = report.windows,
                blocks = report.blocks,
                "Swept expired rate limit entries"
            );
        }

        report
    }

    pub fn clear(&self) {
        self.windows.clear();
        self.blocks.clear();
    }
}
