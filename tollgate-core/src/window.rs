//! Fixed-window attempt counters.
//!
//! Each `(scope, identifier)` pair owns one [`WindowEntry`]. A window starts
//! on the first attempt and ends at `window_reset_at`; the next attempt after
//! that replaces the entry with a fresh one. Windows do not slide, so a
//! caller can legally make up to `2 x limit` attempts across a window
//! boundary.
//!
//! # Example
//!
//! ```rust
//! use chrono::Duration;
//! use tollgate_core::window::{Scope, WindowStore};
//!
//! let store = WindowStore::new();
//! let decision = store.check_limit("203.0.113.9", Scope::Ip, 5, Duration::minutes(30));
//! assert!(decision.allowed);
//! assert_eq!(decision.remaining, 4);
//! ```

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// The dimension an identifier is limited under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Ip,
    User,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::Ip, Scope::User];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Ip => "ip",
            Scope::User => "user",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter state for one identifier within its current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowEntry {
    pub count: u32,
    pub window_started_at: DateTime<Utc>,
    pub window_reset_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
}

impl WindowEntry {
    fn fresh(now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            count: 0,
            window_started_at: now,
            window_reset_at: deadline(now, window),
            last_attempt_at: now,
        }
    }

    /// Whether the window has ended as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.window_reset_at <= now
    }
}

/// Result of a quota check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// Present on denials; never negative.
    pub retry_after_seconds: Option<u64>,
}

impl LimitDecision {
    fn denied(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            retry_after_seconds: Some(retry_after_seconds(reset_at, now)),
        }
    }
}

/// `now + duration`, saturating at the latest representable instant.
pub fn deadline(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now.checked_add_signed(duration)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Whole seconds until `until`, rounded up and clamped at zero.
pub fn retry_after_seconds(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis as u64).div_ceil(1000)
    }
}

/// Concurrent store of fixed-window counters.
///
/// Updates to a single key happen under that key's shard lock, so the expiry
/// check, the replacement and the increment are one atomic step.
#[derive(Debug, Default)]
pub struct WindowStore {
    entries: DashMap<String, WindowEntry>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(identifier: &str, scope: Scope) -> String {
        format!("{scope}:{identifier}")
    }

    pub fn check_limit(
        &self,
        identifier: &str,
        scope: Scope,
        limit: u32,
        window: Duration,
    ) -> LimitDecision {
        self.check_limit_at(identifier, scope, limit, window, Utc::now())
    }

    /// Consume one attempt from the quota if any remains.
    ///
    /// Invalid input (empty identifier, zero limit, non-positive window)
    /// fails closed with a zero retry delay.
    pub fn check_limit_at(
        &self,
        identifier: &str,
        scope: Scope,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> LimitDecision {
        if identifier.is_empty() || limit == 0 || window <= Duration::zero() {
            tracing::debug!(
                identifier = identifier,
                scope = %scope,
                limit = limit,
                "Rejecting rate limit check with invalid input"
            );
            return LimitDecision::denied(now, now);
        }

        let mut entry = self
            .entries
            .entry(Self::key(identifier, scope))
            .or_insert_with(|| WindowEntry::fresh(now, window));

        if entry.is_expired(now) {
            *entry = WindowEntry::fresh(now, window);
        }

        if entry.count >= limit {
            return LimitDecision::denied(entry.window_reset_at, now);
        }

        entry.count += 1;
        entry.last_attempt_at = now;

        LimitDecision {
            allowed: true,
            remaining: limit - entry.count,
            reset_at: entry.window_reset_at,
            retry_after_seconds: None,
        }
    }

    pub fn record_attempt(&self, identifier: &str, scope: Scope) {
        self.record_attempt_at(identifier, scope, Utc::now());
    }

    /// Touch `last_attempt_at` without consuming quota.
    pub fn record_attempt_at(&self, identifier: &str, scope: Scope, now: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(&Self::key(identifier, scope)) {
            if !entry.is_expired(now) {
                entry.last_attempt_at = now;
            }
        }
    }

    /// Count one attempt without any quota, returning the updated entry.
    pub fn hit_at(
        &self,
        identifier: &str,
        scope: Scope,
        window: Duration,
        now: DateTime<Utc>,
    ) -> WindowEntry {
        let window = window.max(Duration::zero());
        let mut entry = self
            .entries
            .entry(Self::key(identifier, scope))
            .or_insert_with(|| WindowEntry::fresh(now, window));

        if entry.is_expired(now) {
            *entry = WindowEntry::fresh(now, window);
        }

        entry.count = entry.count.saturating_add(1);
        entry.last_attempt_at = now;
        entry.value().clone()
    }

    /// Atomically remove and return the live entry if `predicate` holds.
    pub fn take_if_at(
        &self,
        identifier: &str,
        scope: Scope,
        now: DateTime<Utc>,
        predicate: impl FnOnce(&WindowEntry) -> bool,
    ) -> Option<WindowEntry> {
        self.entries
            .remove_if(&Self::key(identifier, scope), |_, entry| {
                !entry.is_expired(now) && predicate(entry)
            })
            .map(|(_, entry)| entry)
    }

    /// Delete the entry outright. Returns whether one existed.
    pub fn reset_limit(&self, identifier: &str, scope: Scope) -> bool {
        self.entries.remove(&Self::key(identifier, scope)).is_some()
    }

    pub fn stats(&self, identifier: &str, scope: Scope) -> Option<WindowEntry> {
        self.stats_at(identifier, scope, Utc::now())
    }

    /// Snapshot of the current entry. Expired entries read as absent.
    pub fn stats_at(
        &self,
        identifier: &str,
        scope: Scope,
        now: DateTime<Utc>,
    ) -> Option<WindowEntry> {
        self.entries
            .get(&Self::key(identifier, scope))
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value().clone())
    }

    /// Remove every entry whose window ended before `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.window_reset_at >= now;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
