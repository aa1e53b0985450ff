//! Bounded in-memory history of authentication events.
//!
//! The log behaves as a ring buffer: appends go to the tail and, once the
//! configured capacity is exceeded, the oldest events are dropped from the
//! head. Reads return owned snapshots so callers never hold the lock.

use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{AuthEvent, AuthEventType};

pub const DEFAULT_CAPACITY: usize = 1000;

/// Lookback used by [`EventLog::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsWindow {
    Hour,
    Day,
    Week,
}

impl StatsWindow {
    pub fn duration(&self) -> Duration {
        match self {
            StatsWindow::Hour => Duration::hours(1),
            StatsWindow::Day => Duration::days(1),
            StatsWindow::Week => Duration::weeks(1),
        }
    }
}

impl FromStr for StatsWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hour" => Ok(StatsWindow::Hour),
            "day" => Ok(StatsWindow::Day),
            "week" => Ok(StatsWindow::Week),
            other => Err(format!("unknown stats window: {other}")),
        }
    }
}

/// Aggregate counts over a [`StatsWindow`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total_events: usize,
    pub successful_logins: usize,
    pub failed_logins: usize,
    pub blocked_attempts: usize,
    pub suspicious_activities: usize,
    #[serde(rename = "uniqueIPs")]
    pub unique_ips: usize,
    pub unique_users: usize,
}

#[derive(Debug)]
pub struct EventLog {
    events: RwLock<VecDeque<AuthEvent>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventLog {
    /// Create a log holding at most `capacity` events (minimum one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<AuthEvent>> {
        self.events.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<AuthEvent>> {
        self.events.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append to the tail, evicting from the head past capacity.
    pub fn append(&self, event: AuthEvent) {
        let mut events = self.write();
        events.push_back(event);
        while events.len() > self.capacity {
            events.pop_front();
        }
    }

    /// Events with `timestamp >= instant`, oldest first.
    pub fn since(&self, instant: DateTime<Utc>) -> Vec<AuthEvent> {
        let mut events: Vec<AuthEvent> = self
            .read()
            .iter()
            .filter(|event| event.timestamp >= instant)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.timestamp);
        events
    }

    /// Most recent events for a user, newest first.
    pub fn for_user(&self, user_id: &str, limit: usize) -> Vec<AuthEvent> {
        self.read()
            .iter()
            .rev()
            .filter(|event| event.user_id.as_deref() == Some(user_id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent events from an IP, newest first.
    pub fn for_ip(&self, ip_address: &str, limit: usize) -> Vec<AuthEvent> {
        self.read()
            .iter()
            .rev()
            .filter(|event| event.ip_address == ip_address)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn stats(&self, window: StatsWindow) -> EventStats {
        self.stats_at(window, Utc::now())
    }

    pub fn stats_at(&self, window: StatsWindow, now: DateTime<Utc>) -> EventStats {
        let events = self.since(now - window.duration());

        let mut stats = EventStats {
            total_events: events.len(),
            ..EventStats::default()
        };
        let mut ips = HashSet::new();
        let mut users = HashSet::new();

        for event in &events {
            match event.event_type {
                AuthEventType::LoginSuccess => stats.successful_logins += 1,
                AuthEventType::LoginFailed => stats.failed_logins += 1,
                AuthEventType::SuspiciousActivity => stats.suspicious_activities += 1,
                event_type if event_type.is_blocked_login() => stats.blocked_attempts += 1,
                _ => {}
            }
            ips.insert(event.ip_address.as_str());
            if let Some(user_id) = event.user_id.as_deref() {
                users.insert(user_id);
            }
        }

        stats.unique_ips = ips.len();
        stats.unique_users = users.len();
        stats
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ClientInfo;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn event(event_type: AuthEventType, ip: &str, at: DateTime<Utc>) -> AuthEvent {
        AuthEvent::new(event_type, &ClientInfo::new(ip, "test-agent")).at(at)
    }

    #[test]
    fn test_append_evicts_oldest_past_capacity() {
        let log = EventLog::new(1000);
        let first = event(AuthEventType::LoginFailed, "10.0.0.1", t0());
        let first_id = first.id.clone();
        log.append(first);

        for i in 1..=1000 {
            log.append(event(
                AuthEventType::LoginFailed,
                "10.0.0.2",
                t0() + Duration::seconds(i),
            ));
        }

        assert_eq!(log.len(), 1000);
        assert!(log.since(t0()).iter().all(|e| e.id != first_id));
        assert!(log.for_ip("10.0.0.1", 10).is_empty());
    }

    #[test]
    fn test_since_is_chronological_and_inclusive() {
        let log = EventLog::default();
        log.append(event(AuthEventType::LoginSuccess, "a", t0() + Duration::minutes(2)));
        log.append(event(AuthEventType::LoginSuccess, "b", t0()));
        log.append(event(AuthEventType::LoginSuccess, "c", t0() - Duration::minutes(1)));

        let events = log.since(t0());
        let ips: Vec<_> = events.iter().map(|e| e.ip_address.as_str()).collect();
        assert_eq!(ips, vec!["b", "a"]);
    }

    #[test]
    fn test_for_user_and_ip_are_newest_first_and_capped() {
        let log = EventLog::default();
        for i in 0..5 {
            log.append(
                event(AuthEventType::LoginSuccess, "1.2.3.4", t0() + Duration::minutes(i))
                    .with_user_id("u1")
                    .with_metadata("n", i),
            );
        }
        log.append(event(AuthEventType::LoginSuccess, "5.6.7.8", t0()).with_user_id("u2"));

        let recent = log.for_user("u1", 3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp, t0() + Duration::minutes(4));
        assert_eq!(recent[2].timestamp, t0() + Duration::minutes(2));

        assert_eq!(log.for_ip("1.2.3.4", 10).len(), 5);
        assert_eq!(log.for_ip("5.6.7.8", 10).len(), 1);
    }

    #[test]
    fn test_stats_counts_by_window() {
        let log = EventLog::default();
        let now = t0();

        log.append(event(AuthEventType::LoginSuccess, "1.1.1.1", now).with_user_id("u1"));
        log.append(event(AuthEventType::LoginFailed, "1.1.1.1", now));
        log.append(event(AuthEventType::LoginFailed, "2.2.2.2", now));
        log.append(event(AuthEventType::LoginBlockedRateLimit, "2.2.2.2", now));
        log.append(event(AuthEventType::LoginBlockedAccountLocked, "3.3.3.3", now));
        log.append(event(AuthEventType::SuspiciousActivity, "2.2.2.2", now));
        log.append(
            event(AuthEventType::LoginSuccess, "4.4.4.4", now - Duration::hours(3))
                .with_user_id("u2"),
        );

        let hour = log.stats_at(StatsWindow::Hour, now);
        assert_eq!(hour.total_events, 6);
        assert_eq!(hour.successful_logins, 1);
        assert_eq!(hour.failed_logins, 2);
        assert_eq!(hour.blocked_attempts, 2);
        assert_eq!(hour.suspicious_activities, 1);
        assert_eq!(hour.unique_ips, 3);
        assert_eq!(hour.unique_users, 1);

        let day = log.stats_at(StatsWindow::Day, now);
        assert_eq!(day.total_events, 7);
        assert_eq!(day.unique_ips, 4);
        assert_eq!(day.unique_users, 2);
    }

    #[test]
    fn test_stats_serializes_with_expected_keys() {
        let json = serde_json::to_value(EventStats::default()).unwrap();
        assert!(json.get("uniqueIPs").is_some());
        assert!(json.get("uniqueUsers").is_some());
        assert!(json.get("blockedAttempts").is_some());
    }

    #[test]
    fn test_stats_window_from_str() {
        assert_eq!("hour".parse::<StatsWindow>(), Ok(StatsWindow::Hour));
        assert_eq!("Week".parse::<StatsWindow>(), Ok(StatsWindow::Week));
        assert!("month".parse::<StatsWindow>().is_err());
    }

    #[test]
    fn test_clear() {
        let log = EventLog::new(0);
        assert_eq!(log.capacity(), 1);
        log.append(event(AuthEventType::Logout, "1.1.1.1", t0()));
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
    }
}
