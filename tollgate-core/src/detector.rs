//! Heuristic detection of suspicious authentication behavior.
//!
//! The detector is stateless. It looks at the event that was just recorded
//! and a snapshot of recent history, and reports every rule that fires:
//!
//! | Pattern                          | Trigger                                                    | Risk            |
//! | -------------------------------- | ---------------------------------------------------------- | --------------- |
//! | `multiple_failed_logins_same_ip` | >= 5 `login_failed` from the IP in 1 h                     | `min(10, count)`|
//! | `multiple_accounts_same_ip`      | >= 3 distinct emails among those failures                  | 9               |
//! | `login_from_new_location`        | `login_success` from an IP unseen for the user in 24 h     | 6               |
//! | `rapid_authentication_attempts`  | >= 10 events of any type from the IP in 5 min              | 8               |
//! | `unusual_hour_login`             | `login_success` between 02:00 and 05:59 local time         | 4               |
//!
//! A user's first successful login of the day never counts as a new location:
//! there must be at least one previously seen IP to compare against.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    event_log::EventLog,
    events::{AuthEvent, AuthEventType, Metadata, MetadataValue, UNKNOWN},
};

const FAILED_LOGIN_THRESHOLD: usize = 5;
const DISTINCT_ACCOUNT_THRESHOLD: usize = 3;
const RAPID_EVENT_THRESHOLD: usize = 10;
const UNUSUAL_HOURS: std::ops::RangeInclusive<u32> = 2..=5;

/// Longest lookback any rule needs.
pub const DETECTION_LOOKBACK_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    MultipleFailedLoginsSameIp,
    MultipleAccountsSameIp,
    LoginFromNewLocation,
    RapidAuthenticationAttempts,
    UnusualHourLogin,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::MultipleFailedLoginsSameIp => "multiple_failed_logins_same_ip",
            PatternKind::MultipleAccountsSameIp => "multiple_accounts_same_ip",
            PatternKind::LoginFromNewLocation => "login_from_new_location",
            PatternKind::RapidAuthenticationAttempts => "rapid_authentication_attempts",
            PatternKind::UnusualHourLogin => "unusual_hour_login",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence attached to a finding, one shape per pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternMetadata {
    FailedLogins {
        ip_address: String,
        count: usize,
        window_minutes: i64,
    },
    MultipleAccounts {
        ip_address: String,
        emails: Vec<String>,
    },
    NewLocation {
        user_id: String,
        ip_address: String,
        known_ips: Vec<String>,
    },
    RapidAttempts {
        ip_address: String,
        count: usize,
        window_minutes: i64,
    },
    UnusualHour {
        user_id: Option<String>,
        hour: u32,
    },
}

impl PatternMetadata {
    /// Flatten into the string-keyed map stored on events.
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        match self {
            PatternMetadata::FailedLogins {
                ip_address,
                count,
                window_minutes,
            }
            | PatternMetadata::RapidAttempts {
                ip_address,
                count,
                window_minutes,
            } => {
                metadata.insert("ip_address".into(), ip_address.as_str().into());
                metadata.insert("count".into(), (*count).into());
                metadata.insert("window_minutes".into(), (*window_minutes).into());
            }
            PatternMetadata::MultipleAccounts { ip_address, emails } => {
                metadata.insert("ip_address".into(), ip_address.as_str().into());
                metadata.insert("count".into(), emails.len().into());
                metadata.insert("emails".into(), emails.clone().into());
            }
            PatternMetadata::NewLocation {
                user_id,
                ip_address,
                known_ips,
            } => {
                metadata.insert("user_id".into(), user_id.as_str().into());
                metadata.insert("ip_address".into(), ip_address.as_str().into());
                metadata.insert("known_ips".into(), known_ips.clone().into());
            }
            PatternMetadata::UnusualHour { user_id, hour } => {
                if let Some(user_id) = user_id {
                    metadata.insert("user_id".into(), user_id.as_str().into());
                }
                metadata.insert("hour".into(), MetadataValue::Int(i64::from(*hour)));
            }
        }
        metadata
    }
}

/// One finding produced by the detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousActivityPattern {
    pub kind: PatternKind,
    pub description: String,
    /// 0 to 10.
    pub risk_score: u8,
    pub metadata: PatternMetadata,
}

impl SuspiciousActivityPattern {
    /// The `suspicious_activity` event recording this finding.
    pub fn to_event(&self, trigger: &AuthEvent) -> AuthEvent {
        let mut event = AuthEvent {
            id: Default::default(),
            event_type: AuthEventType::SuspiciousActivity,
            user_id: trigger.user_id.clone(),
            email: trigger.email.clone(),
            ip_address: trigger.ip_address.clone(),
            user_agent: trigger.user_agent.clone(),
            success: false,
            failure_reason: Some(self.kind.as_str().to_string()),
            metadata: self.metadata.to_metadata(),
            risk_score: Some(self.risk_score),
            timestamp: trigger.timestamp,
        };
        event
            .metadata
            .insert("trigger_event_id".into(), trigger.id.as_str().into());
        event
    }
}

#[derive(Debug, Clone)]
pub struct PatternDetector {
    utc_offset: FixedOffset,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self::new(Utc.fix())
    }
}

impl PatternDetector {
    /// `utc_offset` decides what "local hour" means for the unusual-hour rule.
    pub fn new(utc_offset: FixedOffset) -> Self {
        Self { utc_offset }
    }

    /// Evaluate `event` against a snapshot of `log`.
    ///
    /// The event is expected to already be in the log.
    pub fn evaluate(&self, event: &AuthEvent, log: &EventLog) -> Vec<SuspiciousActivityPattern> {
        let since = event
            .timestamp
            .checked_sub_signed(Duration::hours(DETECTION_LOOKBACK_HOURS))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent = log.since(since);
        self.evaluate_with(event, &recent)
    }

    /// Evaluate `event` against `recent`, which should include `event` itself.
    pub fn evaluate_with(
        &self,
        event: &AuthEvent,
        recent: &[AuthEvent],
    ) -> Vec<SuspiciousActivityPattern> {
        if event.event_type == AuthEventType::SuspiciousActivity {
            return Vec::new();
        }

        let now = event.timestamp;
        let mut findings = Vec::new();

        // Clients without an address would all share one bucket
        if event.ip_address != UNKNOWN {
            findings.extend(failed_logins_same_ip(event, recent, now));
            findings.extend(multiple_accounts_same_ip(event, recent, now));
            findings.extend(login_from_new_location(event, recent, now));
            findings.extend(rapid_attempts(event, recent, now));
        }
        findings.extend(self.unusual_hour(event));

        for finding in &findings {
            tracing::warn!(
                pattern = %finding.kind,
                risk_score = finding.risk_score,
                ip_address = %event.ip_address,
                user_id = ?event.user_id,
                "Suspicious authentication activity detected"
            );
        }

        findings
    }

    fn unusual_hour(&self, event: &AuthEvent) -> Option<SuspiciousActivityPattern> {
        if event.event_type != AuthEventType::LoginSuccess {
            return None;
        }

        let hour = event.timestamp.with_timezone(&self.utc_offset).hour();
        if !UNUSUAL_HOURS.contains(&hour) {
            return None;
        }

        Some(SuspiciousActivityPattern {
            kind: PatternKind::UnusualHourLogin,
            description: format!("Successful login at unusual hour {hour:02}:00"),
            risk_score: 4,
            metadata: PatternMetadata::UnusualHour {
                user_id: event.user_id.clone(),
                hour,
            },
        })
    }
}

fn failed_logins_from<'a>(
    ip_address: &'a str,
    recent: &'a [AuthEvent],
    since: DateTime<Utc>,
) -> impl Iterator<Item = &'a AuthEvent> + 'a {
    recent.iter().filter(move |e| {
        e.event_type == AuthEventType::LoginFailed
            && e.ip_address == ip_address
            && e.timestamp >= since
    })
}

fn failed_logins_same_ip(
    event: &AuthEvent,
    recent: &[AuthEvent],
    now: DateTime<Utc>,
) -> Option<SuspiciousActivityPattern> {
    let window = Duration::hours(1);
    let count = failed_logins_from(&event.ip_address, recent, now - window).count();
    if count < FAILED_LOGIN_THRESHOLD {
        return None;
    }

    Some(SuspiciousActivityPattern {
        kind: PatternKind::MultipleFailedLoginsSameIp,
        description: format!(
            "{count} failed login attempts from {} in the last hour",
            event.ip_address
        ),
        risk_score: count.min(10) as u8,
        metadata: PatternMetadata::FailedLogins {
            ip_address: event.ip_address.clone(),
            count,
            window_minutes: window.num_minutes(),
        },
    })
}

fn multiple_accounts_same_ip(
    event: &AuthEvent,
    recent: &[AuthEvent],
    now: DateTime<Utc>,
) -> Option<SuspiciousActivityPattern> {
    let emails: BTreeSet<&str> =
        failed_logins_from(&event.ip_address, recent, now - Duration::hours(1))
            .filter_map(|e| e.email.as_deref())
            .filter(|email| !email.is_empty())
            .collect();
    if emails.len() < DISTINCT_ACCOUNT_THRESHOLD {
        return None;
    }

    Some(SuspiciousActivityPattern {
        kind: PatternKind::MultipleAccountsSameIp,
        description: format!(
            "Failed logins for {} different accounts from {}",
            emails.len(),
            event.ip_address
        ),
        risk_score: 9,
        metadata: PatternMetadata::MultipleAccounts {
            ip_address: event.ip_address.clone(),
            emails: emails.into_iter().map(str::to_string).collect(),
        },
    })
}

fn login_from_new_location(
    event: &AuthEvent,
    recent: &[AuthEvent],
    now: DateTime<Utc>,
) -> Option<SuspiciousActivityPattern> {
    if event.event_type != AuthEventType::LoginSuccess {
        return None;
    }
    let user_id = event.user_id.as_deref()?;
    let since = now - Duration::hours(DETECTION_LOOKBACK_HOURS);

    let known_ips: BTreeSet<&str> = recent
        .iter()
        .filter(|e| {
            e.id != event.id
                && e.event_type == AuthEventType::LoginSuccess
                && e.user_id.as_deref() == Some(user_id)
                && e.ip_address != UNKNOWN
                && e.timestamp >= since
        })
        .map(|e| e.ip_address.as_str())
        .collect();

    if known_ips.is_empty() || known_ips.contains(event.ip_address.as_str()) {
        return None;
    }

    Some(SuspiciousActivityPattern {
        kind: PatternKind::LoginFromNewLocation,
        description: format!(
            "User {user_id} logged in from new IP {}",
            event.ip_address
        ),
        risk_score: 6,
        metadata: PatternMetadata::NewLocation {
            user_id: user_id.to_string(),
            ip_address: event.ip_address.clone(),
            known_ips: known_ips.into_iter().map(str::to_string).collect(),
        },
    })
}

fn rapid_attempts(
    event: &AuthEvent,
    recent: &[AuthEvent],
    now: DateTime<Utc>,
) -> Option<SuspiciousActivityPattern> {
    let window = Duration::minutes(5);
    let since = now - window;
    let count = recent
        .iter()
        .filter(|e| e.ip_address == event.ip_address && e.timestamp >= since)
        .count();
    if count < RAPID_EVENT_THRESHOLD {
        return None;
    }

    Some(SuspiciousActivityPattern {
        kind: PatternKind::RapidAuthenticationAttempts,
        description: format!(
            "{count} authentication events from {} in 5 minutes",
            event.ip_address
        ),
        risk_score: 8,
        metadata: PatternMetadata::RapidAttempts {
            ip_address: event.ip_address.clone(),
            count,
            window_minutes: window.num_minutes(),
        },
    })
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

    fn failed(ip: &str, email: &str, at: DateTime<Utc>) -> AuthEvent {
        AuthEvent::new(AuthEventType::LoginFailed, &ClientInfo::new(ip, "test"))
            .with_email(email)
            .at(at)
    }

    fn success(user: &str, ip: &str, at: DateTime<Utc>) -> AuthEvent {
        AuthEvent::new(AuthEventType::LoginSuccess, &ClientInfo::new(ip, "test"))
            .with_user_id(user)
            .at(at)
    }

    fn kinds(findings: &[SuspiciousActivityPattern]) -> Vec<PatternKind> {
        findings.iter().map(|f| f.kind).collect()
    }

    #[test]
    fn test_five_failed_logins_same_ip() {
        let detector = PatternDetector::default();
        let mut recent: Vec<AuthEvent> = (0..5)
            .map(|i| failed("1.2.3.4", "a@example.com", t0() + Duration::minutes(i * 10)))
            .collect();

        let trigger = recent[4].clone();
        let findings = detector.evaluate_with(&trigger, &recent);
        assert_eq!(kinds(&findings), vec![PatternKind::MultipleFailedLoginsSameIp]);
        assert_eq!(findings[0].risk_score, 5);

        // A sixth failure is evaluated against the refreshed window
        let sixth = failed("1.2.3.4", "a@example.com", t0() + Duration::minutes(50));
        recent.push(sixth.clone());
        let findings = detector.evaluate_with(&sixth, &recent);
        assert_eq!(findings[0].risk_score, 6);
    }

    #[test]
    fn test_failed_logins_outside_hour_are_ignored() {
        let detector = PatternDetector::default();
        let mut recent: Vec<AuthEvent> = (0..4)
            .map(|_| failed("1.2.3.4", "a@example.com", t0() - Duration::hours(2)))
            .collect();
        let trigger = failed("1.2.3.4", "a@example.com", t0());
        recent.push(trigger.clone());

        assert!(detector.evaluate_with(&trigger, &recent).is_empty());
    }

    #[test]
    fn test_risk_is_capped_at_ten() {
        let detector = PatternDetector::default();
        let recent: Vec<AuthEvent> = (0..12)
            .map(|i| failed("1.2.3.4", "", t0() + Duration::minutes(i)))
            .collect();
        let trigger = recent[11].clone();

        let findings = detector.evaluate_with(&trigger, &recent);
        let failed = findings
            .iter()
            .find(|f| f.kind == PatternKind::MultipleFailedLoginsSameIp)
            .unwrap();
        assert_eq!(failed.risk_score, 10);
        // Empty emails never count as distinct accounts
        assert!(
            !findings
                .iter()
                .any(|f| f.kind == PatternKind::MultipleAccountsSameIp)
        );
    }

    #[test]
    fn test_multiple_accounts_same_ip() {
        let detector = PatternDetector::default();
        let recent = vec![
            failed("1.2.3.4", "a@example.com", t0()),
            failed("1.2.3.4", "b@example.com", t0()),
            failed("1.2.3.4", "c@example.com", t0()),
        ];

        let findings = detector.evaluate_with(&recent[2], &recent);
        assert_eq!(kinds(&findings), vec![PatternKind::MultipleAccountsSameIp]);
        assert_eq!(findings[0].risk_score, 9);
        assert_eq!(
            findings[0].metadata,
            PatternMetadata::MultipleAccounts {
                ip_address: "1.2.3.4".to_string(),
                emails: vec![
                    "a@example.com".to_string(),
                    "b@example.com".to_string(),
                    "c@example.com".to_string(),
                ],
            }
        );
    }

    #[test]
    fn test_login_from_new_location() {
        let detector = PatternDetector::default();
        let first = success("u2", "10.0.0.1", t0());
        assert!(detector.evaluate_with(&first, &[first.clone()]).is_empty());

        let second = success("u2", "10.0.0.2", t0() + Duration::hours(1));
        let recent = vec![first.clone(), second.clone()];
        let findings = detector.evaluate_with(&second, &recent);
        assert_eq!(kinds(&findings), vec![PatternKind::LoginFromNewLocation]);
        assert_eq!(findings[0].risk_score, 6);

        let third = success("u2", "10.0.0.1", t0() + Duration::hours(2));
        let recent = vec![first, second, third.clone()];
        assert!(detector.evaluate_with(&third, &recent).is_empty());
    }

    #[test]
    fn test_new_location_ignores_other_users_and_old_logins() {
        let detector = PatternDetector::default();
        let other_user = success("u3", "10.0.0.1", t0());
        let stale = success("u2", "10.0.0.1", t0() - Duration::hours(25));
        let trigger = success("u2", "10.0.0.2", t0() + Duration::minutes(5));
        let recent = vec![stale, other_user, trigger.clone()];

        assert!(detector.evaluate_with(&trigger, &recent).is_empty());
    }

    #[test]
    fn test_rapid_attempts() {
        let detector = PatternDetector::default();
        let client = ClientInfo::new("1.2.3.4", "test");
        let recent: Vec<AuthEvent> = (0..10)
            .map(|i| {
                AuthEvent::new(AuthEventType::PasswordResetRequest, &client)
                    .at(t0() + Duration::seconds(i * 20))
            })
            .collect();

        let findings = detector.evaluate_with(&recent[9], &recent);
        assert_eq!(kinds(&findings), vec![PatternKind::RapidAuthenticationAttempts]);
        assert_eq!(findings[0].risk_score, 8);
    }

    #[test]
    fn test_unknown_ip_skips_address_rules() {
        let detector = PatternDetector::default();
        let recent: Vec<AuthEvent> = (0..12)
            .map(|i| failed(UNKNOWN, &format!("user{i}@example.com"), t0() + Duration::seconds(i)))
            .collect();

        assert!(detector.evaluate_with(&recent[11], &recent).is_empty());

        // A missing address is not a location
        let earlier = success("u2", UNKNOWN, t0());
        let trigger = success("u2", "10.0.0.2", t0() + Duration::minutes(5));
        let recent = vec![earlier, trigger.clone()];
        assert!(detector.evaluate_with(&trigger, &recent).is_empty());

        let night = success("u2", UNKNOWN, t0() - Duration::hours(9));
        let findings = detector.evaluate_with(&night, &[night.clone()]);
        assert_eq!(kinds(&findings), vec![PatternKind::UnusualHourLogin]);
    }

    #[test]
    fn test_unusual_hour_login() {
        let detector = PatternDetector::default();
        let at_three = DateTime::parse_from_rfc3339("2025-03-01T03:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = success("u1", "10.0.0.1", at_three);

        let findings = detector.evaluate_with(&event, &[event.clone()]);
        assert_eq!(kinds(&findings), vec![PatternKind::UnusualHourLogin]);
        assert_eq!(findings[0].risk_score, 4);

        // 03:15 UTC is 12:15 in UTC+9
        let tokyo = PatternDetector::new(FixedOffset::east_opt(9 * 3600).unwrap());
        assert!(tokyo.evaluate_with(&event, &[event.clone()]).is_empty());

        let at_six = DateTime::parse_from_rfc3339("2025-03-01T06:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = success("u1", "10.0.0.1", at_six);
        assert!(detector.evaluate_with(&event, &[event.clone()]).is_empty());
    }

    #[test]
    fn test_suspicious_events_are_never_evaluated() {
        let detector = PatternDetector::default();
        let recent: Vec<AuthEvent> = (0..10)
            .map(|_| failed("1.2.3.4", "a@example.com", t0()))
            .collect();
        let finding = detector.evaluate_with(&recent[9], &recent).remove(0);

        let derived = finding.to_event(&recent[9]);
        assert_eq!(derived.event_type, AuthEventType::SuspiciousActivity);
        assert!(!derived.success);
        assert_eq!(derived.failure_reason.as_deref(), Some(finding.kind.as_str()));
        assert_eq!(derived.risk_score, Some(finding.risk_score));
        assert!(detector.evaluate_with(&derived, &recent).is_empty());
    }

    #[test]
    fn test_evaluate_reads_from_log() {
        let detector = PatternDetector::default();
        let log = EventLog::default();
        for i in 0..5 {
            log.append(failed("1.2.3.4", "a@example.com", t0() + Duration::seconds(i)));
        }
        let trigger = log.for_ip("1.2.3.4", 1).remove(0);

        let findings = detector.evaluate(&trigger, &log);
        assert_eq!(findings[0].kind, PatternKind::MultipleFailedLoginsSameIp);
    }

    #[test]
    fn test_metadata_flattening() {
        let metadata = PatternMetadata::FailedLogins {
            ip_address: "1.2.3.4".to_string(),
            count: 5,
            window_minutes: 60,
        }
        .to_metadata();

        assert_eq!(
            metadata.get("ip_address"),
            Some(&MetadataValue::String("1.2.3.4".to_string()))
        );
        assert_eq!(metadata.get("count"), Some(&MetadataValue::Int(5)));
    }
}
