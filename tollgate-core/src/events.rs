//! Authentication events
//!
//! An [`AuthEvent`] is an immutable record of one authentication outcome. The
//! request layer creates one as soon as the outcome is known and hands it to
//! the event log, which owns it from then on.
//!
//! | Field            | Type                  | Description                                  |
//! | ---------------- | --------------------- | -------------------------------------------- |
//! | `id`             | `EventId`             | Unique `evt_` prefixed identifier.           |
//! | `event_type`     | `AuthEventType`       | What happened.                               |
//! | `user_id`        | `Option<String>`      | Authenticated user, if known.                |
//! | `email`          | `Option<String>`      | Email the caller presented, if any.          |
//! | `ip_address`     | `String`              | Caller IP, `"unknown"` when unavailable.     |
//! | `user_agent`     | `String`              | Caller user agent, `"unknown"` by default.   |
//! | `success`        | `bool`                | Whether the operation succeeded.             |
//! | `failure_reason` | `Option<String>`      | Why it failed.                               |
//! | `metadata`       | `Metadata`            | Free-form primitive values.                  |
//! | `risk_score`     | `Option<u8>`          | Set on `suspicious_activity` events.         |
//! | `timestamp`      | `DateTime<Utc>`       | When the outcome was known.                  |

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::EventId;

/// Placeholder used when a request carries no usable IP or user agent.
pub const UNKNOWN: &str = "unknown";

/// The closed set of authentication event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventType {
    LoginSuccess,
    LoginFailed,
    LoginBlockedRateLimit,
    LoginBlockedAccountLocked,
    Logout,
    RegisterSuccess,
    RegisterFailed,
    PasswordResetRequest,
    PasswordResetSuccess,
    PasswordChange,
    TwoFactorEnabled,
    TwoFactorDisabled,
    TwoFactorSuccess,
    TwoFactorFailed,
    SuspiciousActivity,
}

impl AuthEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventType::LoginSuccess => "login_success",
            AuthEventType::LoginFailed => "login_failed",
            AuthEventType::LoginBlockedRateLimit => "login_blocked_rate_limit",
            AuthEventType::LoginBlockedAccountLocked => "login_blocked_account_locked",
            AuthEventType::Logout => "logout",
            AuthEventType::RegisterSuccess => "register_success",
            AuthEventType::RegisterFailed => "register_failed",
            AuthEventType::PasswordResetRequest => "password_reset_request",
            AuthEventType::PasswordResetSuccess => "password_reset_success",
            AuthEventType::PasswordChange => "password_change",
            AuthEventType::TwoFactorEnabled => "two_factor_enabled",
            AuthEventType::TwoFactorDisabled => "two_factor_disabled",
            AuthEventType::TwoFactorSuccess => "two_factor_success",
            AuthEventType::TwoFactorFailed => "two_factor_failed",
            AuthEventType::SuspiciousActivity => "suspicious_activity",
        }
    }

    /// The `success` flag an event of this type carries by default.
    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            AuthEventType::LoginFailed
                | AuthEventType::LoginBlockedRateLimit
                | AuthEventType::LoginBlockedAccountLocked
                | AuthEventType::RegisterFailed
                | AuthEventType::TwoFactorFailed
                | AuthEventType::SuspiciousActivity
        )
    }

    pub fn is_blocked_login(&self) -> bool {
        matches!(
            self,
            AuthEventType::LoginBlockedRateLimit | AuthEventType::LoginBlockedAccountLocked
        )
    }
}

impl std::fmt::Display for AuthEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A primitive metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<String>),
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<u32> for MetadataValue {
    fn from(value: u32) -> Self {
        MetadataValue::Int(i64::from(value))
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        MetadataValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(value: Vec<String>) -> Self {
        MetadataValue::List(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// Who is on the other end of the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN)
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self::unknown()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEvent {
    pub id: EventId,
    pub event_type: AuthEventType,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub metadata: Metadata,
    pub risk_score: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

impl AuthEvent {
    /// Create an event for `client` timestamped now.
    ///
    /// `success` defaults from the event type and can be overridden.
    pub fn new(event_type: AuthEventType, client: &ClientInfo) -> Self {
        Self {
            id: EventId::new_random(),
            event_type,
            user_id: None,
            email: None,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            success: event_type.is_success(),
            failure_reason: None,
            metadata: Metadata::new(),
            risk_score: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_risk_score(mut self, risk_score: u8) -> Self {
        self.risk_score = Some(risk_score.min(10));
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
