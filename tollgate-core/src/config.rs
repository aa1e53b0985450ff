//! Configuration for rate limits, emergency blocking and detection.
//!
//! Every value has a production default. Configuration is validated once when
//! the service is built; that is the only place where tollgate fails fast.
//!
//! # Example
//!
//! ```rust
//! use chrono::Duration;
//! use tollgate_core::config::{LimitRule, TollgateConfig};
//!
//! let config = TollgateConfig::default()
//!     .with_login_ip_limit(LimitRule::new(10, Duration::minutes(15)))
//!     .with_event_log_capacity(5_000);
//!
//! assert!(config.validate().is_ok());
//! ```

use std::str::FromStr;

use chrono::{Duration, FixedOffset, Offset, Utc};

use crate::{error::ConfigError, limiter::Action, window::Scope};

/// A fixed-window quota: at most `limit` attempts per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitRule {
    pub limit: u32,
    pub window: Duration,
}

impl LimitRule {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Named limits per action and scope. `None` disables the limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitsConfig {
    pub login_ip: Option<LimitRule>,
    pub login_user: Option<LimitRule>,
    pub register_ip: Option<LimitRule>,
    pub register_user: Option<LimitRule>,
    pub password_reset_ip: Option<LimitRule>,
    pub password_reset_user: Option<LimitRule>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            login_ip: Some(LimitRule::new(5, Duration::minutes(30))),
            login_user: Some(LimitRule::new(5, Duration::minutes(30))),
            register_ip: Some(LimitRule::new(3, Duration::hours(2))),
            register_user: None,
            password_reset_ip: Some(LimitRule::new(2, Duration::hours(2))),
            password_reset_user: Some(LimitRule::new(2, Duration::hours(2))),
        }
    }
}

impl LimitsConfig {
    /// Look up the rule for an action and scope.
    pub fn rule(&self, action: Action, scope: Scope) -> Option<LimitRule> {
        match (action, scope) {
            (Action::Login, Scope::Ip) => self.login_ip,
            (Action::Login, Scope::User) => self.login_user,
            (Action::Register, Scope::Ip) => self.register_ip,
            (Action::Register, Scope::User) => self.register_user,
            (Action::PasswordReset, Scope::Ip) => self.password_reset_ip,
            (Action::PasswordReset, Scope::User) => self.password_reset_user,
        }
    }

    fn rule_mut(&mut self, action: Action, scope: Scope) -> &mut Option<LimitRule> {
        match (action, scope) {
            (Action::Login, Scope::Ip) => &mut self.login_ip,
            (Action::Login, Scope::User) => &mut self.login_user,
            (Action::Register, Scope::Ip) => &mut self.register_ip,
            (Action::Register, Scope::User) => &mut self.register_user,
            (Action::PasswordReset, Scope::Ip) => &mut self.password_reset_ip,
            (Action::PasswordReset, Scope::User) => &mut self.password_reset_user,
        }
    }
}

/// Thresholds for escalating from throttling to a hard block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyConfig {
    /// Login attempts from one IP within `rapid_window` that trigger a block.
    pub rapid_attempts_threshold: u32,
    pub rapid_window: Duration,
    pub block_duration: Duration,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            rapid_attempts_threshold: 20,
            rapid_window: Duration::minutes(5),
            block_duration: Duration::hours(24),
        }
    }
}

/// Top-level tollgate configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TollgateConfig {
    pub limits: LimitsConfig,
    pub emergency: EmergencyConfig,
    /// Maximum number of events retained in memory.
    pub event_log_capacity: usize,
    /// How often expired windows and blocks are swept.
    pub sweep_interval: Duration,
    /// Findings at or above this risk score are sent to the alert dispatcher.
    pub alert_risk_threshold: u8,
    /// Findings at or above this risk score block the source IP. Disabled when `None`.
    pub detector_block_threshold: Option<u8>,
    /// Offset used to compute the local hour for the unusual-hour rule.
    ///
    /// "Local" means UTC unless this is set. The host time zone is never
    /// consulted, so detection does not change with the deployment's `TZ`.
    pub utc_offset_seconds: i32,
}

impl Default for TollgateConfig {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            emergency: EmergencyConfig::default(),
            event_log_capacity: 1000,
            sweep_interval: Duration::minutes(5),
            alert_risk_threshold: 8,
            detector_block_threshold: None,
            utc_offset_seconds: 0,
        }
    }
}

impl TollgateConfig {
    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_login_ip_limit(mut self, rule: LimitRule) -> Self {
        self.limits.login_ip = Some(rule);
        self
    }

    pub fn with_login_user_limit(mut self, rule: LimitRule) -> Self {
        self.limits.login_user = Some(rule);
        self
    }

    pub fn with_emergency(mut self, emergency: EmergencyConfig) -> Self {
        self.emergency = emergency;
        self
    }

    pub fn with_event_log_capacity(mut self, capacity: usize) -> Self {
        self.event_log_capacity = capacity;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_detector_block_threshold(mut self, threshold: u8) -> Self {
        self.detector_block_threshold = Some(threshold);
        self
    }

    pub fn with_utc_offset_seconds(mut self, offset: i32) -> Self {
        self.utc_offset_seconds = offset;
        self
    }

    /// The offset for local-hour computations. Falls back to UTC if out of range.
    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_seconds).unwrap_or_else(|| Utc.fix())
    }

    /// Check the configuration for programmer errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for action in Action::ALL {
            for scope in Scope::ALL {
                if let Some(rule) = self.limits.rule(action, scope) {
                    let name = format!("{action}/{scope}");
                    if rule.limit == 0 {
                        return Err(ConfigError::InvalidLimit(name));
                    }
                    check_duration(&name, rule.window)?;
                }
            }
        }

        if self.emergency.rapid_attempts_threshold == 0 {
            return Err(ConfigError::InvalidLimit("rapid_attempts".to_string()));
        }
        check_duration("rapid_attempts", self.emergency.rapid_window)?;
        check_duration("block_duration", self.emergency.block_duration)?;
        check_duration("sweep_interval", self.sweep_interval)?;
        if self.event_log_capacity == 0 {
            return Err(ConfigError::InvalidCapacity(self.event_log_capacity));
        }
        if self.alert_risk_threshold > 10 {
            return Err(ConfigError::InvalidRiskThreshold(self.alert_risk_threshold));
        }
        if let Some(threshold) = self.detector_block_threshold {
            if threshold > 10 {
                return Err(ConfigError::InvalidRiskThreshold(threshold));
            }
        }
        if FixedOffset::east_opt(self.utc_offset_seconds).is_none() {
            return Err(ConfigError::InvalidUtcOffset(self.utc_offset_seconds));
        }

        Ok(())
    }

    /// Build a configuration from `TOLLGATE_*` environment variables.
    ///
    /// Unset variables keep their defaults. Per-limit variables follow the
    /// pattern `TOLLGATE_{ACTION}_{SCOPE}_LIMIT` and
    /// `TOLLGATE_{ACTION}_{SCOPE}_WINDOW_SECS`, e.g. `TOLLGATE_LOGIN_IP_LIMIT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`TollgateConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| EnvVar::read(&lookup, name);
        let mut config = Self::default();

        for action in Action::ALL {
            for scope in Scope::ALL {
                let prefix = format!(
                    "TOLLGATE_{}_{}",
                    action.as_str().to_uppercase(),
                    scope.as_str().to_uppercase()
                );
                let limit = var(&format!("{prefix}_LIMIT")).parse::<u32>()?;
                let window = var(&format!("{prefix}_WINDOW_SECS")).seconds()?;

                let slot = config.limits.rule_mut(action, scope);
                match (limit, window, *slot) {
                    (None, None, _) => {}
                    (Some(limit), Some(window), _) => {
                        *slot = Some(LimitRule::new(limit, window));
                    }
                    (Some(limit), None, Some(existing)) => {
                        *slot = Some(LimitRule::new(limit, existing.window));
                    }
                    (None, Some(window), Some(existing)) => {
                        *slot = Some(LimitRule::new(existing.limit, window));
                    }
                    (Some(_), None, None) | (None, Some(_), None) => {
                        return Err(ConfigError::InvalidEnv {
                            name: prefix,
                            value: "both LIMIT and WINDOW_SECS are required".to_string(),
                        });
                    }
                }
            }
        }

        if let Some(threshold) = var("TOLLGATE_RAPID_THRESHOLD").parse()? {
            config.emergency.rapid_attempts_threshold = threshold;
        }
        if let Some(duration) = var("TOLLGATE_RAPID_WINDOW_SECS").seconds()? {
            config.emergency.rapid_window = duration;
        }
        if let Some(duration) = var("TOLLGATE_BLOCK_DURATION_SECS").seconds()? {
            config.emergency.block_duration = duration;
        }
        if let Some(capacity) = var("TOLLGATE_EVENT_LOG_CAPACITY").parse()? {
            config.event_log_capacity = capacity;
        }
        if let Some(duration) = var("TOLLGATE_SWEEP_INTERVAL_SECS").seconds()? {
            config.sweep_interval = duration;
        }
        if let Some(threshold) = var("TOLLGATE_ALERT_RISK_THRESHOLD").parse()? {
            config.alert_risk_threshold = threshold;
        }
        if let Some(threshold) = var("TOLLGATE_DETECTOR_BLOCK_THRESHOLD").parse()? {
            config.detector_block_threshold = Some(threshold);
        }
        if let Some(offset) = var("TOLLGATE_UTC_OFFSET_SECS").parse()? {
            config.utc_offset_seconds = offset;
        }

        config.validate()?;
        Ok(config)
    }
}

/// A window or duration must be positive and land on a representable
/// instant when added to the current time.
fn check_duration(name: &str, duration: Duration) -> Result<(), ConfigError> {
    let representable = duration > Duration::zero()
        && duration.to_std().is_ok()
        && Utc::now().checked_add_signed(duration).is_some();
    if representable {
        Ok(())
    } else {
        Err(ConfigError::InvalidWindow(name.to_string()))
    }
}

struct EnvVar {
    name: String,
    value: Option<String>,
}

impl EnvVar {
    fn read(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: lookup(name),
        }
    }

    fn invalid(&self, value: &str) -> ConfigError {
        ConfigError::InvalidEnv {
            name: self.name.clone(),
            value: value.to_string(),
        }
    }

    fn parse<T: FromStr>(&self) -> Result<Option<T>, ConfigError> {
        match self.value.as_deref() {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(value)),
            None => Ok(None),
        }
    }

    fn seconds(&self) -> Result<Option<Duration>, ConfigError> {
        match self.parse::<i64>()? {
            Some(secs) => Duration::try_seconds(secs)
                .map(Some)
                .ok_or_else(|| self.invalid(&secs.to_string())),
            None => Ok(None),
        }
    }
}
