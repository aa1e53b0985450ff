use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),
}

/// Errors raised while validating configuration.
///
/// These are the only errors allowed to fail fast, and only at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid limit for {0}: limit must be greater than zero")]
    InvalidLimit(String),

    #[error("Invalid window for {0}: window must be positive")]
    InvalidWindow(String),

    #[error("Invalid event log capacity: {0}")]
    InvalidCapacity(usize),

    #[error("Invalid risk threshold: {0} (expected 0-10)")]
    InvalidRiskThreshold(u8),

    #[error("Invalid UTC offset: {0} seconds")]
    InvalidUtcOffset(i32),

    #[error("Invalid environment variable {name}: {value:?}")]
    InvalidEnv { name: String, value: String },
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Alert delivery failed: {0}")]
    Delivery(String),

    #[error("Alert channel closed")]
    ChannelClosed,
}

impl Error {
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    pub fn is_alert_error(&self) -> bool {
        matches!(self, Error::Alert(_))
    }
}
