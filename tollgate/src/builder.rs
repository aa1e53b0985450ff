//! Builder for constructing [`Tollgate`] instances
//!
//! The builder validates the configuration before any state is created, so a
//! bad limit or window fails at startup instead of at the first request.
//!
//! # Example
//!
//! ```rust,no_run
//! use tollgate::{ChannelAlertDispatcher, TollgateBuilder, TollgateConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (dispatcher, mut alerts) = ChannelAlertDispatcher::new(64);
//!
//!     let tollgate = TollgateBuilder::new()
//!         .with_config(TollgateConfig::from_env()?)
//!         .with_alert_dispatcher(dispatcher)
//!         .build()?;
//!
//!     tokio::spawn(async move {
//!         while let Some(alert) = alerts.recv().await {
//!             println!("{}: {}", alert.pattern, alert.description);
//!         }
//!     });
//!
//!     tollgate.shutdown(false).await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use crate::{
    AlertDispatcher, BackgroundDispatcher, Error, Tollgate, TollgateConfig, TracingAlertDispatcher,
};
use tollgate_core::DEFAULT_MAX_IN_FLIGHT;

/// Builder for [`Tollgate`].
///
/// # Defaults
///
/// - Configuration: [`TollgateConfig::default`]
/// - Alert dispatcher: [`TracingAlertDispatcher`], at most 64 deliveries in flight
/// - Background sweep: enabled when built inside a tokio runtime
pub struct TollgateBuilder {
    config: TollgateConfig,
    dispatcher: Option<Arc<dyn AlertDispatcher>>,
    max_alerts_in_flight: usize,
    background_sweep: bool,
}

impl Default for TollgateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TollgateBuilder {
    pub fn new() -> Self {
        Self {
            config: TollgateConfig::default(),
            dispatcher: None,
            max_alerts_in_flight: DEFAULT_MAX_IN_FLIGHT,
            background_sweep: true,
        }
    }

    pub fn with_config(mut self, config: TollgateConfig) -> Self {
        self.config = config;
        self
    }

    /// Send high-risk findings to `dispatcher`.
    pub fn with_alert_dispatcher<D: AlertDispatcher>(mut self, dispatcher: D) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Share an existing dispatcher with other components.
    pub fn with_shared_alert_dispatcher(mut self, dispatcher: Arc<dyn AlertDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// How many alert deliveries may be pending before new alerts are dropped.
    pub fn with_max_alerts_in_flight(mut self, max: usize) -> Self {
        self.max_alerts_in_flight = max;
        self
    }

    /// Whether `build` starts the periodic sweep. Disable it to drive
    /// [`Tollgate::sweep`] manually.
    pub fn with_background_sweep(mut self, enabled: bool) -> Self {
        self.background_sweep = enabled;
        self
    }

    /// Validate the configuration and build the service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn build(self) -> Result<Tollgate, Error> {
        self.config.validate()?;

        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(TracingAlertDispatcher));
        let alerts = BackgroundDispatcher::new(dispatcher, self.max_alerts_in_flight);
        let tollgate = Tollgate::from_parts(self.config, alerts);

        if self.background_sweep && tokio::runtime::Handle::try_current().is_ok() {
            tollgate.start_sweep_task();
        }

        tracing::info!(
            event_log_capacity = tollgate.config().event_log_capacity,
            alert_risk_threshold = tollgate.config().alert_risk_threshold,
            "Tollgate initialized"
        );

        Ok(tollgate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfigError, LimitRule};
    use chrono::Duration;

    #[test]
    fn test_build_with_defaults() {
        let tollgate = TollgateBuilder::new().build().unwrap();
        assert_eq!(tollgate.config(), &TollgateConfig::default());
        assert!(!tollgate.is_shut_down());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let config = TollgateConfig::default()
            .with_login_ip_limit(LimitRule::new(0, Duration::minutes(1)));
        let err = TollgateBuilder::new().with_config(config).build().unwrap_err();

        assert!(err.is_config_error());
        assert!(matches!(err, Error::Config(ConfigError::InvalidLimit(_))));
    }

    #[test]
    fn test_build_rejects_overflowing_window() {
        let config = TollgateConfig::default().with_login_ip_limit(LimitRule::new(
            5,
            Duration::seconds(9_000_000_000_000),
        ));
        let err = TollgateBuilder::new().with_config(config).build().unwrap_err();

        assert!(matches!(err, Error::Config(ConfigError::InvalidWindow(_))));
    }

    #[tokio::test]
    async fn test_build_starts_sweep_inside_runtime() {
        let tollgate = TollgateBuilder::new().build().unwrap();
        // Already running
        assert!(!tollgate.start_sweep_task());
        tollgate.shutdown(false).await;
    }

    #[tokio::test]
    async fn test_build_without_background_sweep() {
        let tollgate = TollgateBuilder::new()
            .with_background_sweep(false)
            .build()
            .unwrap();
        assert!(tollgate.start_sweep_task());
        tollgate.shutdown(false).await;
    }
}
