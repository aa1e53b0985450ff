//! Alert dispatch for high-risk findings.
//!
//! Tollgate does not deliver alerts itself. It builds a [`SecurityAlert`] and
//! hands it to an [`AlertDispatcher`], which forwards it to whatever
//! notification system the application uses (email, chat, incident tooling).
//!
//! Dispatch never blocks the authentication path: [`BackgroundDispatcher`]
//! spawns the delivery on the tokio runtime, caps how many deliveries may be
//! pending, and only logs failures.
//!
//! # Example
//!
//! ```rust
//! use tollgate_core::alert::{AlertDispatcher, SecurityAlert};
//! use tollgate_core::error::AlertError;
//! use async_trait::async_trait;
//!
//! struct PagerDispatcher;
//!
//! #[async_trait]
//! impl AlertDispatcher for PagerDispatcher {
//!     async fn send(&self, alert: &SecurityAlert) -> Result<(), AlertError> {
//!         // Forward to the incident system...
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{
    Semaphore,
    mpsc::{self, error::TrySendError},
};

use crate::{
    detector::{PatternKind, SuspiciousActivityPattern},
    error::AlertError,
    events::{AuthEvent, AuthEventType, Metadata},
    id::EventId,
};

/// Everything a notifier needs to describe a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub pattern: PatternKind,
    pub description: String,
    pub risk_score: u8,
    pub metadata: Metadata,
    pub event_id: EventId,
    pub event_type: AuthEventType,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
}

impl SecurityAlert {
    pub fn new(pattern: &SuspiciousActivityPattern, trigger: &AuthEvent) -> Self {
        Self {
            pattern: pattern.kind,
            description: pattern.description.clone(),
            risk_score: pattern.risk_score,
            metadata: pattern.metadata.to_metadata(),
            event_id: trigger.id.clone(),
            event_type: trigger.event_type,
            user_id: trigger.user_id.clone(),
            email: trigger.email.clone(),
            ip_address: trigger.ip_address.clone(),
            user_agent: trigger.user_agent.clone(),
            timestamp: trigger.timestamp,
        }
    }
}

/// Forwards alerts to an external notification collaborator.
#[async_trait]
pub trait AlertDispatcher: Send + Sync + 'static {
    async fn send(&self, alert: &SecurityAlert) -> Result<(), AlertError>;
}

/// Writes alerts to the log. This is the default dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertDispatcher;

#[async_trait]
impl AlertDispatcher for TracingAlertDispatcher {
    async fn send(&self, alert: &SecurityAlert) -> Result<(), AlertError> {
        tracing::error!(
            severity = "alert",
            pattern = %alert.pattern,
            risk_score = alert.risk_score,
            ip_address = %alert.ip_address,
            user_id = ?alert.user_id,
            email = ?alert.email,
            event_id = %alert.event_id,
            "{}",
            alert.description
        );
        Ok(())
    }
}

/// Pushes alerts onto a channel drained by an application-owned notifier task.
#[derive(Debug, Clone)]
pub struct ChannelAlertDispatcher {
    sender: mpsc::Sender<SecurityAlert>,
}

impl ChannelAlertDispatcher {
    /// Create a dispatcher and the receiving half of its bounded channel.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<SecurityAlert>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl AlertDispatcher for ChannelAlertDispatcher {
    /// Never waits for capacity. A full channel drops the alert.
    async fn send(&self, alert: &SecurityAlert) -> Result<(), AlertError> {
        self.sender
            .try_send(alert.clone())
            .map_err(|e| match e {
                TrySendError::Full(_) => AlertError::Delivery("alert channel full".to_string()),
                TrySendError::Closed(_) => AlertError::ChannelClosed,
            })
    }
}

/// Alert deliveries allowed in flight at once before new alerts are dropped.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Runs an [`AlertDispatcher`] off the request path with a bounded number
/// of deliveries in flight.
#[derive(Clone)]
pub struct BackgroundDispatcher {
    dispatcher: Arc<dyn AlertDispatcher>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl std::fmt::Debug for BackgroundDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundDispatcher")
            .field("max_in_flight", &self.max_in_flight)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl BackgroundDispatcher {
    pub fn new(dispatcher: Arc<dyn AlertDispatcher>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            dispatcher,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    /// Deliver `alert` without waiting for the result.
    ///
    /// Failures are logged and dropped. The alert is also dropped, with a
    /// warning, when no tokio runtime is available or too many deliveries
    /// are already pending.
    pub fn dispatch(&self, alert: SecurityAlert) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    pattern = %alert.pattern,
                    event_id = %alert.event_id,
                    "No async runtime available, dropping security alert"
                );
                return;
            }
        };

        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    pattern = %alert.pattern,
                    event_id = %alert.event_id,
                    "Too many security alerts in flight, dropping alert"
                );
                return;
            }
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        handle.spawn(async move {
            let _permit = permit;
            if let Err(e) = dispatcher.send(&alert).await {
                tracing::warn!(
                    error = %e,
                    pattern = %alert.pattern,
                    event_id = %alert.event_id,
                    "Failed to deliver security alert"
                );
            }
        });
    }

    /// Deliveries currently pending.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::PatternMetadata;
    use crate::events::ClientInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingDispatcher {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AlertDispatcher for FailingDispatcher {
        async fn send(&self, _alert: &SecurityAlert) -> Result<(), AlertError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(AlertError::Delivery("smtp unavailable".to_string()))
        }
    }

    fn sample_alert() -> SecurityAlert {
        let trigger = AuthEvent::new(
            AuthEventType::LoginFailed,
            &ClientInfo::new("1.2.3.4", "curl/8.0"),
        )
        .with_email("victim@example.com");
        let pattern = SuspiciousActivityPattern {
            kind: PatternKind::MultipleAccountsSameIp,
            description: "Failed logins for 3 different accounts from 1.2.3.4".to_string(),
            risk_score: 9,
            metadata: PatternMetadata::MultipleAccounts {
                ip_address: "1.2.3.4".to_string(),
                emails: vec!["victim@example.com".to_string()],
            },
        };
        SecurityAlert::new(&pattern, &trigger)
    }

    #[test]
    fn test_alert_carries_trigger_fields() {
        let alert = sample_alert();
        assert_eq!(alert.pattern, PatternKind::MultipleAccountsSameIp);
        assert_eq!(alert.risk_score, 9);
        assert_eq!(alert.ip_address, "1.2.3.4");
        assert_eq!(alert.user_agent, "curl/8.0");
        assert_eq!(alert.email.as_deref(), Some("victim@example.com"));
        assert_eq!(alert.event_type, AuthEventType::LoginFailed);
        assert!(alert.metadata.contains_key("emails"));
    }

    #[tokio::test]
    async fn test_channel_dispatcher_forwards_alerts() {
        let (dispatcher, mut receiver) = ChannelAlertDispatcher::new(4);
        dispatcher.send(&sample_alert()).await.unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.risk_score, 9);
    }

    #[tokio::test]
    async fn test_channel_dispatcher_reports_closed_channel() {
        let (dispatcher, receiver) = ChannelAlertDispatcher::new(1);
        drop(receiver);

        let result = dispatcher.send(&sample_alert()).await;
        assert!(matches!(result, Err(AlertError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_channel_dispatcher_drops_when_full() {
        let (dispatcher, mut receiver) = ChannelAlertDispatcher::new(1);
        dispatcher.send(&sample_alert()).await.unwrap();

        let result = dispatcher.send(&sample_alert()).await;
        assert!(matches!(result, Err(AlertError::Delivery(_))));

        assert!(receiver.recv().await.is_some());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_background_dispatch_swallows_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let background = BackgroundDispatcher::new(
            Arc::new(FailingDispatcher {
                attempts: attempts.clone(),
            }),
            DEFAULT_MAX_IN_FLIGHT,
        );

        background.dispatch(sample_alert());

        for _ in 0..100 {
            if attempts.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    struct StalledDispatcher {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AlertDispatcher for StalledDispatcher {
        async fn send(&self, _alert: &SecurityAlert) -> Result<(), AlertError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_background_dispatch_caps_pending_deliveries() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let background = BackgroundDispatcher::new(
            Arc::new(StalledDispatcher {
                attempts: attempts.clone(),
            }),
            2,
        );

        for _ in 0..50 {
            background.dispatch(sample_alert());
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(background.in_flight(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_background_dispatch_without_runtime_does_not_panic() {
        let background = BackgroundDispatcher::new(Arc::new(TracingAlertDispatcher), 1);
        background.dispatch(sample_alert());
        assert_eq!(background.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_tracing_dispatcher_succeeds() {
        assert!(TracingAlertDispatcher.send(&sample_alert()).await.is_ok());
    }
}
