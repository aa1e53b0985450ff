//! Core building blocks for tollgate
//!
//! This crate holds the in-memory state and pure logic behind tollgate's
//! authentication abuse protection: fixed-window counters, the IP block list,
//! the bounded event log, the pattern detector and the alert dispatch seam.
//!
//! Most applications should depend on the `tollgate` crate, which wires these
//! pieces into a single service. Use this crate directly when you need one
//! component on its own.
//!
//! See [`RateLimiter`] for the decision API, [`EventLog`] for event history and
//! [`PatternDetector`] for the suspicious-activity rules.
pub mod alert;
pub mod block_list;
pub mod config;
pub mod detector;
pub mod error;
pub mod event_log;
pub mod events;
pub mod id;
pub mod limiter;
pub mod window;

pub use alert::{
    AlertDispatcher, BackgroundDispatcher, ChannelAlertDispatcher, DEFAULT_MAX_IN_FLIGHT,
    SecurityAlert, TracingAlertDispatcher,
};
pub use block_list::{BlockEntry, BlockList, BlockStatus};
pub use config::{EmergencyConfig, LimitRule, LimitsConfig, TollgateConfig};
pub use detector::{PatternDetector, PatternKind, PatternMetadata, SuspiciousActivityPattern};
pub use error::{AlertError, ConfigError, Error};
pub use event_log::{EventLog, EventStats, StatsWindow};
pub use events::{AuthEvent, AuthEventType, ClientInfo, Metadata, MetadataValue};
pub use id::EventId;
pub use limiter::{Action, Decision, RateLimiter, SweepReport};
pub use window::{LimitDecision, Scope, WindowEntry, WindowStore};
