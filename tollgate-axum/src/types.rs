use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tollgate::{AuthEvent, BlockEntry, ClientInfo};

/// Client address and user agent of the current request.
///
/// Extract it in a handler to feed the tollgate recorders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client(pub ClientInfo);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRequest {
    pub ip: String,
    pub reason: String,
    /// Falls back to the configured emergency block duration.
    pub duration_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedIp {
    pub ip: String,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    pub blocked_until: DateTime<Utc>,
    pub strike_count: u32,
}

impl BlockedIp {
    pub fn new(ip: impl Into<String>, entry: BlockEntry) -> Self {
        Self {
            ip: ip.into(),
            reason: entry.reason,
            blocked_at: entry.blocked_at,
            blocked_until: entry.blocked_until,
            strike_count: entry.strike_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedResponse {
    pub blocked: Vec<BlockedIp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsQuery {
    pub window: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsQuery {
    pub ip: Option<String>,
    pub user: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventsResponse {
    pub events: Vec<AuthEvent>,
}
