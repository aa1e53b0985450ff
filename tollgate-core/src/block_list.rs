//! Explicit deny-list of identifiers with expiry.
//!
//! Blocks are independent of quota: a blocked IP is rejected no matter how
//! much of its window remains. Expired blocks are invisible to every read
//! path and are physically removed either lazily by [`BlockList::is_blocked`]
//! or by the periodic sweep.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};

use crate::window::{deadline, retry_after_seconds};

/// A single active (or not yet swept) block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEntry {
    pub blocked_at: DateTime<Utc>,
    pub blocked_until: DateTime<Utc>,
    pub reason: String,
    /// Number of times this identifier has been blocked while the entry existed.
    pub strike_count: u32,
}

impl BlockEntry {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.blocked_until
    }
}

/// Answer to "is this identifier blocked?".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockStatus {
    pub blocked: bool,
    pub reason: Option<String>,
    pub retry_after_seconds: Option<u64>,
}

#[derive(Debug, Default)]
pub struct BlockList {
    entries: DashMap<String, BlockEntry>,
}

impl BlockList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self, identifier: &str) -> BlockStatus {
        self.is_blocked_at(identifier, Utc::now())
    }

    /// Check for an active block, deleting the entry if it has expired.
    pub fn is_blocked_at(&self, identifier: &str, now: DateTime<Utc>) -> BlockStatus {
        match self.entries.entry(identifier.to_string()) {
            Entry::Occupied(entry) if entry.get().is_active(now) => {
                let entry = entry.get();
                BlockStatus {
                    blocked: true,
                    reason: Some(entry.reason.clone()),
                    retry_after_seconds: Some(retry_after_seconds(entry.blocked_until, now)),
                }
            }
            Entry::Occupied(entry) => {
                tracing::debug!(identifier = identifier, "Block expired");
                entry.remove();
                BlockStatus::default()
            }
            Entry::Vacant(_) => BlockStatus::default(),
        }
    }

    pub fn block(&self, identifier: &str, reason: &str, duration: Duration) -> BlockEntry {
        self.block_at(identifier, reason, duration, Utc::now())
    }

    /// Insert or overwrite a block lasting `duration` from `now`.
    ///
    /// Re-blocking an identifier with an existing entry bumps its strike
    /// count; the expiry is recomputed rather than extended.
    pub fn block_at(
        &self,
        identifier: &str,
        reason: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> BlockEntry {
        let duration = duration.max(Duration::zero());
        let entry = match self.entries.entry(identifier.to_string()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get_mut();
                existing.blocked_at = now;
                existing.blocked_until = deadline(now, duration);
                existing.reason = reason.to_string();
                existing.strike_count = existing.strike_count.saturating_add(1);
                existing.clone()
            }
            Entry::Vacant(vacant) => vacant
                .insert(BlockEntry {
                    blocked_at: now,
                    blocked_until: deadline(now, duration),
                    reason: reason.to_string(),
                    strike_count: 1,
                })
                .value()
                .clone(),
        };

        tracing::error!(
            severity = "alert",
            identifier = identifier,
            reason = reason,
            blocked_until = %entry.blocked_until,
            strike_count = entry.strike_count,
            "Identifier blocked"
        );

        entry
    }

    /// Remove a block. Returns whether one existed.
    pub fn unblock(&self, identifier: &str) -> bool {
        let removed = self.entries.remove(identifier).is_some();
        if removed {
            tracing::info!(identifier = identifier, "Identifier unblocked");
        }
        removed
    }

    pub fn list(&self) -> HashMap<String, BlockEntry> {
        self.list_at(Utc::now())
    }

    /// Snapshot of all active blocks.
    pub fn list_at(&self, now: DateTime<Utc>) -> HashMap<String, BlockEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.value().is_active(now))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Remove every block that ended before `now`.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.blocked_until >= now;
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
