//! Process-local presence tracking.
//!
//! Presence is ephemeral by design: populated when a connection
//! authenticates, purged when its last connection drops, and empty after a
//! process restart. Nothing here is persisted. A multi-instance deployment
//! needs an external pub/sub fan-out instead of a bigger map.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Online/offline state derived from active connections
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    /// Number of live connections for this identity (multi-device)
    pub connections: usize,
    pub last_activity: DateTime<Utc>,
}

/// In-memory identity → presence mapping
#[derive(Clone, Default)]
pub struct PresenceMap {
    entries: Arc<DashMap<String, PresenceEntry>>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns true when this identity just came
    /// online (first connection).
    pub fn connect(&self, identity_id: &str) -> bool {
        let mut entry = self
            .entries
            .entry(identity_id.to_string())
            .or_insert_with(|| PresenceEntry {
                connections: 0,
                last_activity: Utc::now(),
            });
        entry.connections += 1;
        entry.last_activity = Utc::now();
        entry.connections == 1
    }

    /// Deregister a connection. Returns true when this identity just went
    /// offline (last connection dropped).
    pub fn disconnect(&self, identity_id: &str) -> bool {
        let went_offline = match self.entries.get_mut(identity_id) {
            Some(mut entry) => {
                entry.connections = entry.connections.saturating_sub(1);
                entry.connections == 0
            }
            None => false,
        };
        if went_offline {
            self.entries.remove(identity_id);
        }
        went_offline
    }

    /// Record activity on an existing connection (heartbeat, event received)
    pub fn touch(&self, identity_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(identity_id) {
            entry.last_activity = Utc::now();
        }
    }

    pub fn is_online(&self, identity_id: &str) -> bool {
        self.entries.get(identity_id).is_some_and(|e| e.connections > 0)
    }

    pub fn status(&self, identity_id: &str) -> PresenceStatus {
        if self.is_online(identity_id) {
            PresenceStatus::Online
        } else {
            PresenceStatus::Offline
        }
    }
}
