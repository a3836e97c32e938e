use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::domain::Capability;
use crate::ids::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Busy,
}

/// In-memory-only worker record, rebuilt from heartbeats. Lost on
/// restart, same as the rest of the Worker Registry.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub base_url: String,
    pub capabilities: HashSet<Capability>,
    pub status: WorkerStatus,
    pub loaded_models: Vec<String>,
    pub last_heartbeat_at: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn is_healthy(&self, now: DateTime<Utc>, heartbeat_ttl: chrono::Duration) -> bool {
        now - self.last_heartbeat_at <= heartbeat_ttl
    }
}
