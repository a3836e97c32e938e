//! In-memory worker registry: the only shared mutable structure outside
//! the Store. Lost on restart; rebuilt as workers heartbeat in.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{Duration, Utc};

use crate::domain::{Capability, WorkerRecord, WorkerStatus};
use crate::ids::WorkerId;

#[derive(Clone)]
pub struct WorkerRegistry {
    inner: Arc<RwLock<HashMap<WorkerId, WorkerRecord>>>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Upsert a worker from a heartbeat. Preserves the existing
    /// `status` on re-registration so an in-flight dispatch isn't
    /// silently reset to idle by a heartbeat racing with `mark_busy`.
    pub fn register(&self, id: WorkerId, base_url: String, capabilities: HashSet<Capability>) {
        let mut guard = self.inner.write().expect("registry lock poisoned");
        let now = Utc::now();
        guard
            .entry(id.clone())
            .and_modify(|w| {
                w.base_url = base_url.clone();
                w.capabilities = capabilities.clone();
                w.last_heartbeat_at = now;
            })
            .or_insert_with(|| WorkerRecord {
                id,
                base_url,
                capabilities,
                status: WorkerStatus::Idle,
                loaded_models: Vec::new(),
                last_heartbeat_at: now,
            });
    }

    pub fn mark_busy(&self, id: &WorkerId) {
        let mut guard = self.inner.write().expect("registry lock poisoned");
        if let Some(w) = guard.get_mut(id) {
            w.status = WorkerStatus::Busy;
        }
    }

    pub fn mark_idle(&self, id: &WorkerId) {
        let mut guard = self.inner.write().expect("registry lock poisoned");
        if let Some(w) = guard.get_mut(id) {
            w.status = WorkerStatus::Idle;
        }
    }

    /// Workers that are idle and have heartbeated within `heartbeat_ttl`.
    pub fn healthy_idle_workers(&self, heartbeat_ttl: Duration) -> Vec<WorkerRecord> {
        let now = Utc::now();
        let guard = self.inner.read().expect("registry lock poisoned");
        guard
            .values()
            .filter(|w| w.status == WorkerStatus::Idle && w.is_healthy(now, heartbeat_ttl))
            .cloned()
            .collect()
    }

    /// Drop workers whose heartbeat is older than `2 * heartbeat_ttl`.
    /// Invoked opportunistically from the dispatcher's idle-sleep
    /// branch rather than on a dedicated timer.
    pub fn forget_stale(&self, heartbeat_ttl: Duration) {
        let cutoff = heartbeat_ttl * 2;
        let now = Utc::now();
        let mut guard = self.inner.write().expect("registry lock poisoned");
        guard.retain(|_, w| now - w.last_heartbeat_at <= cutoff);
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(names: &[&str]) -> HashSet<Capability> {
        names.iter().map(|n| Capability::parse(n).unwrap()).collect()
    }

    #[test]
    fn register_defaults_new_worker_to_idle() {
        let reg = WorkerRegistry::new();
        reg.register(WorkerId::from("w1".to_string()), "http://x".into(), caps(&["image"]));
        let idle = reg.healthy_idle_workers(Duration::seconds(60));
        assert_eq!(idle.len(), 1);
    }

    #[test]
    fn register_preserves_busy_status_on_reheartbeat() {
        let reg = WorkerRegistry::new();
        let id = WorkerId::from("w1".to_string());
        reg.register(id.clone(), "http://x".into(), caps(&["image"]));
        reg.mark_busy(&id);
        reg.register(id.clone(), "http://x".into(), caps(&["image"]));
        assert!(reg.healthy_idle_workers(Duration::seconds(60)).is_empty());
    }

    #[test]
    fn mark_idle_makes_worker_eligible_again() {
        let reg = WorkerRegistry::new();
        let id = WorkerId::from("w1".to_string());
        reg.register(id.clone(), "http://x".into(), caps(&["image"]));
        reg.mark_busy(&id);
        reg.mark_idle(&id);
        assert_eq!(reg.healthy_idle_workers(Duration::seconds(60)).len(), 1);
    }

    #[test]
    fn stale_heartbeat_excludes_worker_from_idle_set() {
        let reg = WorkerRegistry::new();
        let id = WorkerId::from("w1".to_string());
        reg.register(id, "http://x".into(), caps(&["image"]));
        assert!(reg.healthy_idle_workers(Duration::seconds(-1)).is_empty());
    }

    #[test]
    fn forget_stale_removes_long_dead_workers() {
        let reg = WorkerRegistry::new();
        let id = WorkerId::from("w1".to_string());
        reg.register(id, "http://x".into(), caps(&["image"]));
        reg.forget_stale(Duration::seconds(-1));
        assert_eq!(reg.len(), 0);
    }
}
