//! Shared progress store — latest known record per streamer.
//!
//! The store is the only shared mutable state in the bridge.  All writes
//! are funneled through the connection manager's dispatch path (and the
//! registry's grace-period reaper); watch handles only take snapshot
//! reads.  Every mutation is announced on a `tokio::sync::broadcast`
//! channel so consumers can wake without polling.

use std::collections::HashMap;
use std::sync::RwLock;

use recdash_proto::protocol::{EndReason, ProgressRecord};
use tokio::sync::broadcast;
use tracing::debug;

/// Change notification emitted after every store mutation.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// The record for this streamer was inserted or replaced.
    Updated(String),
    /// The record for this streamer was dropped (download ended, or the
    /// cleanup grace period for an unwatched record expired).
    Removed(String),
}

impl StoreEvent {
    pub fn streamer_id(&self) -> &str {
        match self {
            StoreEvent::Updated(id) => id,
            StoreEvent::Removed(id) => id,
        }
    }
}

pub struct ProgressStore {
    records: RwLock<HashMap<String, ProgressRecord>>,
    events_tx: broadcast::Sender<StoreEvent>,
}

impl ProgressStore {
    pub fn new(event_capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(event_capacity.max(16));
        Self {
            records: RwLock::new(HashMap::new()),
            events_tx,
        }
    }

    /// Subscribe to change notifications.
    pub fn events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }

    /// Merge a progress record pushed by the server.  The record replaces
    /// any previous one for the same streamer wholesale.  Records for
    /// streamers nobody currently watches are kept too — a push may race
    /// ahead of local subscribe bookkeeping and must not be lost.
    pub fn apply(&self, record: ProgressRecord) {
        let id = record.streamer_id.clone();
        self.records
            .write()
            .expect("progress store lock poisoned")
            .insert(id.clone(), record);
        let _ = self.events_tx.send(StoreEvent::Updated(id));
    }

    /// The server signalled completion/cancellation for a streamer.
    pub fn end(&self, streamer_id: &str, reason: &EndReason) {
        debug!("store: download for {} ended: {:?}", streamer_id, reason);
        self.remove(streamer_id);
    }

    /// Drop a cached record.  No-op (and no event) when absent.
    pub fn remove(&self, streamer_id: &str) {
        let removed = self
            .records
            .write()
            .expect("progress store lock poisoned")
            .remove(streamer_id)
            .is_some();
        if removed {
            let _ = self
                .events_tx
                .send(StoreEvent::Removed(streamer_id.to_string()));
        }
    }

    /// Snapshot read of a single record.
    pub fn get(&self, streamer_id: &str) -> Option<ProgressRecord> {
        self.records
            .read()
            .expect("progress store lock poisoned")
            .get(streamer_id)
            .cloned()
    }

    /// Ids of every cached record.
    pub fn ids(&self) -> Vec<String> {
        self.records
            .read()
            .expect("progress store lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of every cached record.
    pub fn snapshot(&self) -> Vec<ProgressRecord> {
        self.records
            .read()
            .expect("progress store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .expect("progress store lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
