//! Per-consumer watch handles.
//!
//! A `WatchHandle` is the scoped form of "I am interested in updates for
//! streamer X": constructing one registers interest, dropping it always
//! releases, on every exit path.  Handles never touch the transport or
//! mutate the store; they only bump registry counts and take snapshot
//! reads.

use std::sync::Arc;

use recdash_proto::protocol::ProgressRecord;
use tokio::sync::broadcast;
use tracing::debug;

use crate::registry::SubscriptionRegistry;
use crate::store::{ProgressStore, StoreEvent};

pub struct WatchHandle {
    registry: Arc<SubscriptionRegistry>,
    store: Arc<ProgressStore>,
    events: broadcast::Receiver<StoreEvent>,
    target: Option<String>,
}

impl WatchHandle {
    pub(crate) fn new(
        registry: Arc<SubscriptionRegistry>,
        store: Arc<ProgressStore>,
        target: Option<&str>,
    ) -> Self {
        if let Some(id) = target {
            registry.acquire(id);
        }
        let events = store.events();
        Self {
            registry,
            store,
            events,
            target: target.map(str::to_string),
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Switch to a different streamer (or to none).  Releases the old id
    /// and acquires the new one; a no-op when the target is unchanged, so
    /// repeated renders with the same id cause no wire churn.
    pub fn retarget(&mut self, target: Option<&str>) {
        if self.target.as_deref() == target {
            return;
        }
        if let Some(id) = target {
            self.registry.acquire(id);
        }
        if let Some(old) = self.target.take() {
            self.registry.release(&old);
        }
        self.target = target.map(str::to_string);
    }

    /// Latest cached record for the watched streamer, if any.
    pub fn latest(&self) -> Option<ProgressRecord> {
        let target = self.target.as_deref()?;
        self.store.get(target)
    }

    /// Wait for the next change to the watched record.  Resolves with the
    /// fresh record on update and with `None` once the record is removed
    /// (download ended or cache expired).  Also returns `None` when the
    /// handle has no target or the bridge has been torn down.
    pub async fn changed(&mut self) -> Option<ProgressRecord> {
        let target = self.target.clone()?;
        loop {
            match self.events.recv().await {
                Ok(event) if event.streamer_id() == target => {
                    return match event {
                        StoreEvent::Updated(_) => self.store.get(&target),
                        StoreEvent::Removed(_) => None,
                    };
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed events collapse into a snapshot read; the
                    // store always holds the latest record.
                    debug!("watch for {} lagged by {} events", target, skipped);
                    return self.store.get(&target);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(id) = self.target.take() {
            self.registry.release(&id);
        }
    }
}
