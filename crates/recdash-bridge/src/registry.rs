//! Subscription registry — deduplicates interest in streamer ids.
//!
//! Many watch handles can be interested in the same streamer at once; the
//! wire protocol must see exactly one `subscribe` on the 0→1 reference
//! transition and exactly one `unsubscribe` on 1→0.  Reference counting is
//! synchronous (no debounce window), so handle drop paths stay accurate
//! under rapid churn.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use recdash_proto::protocol::ClientFrame;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::store::ProgressStore;

struct Inner {
    /// streamer id → number of live watch handles targeting it.
    counts: HashMap<String, usize>,
    /// Fully released ids whose cached record awaits the grace deadline.
    pending_removal: HashMap<String, Instant>,
    /// Connection epoch.  Bumped under this lock at every session start;
    /// control frames are stamped with the epoch they were sent under, so
    /// the manager can tell frames from before its replay snapshot apart
    /// from frames sent after it.
    epoch: u64,
}

pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
    /// Control frames destined for the connection manager, stamped with
    /// the epoch they were sent under.  Unbounded so `Drop`-path releases
    /// never block.
    control_tx: mpsc::UnboundedSender<(u64, ClientFrame)>,
    grace: Duration,
}

impl SubscriptionRegistry {
    pub fn new(control_tx: mpsc::UnboundedSender<(u64, ClientFrame)>, grace: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                counts: HashMap::new(),
                pending_removal: HashMap::new(),
                epoch: 0,
            }),
            control_tx,
            grace,
        }
    }

    /// Register one more interested handle for `streamer_id`.  Sends a
    /// single `Subscribe` frame on the 0→1 transition and cancels any
    /// pending grace-period removal for the id.
    pub fn acquire(&self, streamer_id: &str) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.pending_removal.remove(streamer_id);
        let count = inner.counts.entry(streamer_id.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            debug!("registry: first watcher for {}, subscribing", streamer_id);
            let epoch = inner.epoch;
            self.send(
                epoch,
                ClientFrame::Subscribe {
                    streamer_id: streamer_id.to_string(),
                },
            );
        }
    }

    /// Drop one interested handle for `streamer_id`.  Sends a single
    /// `Unsubscribe` frame on the 1→0 transition and schedules the cached
    /// record for removal after the grace period.  A release for an id
    /// with no live handles is logged and ignored, so the count can never
    /// go negative.
    pub fn release(&self, streamer_id: &str) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        match inner.counts.get(streamer_id).copied() {
            None => {
                warn!("registry: release for unwatched id {}", streamer_id);
            }
            Some(1) => {
                inner.counts.remove(streamer_id);
                let deadline = Instant::now() + self.grace;
                inner
                    .pending_removal
                    .insert(streamer_id.to_string(), deadline);
                debug!("registry: last watcher for {} gone, unsubscribing", streamer_id);
                let epoch = inner.epoch;
                self.send(
                    epoch,
                    ClientFrame::Unsubscribe {
                        streamer_id: streamer_id.to_string(),
                    },
                );
            }
            Some(count) => {
                inner.counts.insert(streamer_id.to_string(), count - 1);
            }
        }
    }

    /// Start a new connection session: bump the epoch and snapshot the ids
    /// with at least one live handle, in one critical section.  The manager
    /// replays the snapshot (one `Subscribe` each) and drops any control
    /// frame stamped with an older epoch, so a transition racing the
    /// session start is counted exactly once — either it made the snapshot
    /// and its frame is stale, or it missed the snapshot and its frame
    /// carries the new epoch.
    pub fn begin_session(&self) -> (u64, Vec<String>) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.epoch += 1;
        (inner.epoch, inner.counts.keys().cloned().collect())
    }

    /// Current reference count for an id (0 when unknown).
    pub fn count(&self, streamer_id: &str) -> usize {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.counts.get(streamer_id).copied().unwrap_or(0)
    }

    /// Drop cached records whose grace deadline has passed while the id
    /// stayed fully released.  Called periodically by the reaper task.
    ///
    /// Records can appear for ids nobody ever watched (a push may race
    /// ahead of subscribe bookkeeping, or the server fans out broadly);
    /// those get a grace deadline on first sight here, so the store never
    /// holds an unwatched record for longer than the grace period.
    pub fn sweep(&self, store: &ProgressStore) {
        let now = Instant::now();
        let cached = store.ids();
        let expired: Vec<String> = {
            let mut inner = self.inner.lock().expect("registry lock poisoned");
            for id in cached {
                if !inner.counts.contains_key(&id) && !inner.pending_removal.contains_key(&id) {
                    inner.pending_removal.insert(id, now + self.grace);
                }
            }
            let expired: Vec<String> = inner
                .pending_removal
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                inner.pending_removal.remove(id);
            }
            expired
        };
        for id in expired {
            debug!("registry: grace period for {} expired, dropping record", id);
            store.remove(&id);
        }
    }

    fn send(&self, epoch: u64, frame: ClientFrame) {
        // The manager task outlives the registry in normal operation; a
        // closed channel here only happens during teardown.
        if self.control_tx.send((epoch, frame)).is_err() {
            debug!("registry: control channel closed, frame dropped");
        }
    }
}
