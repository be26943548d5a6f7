//! Client-side bridge for the recorder's live download-progress channel.
//!
//! One WebSocket is multiplexed across any number of consumers: each
//! [`WatchHandle`] declares interest in a single streamer id, the
//! [`SubscriptionRegistry`] collapses that interest into at most one
//! wire subscription per id, and the [`ConnectionManager`] merges pushed
//! telemetry into the shared [`ProgressStore`].  The typed REST client
//! ([`ApiClient`]) covers the server's request/response endpoints.

pub mod conn;
pub mod http;
pub mod registry;
pub mod session;
pub mod store;
pub mod watch;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use recdash_proto::config::Config;
use tokio::sync::{mpsc, watch as watch_ch};
use tracing::info;

pub use conn::{ConnState, Connector, Transport};
pub use http::{ApiClient, ApiError};
pub use registry::SubscriptionRegistry;
pub use session::{SessionCell, SessionSource, StaticToken};
pub use store::{ProgressStore, StoreEvent};
pub use watch::WatchHandle;
pub use ws::WsConnector;

use conn::ConnectionManager;

const REAPER_TICK: Duration = Duration::from_secs(1);

/// Owns the connection manager and reaper tasks and hands out watch
/// handles.  Construct one per authenticated session; `close` (or drop)
/// tears the connection down for good.
pub struct Bridge {
    registry: Arc<SubscriptionRegistry>,
    store: Arc<ProgressStore>,
    state_rx: watch_ch::Receiver<ConnState>,
    shutdown_tx: watch_ch::Sender<bool>,
}

impl Bridge {
    /// Connect to the server's real-time endpoint from `config`.
    pub fn connect(config: &Config, session: Arc<dyn SessionSource>) -> Self {
        let connector = WsConnector::new(config.server.ws_url(), session);
        Self::with_connector(config, connector)
    }

    /// Assemble the bridge around any [`Connector`].  Tests inject a
    /// channel-backed fake here to drive the state machine without a
    /// network.
    pub fn with_connector<C: Connector>(config: &Config, connector: C) -> Self {
        let store = Arc::new(ProgressStore::new(config.store.event_capacity));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(SubscriptionRegistry::new(
            control_tx,
            config.store.cleanup_grace(),
        ));

        let (state_tx, state_rx) = watch_ch::channel(ConnState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch_ch::channel(false);

        let manager = ConnectionManager::new(
            connector,
            Arc::clone(&registry),
            Arc::clone(&store),
            control_rx,
            state_tx,
            shutdown_rx.clone(),
            &config.reconnect,
        );
        tokio::spawn(manager.run());

        // Reaper: drops cached records whose cleanup grace period expired
        // with no watcher left.
        let reaper_registry = Arc::clone(&registry);
        let reaper_store = Arc::clone(&store);
        let mut reaper_shutdown = shutdown_rx;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REAPER_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => reaper_registry.sweep(&reaper_store),
                    changed = reaper_shutdown.changed() => {
                        if changed.is_err() || *reaper_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            registry,
            store,
            state_rx,
            shutdown_tx,
        }
    }

    /// Declare interest in one streamer's live progress.  `None` makes an
    /// inert handle that can be retargeted later.
    pub fn watch(&self, target: Option<&str>) -> WatchHandle {
        WatchHandle::new(Arc::clone(&self.registry), Arc::clone(&self.store), target)
    }

    /// Shared progress store, for bulk snapshot reads.
    pub fn store(&self) -> Arc<ProgressStore> {
        Arc::clone(&self.store)
    }

    /// Observe connection state transitions.
    pub fn state(&self) -> watch_ch::Receiver<ConnState> {
        self.state_rx.clone()
    }

    /// Tear the connection down (session teardown / logout).  Resolves
    /// once the manager has reached `Closed`.
    pub async fn close(&self) {
        info!("bridge: closing");
        let _ = self.shutdown_tx.send(true);
        let mut state_rx = self.state_rx.clone();
        while *state_rx.borrow_and_update() != ConnState::Closed {
            if state_rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
