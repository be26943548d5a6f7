//! Connection manager — owns the single live transport to the server.
//!
//! The manager runs as one task and is the only holder of the raw
//! transport.  Inbound frames are merged into the [`ProgressStore`];
//! outbound control frames arrive from the [`SubscriptionRegistry`] over
//! an unbounded channel.  On transport loss the manager reconnects with
//! capped exponential backoff and replays one `Subscribe` per live
//! streamer id, so a drop never duplicates subscriptions.
//!
//! State machine: Connecting → Open → Reconnecting → Connecting → … with
//! Closed as the sole terminal state, reached only on explicit teardown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use recdash_proto::config::ReconnectConfig;
use recdash_proto::protocol::{ClientFrame, ServerFrame, PROTOCOL_VERSION};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::registry::SubscriptionRegistry;
use crate::store::ProgressStore;

/// Observable connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// A live duplex transport, already framed: control frames out, server
/// frames in.  Produced by a [`Connector`]; the channel halves are backed
/// by pump tasks for the real WebSocket and by the test harness directly
/// in tests.
pub struct Transport {
    pub outbound: mpsc::Sender<ClientFrame>,
    pub inbound: mpsc::Receiver<ServerFrame>,
}

/// Dials the server's real-time endpoint.  Injectable so tests can hand
/// the manager a channel-backed fake and simulate drops deterministically.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = anyhow::Result<Transport>> + Send;
}

/// Capped exponential backoff with jitter.
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(config: &ReconnectConfig) -> Self {
        let initial = config.initial_delay().max(Duration::from_millis(10));
        Self {
            initial,
            max: config.max_delay().max(initial),
            current: initial,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Next delay: current value with ±20% jitter, then double up to the cap.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        base.mul_f64(jitter)
    }
}

/// Why a live session ended.
enum SessionEnd {
    /// Transport dropped or errored; reconnect.
    Dropped,
    /// Teardown requested; stop for good.
    Shutdown,
}

pub struct ConnectionManager<C> {
    connector: C,
    registry: Arc<SubscriptionRegistry>,
    store: Arc<ProgressStore>,
    control_rx: mpsc::UnboundedReceiver<(u64, ClientFrame)>,
    state_tx: watch::Sender<ConnState>,
    shutdown_rx: watch::Receiver<bool>,
    backoff: Backoff,
}

impl<C: Connector> ConnectionManager<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: C,
        registry: Arc<SubscriptionRegistry>,
        store: Arc<ProgressStore>,
        control_rx: mpsc::UnboundedReceiver<(u64, ClientFrame)>,
        state_tx: watch::Sender<ConnState>,
        shutdown_rx: watch::Receiver<bool>,
        reconnect: &ReconnectConfig,
    ) -> Self {
        Self {
            connector,
            registry,
            store,
            control_rx,
            state_tx,
            shutdown_rx,
            backoff: Backoff::new(reconnect),
        }
    }

    /// Run until teardown.  Never returns an error: every transport
    /// failure is absorbed into the reconnect cycle (worst case is stale
    /// progress data, per the error-handling policy).
    pub async fn run(mut self) {
        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.set_state(ConnState::Connecting);

            let connected = tokio::select! {
                result = self.connector.connect() => result,
                _ = wait_for_shutdown(&mut self.shutdown_rx) => break,
            };

            match connected {
                Ok(transport) => {
                    info!("connection open");
                    self.backoff.reset();
                    self.set_state(ConnState::Open);
                    match self.session(transport).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Dropped => {
                            warn!("connection lost, scheduling reconnect");
                        }
                    }
                }
                Err(e) => {
                    warn!("connect failed: {:#}", e);
                }
            }

            self.set_state(ConnState::Reconnecting);
            let delay = self.backoff.next_delay();
            debug!("reconnecting in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(&mut self.shutdown_rx) => break,
            }
        }

        info!("connection manager shutting down");
        self.set_state(ConnState::Closed);
    }

    /// Drive one live transport until it drops or teardown is requested.
    async fn session(&mut self, mut transport: Transport) -> SessionEnd {
        // The epoch bump and the snapshot happen under the registry lock,
        // so every reference-count transition lands on exactly one side:
        // in the snapshot (its queued frame is stale and gets dropped
        // below) or after it (its frame carries the new epoch and is
        // forwarded).  The replay alone reconstructs the live set.
        let (epoch, live_ids) = self.registry.begin_session();

        for streamer_id in live_ids {
            let frame = ClientFrame::Subscribe { streamer_id };
            if transport.outbound.send(frame).await.is_err() {
                return SessionEnd::Dropped;
            }
        }

        loop {
            tokio::select! {
                frame = self.control_rx.recv() => {
                    match frame {
                        // Registry and bridge gone; nothing left to serve.
                        None => return SessionEnd::Shutdown,
                        Some((frame_epoch, _)) if frame_epoch < epoch => {
                            debug!("dropping control frame from epoch {}", frame_epoch);
                        }
                        Some((_, frame)) => {
                            if transport.outbound.send(frame).await.is_err() {
                                return SessionEnd::Dropped;
                            }
                        }
                    }
                }
                msg = transport.inbound.recv() => {
                    match msg {
                        None => return SessionEnd::Dropped,
                        Some(frame) => self.dispatch(frame),
                    }
                }
                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    fn dispatch(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Hello {
                protocol_version,
                server_rev,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    warn!(
                        "server speaks protocol v{}, client expects v{}",
                        protocol_version, PROTOCOL_VERSION
                    );
                }
                debug!("hello: server_rev={}", server_rev);
            }
            ServerFrame::Progress { record } => {
                self.store.apply(record);
            }
            ServerFrame::Ended {
                streamer_id,
                reason,
            } => {
                self.store.end(&streamer_id, &reason);
            }
            ServerFrame::Error { message } => {
                warn!("server notice: {}", message);
            }
        }
    }

    fn set_state(&self, state: ConnState) {
        self.state_tx.send_if_modified(|current| {
            if *current != state {
                debug!("connection {:?} → {:?}", current, state);
                *current = state;
                true
            } else {
                false
            }
        });
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    // Resolves once the flag flips to true; pending forever if the sender
    // is kept alive without signalling.
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}
