//! End-to-end bridge behavior against a channel-backed fake server.
//!
//! All tests run on a paused tokio clock, so reconnect backoff and the
//! cleanup grace period elapse deterministically without real waiting.

use std::time::Duration;

use recdash_bridge::{Bridge, ConnState, Connector, StoreEvent, Transport};
use recdash_proto::config::Config;
use recdash_proto::protocol::{
    ClientFrame, DownloadState, EndReason, ProgressRecord, ServerFrame,
};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

/// The server half of one fake connection.
struct ServerEnd {
    from_client: mpsc::Receiver<ClientFrame>,
    to_client: mpsc::Sender<ServerFrame>,
}

impl ServerEnd {
    async fn expect_frame(&mut self) -> ClientFrame {
        timeout(Duration::from_secs(5), self.from_client.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client side closed")
    }

    async fn expect_silence(&mut self) {
        let got = timeout(Duration::from_millis(200), self.from_client.recv()).await;
        if let Ok(Some(frame)) = got {
            panic!("expected no frame, got {:?}", frame);
        }
    }

    async fn push(&self, frame: ServerFrame) {
        self.to_client.send(frame).await.expect("client gone");
    }
}

/// Hands a fresh channel transport to the manager on every connect and
/// surfaces the matching server end to the test.
struct FakeConnector {
    accept_tx: mpsc::UnboundedSender<ServerEnd>,
}

impl FakeConnector {
    fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (Self { accept_tx }, accept_rx)
    }
}

impl Connector for FakeConnector {
    async fn connect(&self) -> anyhow::Result<Transport> {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        self.accept_tx
            .send(ServerEnd {
                from_client: outbound_rx,
                to_client: inbound_tx,
            })
            .map_err(|_| anyhow::anyhow!("test harness gone"))?;
        Ok(Transport {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.store.cleanup_grace_secs = 30;
    config
}

async fn wait_state(rx: &mut watch::Receiver<ConnState>, want: ConnState) {
    timeout(Duration::from_secs(5), async {
        while *rx.borrow_and_update() != want {
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {:?}", want));
}

async fn open_bridge() -> (Bridge, ServerEnd, mpsc::UnboundedReceiver<ServerEnd>) {
    let (connector, mut accept_rx) = FakeConnector::new();
    let bridge = Bridge::with_connector(&test_config(), connector);
    let server = accept_rx.recv().await.expect("no connection attempt");
    let mut state = bridge.state();
    wait_state(&mut state, ConnState::Open).await;
    (bridge, server, accept_rx)
}

fn recording(id: &str, bytes: u64) -> ProgressRecord {
    ProgressRecord {
        state: DownloadState::Recording,
        bytes_transferred: bytes,
        ..ProgressRecord::new(id)
    }
}

#[tokio::test(start_paused = true)]
async fn two_watchers_share_one_subscription() {
    let (bridge, mut server, _accept) = open_bridge().await;

    let first = bridge.watch(Some("abc"));
    assert_eq!(
        server.expect_frame().await,
        ClientFrame::Subscribe {
            streamer_id: "abc".into()
        }
    );

    let second = bridge.watch(Some("abc"));
    server.expect_silence().await;

    drop(first);
    server.expect_silence().await;

    drop(second);
    assert_eq!(
        server.expect_frame().await,
        ClientFrame::Unsubscribe {
            streamer_id: "abc".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn retarget_never_leaves_a_lingering_subscription() {
    let (bridge, mut server, _accept) = open_bridge().await;

    let mut handle = bridge.watch(Some("abc"));
    assert_eq!(
        server.expect_frame().await,
        ClientFrame::Subscribe {
            streamer_id: "abc".into()
        }
    );

    handle.retarget(Some("def"));
    let first = server.expect_frame().await;
    let second = server.expect_frame().await;
    assert_eq!(
        first,
        ClientFrame::Subscribe {
            streamer_id: "def".into()
        }
    );
    assert_eq!(
        second,
        ClientFrame::Unsubscribe {
            streamer_id: "abc".into()
        }
    );
    server.expect_silence().await;

    // Retargeting to the same id is a no-op.
    handle.retarget(Some("def"));
    server.expect_silence().await;
}

#[tokio::test(start_paused = true)]
async fn unsolicited_progress_is_cached_without_subscribing() {
    let (bridge, mut server, _accept) = open_bridge().await;
    let store = bridge.store();
    let mut events = store.events();

    server
        .push(ServerFrame::Progress {
            record: recording("ghost", 512),
        })
        .await;

    match timeout(Duration::from_secs(5), events.recv()).await {
        Ok(Ok(StoreEvent::Updated(id))) => assert_eq!(id, "ghost"),
        other => panic!("expected update event, got {:?}", other),
    }
    assert_eq!(store.get("ghost").unwrap().bytes_transferred, 512);

    // Cached, but no interest was declared — nothing on the wire.
    server.expect_silence().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_replays_each_live_subscription_once() {
    let (bridge, mut server, mut accept_rx) = open_bridge().await;

    // Two handles on "abc", one on "def" — the wire saw one subscribe each.
    let _a1 = bridge.watch(Some("abc"));
    let _a2 = bridge.watch(Some("abc"));
    let _d = bridge.watch(Some("def"));
    server.expect_frame().await;
    server.expect_frame().await;
    server.expect_silence().await;

    // Kill the transport.
    drop(server);
    let mut state = bridge.state();
    wait_state(&mut state, ConnState::Reconnecting).await;

    // Backoff elapses on the paused clock; a new connection arrives.
    let mut server = timeout(Duration::from_secs(60), accept_rx.recv())
        .await
        .expect("no reconnect attempt")
        .expect("connector gone");
    wait_state(&mut state, ConnState::Open).await;

    let mut replayed = vec![
        server.expect_frame().await,
        server.expect_frame().await,
    ];
    replayed.sort_by_key(|f| f.streamer_id().to_string());
    assert_eq!(
        replayed,
        vec![
            ClientFrame::Subscribe {
                streamer_id: "abc".into()
            },
            ClientFrame::Subscribe {
                streamer_id: "def".into()
            },
        ]
    );
    // Exactly once per id — not per handle, not per buffered frame.
    server.expect_silence().await;
}

#[tokio::test(start_paused = true)]
async fn subscribing_while_reconnecting_sends_one_subscribe() {
    let (bridge, server, mut accept_rx) = open_bridge().await;

    // Kill the transport, then declare interest while the link is down.
    // The queued control frame predates the next session; only the replay
    // may cover the id.
    drop(server);
    let mut state = bridge.state();
    wait_state(&mut state, ConnState::Reconnecting).await;
    let _handle = bridge.watch(Some("abc"));

    let mut server = timeout(Duration::from_secs(60), accept_rx.recv())
        .await
        .expect("no reconnect attempt")
        .expect("connector gone");
    wait_state(&mut state, ConnState::Open).await;

    assert_eq!(
        server.expect_frame().await,
        ClientFrame::Subscribe {
            streamer_id: "abc".into()
        }
    );
    server.expect_silence().await;
}

#[tokio::test(start_paused = true)]
async fn ended_download_removes_record_and_wakes_watcher() {
    let (bridge, mut server, _accept) = open_bridge().await;

    let mut handle = bridge.watch(Some("abc"));
    server.expect_frame().await;

    server
        .push(ServerFrame::Progress {
            record: recording("abc", 2048),
        })
        .await;
    let record = timeout(Duration::from_secs(5), handle.changed())
        .await
        .expect("no update")
        .expect("record missing");
    assert_eq!(record.bytes_transferred, 2048);

    server
        .push(ServerFrame::Ended {
            streamer_id: "abc".into(),
            reason: EndReason::Completed,
        })
        .await;
    let gone = timeout(Duration::from_secs(5), handle.changed())
        .await
        .expect("no removal event");
    assert!(gone.is_none());
    assert!(bridge.store().get("abc").is_none());
}

#[tokio::test(start_paused = true)]
async fn grace_period_drops_unwatched_records() {
    let (bridge, mut server, _accept) = open_bridge().await;
    let store = bridge.store();

    let handle = bridge.watch(Some("abc"));
    server.expect_frame().await;
    server
        .push(ServerFrame::Progress {
            record: recording("abc", 100),
        })
        .await;
    let mut events = store.events();

    drop(handle);
    server.expect_frame().await; // the unsubscribe

    // The record survives the grace window, then the reaper drops it.
    loop {
        match timeout(Duration::from_secs(60), events.recv())
            .await
            .expect("record never reaped")
            .expect("store events closed")
        {
            StoreEvent::Removed(id) => {
                assert_eq!(id, "abc");
                break;
            }
            StoreEvent::Updated(_) => continue,
        }
    }
    assert!(store.get("abc").is_none());
}

#[tokio::test(start_paused = true)]
async fn rewatching_within_grace_keeps_the_record() {
    let (bridge, mut server, _accept) = open_bridge().await;
    let store = bridge.store();

    let handle = bridge.watch(Some("abc"));
    server.expect_frame().await;
    server
        .push(ServerFrame::Progress {
            record: recording("abc", 100),
        })
        .await;

    // Wait until the record is actually cached before churning.
    let mut events = store.events();
    loop {
        if store.get("abc").is_some() {
            break;
        }
        let _ = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("record never arrived");
    }

    drop(handle);
    server.expect_frame().await;
    let _handle = bridge.watch(Some("abc"));
    server.expect_frame().await; // fresh subscribe

    tokio::time::sleep(Duration::from_secs(90)).await;
    assert!(store.get("abc").is_some(), "record reaped despite watcher");
}

#[tokio::test(start_paused = true)]
async fn close_is_terminal() {
    let (bridge, mut server, mut accept_rx) = open_bridge().await;

    bridge.close().await;
    assert_eq!(*bridge.state().borrow(), ConnState::Closed);

    // No reconnect attempts after teardown.
    drop(server.to_client);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(accept_rx.try_recv().is_err());
}
