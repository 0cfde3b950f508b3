//! End-to-end session tests over the in-process pair.
//!
//! Every scenario runs the full path: session -> channel -> wire codec ->
//! receive pump -> dispatcher -> listener / stream registry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use socketd::channel::Channel;
use socketd::inproc::{self, Peer};
use socketd::listener::{Listener, SimpleListener};
use socketd::session::Session;
use socketd_core::config::ChannelConfig;
use socketd_core::entity::{metas, Entity};
use socketd_core::error::{Result, SocketdError};
use socketd_core::message::Message;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Server-side listener driven by event name:
/// - `echo`: one final reply mirroring the data
/// - `seq`: two replies, then an end-of-stream reply
/// - `alarm`: answers with an Alarm frame
/// - anything else: swallowed (and counted)
struct DemoListener {
    plain_messages: AtomicUsize,
    last_data: Mutex<Option<Vec<u8>>>,
}

impl DemoListener {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            plain_messages: AtomicUsize::new(0),
            last_data: Mutex::new(None),
        })
    }
}

impl Listener for DemoListener {
    fn on_message(&self, session: &Session, message: Message) -> Result<()> {
        *self.last_data.lock() = Some(message.entity().data().to_vec());

        let session = session.clone();
        match message.event() {
            "echo" => {
                compio::runtime::spawn(async move {
                    let data = message.entity().data().clone();
                    let _ = session.reply_end(&message, Entity::of_bytes(data)).await;
                })
                .detach();
            }
            "seq" => {
                compio::runtime::spawn(async move {
                    let _ = session.reply(&message, Entity::of_text("one")).await;
                    let _ = session.reply(&message, Entity::of_text("two")).await;
                    let _ = session.reply_end(&message, Entity::of_text("end")).await;
                })
                .detach();
            }
            "alarm" => {
                compio::runtime::spawn(async move {
                    let _ = session.send_alarm(&message, "no handler for event").await;
                })
                .detach();
            }
            _ => {
                self.plain_messages.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

fn demo_pair(server_listener: Arc<dyn Listener>) -> (Peer, Peer) {
    init_tracing();
    inproc::pair(
        ChannelConfig::client()
            .with_request_timeout(Duration::from_secs(2))
            .build(),
        ChannelConfig::server().build(),
        Arc::new(SimpleListener),
        server_listener,
    )
}

async fn open(peer: &Peer, url: &str) {
    peer.channel().send_connect(url).await.unwrap();
    let (tx, rx) = flume::bounded::<Result<()>>(1);
    peer.channel().core().on_open(move |outcome| {
        let _ = tx.try_send(outcome);
    });
    rx.recv_async().await.unwrap().unwrap();
}

#[compio::test]
async fn request_resolves_with_the_single_reply() {
    let (client, _server) = demo_pair(DemoListener::new());
    open(&client, "inproc://demo/app?user=a").await;

    let reply = client
        .session()
        .request("echo", Entity::of_text("hi"), Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(reply.entity().data_as_string(), "hi");
    // Resolution removed the pending stream.
    assert!(client.channel().config().streams().is_empty());
}

#[compio::test]
async fn request_times_out_when_nothing_answers() {
    let (client, _server) = demo_pair(DemoListener::new());
    open(&client, "inproc://demo").await;

    let err = client
        .session()
        .request("ignored", Entity::of_text("hello?"), Duration::from_millis(40))
        .await
        .unwrap_err();

    assert!(matches!(err, SocketdError::Timeout(_)));
    assert!(client.channel().config().streams().is_empty());
}

#[compio::test]
async fn subscribe_delivers_replies_until_end() {
    let (client, _server) = demo_pair(DemoListener::new());
    open(&client, "inproc://demo").await;

    let (tx, rx) = flume::unbounded();
    let handle = client
        .session()
        .send_and_subscribe("seq", Entity::new(), Duration::from_secs(2), move |outcome| {
            let _ = tx.send(outcome);
        })
        .await
        .unwrap();

    let mut texts = Vec::new();
    for _ in 0..3 {
        let message = rx.recv_async().await.unwrap().unwrap();
        texts.push(message.entity().data_as_string());
    }

    assert_eq!(texts, ["one", "two", "end"]);
    assert!(handle.is_done());
    assert!(client.channel().config().streams().is_empty());
}

#[compio::test]
async fn alarm_terminates_the_request_stream() {
    let (client, _server) = demo_pair(DemoListener::new());
    open(&client, "inproc://demo").await;

    let err = client
        .session()
        .request("alarm", Entity::of_text("?"), Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(err, SocketdError::Alarm(_)));
    assert!(client.channel().config().streams().is_empty());
}

#[compio::test]
async fn oversized_entities_round_trip_through_fragmentation() {
    let listener = DemoListener::new();
    let (client, _server) = inproc::pair(
        // Force splitting on a small threshold, both directions.
        ChannelConfig::client().with_fragment_size(1024).build(),
        ChannelConfig::server().with_fragment_size(1024).build(),
        Arc::new(SimpleListener),
        listener.clone(),
    );
    open(&client, "inproc://demo").await;

    let payload: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
    let reply = client
        .session()
        .request("echo", Entity::of_bytes(payload.clone()), Duration::from_secs(2))
        .await
        .unwrap();

    // The server saw the reassembled entity, and the echo survived the
    // server-side split on the way back.
    assert_eq!(listener.last_data.lock().as_deref(), Some(payload.as_slice()));
    assert_eq!(reply.entity().data().as_ref(), payload.as_slice());
    assert_eq!(client.channel().config().fragments().pending(), 0);
}

#[compio::test]
async fn disabled_aggregation_passes_fragments_through() {
    struct FragmentCapture {
        seen: Mutex<Vec<Option<String>>>,
    }
    impl Listener for FragmentCapture {
        fn on_message(&self, _session: &Session, message: Message) -> Result<()> {
            self.seen
                .lock()
                .push(message.meta(metas::META_DATA_FRAGMENT_IDX).map(str::to_string));
            Ok(())
        }
    }

    init_tracing();
    let listener = Arc::new(FragmentCapture {
        seen: Mutex::new(Vec::new()),
    });
    let (client, _server) = inproc::pair(
        ChannelConfig::client().with_fragment_size(256).build(),
        // Reassembly is the listener's responsibility on this side.
        ChannelConfig::server().with_fragment_aggr(false).build(),
        Arc::new(SimpleListener),
        listener.clone(),
    );
    open(&client, "inproc://demo").await;

    client
        .session()
        .send("upload", Entity::of_bytes(vec![7u8; 1000]))
        .await
        .unwrap();
    compio::time::sleep(Duration::from_millis(100)).await;

    // Four raw fragments arrive, index meta intact, nothing reassembled.
    let seen = listener.seen.lock();
    assert_eq!(
        *seen,
        vec![
            Some("1".to_string()),
            Some("2".to_string()),
            Some("3".to_string()),
            Some("4".to_string()),
        ]
    );
    drop(seen);
    assert_eq!(client.channel().config().fragments().pending(), 0);
}

#[compio::test]
async fn cancelled_stream_ignores_late_replies() {
    let (client, _server) = demo_pair(DemoListener::new());
    open(&client, "inproc://demo").await;

    let hits = Arc::new(AtomicUsize::new(0));
    let hits2 = Arc::clone(&hits);
    let handle = client
        .session()
        .send_and_subscribe("seq", Entity::new(), Duration::from_secs(2), move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

    handle.cancel();
    compio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(handle.is_done());
}

#[compio::test]
async fn fire_and_forget_reaches_the_listener() {
    let listener = DemoListener::new();
    let (client, _server) = demo_pair(listener.clone());
    open(&client, "inproc://demo").await;

    client
        .session()
        .send("fire", Entity::of_text("a"))
        .await
        .unwrap();
    client
        .session()
        .send("forget", Entity::of_text("b"))
        .await
        .unwrap();
    compio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(listener.plain_messages.load(Ordering::SeqCst), 2);
}

#[compio::test]
async fn peer_close_notifies_the_other_side() {
    struct CloseProbe(flume::Sender<()>);
    impl Listener for CloseProbe {
        fn on_close(&self, _session: &Session) {
            let _ = self.0.try_send(());
        }
    }

    let (tx, rx) = flume::bounded(1);
    let (client, server) = demo_pair(Arc::new(CloseProbe(tx)));
    open(&client, "inproc://demo").await;

    client.session().close().await;
    rx.recv_async().await.unwrap();
    assert!(!server.session().is_valid());
}

#[compio::test]
async fn session_attachments_persist_across_events() {
    struct TaggingListener;
    impl Listener for TaggingListener {
        fn on_open(&self, session: &Session) -> Result<()> {
            session.attr_put("user", session.param_or_default("user", "anon"));
            Ok(())
        }
    }

    let (client, server) = demo_pair(Arc::new(TaggingListener));
    open(&client, "inproc://demo?user=alice").await;

    assert!(server.session().attr_has("user"));
    assert_eq!(server.session().attr("user").as_deref(), Some("alice"));
    assert_eq!(client.session().param("user").as_deref(), Some("alice"));
}
