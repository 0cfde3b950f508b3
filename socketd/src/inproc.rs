//! In-process channel pair.
//!
//! Two fully wired peers connected back to back through byte queues: each
//! side encodes outbound frames with the reference codec and runs a detached
//! receive pump that decodes and dispatches inbound bytes. No sockets
//! involved, but the whole engine path — codec, dispatcher, streams,
//! fragmentation — is exercised, which is exactly what tests and demos need.
//!
//! [`pair`] must run inside a `compio` runtime; the receive pumps are
//! spawned on the current one.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use socketd_core::config::SharedConfig;
use socketd_core::error::{Result, SocketdError};
use socketd_core::frame::{close_codes, Frame};

use crate::channel::{Channel, ChannelCore};
use crate::codec::{encode_frame, FrameDecoder};
use crate::listener::Listener;
use crate::processor::Processor;
use crate::session::Session;

/// Channel writing encoded frames into the peer's byte queue.
pub struct InprocChannel {
    core: ChannelCore,
    // Taken on disconnect so the peer's pump observes end-of-stream.
    tx: Mutex<Option<flume::Sender<Bytes>>>,
}

impl InprocChannel {
    fn new(config: Arc<SharedConfig>, tx: flume::Sender<Bytes>) -> Self {
        Self {
            core: ChannelCore::new(config),
            tx: Mutex::new(Some(tx)),
        }
    }
}

#[async_trait::async_trait]
impl Channel for InprocChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn is_valid(&self) -> bool {
        self.core.closed_code() == 0 && self.tx.lock().is_some()
    }

    async fn write(&self, frame: Frame) -> Result<()> {
        let Some(tx) = self.tx.lock().clone() else {
            return Err(SocketdError::ChannelSend);
        };
        let wire = encode_frame(&frame)?;
        tx.send_async(wire)
            .await
            .map_err(|_| SocketdError::ChannelSend)
    }

    async fn disconnect(&self) -> Result<()> {
        self.tx.lock().take();
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        Err(SocketdError::protocol(
            "in-process channels do not reconnect",
        ))
    }
}

/// One side of an in-process pair.
pub struct Peer {
    channel: Arc<InprocChannel>,
    processor: Arc<Processor>,
}

impl Peer {
    /// The underlying channel (for `send_connect` and friends).
    #[must_use]
    pub fn channel(&self) -> &Arc<InprocChannel> {
        &self.channel
    }

    /// The application-facing session.
    #[must_use]
    pub fn session(&self) -> &Session {
        self.processor.session()
    }
}

/// Wire two peers back to back and start their receive pumps.
///
/// The first element is the side built from `client_config` (it initiates
/// the handshake with `send_connect`); the second answers with a Connack.
#[must_use]
pub fn pair(
    client_config: Arc<SharedConfig>,
    server_config: Arc<SharedConfig>,
    client_listener: Arc<dyn Listener>,
    server_listener: Arc<dyn Listener>,
) -> (Peer, Peer) {
    let (to_server_tx, to_server_rx) = flume::unbounded::<Bytes>();
    let (to_client_tx, to_client_rx) = flume::unbounded::<Bytes>();

    let client = Arc::new(InprocChannel::new(client_config, to_server_tx));
    let server = Arc::new(InprocChannel::new(server_config, to_client_tx));

    let client_processor = Arc::new(Processor::new(
        Arc::clone(&client) as Arc<dyn Channel>,
        client_listener,
    ));
    let server_processor = Arc::new(Processor::new(
        Arc::clone(&server) as Arc<dyn Channel>,
        server_listener,
    ));

    spawn_pump(to_client_rx, Arc::clone(&client), Arc::clone(&client_processor));
    spawn_pump(to_server_rx, Arc::clone(&server), Arc::clone(&server_processor));

    (
        Peer {
            channel: client,
            processor: client_processor,
        },
        Peer {
            channel: server,
            processor: server_processor,
        },
    )
}

fn spawn_pump(
    rx: flume::Receiver<Bytes>,
    channel: Arc<InprocChannel>,
    processor: Arc<Processor>,
) {
    compio::runtime::spawn(async move {
        let mut decoder = FrameDecoder::new();
        'recv: while let Ok(chunk) = rx.recv_async().await {
            decoder.push(&chunk);
            loop {
                match decoder.try_next() {
                    Ok(Some(frame)) => {
                        if let Err(error) = processor.on_receive(frame).await {
                            debug!(error = %error, "receive loop stopped");
                            break 'recv;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!(error = %error, "inbound frame decode failed");
                        channel.close(close_codes::CLOSE2_PROTOCOL_ILLEGAL).await;
                        break 'recv;
                    }
                }
            }
            if channel.core().closed_code() != 0 {
                break;
            }
        }
        processor.on_close();
    })
    .detach();
}
