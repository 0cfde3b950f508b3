//! Channel contract for transport bindings.
//!
//! A [`Channel`] is one connection to a peer. Transport bindings (TCP,
//! WebSocket, the in-process pair in [`crate::inproc`]) implement the three
//! required methods; everything protocol-shaped — handshake storage, close
//! bookkeeping, outbound fragmentation, the control-frame helpers — is
//! provided here so that bindings stay thin.
//!
//! [`ChannelCore`] is the shared state every binding embeds: configuration,
//! the write-once handshake, the close code, session attachments, and the
//! open-notification list resolved exactly once when the handshake completes
//! or is rejected.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::debug;

use socketd_core::config::SharedConfig;
use socketd_core::error::{Result, SocketdError};
use socketd_core::fragment;
use socketd_core::frame::Frame;
use socketd_core::handshake::Handshake;
use socketd_core::message::Message;
use socketd_core::stream::Stream;

/// Callback invoked when the channel's handshake completes or fails.
pub type OpenCallback = Box<dyn FnOnce(Result<()>) + Send>;

enum OpenState {
    Pending(Vec<OpenCallback>),
    Resolved(std::result::Result<(), String>),
}

/// Shared per-channel state embedded by every transport binding.
pub struct ChannelCore {
    config: Arc<SharedConfig>,
    session_id: String,
    handshake: OnceCell<Arc<Handshake>>,
    /// 0 while open; first close code wins.
    closed: AtomicU8,
    attachments: DashMap<String, String>,
    open: Mutex<OpenState>,
}

impl ChannelCore {
    #[must_use]
    pub fn new(config: Arc<SharedConfig>) -> Self {
        let session_id = config.config().generate_sid();
        Self {
            config,
            session_id,
            handshake: OnceCell::new(),
            closed: AtomicU8::new(0),
            attachments: DashMap::new(),
            open: Mutex::new(OpenState::Pending(Vec::new())),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Arc<SharedConfig> {
        &self.config
    }

    /// Stable identifier for this channel, generated at construction.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn handshake(&self) -> Option<Arc<Handshake>> {
        self.handshake.get().cloned()
    }

    /// Store the handshake. Write-once: a second call is a protocol
    /// violation and leaves the first handshake in place.
    ///
    /// # Errors
    ///
    /// Protocol error when a handshake is already set.
    pub fn set_handshake(&self, handshake: Handshake) -> Result<()> {
        self.handshake
            .set(Arc::new(handshake))
            .map_err(|_| SocketdError::protocol("duplicate handshake"))
    }

    /// Close reason code, or 0 while the channel is open.
    #[must_use]
    pub fn closed_code(&self) -> u8 {
        self.closed.load(Ordering::Acquire)
    }

    /// Record the close reason. Returns true for the caller that performed
    /// the transition; later calls keep the first code and return false.
    pub fn mark_closed(&self, code: u8) -> bool {
        self.closed
            .compare_exchange(0, code, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Register interest in the handshake outcome. Fires immediately when
    /// the channel is already open or failed.
    pub fn on_open(&self, callback: impl FnOnce(Result<()>) + Send + 'static) {
        let mut open = self.open.lock();
        match &mut *open {
            OpenState::Pending(callbacks) => callbacks.push(Box::new(callback)),
            OpenState::Resolved(Ok(())) => {
                drop(open);
                callback(Ok(()));
            }
            OpenState::Resolved(Err(reason)) => {
                let reason = reason.clone();
                drop(open);
                callback(Err(SocketdError::protocol(reason)));
            }
        }
    }

    /// Resolve the open notification exactly once; later calls are no-ops.
    pub fn resolve_open(&self, outcome: std::result::Result<(), String>) {
        let callbacks = {
            let mut open = self.open.lock();
            match std::mem::replace(&mut *open, OpenState::Resolved(outcome.clone())) {
                OpenState::Pending(callbacks) => callbacks,
                resolved @ OpenState::Resolved(_) => {
                    // Already resolved; restore the original outcome.
                    *open = resolved;
                    return;
                }
            }
        };
        for callback in callbacks {
            match &outcome {
                Ok(()) => callback(Ok(())),
                Err(reason) => callback(Err(SocketdError::protocol(reason.clone()))),
            }
        }
    }

    #[must_use]
    pub fn attachment(&self, name: &str) -> Option<String> {
        self.attachments.get(name).map(|v| v.clone())
    }

    #[must_use]
    pub fn has_attachment(&self, name: &str) -> bool {
        self.attachments.contains_key(name)
    }

    pub fn put_attachment(&self, name: impl Into<String>, value: impl Into<String>) {
        self.attachments.insert(name.into(), value.into());
    }
}

impl std::fmt::Debug for ChannelCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCore")
            .field("session_id", &self.session_id)
            .field("closed", &self.closed_code())
            .field("handshaken", &self.handshake.get().is_some())
            .finish_non_exhaustive()
    }
}

/// One connection to a peer.
///
/// Bindings implement [`Channel::core`], [`Channel::write`],
/// [`Channel::disconnect`], and the validity/reconnect hooks; the provided
/// methods layer the protocol on top. `write` must deliver one whole frame
/// per call — interleaving is the binding's concern.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The shared protocol state for this channel.
    fn core(&self) -> &ChannelCore;

    /// True while frames can still be sent (open and transport alive).
    fn is_valid(&self) -> bool;

    /// Hand one frame to the transport.
    async fn write(&self, frame: Frame) -> Result<()>;

    /// Tear down the transport. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    /// Re-establish the transport, where the binding supports it.
    async fn reconnect(&self) -> Result<()>;

    // ---- provided protocol layer ----

    fn config(&self) -> &Arc<SharedConfig> {
        self.core().config()
    }

    /// Send a frame, registering `stream` (when given) before the write so
    /// a fast reply cannot race the registration. Oversized entities are
    /// split into fragment frames here.
    ///
    /// # Errors
    ///
    /// [`SocketdError::Closed`] when the channel is closed, codec errors for
    /// malformed frames, and transport errors from the write. A failed write
    /// unregisters the stream.
    async fn send(&self, frame: Frame, stream: Option<Arc<Stream>>) -> Result<()> {
        let code = self.core().closed_code();
        if code != 0 {
            return Err(SocketdError::Closed(code));
        }
        frame.validate()?;

        let config = self.config();
        if let Some(stream) = stream {
            config.streams().add(stream);
        }
        let sid = frame
            .message()
            .map(|message| message.sid().to_string());

        let outcome = match fragment::split(&frame, config.config().fragment_size()) {
            Some(fragments) => {
                let mut result = Ok(());
                for fragment in fragments {
                    if let Err(error) = self.write(fragment).await {
                        result = Err(error);
                        break;
                    }
                }
                result
            }
            None => self.write(frame).await,
        };

        if outcome.is_err() {
            if let Some(sid) = sid {
                self.config().streams().remove(&sid);
            }
        }
        outcome
    }

    /// Close the channel with a reason code and drop all pending streams.
    /// Only the first close takes effect.
    async fn close(&self, code: u8) {
        if self.core().mark_closed(code) {
            debug!(
                session_id = %self.core().session_id(),
                code,
                "channel closed"
            );
            self.config().streams().clear();
            let _ = self.disconnect().await;
        }
    }

    /// Send the opening Connect frame (client side).
    ///
    /// # Errors
    ///
    /// Transport or close errors from [`Channel::send`].
    async fn send_connect(&self, url: &str) -> Result<()> {
        let sid = self.config().config().generate_sid();
        self.send(Frame::connect(sid, url), None).await
    }

    /// Answer a Connect with a Connack (server side).
    ///
    /// # Errors
    ///
    /// Transport or close errors from [`Channel::send`].
    async fn send_connack(&self, connect_message: &Message) -> Result<()> {
        self.send(Frame::connack(connect_message), None).await
    }

    /// # Errors
    ///
    /// Transport or close errors from [`Channel::send`].
    async fn send_ping(&self) -> Result<()> {
        self.send(Frame::ping(), None).await
    }

    /// # Errors
    ///
    /// Transport or close errors from [`Channel::send`].
    async fn send_pong(&self) -> Result<()> {
        self.send(Frame::pong(), None).await
    }

    /// # Errors
    ///
    /// Transport or close errors from [`Channel::send`].
    async fn send_close(&self) -> Result<()> {
        self.send(Frame::close(), None).await
    }

    /// Signal an out-of-band error against the stream of `from`.
    ///
    /// # Errors
    ///
    /// Transport or close errors from [`Channel::send`].
    async fn send_alarm(&self, from: &Message, description: &str) -> Result<()> {
        self.send(Frame::alarm(from, description), None).await
    }
}
