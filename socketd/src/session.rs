//! Outward-facing session API.
//!
//! A [`Session`] is the application's view of one channel: send
//! fire-and-forget messages, issue requests and subscriptions, answer
//! inbound messages, and inspect the negotiated handshake. Cloning a
//! session is cheap; clones share the underlying channel.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use socketd_core::entity::Entity;
use socketd_core::error::{Result, SocketdError};
use socketd_core::frame::{close_codes, Flag, Frame};
use socketd_core::handshake::Handshake;
use socketd_core::message::{Message, MessageBuilder};
use socketd_core::stream::{Stream, StreamHandle, StreamMode, StreamOutcome};

use crate::channel::Channel;

/// The application's handle to one channel.
#[derive(Clone)]
pub struct Session {
    channel: Arc<dyn Channel>,
}

impl Session {
    #[must_use]
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.channel.is_valid()
    }

    /// Stable identifier for the underlying channel.
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.channel.core().session_id()
    }

    /// The negotiated handshake, once the connection is open.
    #[must_use]
    pub fn handshake(&self) -> Option<Arc<Handshake>> {
        self.channel.core().handshake()
    }

    /// Handshake query parameter (`None` before the handshake too).
    #[must_use]
    pub fn param(&self, name: &str) -> Option<String> {
        self.handshake()
            .and_then(|hs| hs.param(name).map(str::to_string))
    }

    #[must_use]
    pub fn param_or_default(&self, name: &str, def: &str) -> String {
        self.param(name).unwrap_or_else(|| def.to_string())
    }

    /// Handshake url path (empty before the handshake or when absent).
    #[must_use]
    pub fn path(&self) -> String {
        self.handshake()
            .map_or_else(String::new, |hs| hs.path().to_string())
    }

    /// Get a session attachment.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<String> {
        self.channel.core().attachment(name)
    }

    #[must_use]
    pub fn attr_has(&self, name: &str) -> bool {
        self.channel.core().has_attachment(name)
    }

    /// Attach server-side state to this session (auth results, counters).
    pub fn attr_put(&self, name: impl Into<String>, value: impl Into<String>) {
        self.channel.core().put_attachment(name, value);
    }

    /// Send a fire-and-forget message. Returns the generated sid.
    ///
    /// # Errors
    ///
    /// Close or transport errors from the channel.
    pub async fn send(&self, event: impl Into<String>, entity: Entity) -> Result<String> {
        let sid = self.generate_sid();
        let message = MessageBuilder::new()
            .flag(Flag::Message)
            .sid(sid.clone())
            .event(event)
            .entity(entity)
            .build();
        self.channel
            .send(Frame::new(Flag::Message, Some(message)), None)
            .await?;
        Ok(sid)
    }

    /// Send a request expecting exactly one reply, delivered to `handler`
    /// as a message or a terminal error. A zero `timeout` uses the
    /// configured default.
    ///
    /// # Errors
    ///
    /// Close or transport errors from the channel; the stream is
    /// unregistered when the send fails.
    pub async fn send_and_request(
        &self,
        event: impl Into<String>,
        entity: Entity,
        timeout: Duration,
        handler: impl Fn(StreamOutcome) + Send + Sync + 'static,
    ) -> Result<StreamHandle> {
        self.send_with_stream(Flag::Request, event, entity, StreamMode::Request, timeout, handler)
            .await
    }

    /// Send a subscription expecting any number of replies; `handler` fires
    /// per reply until an end-of-stream reply, timeout, or alarm.
    ///
    /// # Errors
    ///
    /// Close or transport errors from the channel.
    pub async fn send_and_subscribe(
        &self,
        event: impl Into<String>,
        entity: Entity,
        timeout: Duration,
        handler: impl Fn(StreamOutcome) + Send + Sync + 'static,
    ) -> Result<StreamHandle> {
        self.send_with_stream(
            Flag::Subscribe,
            event,
            entity,
            StreamMode::Subscribe,
            timeout,
            handler,
        )
        .await
    }

    /// Awaitable request: resolves with the single reply or the terminal
    /// error (timeout, alarm).
    ///
    /// # Errors
    ///
    /// Send errors immediately; otherwise the stream outcome.
    pub async fn request(
        &self,
        event: impl Into<String>,
        entity: Entity,
        timeout: Duration,
    ) -> Result<Message> {
        let (tx, rx) = flume::bounded::<StreamOutcome>(1);
        self.send_and_request(event, entity, timeout, move |outcome| {
            let _ = tx.try_send(outcome);
        })
        .await?;
        rx.recv_async().await.map_err(|_| SocketdError::ChannelSend)?
    }

    /// Answer an inbound request/subscription without ending its stream.
    ///
    /// # Errors
    ///
    /// Close or transport errors from the channel.
    pub async fn reply(&self, from: &Message, entity: Entity) -> Result<()> {
        self.send_reply(Flag::Reply, from, entity).await
    }

    /// Final answer: resolves the peer's stream and removes it.
    ///
    /// # Errors
    ///
    /// Close or transport errors from the channel.
    pub async fn reply_end(&self, from: &Message, entity: Entity) -> Result<()> {
        self.send_reply(Flag::ReplyEnd, from, entity).await
    }

    /// # Errors
    ///
    /// Close or transport errors from the channel.
    pub async fn send_ping(&self) -> Result<()> {
        self.channel.send_ping().await
    }

    /// Signal an out-of-band error against the stream of `from`.
    ///
    /// # Errors
    ///
    /// Close or transport errors from the channel.
    pub async fn send_alarm(&self, from: &Message, description: &str) -> Result<()> {
        self.channel.send_alarm(from, description).await
    }

    /// Ask the binding to re-establish the transport.
    ///
    /// # Errors
    ///
    /// Whatever the binding reports; bindings without reconnect support
    /// return a protocol error.
    pub async fn reconnect(&self) -> Result<()> {
        self.channel.reconnect().await
    }

    /// Close the session: best-effort Close frame to the peer, then local
    /// close with the user reason code. Never fails — transport errors on
    /// the farewell frame are logged and swallowed.
    pub async fn close(&self) {
        if self.channel.is_valid() {
            if let Err(error) = self.channel.send_close().await {
                warn!(
                    session_id = %self.session_id(),
                    error = %error,
                    "close frame could not be sent"
                );
            }
        }
        self.channel.close(close_codes::CLOSE4_USER).await;
    }

    fn generate_sid(&self) -> String {
        self.channel.config().config().generate_sid()
    }

    async fn send_with_stream(
        &self,
        flag: Flag,
        event: impl Into<String>,
        entity: Entity,
        mode: StreamMode,
        timeout: Duration,
        handler: impl Fn(StreamOutcome) + Send + Sync + 'static,
    ) -> Result<StreamHandle> {
        let timeout = if timeout.is_zero() && mode == StreamMode::Request {
            self.channel.config().config().request_timeout()
        } else {
            timeout
        };

        let sid = self.generate_sid();
        let stream = Stream::new(sid.clone(), mode, timeout, handler);
        let message = MessageBuilder::new()
            .flag(flag)
            .sid(sid.clone())
            .event(event)
            .entity(entity)
            .build();

        self.channel
            .send(Frame::new(flag, Some(message)), Some(stream))
            .await?;
        Ok(StreamHandle::new(
            sid,
            Arc::clone(self.channel.config().streams()),
        ))
    }

    async fn send_reply(&self, flag: Flag, from: &Message, entity: Entity) -> Result<()> {
        let message = MessageBuilder::new()
            .flag(flag)
            .sid(from.sid())
            .event(from.event())
            .entity(entity)
            .build();
        self.channel.send(Frame::new(flag, Some(message)), None).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id())
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}
