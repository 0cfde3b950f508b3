//! Frame dispatcher: the protocol state machine for one channel.
//!
//! Every inbound frame flows through [`Processor::on_receive`]. The
//! dispatcher enforces handshake-first ordering, answers Ping with Pong,
//! routes replies to the stream registry, reassembles fragments, converts
//! Alarm frames into stream failures, and closes the channel on protocol
//! violations. Listener failures are caught and reported through
//! [`Listener::on_error`]; only a failing error callback (or a rejected
//! pre-handshake connection) propagates out of the receive loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use socketd_core::entity::metas;
use socketd_core::error::{Result, SocketdError};
use socketd_core::frame::{close_codes, Flag, Frame};
use socketd_core::handshake::Handshake;

use crate::channel::Channel;
use crate::listener::Listener;
use crate::session::Session;

/// Drives the protocol for one channel, feeding events to a listener.
pub struct Processor {
    channel: Arc<dyn Channel>,
    session: Session,
    listener: Arc<dyn Listener>,
    close_notified: AtomicBool,
}

impl Processor {
    #[must_use]
    pub fn new(channel: Arc<dyn Channel>, listener: Arc<dyn Listener>) -> Self {
        let session = Session::new(Arc::clone(&channel));
        Self {
            channel,
            session,
            listener,
            close_notified: AtomicBool::new(false),
        }
    }

    /// The session this processor feeds to its listener.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Dispatch one inbound frame.
    ///
    /// # Errors
    ///
    /// [`SocketdError::ConnectionRejected`] when the peer closes before the
    /// handshake, or an error from [`Listener::on_error`]. Everything else
    /// is handled in place.
    pub async fn on_receive(&self, frame: Frame) -> Result<()> {
        // CLOSED is terminal: frames behind a Close (e.g. coalesced in one
        // transport read) only confirm the closed state.
        if self.channel.core().closed_code() != 0 {
            debug!(
                session_id = %self.channel.core().session_id(),
                flag = %frame.flag(),
                "frame after close ignored"
            );
            return Ok(());
        }

        debug!(
            role = self.channel.config().config().role_name(),
            flag = %frame.flag(),
            "frame received"
        );

        match frame.flag() {
            Flag::Connect => self.on_connect(frame, true).await,
            Flag::Connack => self.on_connect(frame, false).await,
            _ if self.channel.core().handshake().is_none() => {
                self.channel.close(close_codes::CLOSE1_PROTOCOL).await;
                self.notify_close();
                if frame.flag() == Flag::Close {
                    return Err(SocketdError::ConnectionRejected);
                }
                warn!(
                    session_id = %self.channel.core().session_id(),
                    flag = %frame.flag(),
                    "frame before handshake, channel closed"
                );
                Ok(())
            }
            Flag::Ping => {
                if let Err(error) = self.channel.send_pong().await {
                    self.handle_error(error)?;
                }
                Ok(())
            }
            Flag::Pong => Ok(()),
            Flag::Close => {
                self.channel.close(close_codes::CLOSE1_PROTOCOL).await;
                self.notify_close();
                Ok(())
            }
            Flag::Alarm => self.on_alarm(&frame),
            Flag::Message | Flag::Request | Flag::Subscribe => {
                self.on_payload(frame, false).await
            }
            Flag::Reply | Flag::ReplyEnd => self.on_payload(frame, true).await,
            Flag::Unknown => {
                warn!(
                    session_id = %self.channel.core().session_id(),
                    "unknown frame flag, channel closed"
                );
                self.channel.close(close_codes::CLOSE2_PROTOCOL_ILLEGAL).await;
                self.notify_close();
                Ok(())
            }
        }
    }

    /// Notify the listener that the channel closed. Fires at most once no
    /// matter how many paths (peer Close, transport EOF, protocol close)
    /// reach it.
    pub fn on_close(&self) {
        self.notify_close();
    }

    async fn on_connect(&self, frame: Frame, answer: bool) -> Result<()> {
        let Some(message) = frame.message() else {
            self.channel.close(close_codes::CLOSE2_PROTOCOL_ILLEGAL).await;
            self.notify_close();
            return Ok(());
        };

        if self
            .channel
            .core()
            .set_handshake(Handshake::new(message))
            .is_err()
        {
            warn!(
                session_id = %self.channel.core().session_id(),
                "duplicate handshake, channel closed"
            );
            self.channel.close(close_codes::CLOSE2_PROTOCOL_ILLEGAL).await;
            self.notify_close();
            return Ok(());
        }

        match self.listener.on_open(&self.session) {
            Ok(()) => {
                self.channel.core().resolve_open(Ok(()));
                if answer && self.channel.is_valid() {
                    if let Err(error) = self.channel.send_connack(message).await {
                        self.handle_error(error)?;
                    }
                }
                Ok(())
            }
            Err(error) => {
                warn!(
                    session_id = %self.channel.core().session_id(),
                    error = %error,
                    "connection rejected by listener"
                );
                self.channel.core().resolve_open(Err(error.to_string()));
                self.channel.close(close_codes::CLOSE3_ERROR).await;
                self.notify_close();
                Ok(())
            }
        }
    }

    fn on_alarm(&self, frame: &Frame) -> Result<()> {
        let Some(message) = frame.message() else {
            return self.handle_error(SocketdError::protocol("alarm frame without message"));
        };
        let description = message.entity().data_as_string();

        // An alarm for a pending stream fails that stream; otherwise it is
        // a channel-level error for the listener.
        let streams = self.channel.config().streams();
        if streams.fail(message.sid(), SocketdError::alarm(description.clone())) {
            self.channel.config().fragments().discard(message.sid());
            Ok(())
        } else {
            self.handle_error(SocketdError::alarm(description))
        }
    }

    async fn on_payload(&self, frame: Frame, is_reply: bool) -> Result<()> {
        let frame = match self.reassemble(frame, is_reply)? {
            Some(frame) => frame,
            None => return Ok(()),
        };

        if is_reply {
            let end = frame.flag() == Flag::ReplyEnd;
            let Some(message) = frame.into_message() else {
                return self.handle_error(SocketdError::protocol("reply frame without message"));
            };
            self.channel.config().streams().on_reply(message, end);
            Ok(())
        } else {
            let Some(message) = frame.into_message() else {
                return self.handle_error(SocketdError::protocol("payload frame without message"));
            };
            if let Err(error) = self.listener.on_message(&self.session, message) {
                warn!(
                    session_id = %self.channel.core().session_id(),
                    error = %error,
                    "listener failed on message"
                );
                self.handle_error(error)?;
            }
            Ok(())
        }
    }

    /// Run the fragment filter: frames tagged with a fragment index are fed
    /// to the assembler and only the reconstructed frame continues. With
    /// aggregation disabled, fragments pass through untouched.
    fn reassemble(&self, frame: Frame, is_reply: bool) -> Result<Option<Frame>> {
        let fragments = self.channel.config().fragments();
        let tag = match (fragments.aggr_enabled(), frame.message()) {
            (true, Some(message)) if message.meta(metas::META_DATA_FRAGMENT_IDX).is_some() => {
                Some((
                    message.meta_as_int(metas::META_DATA_FRAGMENT_IDX),
                    message.sid().to_string(),
                ))
            }
            _ => None,
        };
        let Some((index, sid)) = tag else {
            return Ok(Some(frame));
        };

        match fragments.aggregate(index, &frame) {
            Ok(reconstructed) => Ok(reconstructed),
            Err(error) => {
                let description = error.to_string();
                if is_reply {
                    self.channel
                        .config()
                        .streams()
                        .fail(&sid, SocketdError::codec(description.clone()));
                }
                self.handle_error(SocketdError::codec(description))?;
                Ok(None)
            }
        }
    }

    fn handle_error(&self, error: SocketdError) -> Result<()> {
        self.listener.on_error(&self.session, error)
    }

    fn notify_close(&self) {
        if !self.close_notified.swap(true, Ordering::AcqRel) {
            self.listener.on_close(&self.session);
        }
    }
}
