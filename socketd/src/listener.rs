//! Application-facing event interface.
//!
//! A [`Listener`] receives the lifecycle and traffic of one channel. All
//! methods have no-op defaults, so implementations override only what they
//! need. Errors returned from `on_open` reject the connection; errors from
//! `on_message` are routed to `on_error` by the dispatcher.

use socketd_core::error::{Result, SocketdError};
use socketd_core::message::Message;

use crate::session::Session;

/// Receiver for channel lifecycle and message events.
pub trait Listener: Send + Sync {
    /// Called once when the handshake completes.
    ///
    /// # Errors
    ///
    /// Returning an error rejects the connection: the open notification
    /// fails and the channel closes with an error reason.
    fn on_open(&self, session: &Session) -> Result<()> {
        let _ = session;
        Ok(())
    }

    /// Called for every inbound Message / Request / Subscribe (after
    /// reassembly, when fragment aggregation is enabled).
    ///
    /// # Errors
    ///
    /// Errors are reported to [`Listener::on_error`], not to the peer.
    fn on_message(&self, session: &Session, message: Message) -> Result<()> {
        let _ = (session, message);
        Ok(())
    }

    /// Called once when the channel closes, whichever side initiated it.
    fn on_close(&self, session: &Session) {
        let _ = session;
    }

    /// Called with errors raised while handling this channel's events.
    ///
    /// # Errors
    ///
    /// An error here is unrecoverable and propagates to the receive loop.
    fn on_error(&self, session: &Session, error: SocketdError) -> Result<()> {
        let _ = (session, error);
        Ok(())
    }
}

/// Listener that ignores everything. Useful as a default and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleListener;

impl Listener for SimpleListener {}
