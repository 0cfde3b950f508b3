//! SocketD error types.
//!
//! One taxonomy for every failure the engine can produce: handshake
//! rejection, protocol violations, codec failures, remote alarms, stream
//! timeouts, and transport errors propagated from channel bindings.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for SocketD operations
#[derive(Error, Debug)]
pub enum SocketdError {
    /// IO error propagated from a transport binding
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A non-control frame arrived before (or instead of) a handshake
    #[error("Connection request was rejected")]
    ConnectionRejected,

    /// Protocol violation during dispatch
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame or fragment encoding/decoding failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// Remote-signaled application error (Alarm frame)
    #[error("Alarm: {0}")]
    Alarm(String),

    /// Stream deadline elapsed without resolution
    #[error("Stream timeout after {0:?}")]
    Timeout(Duration),

    /// Channel already closed (carries the close reason code)
    #[error("Channel closed (code {0})")]
    Closed(u8),

    /// Frame could not be handed to the transport
    #[error("Channel send error")]
    ChannelSend,
}

/// Result type alias for SocketD operations
pub type Result<T> = std::result::Result<T, SocketdError>;

impl SocketdError {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a codec error with a message
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Create an alarm error with a description
    pub fn alarm(msg: impl Into<String>) -> Self {
        Self::Alarm(msg.into())
    }

    /// Check if this is a connection-level error (channel unusable)
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRejected | Self::Closed(_) | Self::ChannelSend
        )
    }

    /// Check if this error terminates a stream rather than the channel
    #[must_use]
    pub const fn is_stream_error(&self) -> bool {
        matches!(self, Self::Alarm(_) | Self::Timeout(_))
    }
}
