//! Frame flags, the wire unit, and the control-frame factory.
//!
//! A [`Frame`] is one transmission unit: a control [`Flag`] plus an optional
//! [`Message`] payload. Pure control frames (Ping / Pong / Close) carry no
//! message. Connect / Connack must be the first frame exchanged in each
//! direction; the dispatcher enforces that invariant.

use crate::entity::{metas, Entity};
use crate::error::{Result, SocketdError};
use crate::message::{Message, MessageBuilder};

/// Protocol version advertised in Connect / Connack frames.
pub const VERSION: &str = "2.0";

/// Close reason codes.
///
/// Small integers with fixed meanings, preserved across implementations for
/// interoperability with peers speaking this protocol.
pub mod close_codes {
    /// Protocol-level close (peer sent Close, or a frame arrived before the
    /// handshake).
    pub const CLOSE1_PROTOCOL: u8 = 1;
    /// Illegal-protocol close (unrecognized flag, duplicate handshake).
    pub const CLOSE2_PROTOCOL_ILLEGAL: u8 = 2;
    /// Close after a local error (e.g. open listener failure).
    pub const CLOSE3_ERROR: u8 = 3;
    /// User-initiated close.
    pub const CLOSE4_USER: u8 = 4;
}

/// Frame control flag (no heap allocation).
///
/// Closed set: new kinds are added by extending this enum and the
/// dispatcher's match, never via open-ended handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Flag {
    Unknown = 0,
    Connect = 10,
    Connack = 11,
    Ping = 20,
    Pong = 21,
    Close = 30,
    Alarm = 40,
    Message = 50,
    Request = 51,
    Subscribe = 52,
    Reply = 60,
    ReplyEnd = 61,
}

impl Flag {
    /// Wire code of this flag.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire code; unrecognized codes map to [`Flag::Unknown`]
    /// (the dispatcher closes the channel on those).
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            10 => Self::Connect,
            11 => Self::Connack,
            20 => Self::Ping,
            21 => Self::Pong,
            30 => Self::Close,
            40 => Self::Alarm,
            50 => Self::Message,
            51 => Self::Request,
            52 => Self::Subscribe,
            60 => Self::Reply,
            61 => Self::ReplyEnd,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Connect => "Connect",
            Self::Connack => "Connack",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::Close => "Close",
            Self::Alarm => "Alarm",
            Self::Message => "Message",
            Self::Request => "Request",
            Self::Subscribe => "Subscribe",
            Self::Reply => "Reply",
            Self::ReplyEnd => "ReplyEnd",
        }
    }

    /// True for Reply / ReplyEnd.
    #[must_use]
    pub const fn is_reply(self) -> bool {
        matches!(self, Self::Reply | Self::ReplyEnd)
    }

    /// True for the flags that carry application payload.
    #[must_use]
    pub const fn carries_payload(self) -> bool {
        matches!(
            self,
            Self::Connect
                | Self::Connack
                | Self::Alarm
                | Self::Message
                | Self::Request
                | Self::Subscribe
                | Self::Reply
                | Self::ReplyEnd
        )
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One wire-level transmission unit: a flag plus an optional message.
#[derive(Debug, Clone)]
pub struct Frame {
    flag: Flag,
    message: Option<Message>,
}

impl Frame {
    #[must_use]
    pub const fn new(flag: Flag, message: Option<Message>) -> Self {
        Self { flag, message }
    }

    #[must_use]
    pub const fn flag(&self) -> Flag {
        self.flag
    }

    #[must_use]
    pub const fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        self.message
    }

    /// Check the one structural invariant: payload-bearing flags need a
    /// message with a non-empty sid.
    ///
    /// # Errors
    ///
    /// Returns a codec error when the invariant is violated.
    pub fn validate(&self) -> Result<()> {
        if self.flag.carries_payload() {
            match &self.message {
                Some(m) if !m.sid().is_empty() => Ok(()),
                Some(_) => Err(SocketdError::codec(format!(
                    "{} frame with empty sid",
                    self.flag
                ))),
                None => Err(SocketdError::codec(format!(
                    "{} frame without message",
                    self.flag
                ))),
            }
        } else {
            Ok(())
        }
    }

    // ---- control-frame factory ----

    /// Build a Connect frame carrying the connection url and protocol version.
    #[must_use]
    pub fn connect(sid: impl Into<String>, url: impl Into<String>) -> Self {
        let entity = Entity::new().put_meta(metas::META_SOCKETD_VERSION, VERSION);
        let message = MessageBuilder::new()
            .flag(Flag::Connect)
            .sid(sid)
            .event(url)
            .entity(entity)
            .build();
        Self::new(Flag::Connect, Some(message))
    }

    /// Build the Connack answering a Connect message (sid and event copied).
    #[must_use]
    pub fn connack(connect_message: &Message) -> Self {
        let entity = Entity::new().put_meta(metas::META_SOCKETD_VERSION, VERSION);
        let message = MessageBuilder::new()
            .flag(Flag::Connack)
            .sid(connect_message.sid())
            .event(connect_message.event())
            .entity(entity)
            .build();
        Self::new(Flag::Connack, Some(message))
    }

    #[must_use]
    pub const fn ping() -> Self {
        Self::new(Flag::Ping, None)
    }

    #[must_use]
    pub const fn pong() -> Self {
        Self::new(Flag::Pong, None)
    }

    #[must_use]
    pub const fn close() -> Self {
        Self::new(Flag::Close, None)
    }

    /// Build an Alarm frame targeting the stream of `from`, with a
    /// description in the entity body.
    #[must_use]
    pub fn alarm(from: &Message, description: impl Into<String>) -> Self {
        let message = MessageBuilder::new()
            .flag(Flag::Alarm)
            .sid(from.sid())
            .event(from.event())
            .entity(Entity::of_text(description.into()))
            .build();
        Self::new(Flag::Alarm, Some(message))
    }
}
