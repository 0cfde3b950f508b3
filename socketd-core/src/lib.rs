//! SocketD Core
//!
//! This crate contains the transport-agnostic core building blocks of the
//! SocketD application protocol:
//! - Frame flags and the control-frame factory (`frame`)
//! - Entity / Message value types and the message builder (`entity`, `message`)
//! - Negotiated handshake parameters (`handshake`)
//! - Pending request/subscribe bookkeeping with timeouts (`stream`)
//! - Fragment split / reassembly for oversized entities (`fragment`)
//! - Per-channel configuration (`config`)
//! - Error types (`error`)
//!
//! Everything here is consumed by the `socketd` engine crate, which adds the
//! channel contract, the frame dispatcher, and the session API.

#![cfg_attr(not(test), deny(unsafe_code))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod entity;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod stream;

// Minimal prelude for downstream crates; kept small to avoid API lock-in.
pub mod prelude {
    pub use crate::config::{ChannelConfig, SharedConfig};
    pub use crate::entity::{metas, Entity};
    pub use crate::error::{Result, SocketdError};
    pub use crate::fragment::FragmentAssembler;
    pub use crate::frame::{close_codes, Flag, Frame};
    pub use crate::handshake::Handshake;
    pub use crate::message::{Message, MessageBuilder};
    pub use crate::stream::{Stream, StreamHandle, StreamMode, StreamRegistry};
}
