//! SocketD protocol engine.
//!
//! A framed, bidirectional, multiplexed application protocol over any
//! reliable byte stream: fire-and-forget messages, single-reply requests,
//! multi-reply subscriptions, heartbeats, handshake negotiation, graceful
//! and abrupt close, and out-of-band alarms.
//!
//! This crate is the engine: the channel contract transport bindings
//! implement (`channel`), the listener interface applications implement
//! (`listener`), the frame dispatcher driving the protocol state machine
//! (`processor`), the outward-facing session API (`session`), a reference
//! wire codec (`codec`), and an in-process channel pair for tests and demos
//! (`inproc`). The data model, stream registry, and fragment layer live in
//! `socketd-core` and are re-exported here.
//!
//! # Example
//!
//! ```no_run
//! use socketd::channel::Channel;
//! use socketd::inproc;
//! use socketd::listener::SimpleListener;
//! use socketd_core::config::ChannelConfig;
//! use socketd_core::entity::Entity;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> socketd_core::error::Result<()> {
//! let (client, _server) = inproc::pair(
//!     ChannelConfig::client().build(),
//!     ChannelConfig::server().build(),
//!     Arc::new(SimpleListener),
//!     Arc::new(SimpleListener),
//! );
//!
//! client.channel().send_connect("inproc://demo?user=a").await?;
//! let reply = client
//!     .session()
//!     .request("echo", Entity::of_text("hi"), Duration::from_secs(1))
//!     .await?;
//! println!("{}", reply.entity().data_as_string());
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), deny(unsafe_code))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod channel;
pub mod codec;
pub mod inproc;
pub mod listener;
pub mod processor;
pub mod session;

pub use socketd_core as core;

pub mod prelude {
    pub use crate::channel::{Channel, ChannelCore};
    pub use crate::codec::{decode_frame, encode_frame, FrameDecoder};
    pub use crate::inproc::{pair, InprocChannel, Peer};
    pub use crate::listener::{Listener, SimpleListener};
    pub use crate::processor::Processor;
    pub use crate::session::Session;
    pub use socketd_core::prelude::*;
}
