//! Fragment split and reassembly for entities too large for one frame.
//!
//! The sender splits an oversized entity into consecutive frames sharing the
//! message's sid, each tagged with a 1-based `Data-Fragment-Idx`. The first
//! fragment carries the full metadata plus `Data-Length`, the total byte
//! count — that declared total is the terminal signal: reassembly completes
//! when the accumulated bytes reach it, never by waiting for frame absence.
//!
//! Aggregation is opt-in. When disabled, fragment metadata passes through
//! the dispatcher untouched and reassembly is the listener's responsibility.
//!
//! An unbounded sender could exhaust memory by never completing a stream, so
//! per-sid buffering is capped: a declared total or accumulation beyond the
//! configured limit drops the buffer and fails with a codec error.

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tracing::{trace, warn};

use crate::entity::{metas, Entity};
use crate::error::{Result, SocketdError};
use crate::frame::{Flag, Frame};
use crate::message::{Message, MessageBuilder};

/// Split an outbound frame whose entity exceeds `fragment_size`.
///
/// Returns `None` when the entity fits in one frame. Otherwise returns the
/// fragment frames in send order, all sharing the original flag and sid.
#[must_use]
pub fn split(frame: &Frame, fragment_size: usize) -> Option<Vec<Frame>> {
    let message = frame.message()?;
    let data = message.entity().data();
    if fragment_size == 0 || data.len() <= fragment_size {
        return None;
    }

    let mut frames = Vec::with_capacity(data.len().div_ceil(fragment_size));
    let mut offset = 0;
    let mut index = 0u32;

    while offset < data.len() {
        index += 1;
        let end = (offset + fragment_size).min(data.len());
        let chunk = data.slice(offset..end);
        offset = end;

        let mut entity = if index == 1 {
            // First fragment carries the full metadata plus the total.
            let mut entity = message.entity().clone();
            entity.set_data(Bytes::new());
            entity.set_meta(metas::META_DATA_LENGTH, data.len().to_string());
            entity
        } else {
            Entity::new()
        };
        entity.set_meta(metas::META_DATA_FRAGMENT_IDX, index.to_string());
        entity.set_data(chunk);

        let fragment = MessageBuilder::new()
            .flag(frame.flag())
            .sid(message.sid())
            .event(message.event())
            .entity(entity)
            .build();
        frames.push(Frame::new(frame.flag(), Some(fragment)));
    }

    Some(frames)
}

struct Holder {
    flag: Flag,
    event: String,
    meta: Vec<(String, String)>,
    total: usize,
    buffer: BytesMut,
}

impl Holder {
    fn start(message: &Message, buffer_limit: usize) -> Result<Self> {
        let total_str = message.meta(metas::META_DATA_LENGTH).ok_or_else(|| {
            SocketdError::codec(format!(
                "missing '{}' meta, event={}",
                metas::META_DATA_LENGTH,
                message.event()
            ))
        })?;
        let total: usize = total_str.parse().map_err(|_| {
            SocketdError::codec(format!(
                "invalid '{}' meta: {total_str}",
                metas::META_DATA_LENGTH
            ))
        })?;
        if total > buffer_limit {
            return Err(SocketdError::codec(format!(
                "declared fragment total {total} exceeds buffer limit {buffer_limit}"
            )));
        }

        let mut meta: Vec<(String, String)> = message.entity().meta_map().to_vec();
        meta.retain(|(k, _)| k != metas::META_DATA_FRAGMENT_IDX);

        Ok(Self {
            flag: message.flag(),
            event: message.event().to_string(),
            meta,
            total,
            buffer: BytesMut::with_capacity(total),
        })
    }

    fn into_frame(self, sid: &str) -> Frame {
        let mut entity = Entity::of_bytes(self.buffer.freeze());
        entity.set_meta_map(self.meta);
        let message = MessageBuilder::new()
            .flag(self.flag)
            .sid(sid)
            .event(self.event)
            .entity(entity)
            .build();
        Frame::new(self.flag, Some(message))
    }
}

/// Per-channel-configuration reassembly state, shared across all sessions
/// and streams on the channel.
pub struct FragmentAssembler {
    aggr_enabled: bool,
    buffer_limit: usize,
    holders: DashMap<String, Holder>,
}

impl FragmentAssembler {
    #[must_use]
    pub fn new(aggr_enabled: bool, buffer_limit: usize) -> Self {
        Self {
            aggr_enabled,
            buffer_limit,
            holders: DashMap::new(),
        }
    }

    /// Whether inbound fragments are reassembled here (when false, fragment
    /// metadata passes through to the listener untouched).
    #[must_use]
    pub const fn aggr_enabled(&self) -> bool {
        self.aggr_enabled
    }

    /// Feed one fragment-tagged frame.
    ///
    /// Returns `Ok(None)` while the entity is incomplete, or the
    /// reconstructed frame once the accumulated bytes reach the declared
    /// total. The reconstructed entity's data is byte-identical to the
    /// original and its metadata is the first fragment's minus the fragment
    /// index.
    ///
    /// # Errors
    ///
    /// Codec errors on a first fragment without `Data-Length`, or when the
    /// declared total or the accumulation exceeds the buffer limit; the
    /// per-sid buffer is dropped on error.
    pub fn aggregate(&self, index: i64, frame: &Frame) -> Result<Option<Frame>> {
        let message = frame
            .message()
            .ok_or_else(|| SocketdError::codec("fragment frame without message"))?;
        let sid = message.sid().to_string();

        if !self.holders.contains_key(&sid) {
            let holder = Holder::start(message, self.buffer_limit)?;
            self.holders.insert(sid.clone(), holder);
        }

        let complete = {
            let Some(mut holder) = self.holders.get_mut(&sid) else {
                return Err(SocketdError::protocol(format!(
                    "fragment buffer vanished, sid={sid}"
                )));
            };
            holder.buffer.extend_from_slice(message.entity().data());
            trace!(sid = %sid, index, buffered = holder.buffer.len(), total = holder.total,
                "fragment buffered");

            if holder.buffer.len() > self.buffer_limit || holder.buffer.len() > holder.total {
                None
            } else {
                Some(holder.buffer.len() >= holder.total)
            }
        };

        match complete {
            None => {
                self.holders.remove(&sid);
                warn!(sid = %sid, "fragment accumulation exceeded declared size or limit");
                Err(SocketdError::codec(format!(
                    "fragment accumulation out of bounds, sid={sid}"
                )))
            }
            Some(false) => Ok(None),
            Some(true) => {
                let Some((_, holder)) = self.holders.remove(&sid) else {
                    return Err(SocketdError::protocol(format!(
                        "fragment buffer vanished, sid={sid}"
                    )));
                };
                Ok(Some(holder.into_frame(&sid)))
            }
        }
    }

    /// Drop any buffered fragments for a sid (stream failed or channel
    /// closed). Idempotent.
    pub fn discard(&self, sid: &str) {
        self.holders.remove(sid);
    }

    /// Number of sids with buffered fragments.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.holders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_frame(sid: &str, data: Vec<u8>) -> Frame {
        let entity = Entity::of_bytes(data).put_meta(metas::META_DATA_TYPE, "application/octet-stream");
        let message = MessageBuilder::new()
            .flag(Flag::Message)
            .sid(sid)
            .event("upload")
            .entity(entity)
            .build();
        Frame::new(Flag::Message, Some(message))
    }

    #[test]
    fn small_entities_are_not_split() {
        let frame = data_frame("f0", vec![1, 2, 3]);
        assert!(split(&frame, 16).is_none());
    }

    #[test]
    fn split_and_aggregate_round_trip() {
        let payload: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        let frame = data_frame("f1", payload.clone());

        let fragments = split(&frame, 256).unwrap();
        assert_eq!(fragments.len(), 4);
        let first = fragments[0].message().unwrap();
        assert_eq!(first.meta(metas::META_DATA_FRAGMENT_IDX), Some("1"));
        assert_eq!(first.meta(metas::META_DATA_LENGTH), Some("1000"));

        let assembler = FragmentAssembler::new(true, 64 * 1024);
        let mut rebuilt = None;
        for fragment in &fragments {
            let index = fragment.message().unwrap().meta_as_int(metas::META_DATA_FRAGMENT_IDX);
            match assembler.aggregate(index, fragment).unwrap() {
                Some(frame) => {
                    assert!(rebuilt.is_none());
                    rebuilt = Some(frame);
                }
                None => {}
            }
        }

        let rebuilt = rebuilt.expect("terminal fragment should complete the entity");
        let message = rebuilt.message().unwrap();
        assert_eq!(message.sid(), "f1");
        assert_eq!(message.event(), "upload");
        assert_eq!(message.entity().data().as_ref(), payload.as_slice());
        // Non-fragment metadata survives; the index tag does not.
        assert_eq!(message.meta(metas::META_DATA_TYPE), Some("application/octet-stream"));
        assert_eq!(message.meta(metas::META_DATA_FRAGMENT_IDX), None);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn first_fragment_requires_data_length() {
        let assembler = FragmentAssembler::new(true, 1024);
        let mut frame = data_frame("f2", vec![0; 8]);
        if let Some(message) = frame.message() {
            let mut entity = message.entity().clone();
            entity.set_meta(metas::META_DATA_FRAGMENT_IDX, "1");
            let message = MessageBuilder::new()
                .flag(Flag::Message)
                .sid("f2")
                .event("upload")
                .entity(entity)
                .build();
            frame = Frame::new(Flag::Message, Some(message));
        }

        let err = assembler.aggregate(1, &frame).unwrap_err();
        assert!(matches!(err, SocketdError::Codec(_)));
    }

    #[test]
    fn oversized_declared_total_is_rejected() {
        let frame = data_frame("f3", vec![0; 4096]);
        let fragments = split(&frame, 1024).unwrap();

        let assembler = FragmentAssembler::new(true, 2048);
        let err = assembler.aggregate(1, &fragments[0]).unwrap_err();
        assert!(matches!(err, SocketdError::Codec(_)));
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn overflowing_accumulation_drops_the_buffer() {
        let assembler = FragmentAssembler::new(true, 64 * 1024);

        // Declares 8 bytes but keeps sending more.
        let mut first = Entity::of_bytes(vec![0u8; 8]);
        first.set_meta(metas::META_DATA_LENGTH, "8");
        first.set_meta(metas::META_DATA_FRAGMENT_IDX, "1");
        let first = Frame::new(
            Flag::Message,
            Some(MessageBuilder::new().flag(Flag::Message).sid("f4").entity(first).build()),
        );
        assert!(assembler.aggregate(1, &first).unwrap().is_some());

        // Start again, then overshoot the declared total.
        let mut head = Entity::of_bytes(vec![0u8; 4]);
        head.set_meta(metas::META_DATA_LENGTH, "8");
        head.set_meta(metas::META_DATA_FRAGMENT_IDX, "1");
        let head = Frame::new(
            Flag::Message,
            Some(MessageBuilder::new().flag(Flag::Message).sid("f5").entity(head).build()),
        );
        assert!(assembler.aggregate(1, &head).unwrap().is_none());

        let mut tail = Entity::of_bytes(vec![0u8; 100]);
        tail.set_meta(metas::META_DATA_FRAGMENT_IDX, "2");
        let tail = Frame::new(
            Flag::Message,
            Some(MessageBuilder::new().flag(Flag::Message).sid("f5").entity(tail).build()),
        );
        assert!(assembler.aggregate(2, &tail).is_err());
        assert_eq!(assembler.pending(), 0);
    }
}
