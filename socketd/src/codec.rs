//! Reference wire codec.
//!
//! Frame layout, length-prefixed so a byte stream can be split without
//! lookahead:
//!
//! ```text
//! [u32 body len][u8 flag]
//!               [u16 sid len][sid][u16 event len][event]
//!               [u32 meta len][meta query string][data...]
//! ```
//!
//! All integers are big-endian. Pure control frames (Ping / Pong / Close)
//! encode as a body of just the flag byte. Metadata travels as the entity's
//! percent-escaped query-string encoding; the remainder of the body is the
//! entity data, verbatim.
//!
//! [`FrameDecoder`] is the streaming half: push arbitrary chunks in, pull
//! complete frames out. It stages bytes until a whole length-prefixed body
//! is available, so partial reads and coalesced frames both decode cleanly.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use socketd_core::config::MAX_SIZE_FRAGMENT;
use socketd_core::entity::Entity;
use socketd_core::error::SocketdError;
use socketd_core::frame::{Flag, Frame};
use socketd_core::message::MessageBuilder;

/// Upper bound on an encoded frame body: the fragmentation ceiling plus
/// header room. Anything larger is a corrupt or hostile length prefix.
pub const MAX_FRAME_SIZE: usize = MAX_SIZE_FRAGMENT + 4 * 1024;

/// Wire-level failures, distinct from protocol-level ones.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame body of {0} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    FrameTooLarge(usize),

    #[error("frame body truncated at {0} bytes")]
    Truncated(usize),

    #[error("frame field is not valid UTF-8")]
    InvalidUtf8,

    #[error("frame field of {0} bytes exceeds its length prefix width")]
    FieldTooLarge(usize),
}

impl From<CodecError> for SocketdError {
    fn from(error: CodecError) -> Self {
        Self::Codec(error.to_string())
    }
}

/// Encode one frame to its length-prefixed wire form.
///
/// # Errors
///
/// [`CodecError::FieldTooLarge`] when sid/event/meta overflow their length
/// prefixes, [`CodecError::FrameTooLarge`] when the body exceeds
/// [`MAX_FRAME_SIZE`].
pub fn encode_frame(frame: &Frame) -> Result<Bytes, CodecError> {
    let mut body = BytesMut::with_capacity(64);
    body.put_u8(frame.flag().code());

    if let Some(message) = frame.message() {
        let sid = message.sid().as_bytes();
        let event = message.event().as_bytes();
        let meta = message.entity().meta_string();
        if sid.len() > usize::from(u16::MAX) {
            return Err(CodecError::FieldTooLarge(sid.len()));
        }
        if event.len() > usize::from(u16::MAX) {
            return Err(CodecError::FieldTooLarge(event.len()));
        }
        if meta.len() > u32::MAX as usize {
            return Err(CodecError::FieldTooLarge(meta.len()));
        }

        body.reserve(8 + sid.len() + event.len() + meta.len() + message.data_size());
        body.put_u16(sid.len() as u16);
        body.put_slice(sid);
        body.put_u16(event.len() as u16);
        body.put_slice(event);
        body.put_u32(meta.len() as u32);
        body.put_slice(meta.as_bytes());
        body.put_slice(message.entity().data());
    }

    if body.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(body.len()));
    }

    let mut out = BytesMut::with_capacity(4 + body.len());
    out.put_u32(body.len() as u32);
    out.put_slice(&body);
    Ok(out.freeze())
}

/// Decode one complete length-prefixed frame.
///
/// # Errors
///
/// Codec errors for truncated input, oversized bodies, or invalid UTF-8 in
/// the header fields.
pub fn decode_frame(buf: &[u8]) -> Result<Frame, CodecError> {
    let mut decoder = FrameDecoder::new();
    decoder.push(buf);
    decoder
        .try_next()?
        .ok_or(CodecError::Truncated(buf.len()))
}

/// Incremental decoder over a staged byte stream.
#[derive(Default)]
pub struct FrameDecoder {
    staging: BytesMut,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw transport bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.staging.extend_from_slice(chunk);
    }

    /// Bytes staged but not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.staging.len()
    }

    /// Decode the next complete frame, or `None` until more bytes arrive.
    ///
    /// # Errors
    ///
    /// [`CodecError::FrameTooLarge`] on a hostile length prefix, and body
    /// parse errors; the staging buffer is unusable after an error.
    pub fn try_next(&mut self) -> Result<Option<Frame>, CodecError> {
        if self.staging.len() < 4 {
            return Ok(None);
        }
        let body_len = u32::from_be_bytes([
            self.staging[0],
            self.staging[1],
            self.staging[2],
            self.staging[3],
        ]) as usize;
        if body_len > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge(body_len));
        }
        if self.staging.len() < 4 + body_len {
            return Ok(None);
        }

        self.staging.advance(4);
        let body = self.staging.split_to(body_len).freeze();
        parse_body(body).map(Some)
    }
}

fn parse_body(mut body: Bytes) -> Result<Frame, CodecError> {
    if body.is_empty() {
        return Err(CodecError::Truncated(0));
    }
    let flag = Flag::from_code(body.get_u8());
    if body.is_empty() {
        return Ok(Frame::new(flag, None));
    }

    let sid = read_string(&mut body, Width::U16)?;
    let event = read_string(&mut body, Width::U16)?;
    let meta = read_string(&mut body, Width::U32)?;

    let mut entity = Entity::of_bytes(body);
    entity.set_meta_map(Entity::parse_meta_string(&meta));

    let message = MessageBuilder::new()
        .flag(flag)
        .sid(sid)
        .event(event)
        .entity(entity)
        .build();
    Ok(Frame::new(flag, Some(message)))
}

enum Width {
    U16,
    U32,
}

fn read_string(body: &mut Bytes, width: Width) -> Result<String, CodecError> {
    let prefix = match width {
        Width::U16 => 2,
        Width::U32 => 4,
    };
    if body.remaining() < prefix {
        return Err(CodecError::Truncated(body.remaining()));
    }
    let field_len = match width {
        Width::U16 => usize::from(body.get_u16()),
        Width::U32 => body.get_u32() as usize,
    };
    if body.remaining() < field_len {
        return Err(CodecError::Truncated(body.remaining()));
    }
    let raw = body.split_to(field_len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use socketd_core::entity::metas;

    fn sample_frame() -> Frame {
        let entity = Entity::of_bytes(vec![1u8, 2, 3, 0, 255])
            .put_meta(metas::META_DATA_TYPE, "application/octet-stream")
            .put_meta("weird", "a=b&c");
        let message = MessageBuilder::new()
            .flag(Flag::Request)
            .sid("s-42")
            .event("demo.echo")
            .entity(entity)
            .build();
        Frame::new(Flag::Request, Some(message))
    }

    #[test]
    fn payload_frame_round_trips() {
        let frame = sample_frame();
        let wire = encode_frame(&frame).unwrap();
        let decoded = decode_frame(&wire).unwrap();

        assert_eq!(decoded.flag(), Flag::Request);
        let message = decoded.message().unwrap();
        assert_eq!(message.sid(), "s-42");
        assert_eq!(message.event(), "demo.echo");
        assert_eq!(
            message.meta(metas::META_DATA_TYPE),
            Some("application/octet-stream")
        );
        assert_eq!(message.meta("weird"), Some("a=b&c"));
        assert_eq!(message.entity().data().as_ref(), &[1, 2, 3, 0, 255]);
    }

    #[test]
    fn control_frames_are_five_bytes() {
        for frame in [Frame::ping(), Frame::pong(), Frame::close()] {
            let wire = encode_frame(&frame).unwrap();
            assert_eq!(wire.len(), 5);

            let decoded = decode_frame(&wire).unwrap();
            assert_eq!(decoded.flag(), frame.flag());
            assert!(decoded.message().is_none());
        }
    }

    #[test]
    fn decoder_handles_split_and_coalesced_input() {
        let a = encode_frame(&sample_frame()).unwrap();
        let b = encode_frame(&Frame::ping()).unwrap();
        let mut stream = Vec::new();
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&b);

        // Byte-by-byte: exactly two frames come out, in order.
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();
        for byte in &stream {
            decoder.push(std::slice::from_ref(byte));
            while let Some(frame) = decoder.try_next().unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].flag(), Flag::Request);
        assert_eq!(frames[1].flag(), Flag::Ping);
        assert_eq!(decoder.buffered(), 0);

        // One big chunk: same result.
        let mut decoder = FrameDecoder::new();
        decoder.push(&stream);
        assert_eq!(decoder.try_next().unwrap().unwrap().flag(), Flag::Request);
        assert_eq!(decoder.try_next().unwrap().unwrap().flag(), Flag::Ping);
        assert!(decoder.try_next().unwrap().is_none());
    }

    #[test]
    fn hostile_length_prefix_is_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&u32::MAX.to_be_bytes());
        assert!(matches!(
            decoder.try_next(),
            Err(CodecError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn truncated_input_is_an_error() {
        let wire = encode_frame(&sample_frame()).unwrap();
        // decode_frame insists on a complete frame; the streaming decoder
        // would just wait for more bytes.
        assert!(matches!(
            decode_frame(&wire[..wire.len() - 3]),
            Err(CodecError::Truncated(_))
        ));
    }

    #[test]
    fn unknown_flag_codes_survive_decode() {
        let mut wire = BytesMut::new();
        wire.put_u32(1);
        wire.put_u8(99);
        let frame = decode_frame(&wire).unwrap();
        assert_eq!(frame.flag(), Flag::Unknown);
    }
}
