//! Wire framing for the control channel.
//!
//! Every message on the wire is a self-delimiting "ext" frame: a one-byte
//! class discriminator, an optional length field, a one-byte message type
//! and the payload. Five fixed classes cover the common small payload
//! sizes with two bytes of overhead; three variable classes carry a
//! little-endian length field of growing width:
//!
//! | Class  | Payload length      | Layout                         |
//! |--------|---------------------|--------------------------------|
//! | `0xD4` | 1 (fixed)           | `class, type, payload`         |
//! | `0xD5` | 2 (fixed)           | `class, type, payload`         |
//! | `0xD6` | 4 (fixed)           | `class, type, payload`         |
//! | `0xD7` | 8 (fixed)           | `class, type, payload`         |
//! | `0xD8` | 16 (fixed)          | `class, type, payload`         |
//! | `0xC7` | u8 length           | `class, len, type, payload`    |
//! | `0xC8` | u16 length (LE)     | `class, len, type, payload`    |
//! | `0xC9` | u32 length (LE)     | `class, len, type, payload`    |
//!
//! The encoder always picks the smallest class that fits the payload, so
//! a given payload length has exactly one valid encoding. The decoder is
//! streaming: fed an append-only buffer, it yields each complete frame
//! exactly once and leaves any partial trailer in place for the next
//! round.

use crate::frame::Frame;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Upper bound on payload size, enforced symmetrically by the encoder and
/// the decoder. A declared length above this is treated as a protocol
/// violation rather than buffered.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

const FIXEXT1: u8 = 0xD4;
const FIXEXT2: u8 = 0xD5;
const FIXEXT4: u8 = 0xD6;
const FIXEXT8: u8 = 0xD7;
const FIXEXT16: u8 = 0xD8;
const EXT8: u8 = 0xC7;
const EXT16: u8 = 0xC8;
const EXT32: u8 = 0xC9;

/// Fatal framing errors. Either direction of the codec reporting one of
/// these means the byte stream can no longer be trusted; the connection
/// it arrived on must be dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The first byte of a frame is not one of the known classes.
    #[error("unknown frame class byte {0:#04x}")]
    UnknownClass(u8),

    /// Payload length exceeds [`MAX_PAYLOAD_LEN`].
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Encode a message into its frozen wire representation.
///
/// Picks the smallest class that fits `payload`, per the table in the
/// module docs. Lengths that fit no class (or exceed the cap) are
/// rejected with [`FrameError::PayloadTooLarge`].
pub fn encode_frame(msg_type: impl Into<u8>, payload: &[u8]) -> Result<Bytes, FrameError> {
    let msg_type = msg_type.into();
    let len = payload.len();
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge { len, max: MAX_PAYLOAD_LEN });
    }

    let mut buf = BytesMut::with_capacity(len + 6);
    match len {
        1 => buf.put_u8(FIXEXT1),
        2 => buf.put_u8(FIXEXT2),
        4 => buf.put_u8(FIXEXT4),
        8 => buf.put_u8(FIXEXT8),
        16 => buf.put_u8(FIXEXT16),
        _ if len <= u8::MAX as usize => {
            buf.put_u8(EXT8);
            buf.put_u8(len as u8);
        }
        _ if len <= u16::MAX as usize => {
            buf.put_u8(EXT16);
            buf.put_u16_le(len as u16);
        }
        _ => {
            buf.put_u8(EXT32);
            buf.put_u32_le(len as u32);
        }
    }
    buf.put_u8(msg_type);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Try to decode the next complete frame from `buf`.
///
/// Returns `Ok(None)` when the buffer holds only a partial frame; nothing
/// is consumed in that case. On success the frame's bytes (header
/// included) are split off the front of `buf` and the payload is handed
/// out as a zero-copy slice of them.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
    let Some(&class) = buf.first() else {
        return Ok(None);
    };

    // header_len counts the class byte, any length field and the type
    // byte; the type always sits immediately before the payload.
    let (header_len, payload_len) = match class {
        FIXEXT1..=FIXEXT16 => (2, 1usize << (class - FIXEXT1)),
        EXT8 => {
            if buf.len() < 2 {
                return Ok(None);
            }
            (3, buf[1] as usize)
        }
        EXT16 => {
            if buf.len() < 3 {
                return Ok(None);
            }
            (4, u16::from_le_bytes([buf[1], buf[2]]) as usize)
        }
        EXT32 => {
            if buf.len() < 5 {
                return Ok(None);
            }
            (6, u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize)
        }
        other => return Err(FrameError::UnknownClass(other)),
    };

    if payload_len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge { len: payload_len, max: MAX_PAYLOAD_LEN });
    }

    let total = header_len + payload_len;
    if buf.len() < total {
        return Ok(None);
    }

    let raw = buf.split_to(total).freeze();
    let msg_type = raw[header_len - 1];
    let payload = raw.slice(header_len..);
    Ok(Some(Frame { msg_type, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MsgType;

    fn roundtrip(len: usize) {
        let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
        let encoded = encode_frame(MsgType::Command, &payload).unwrap();
        let mut buf = BytesMut::from(&encoded[..]);
        let frame = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.msg_type, u8::from(MsgType::Command));
        assert_eq!(&frame.payload[..], &payload[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn roundtrip_all_classes() {
        for len in [0, 1, 2, 3, 4, 5, 8, 15, 16, 17, 255, 256, 65535, 65536, 100_000] {
            roundtrip(len);
        }
    }

    #[test]
    fn smallest_class_is_deterministic() {
        let class_of = |len: usize| {
            let payload = vec![0u8; len];
            encode_frame(MsgType::Log, &payload).unwrap()[0]
        };
        assert_eq!(class_of(1), 0xD4);
        assert_eq!(class_of(2), 0xD5);
        assert_eq!(class_of(4), 0xD6);
        assert_eq!(class_of(8), 0xD7);
        assert_eq!(class_of(16), 0xD8);
        assert_eq!(class_of(0), 0xC7);
        assert_eq!(class_of(3), 0xC7);
        assert_eq!(class_of(255), 0xC7);
        assert_eq!(class_of(256), 0xC8);
        assert_eq!(class_of(65535), 0xC8);
        assert_eq!(class_of(65536), 0xC9);
    }

    #[test]
    fn four_byte_payload_uses_fixext4() {
        let encoded = encode_frame(MsgType::Signal, &[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        assert_eq!(
            &encoded[..],
            &[0xD6, u8::from(MsgType::Signal), 0xAA, 0xBB, 0xCC, 0xDD]
        );
    }

    #[test]
    fn empty_payload_uses_ext8() {
        let encoded = encode_frame(MsgType::Command, &[]).unwrap();
        assert_eq!(&encoded[..], &[0xC7, 0x00, u8::from(MsgType::Command)]);
    }

    #[test]
    fn length_fields_are_little_endian() {
        let payload = vec![0x55u8; 0x0102];
        let encoded = encode_frame(MsgType::Log, &payload).unwrap();
        assert_eq!(encoded[0], 0xC8);
        assert_eq!(&encoded[1..3], &[0x02, 0x01]);
    }

    #[test]
    fn incomplete_input_consumes_nothing() {
        let encoded = encode_frame(MsgType::RpcRequest, &[1, 2, 3, 4, 5]).unwrap();
        for cut in 0..encoded.len() {
            let mut buf = BytesMut::from(&encoded[..cut]);
            assert_eq!(decode_frame(&mut buf).unwrap(), None);
            assert_eq!(buf.len(), cut, "partial frame must stay buffered");
        }
    }

    #[test]
    fn streaming_decode_across_boundaries() {
        // Three frames concatenated, fed one byte at a time.
        let frames = [
            encode_frame(MsgType::Ping, &[9]).unwrap(),
            encode_frame(MsgType::Log, b"hello world".as_slice()).unwrap(),
            encode_frame(MsgType::Signal, &[1, 2, 3, 4]).unwrap(),
        ];
        let stream: Vec<u8> = frames.iter().flat_map(|f| f.iter().copied()).collect();

        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in stream {
            buf.put_u8(byte);
            while let Some(frame) = decode_frame(&mut buf).unwrap() {
                decoded.push(frame);
            }
        }
        assert!(buf.is_empty());
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].kind(), Some(MsgType::Ping));
        assert_eq!(&decoded[1].payload[..], b"hello world");
        assert_eq!(decoded[2].kind(), Some(MsgType::Signal));
    }

    #[test]
    fn unknown_class_is_fatal() {
        let mut buf = BytesMut::from(&[0xFFu8, 0x00, 0x00][..]);
        assert_eq!(decode_frame(&mut buf), Err(FrameError::UnknownClass(0xFF)));
    }

    #[test]
    fn oversize_declaration_is_fatal() {
        let mut buf = BytesMut::new();
        buf.put_u8(0xC9);
        buf.put_u32_le(u32::MAX);
        assert!(matches!(
            decode_frame(&mut buf),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn oversize_payload_rejected_on_encode() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode_frame(MsgType::Log, &payload),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn unknown_types_pass_through() {
        let encoded = encode_frame(0xABu8, &[7, 7]).unwrap();
        let mut buf = BytesMut::from(&encoded[..]);
        let frame = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.msg_type, 0xAB);
        assert_eq!(frame.kind(), None);
    }
}
