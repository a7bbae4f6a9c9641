//! Message model: the typed frames carried over the channel and the
//! structured payload used by the link-health messages.
//!
//! The type byte works like a channel selector. The codec never looks at
//! payloads; only ping/pong define a payload structure at this layer, and
//! that structure follows msgpack conventions (a two-element array of a
//! minimally-encoded unsigned int and a float64, values big-endian) so
//! any msgpack-capable frontend can produce and consume them directly.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io::Cursor;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Well-known message types.
///
/// Additional type bytes may be allocated by embedders; frames carrying
/// an unassigned byte are delivered unchanged (see [`Frame::kind`]).
#[derive(TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// A message from the host's logging system.
    Log = 0,
    /// Command string for the embedded runtime.
    Command = 1,
    /// Single-byte notification (256 possible signals).
    Signal = 2,
    /// An I/O request.
    IoRequest = 3,
    /// An I/O reply.
    IoReply = 4,
    /// RPC request (id, method, parameters).
    RpcRequest = 5,
    /// RPC reply (id, results).
    RpcReply = 6,
    /// Link-health probe.
    Ping = 7,
    /// Reply to [`MsgType::Ping`].
    Pong = 8,
}

/// One decoded message: the raw type byte and its payload.
///
/// Payloads are zero-copy slices of the receive buffer; frames are
/// immutable once decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u8,
    pub payload: Bytes,
}

impl Frame {
    /// The well-known type this frame carries, if the byte is assigned.
    pub fn kind(&self) -> Option<MsgType> {
        MsgType::try_from(self.msg_type).ok()
    }
}

/// Structured-payload decode errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload truncated")]
    Truncated,

    #[error("unexpected payload tag {0:#04x}")]
    UnexpectedTag(u8),
}

const FIXARRAY2: u8 = 0x92;
const UINT8: u8 = 0xCC;
const UINT16: u8 = 0xCD;
const UINT32: u8 = 0xCE;
const FLOAT64: u8 = 0xCB;

/// Body of a ping or pong message: a request serial and the sender's
/// high-resolution UTC timestamp in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PingBody {
    pub serial: u32,
    pub timestamp: f64,
}

impl PingBody {
    pub fn new(serial: u32, timestamp: f64) -> Self {
        Self { serial, timestamp }
    }

    /// Encode as `[serial, timestamp]` in msgpack form, the serial taking
    /// the smallest integer representation that fits.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(15);
        buf.put_u8(FIXARRAY2);
        match self.serial {
            0..=0x7F => buf.put_u8(self.serial as u8),
            0x80..=0xFF => {
                buf.put_u8(UINT8);
                buf.put_u8(self.serial as u8);
            }
            0x100..=0xFFFF => {
                buf.put_u8(UINT16);
                buf.put_u16(self.serial as u16);
            }
            _ => {
                buf.put_u8(UINT32);
                buf.put_u32(self.serial);
            }
        }
        buf.put_u8(FLOAT64);
        buf.put_f64(self.timestamp);
        buf.freeze()
    }

    /// Decode a ping/pong payload, accepting any of the integer widths
    /// the encoder may have chosen.
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut buf = Cursor::new(payload);

        if next(&mut buf)? != FIXARRAY2 {
            return Err(PayloadError::UnexpectedTag(payload[0]));
        }

        let tag = next(&mut buf)?;
        let serial = match tag {
            0..=0x7F => tag as u32,
            UINT8 => {
                ensure(&buf, 1)?;
                buf.get_u8() as u32
            }
            UINT16 => {
                ensure(&buf, 2)?;
                buf.get_u16() as u32
            }
            UINT32 => {
                ensure(&buf, 4)?;
                buf.get_u32()
            }
            other => return Err(PayloadError::UnexpectedTag(other)),
        };

        let tag = next(&mut buf)?;
        if tag != FLOAT64 {
            return Err(PayloadError::UnexpectedTag(tag));
        }
        ensure(&buf, 8)?;
        let timestamp = buf.get_f64();

        Ok(Self { serial, timestamp })
    }
}

fn next(buf: &mut Cursor<&[u8]>) -> Result<u8, PayloadError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn ensure(buf: &Cursor<&[u8]>, n: usize) -> Result<(), PayloadError> {
    if buf.remaining() < n {
        return Err(PayloadError::Truncated);
    }
    Ok(())
}

/// High-resolution UTC timestamp in seconds since the epoch, as carried
/// in ping/pong bodies. Not adjusted for time zone.
pub fn utc_timestamp() -> f64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs_f64(),
        Err(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_type_values_are_fixed() {
        assert_eq!(u8::from(MsgType::Log), 0);
        assert_eq!(u8::from(MsgType::Command), 1);
        assert_eq!(u8::from(MsgType::Signal), 2);
        assert_eq!(u8::from(MsgType::IoRequest), 3);
        assert_eq!(u8::from(MsgType::IoReply), 4);
        assert_eq!(u8::from(MsgType::RpcRequest), 5);
        assert_eq!(u8::from(MsgType::RpcReply), 6);
        assert_eq!(u8::from(MsgType::Ping), 7);
        assert_eq!(u8::from(MsgType::Pong), 8);
        assert!(matches!(MsgType::try_from(8u8), Ok(MsgType::Pong)));
        assert!(MsgType::try_from(0xABu8).is_err());
    }

    #[test]
    fn ping_body_known_encoding() {
        // serial 0x1234 fits a uint16; 42.5 as an IEEE-754 double.
        let body = PingBody::new(0x1234, 42.5);
        let encoded = body.encode();
        assert_eq!(
            &encoded[..],
            &[0x92, 0xCD, 0x12, 0x34, 0xCB, 0x40, 0x45, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
        assert_eq!(PingBody::decode(&encoded).unwrap(), body);
    }

    #[test]
    fn ping_body_roundtrip_all_widths() {
        for serial in [0, 1, 0x7F, 0x80, 0xFF, 0x100, 0xFFFF, 0x10000, u32::MAX] {
            let body = PingBody::new(serial, 1234.5678);
            let decoded = PingBody::decode(&body.encode()).unwrap();
            assert_eq!(decoded.serial, serial);
            assert_eq!(decoded.timestamp, 1234.5678);
        }
    }

    #[test]
    fn truncated_ping_body_rejected() {
        let encoded = PingBody::new(99, 7.0).encode();
        for cut in 0..encoded.len() {
            assert_eq!(
                PingBody::decode(&encoded[..cut]),
                Err(PayloadError::Truncated)
            );
        }
    }

    #[test]
    fn foreign_payload_rejected() {
        assert_eq!(
            PingBody::decode(&[0x91, 0x01]),
            Err(PayloadError::UnexpectedTag(0x91))
        );
        assert_eq!(
            PingBody::decode(&[0x92, 0xC0, 0x00]),
            Err(PayloadError::UnexpectedTag(0xC0))
        );
    }
}
