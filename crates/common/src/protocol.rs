//! The length-prefixed frame format spoken by log shippers.
//!
//! Every frame is a fixed eight byte header followed by the payload:
//!
//! ```text
//! offset 0: signature  4 bytes, opaque application-defined tag
//! offset 4: length     4 bytes, unsigned big-endian
//! offset 8: payload    `length` bytes
//! ```
//!
//! The meaning of a signature and the encoding of its payload belong to the
//! message processor, not to this layer.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest payload a frame may carry (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// Four byte frame tag, e.g. `PING` or `JDAT`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 4]);

impl Signature {
    /// Wrap raw signature bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// The raw bytes as they appear on the wire.
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<[u8; 4]> for Signature {
    fn from(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

impl From<&[u8; 4]> for Signature {
    fn from(bytes: &[u8; 4]) -> Self {
        Self(*bytes)
    }
}

/// Printable ASCII is shown verbatim, anything else as `\xNN`.
impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(\"{self}\")")
    }
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub signature: Signature,
    /// Payload length in bytes, already checked against [`MAX_FRAME_SIZE`].
    pub length: usize,
}

impl FrameHeader {
    /// Build a header for a payload of `length` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if `length` exceeds [`MAX_FRAME_SIZE`].
    pub fn new(signature: Signature, length: usize) -> Result<Self, FrameError> {
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                length,
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(Self { signature, length })
    }

    /// Parse the eight header bytes read off the wire.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if the declared length exceeds
    /// [`MAX_FRAME_SIZE`]. Callers must not read a body in that case.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, FrameError> {
        let signature = Signature([buf[0], buf[1], buf[2], buf[3]]);
        let length = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Self::new(signature, length as usize)
    }

    /// Serialise to the eight byte wire representation.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.signature.0);
        // `new` bounds length to MAX_FRAME_SIZE, so it always fits in a u32.
        out[4..].copy_from_slice(&(self.length as u32).to_be_bytes());
        out
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// A complete frame: signature plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub signature: Signature,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(signature: impl Into<Signature>, payload: impl Into<Bytes>) -> Self {
        Self {
            signature: signature.into(),
            payload: payload.into(),
        }
    }

    /// The header describing this frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if the payload exceeds [`MAX_FRAME_SIZE`].
    pub fn header(&self) -> Result<FrameHeader, FrameError> {
        FrameHeader::new(self.signature, self.payload.len())
    }

    /// Encode header and payload into one contiguous buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooLarge`] if the payload exceeds [`MAX_FRAME_SIZE`].
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        Ok(write_frame(&self.header()?, &self.payload))
    }
}

/// Encode `signature + be32(len) + payload` into one buffer.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the payload exceeds [`MAX_FRAME_SIZE`].
pub fn encode(signature: Signature, payload: &[u8]) -> Result<Bytes, FrameError> {
    let header = FrameHeader::new(signature, payload.len())?;
    Ok(write_frame(&header, payload))
}

fn write_frame(header: &FrameHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(&header.encode());
    buf.put_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: Signature = Signature::new(*b"PING");

    #[test]
    fn header_layout_is_big_endian() {
        let header = FrameHeader::new(PING, 0x0102_0304 & 0x000F_FFFF).unwrap();
        let bytes = header.encode();
        assert_eq!(&bytes[..4], b"PING");
        assert_eq!(&bytes[4..], &[0x00, 0x02, 0x03, 0x04]);
        assert_eq!(FrameHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn decode_accepts_maximum_length() {
        let mut raw = [0u8; HEADER_LEN];
        raw[..4].copy_from_slice(b"JDAT");
        raw[4..].copy_from_slice(&(MAX_FRAME_SIZE as u32).to_be_bytes());
        let header = FrameHeader::decode(&raw).unwrap();
        assert_eq!(header.length, MAX_FRAME_SIZE);
        assert_eq!(header.signature, Signature::new(*b"JDAT"));
    }

    #[test]
    fn decode_rejects_oversized_length() {
        let mut raw = [0u8; HEADER_LEN];
        raw[..4].copy_from_slice(b"JDAT");
        raw[4..].copy_from_slice(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes());
        assert_eq!(
            FrameHeader::decode(&raw),
            Err(FrameError::TooLarge {
                length: MAX_FRAME_SIZE + 1,
                max: MAX_FRAME_SIZE
            })
        );

        raw[4..].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(FrameHeader::decode(&raw).is_err());
    }

    #[test]
    fn encode_prefixes_payload_with_header() {
        let bytes = encode(PING, b"hello").unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 5);
        assert_eq!(&bytes[..4], b"PING");
        assert_eq!(&bytes[4..8], &5u32.to_be_bytes());
        assert_eq!(&bytes[8..], b"hello");
    }

    #[test]
    fn encode_empty_payload() {
        let frame = Frame::new(*b"PONG", Bytes::new());
        let bytes = frame.encode().unwrap();
        assert_eq!(&bytes[..], b"PONG\0\0\0\0");
    }

    #[test]
    fn frame_encode_matches_header() {
        let frame = Frame::new(PING, &b"abc"[..]);
        let header = frame.header().unwrap();
        assert_eq!(header.length, 3);
        let bytes = frame.encode().unwrap();
        assert_eq!(&bytes[..HEADER_LEN], &header.encode());
        assert_eq!(&bytes[HEADER_LEN..], b"abc");
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_FRAME_SIZE + 1];
        assert!(encode(PING, &payload).is_err());
        assert!(Frame::new(PING, payload).header().is_err());
    }

    #[test]
    fn signature_display_escapes_binary() {
        assert_eq!(PING.to_string(), "PING");
        assert_eq!(Signature::new([b'A', 0, b'B', 0xff]).to_string(), "A\\x00B\\xff");
        assert_eq!(format!("{PING:?}"), "Signature(\"PING\")");
    }
}
