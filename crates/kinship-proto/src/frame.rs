//! Frame type combining destination and body.
//!
//! A `Frame` is what the transport primitive moves: the destination it was
//! published to (or delivered from) and an opaque body. Routing only ever
//! looks at the destination; the body is decoded into a
//! [`crate::Payload`] by whoever owns the subscription.
//!
//! Transports that need a byte encoding use [`Frame::encode`]:
//!
//! ```text
//! [dest_len: u16 BE][destination: UTF-8][body_len: u32 BE][body]
//! ```

use bytes::{Buf, BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// Complete protocol frame (transport layer)
///
/// # Invariants
///
/// - `destination` is non-empty UTF-8 no longer than
///   [`Frame::MAX_DESTINATION_LEN`]. Enforced by [`Frame::encode`] and
///   [`Frame::decode`].
/// - `body.len()` never exceeds [`Frame::MAX_BODY_SIZE`] on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination the frame was published to or delivered from
    pub destination: String,

    /// Raw body bytes (already CBOR-encoded)
    pub body: Bytes,
}

impl Frame {
    /// Maximum body size accepted on the wire (64 KiB).
    pub const MAX_BODY_SIZE: usize = 64 * 1024;

    /// Maximum destination length in bytes.
    pub const MAX_DESTINATION_LEN: usize = 512;

    /// Create a new frame.
    #[must_use]
    pub fn new(destination: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self { destination: destination.into(), body: body.into() }
    }

    /// Encode frame into buffer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidDestination` if the destination is empty or
    ///   too long
    /// - `ProtocolError::PayloadTooLarge` if the body exceeds `MAX_BODY_SIZE`
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let dest = self.destination.as_bytes();
        if dest.is_empty() || dest.len() > Self::MAX_DESTINATION_LEN {
            return Err(ProtocolError::InvalidDestination(format!(
                "length {} outside 1..={}",
                dest.len(),
                Self::MAX_DESTINATION_LEN
            )));
        }

        if self.body.len() > Self::MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.body.len(),
                max: Self::MAX_BODY_SIZE,
            });
        }

        dst.put_u16(dest.len() as u16);
        dst.put_slice(dest);
        dst.put_u32(self.body.len() as u32);
        dst.put_slice(&self.body);

        Ok(())
    }

    /// Decode frame from wire format.
    ///
    /// Only validates framing. The body is not parsed; use
    /// [`crate::Payload::from_frame`] for that.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTruncated` if a length prefix promises more
    ///   bytes than are available
    /// - `ProtocolError::InvalidDestination` for empty, oversized or non-UTF-8
    ///   destinations
    /// - `ProtocolError::PayloadTooLarge` if the body length exceeds
    ///   `MAX_BODY_SIZE` (checked before copying)
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;

        if buf.remaining() < 2 {
            return Err(ProtocolError::FrameTruncated { expected: 2, actual: buf.remaining() });
        }
        let dest_len = buf.get_u16() as usize;
        if dest_len == 0 || dest_len > Self::MAX_DESTINATION_LEN {
            return Err(ProtocolError::InvalidDestination(format!(
                "length {dest_len} outside 1..={}",
                Self::MAX_DESTINATION_LEN
            )));
        }
        if buf.remaining() < dest_len {
            return Err(ProtocolError::FrameTruncated {
                expected: dest_len,
                actual: buf.remaining(),
            });
        }
        let destination = std::str::from_utf8(&buf[..dest_len])
            .map_err(|e| ProtocolError::InvalidDestination(e.to_string()))?
            .to_owned();
        buf.advance(dest_len);

        if buf.remaining() < 4 {
            return Err(ProtocolError::FrameTruncated { expected: 4, actual: buf.remaining() });
        }
        let body_len = buf.get_u32() as usize;
        if body_len > Self::MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size: body_len, max: Self::MAX_BODY_SIZE });
        }
        if buf.remaining() < body_len {
            return Err(ProtocolError::FrameTruncated {
                expected: body_len,
                actual: buf.remaining(),
            });
        }

        let body = Bytes::copy_from_slice(&buf[..body_len]);

        Ok(Self { destination, body })
    }
}
