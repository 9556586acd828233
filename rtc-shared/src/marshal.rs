//! Wire (de)serialization traits shared by the RTP and RTCP packet types.
//!
//! Splitting `MarshalSize` out from `Marshal` lets a caller size a buffer
//! once (e.g. to batch several packets into one UDP datagram) before paying
//! for the actual encode.

use bytes::{Bytes, BytesMut};

use crate::error::Result;

/// Reports how many bytes `marshal_to` will write, without writing them.
pub trait MarshalSize {
    fn marshal_size(&self) -> usize;
}

/// Encodes `self` into caller-provided storage.
pub trait Marshal: MarshalSize {
    /// Writes the wire representation into `buf`, returning the number of
    /// bytes written. `buf` must be at least [`MarshalSize::marshal_size`]
    /// bytes long.
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize>;

    /// Convenience wrapper that allocates an exactly-sized buffer.
    fn marshal(&self) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(self.marshal_size());
        let n = self.marshal_to(&mut buf)?;
        buf.truncate(n);
        Ok(buf.freeze())
    }
}

/// Decodes `Self` from a byte buffer, consuming as many bytes as the wire
/// format requires and leaving the remainder (e.g. padding, or a following
/// packet in a compound RTCP datagram) in `buf`.
pub trait Unmarshal: Sized {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: bytes::Buf;
}
