//! Goodbye (RFC 3550 §6.6), RTCP packet type 203.

use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, HEADER_LENGTH, PacketType};

const SSRC_LENGTH: usize = 4;
pub const MAX_SOURCES: usize = 31;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Goodbye {
    pub sources: Vec<u32>,
    pub reason: Bytes,
}

impl MarshalSize for Goodbye {
    fn marshal_size(&self) -> usize {
        let reason_len = if self.reason.is_empty() {
            0
        } else {
            (1 + self.reason.len()).div_ceil(4) * 4
        };
        HEADER_LENGTH + self.sources.len() * SSRC_LENGTH + reason_len
    }
}

impl Marshal for Goodbye {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.sources.len() > MAX_SOURCES {
            return Err(Error::ErrTooManyReports);
        }
        if self.reason.len() > 255 {
            return Err(Error::ErrPacketTooShort);
        }
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }

        let header = Header {
            padding: false,
            count: self.sources.len() as u8,
            packet_type_raw: PacketType::Goodbye.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;

        {
            let mut b = &mut buf[offset..];
            for source in &self.sources {
                b.put_u32(*source);
            }
        }
        offset += self.sources.len() * SSRC_LENGTH;

        if !self.reason.is_empty() {
            let reason_field_len = (1 + self.reason.len()).div_ceil(4) * 4;
            buf[offset] = self.reason.len() as u8;
            buf[offset + 1..offset + 1 + self.reason.len()].copy_from_slice(&self.reason);
            for b in &mut buf[offset + 1 + self.reason.len()..offset + reason_field_len] {
                *b = 0;
            }
            offset += reason_field_len;
        }

        Ok(offset)
    }
}

impl Unmarshal for Goodbye {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::Goodbye {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        let body_len = header.length as usize * 4;
        if buf.remaining() < body_len {
            return Err(Error::ErrPacketTooShort);
        }

        let mut sources = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            sources.push(buf.get_u32());
        }
        let consumed = sources.len() * SSRC_LENGTH;
        let remainder = body_len - consumed;

        let reason = if remainder == 0 {
            Bytes::new()
        } else {
            let reason_len = buf.get_u8() as usize;
            if reason_len > remainder - 1 {
                return Err(Error::ErrPacketTooShort);
            }
            let reason = buf.copy_to_bytes(reason_len);
            let padding = remainder - 1 - reason_len;
            buf.advance(padding);
            reason
        };

        Ok(Goodbye { sources, reason })
    }
}

use crate::packet::impl_packet;
impl_packet!(Goodbye);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_reason() {
        let goodbye = Goodbye {
            sources: vec![0x902f9e2e, 0xbc5e9a40],
            reason: Bytes::from_static(b"Session ended"),
        };
        let raw = goodbye.marshal().unwrap();
        let mut buf = raw.clone();
        assert_eq!(Goodbye::unmarshal(&mut buf).unwrap(), goodbye);
    }
}
