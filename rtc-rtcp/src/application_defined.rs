//! Application-Defined packet (RFC 3550 §6.7), PT=204.

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{HEADER_LENGTH, Header, PacketType};
use crate::packet::impl_packet;

const SSRC_LENGTH: usize = 4;
const NAME_LENGTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplicationDefined {
    pub subtype: u8,
    pub source: u32,
    /// Four-byte ASCII name (not NUL-terminated).
    pub name: [u8; 4],
    /// Opaque payload. The wire length field only counts 32-bit words, so
    /// callers must already pad this to a multiple of 4 bytes themselves —
    /// unlike the report/feedback types, the unpadded length can't be
    /// recovered on unmarshal.
    pub data: Vec<u8>,
}

impl MarshalSize for ApplicationDefined {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + SSRC_LENGTH + NAME_LENGTH + self.data.len()
    }
}

impl Marshal for ApplicationDefined {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }
        if self.subtype > 0x1F {
            return Err(Error::ErrTooManyReports);
        }
        if self.data.len() % 4 != 0 {
            return Err(Error::ErrInvalidPadding);
        }
        let header = Header {
            padding: false,
            count: self.subtype,
            packet_type_raw: PacketType::ApplicationDefined.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;
        {
            let mut b = &mut buf[offset..];
            b.put_u32(self.source);
            b.put_slice(&self.name);
            offset += SSRC_LENGTH + NAME_LENGTH;
        }
        buf[offset..offset + self.data.len()].copy_from_slice(&self.data);
        offset += self.data.len();
        Ok(offset)
    }
}

impl Unmarshal for ApplicationDefined {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::ApplicationDefined {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        let body_bytes = (header.length as usize + 1) * 4;
        if buf.remaining() < body_bytes || body_bytes < SSRC_LENGTH + NAME_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        let source = buf.get_u32();
        let mut name = [0u8; 4];
        buf.copy_to_slice(&mut name);
        let data_len = body_bytes - SSRC_LENGTH - NAME_LENGTH;
        let mut data = vec![0u8; data_len];
        buf.copy_to_slice(&mut data);
        Ok(ApplicationDefined {
            subtype: header.count,
            source,
            name,
            data,
        })
    }
}

impl_packet!(ApplicationDefined);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let app = ApplicationDefined {
            subtype: 0,
            source: 0x902f9e2e,
            name: *b"test",
            data: vec![1, 2, 3],
        };
        let raw = app.marshal().unwrap();
        let mut buf = raw.clone();
        assert_eq!(ApplicationDefined::unmarshal(&mut buf).unwrap(), app);
    }

    #[test]
    fn rejects_unpadded_data() {
        let app = ApplicationDefined {
            subtype: 1,
            source: 1,
            name: *b"abcd",
            data: vec![9],
        };
        assert!(app.marshal().is_err());
    }
}
