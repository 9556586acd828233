//! Source description (RFC 3550 §6.5), RTCP packet type 202.

use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, HEADER_LENGTH, PacketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdesType {
    SdesEnd,
    SdesCname,
    SdesName,
    SdesEmail,
    SdesPhone,
    SdesLocation,
    SdesTool,
    SdesNote,
    SdesPrivate,
    Unknown(u8),
}

impl From<u8> for SdesType {
    fn from(v: u8) -> Self {
        match v {
            0 => SdesType::SdesEnd,
            1 => SdesType::SdesCname,
            2 => SdesType::SdesName,
            3 => SdesType::SdesEmail,
            4 => SdesType::SdesPhone,
            5 => SdesType::SdesLocation,
            6 => SdesType::SdesTool,
            7 => SdesType::SdesNote,
            8 => SdesType::SdesPrivate,
            other => SdesType::Unknown(other),
        }
    }
}

impl From<SdesType> for u8 {
    fn from(v: SdesType) -> Self {
        match v {
            SdesType::SdesEnd => 0,
            SdesType::SdesCname => 1,
            SdesType::SdesName => 2,
            SdesType::SdesEmail => 3,
            SdesType::SdesPhone => 4,
            SdesType::SdesLocation => 5,
            SdesType::SdesTool => 6,
            SdesType::SdesNote => 7,
            SdesType::SdesPrivate => 8,
            SdesType::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptionItem {
    pub sdes_type: SdesType,
    pub text: Bytes,
}

impl SourceDescriptionItem {
    fn marshal_size(&self) -> usize {
        2 + self.text.len()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceDescriptionChunk {
    pub source: u32,
    pub items: Vec<SourceDescriptionItem>,
}

impl SourceDescriptionChunk {
    fn marshal_size(&self) -> usize {
        let items_len: usize = self.items.iter().map(|i| i.marshal_size()).sum();
        // +1 for the end-of-item-list null octet, padded to a 4-byte boundary
        (4 + items_len + 1).div_ceil(4) * 4
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceDescription {
    pub chunks: Vec<SourceDescriptionChunk>,
}

pub const MAX_CHUNKS: usize = 31;

impl MarshalSize for SourceDescription {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + self.chunks.iter().map(|c| c.marshal_size()).sum::<usize>()
    }
}

impl Marshal for SourceDescription {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.chunks.len() > MAX_CHUNKS {
            return Err(Error::ErrTooManyReports);
        }
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }

        let header = Header {
            padding: false,
            count: self.chunks.len() as u8,
            packet_type_raw: PacketType::SourceDescription.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;

        for chunk in &self.chunks {
            let chunk_size = chunk.marshal_size();
            let items_len: usize = chunk.items.iter().map(|i| i.marshal_size()).sum();
            let raw_len = 4 + items_len + 1;
            let start = offset;
            {
                let mut b = &mut buf[offset..];
                b.put_u32(chunk.source);
                for item in &chunk.items {
                    if item.text.len() > 255 {
                        return Err(Error::ErrInvalidSdesItem);
                    }
                    b.put_u8(item.sdes_type.into());
                    b.put_u8(item.text.len() as u8);
                    b.put_slice(&item.text);
                }
                b.put_u8(0); // end of item list
            }
            for b in &mut buf[start + raw_len..start + chunk_size] {
                *b = 0;
            }
            offset += chunk_size;
        }

        Ok(offset)
    }
}

impl Unmarshal for SourceDescription {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::SourceDescription {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        let body_len = header.length as usize * 4;
        if buf.remaining() < body_len {
            return Err(Error::ErrPacketTooShort);
        }
        let mut body = buf.copy_to_bytes(body_len);

        let mut chunks = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            let chunk_start_remaining = body.remaining();
            if body.remaining() < 4 {
                return Err(Error::ErrPacketTooShort);
            }
            let source = body.get_u32();
            let mut items = Vec::new();
            loop {
                if body.remaining() < 1 {
                    return Err(Error::ErrInvalidSdesItem);
                }
                let sdes_type = body.get_u8();
                if sdes_type == 0 {
                    break;
                }
                if body.remaining() < 1 {
                    return Err(Error::ErrInvalidSdesItem);
                }
                let len = body.get_u8() as usize;
                if body.remaining() < len {
                    return Err(Error::ErrInvalidSdesItem);
                }
                items.push(SourceDescriptionItem {
                    sdes_type: SdesType::from(sdes_type),
                    text: body.copy_to_bytes(len),
                });
            }
            let consumed = chunk_start_remaining - body.remaining();
            let padding = consumed.div_ceil(4) * 4 - consumed;
            body.advance(padding.min(body.remaining()));
            chunks.push(SourceDescriptionChunk { source, items });
        }

        Ok(SourceDescription { chunks })
    }
}

use crate::packet::impl_packet;
impl_packet!(SourceDescription);
