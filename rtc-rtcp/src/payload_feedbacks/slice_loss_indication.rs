//! Slice Loss Indication (RFC 4585 §6.3.2), PSFB FMT=2.

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_SLI, HEADER_LENGTH, Header, PacketType};

const SLI_ENTRY_LENGTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliEntry {
    pub first: u16,
    pub number: u16,
    pub picture_id: u8,
}

impl SliEntry {
    fn pack(&self) -> u32 {
        ((self.first as u32 & 0x1FFF) << 19)
            | ((self.number as u32 & 0x1FFF) << 6)
            | (self.picture_id as u32 & 0x3F)
    }

    fn unpack(v: u32) -> Self {
        Self {
            first: (v >> 19) as u16 & 0x1FFF,
            number: (v >> 6) as u16 & 0x1FFF,
            picture_id: v as u8 & 0x3F,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SliceLossIndication {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub sli_entries: Vec<SliEntry>,
}

impl MarshalSize for SliceLossIndication {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8 + self.sli_entries.len() * SLI_ENTRY_LENGTH
    }
}

impl Marshal for SliceLossIndication {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }
        let header = Header {
            padding: false,
            count: FORMAT_SLI,
            packet_type_raw: PacketType::PayloadSpecificFeedback.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;
        {
            let mut b = &mut buf[offset..];
            b.put_u32(self.sender_ssrc);
            b.put_u32(self.media_ssrc);
        }
        offset += 8;
        for entry in &self.sli_entries {
            buf[offset..offset + 4].copy_from_slice(&entry.pack().to_be_bytes());
            offset += SLI_ENTRY_LENGTH;
        }
        Ok(offset)
    }
}

impl Unmarshal for SliceLossIndication {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::PayloadSpecificFeedback || header.count != FORMAT_SLI {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        let body_len = header.length as usize * 4;
        if buf.remaining() < body_len || body_len < 8 {
            return Err(Error::ErrPacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let mut remaining = body_len - 8;
        let mut sli_entries = Vec::new();
        while remaining >= SLI_ENTRY_LENGTH {
            sli_entries.push(SliEntry::unpack(buf.get_u32()));
            remaining -= SLI_ENTRY_LENGTH;
        }
        Ok(SliceLossIndication {
            sender_ssrc,
            media_ssrc,
            sli_entries,
        })
    }
}

use crate::packet::impl_packet;
impl_packet!(SliceLossIndication);
