//! Full Intra Request (RFC 5104 §4.3.1), PSFB FMT=4.

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_FIR, HEADER_LENGTH, Header, PacketType};

const ENTRY_LENGTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirEntry {
    pub ssrc: u32,
    pub sequence_number: u8,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FullIntraRequest {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub fir: Vec<FirEntry>,
}

impl MarshalSize for FullIntraRequest {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8 + self.fir.len() * ENTRY_LENGTH
    }
}

impl Marshal for FullIntraRequest {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }
        let header = Header {
            padding: false,
            count: FORMAT_FIR,
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
        for entry in &self.fir {
            let mut b = &mut buf[offset..];
            b.put_u32(entry.ssrc);
            b.put_u8(entry.sequence_number);
            b.put_u8(0);
            b.put_u16(0);
            offset += ENTRY_LENGTH;
        }
        Ok(offset)
    }
}

impl Unmarshal for FullIntraRequest {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::PayloadSpecificFeedback || header.count != FORMAT_FIR {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        let body_len = header.length as usize * 4;
        if buf.remaining() < body_len || body_len < 8 {
            return Err(Error::ErrPacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let mut remaining = body_len - 8;
        let mut fir = Vec::new();
        while remaining >= ENTRY_LENGTH {
            let ssrc = buf.get_u32();
            let sequence_number = buf.get_u8();
            buf.advance(3);
            fir.push(FirEntry { ssrc, sequence_number });
            remaining -= ENTRY_LENGTH;
        }
        Ok(FullIntraRequest {
            sender_ssrc,
            media_ssrc,
            fir,
        })
    }
}

use crate::packet::impl_packet;
impl_packet!(FullIntraRequest);
