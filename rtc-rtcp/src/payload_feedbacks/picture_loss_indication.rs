//! Picture Loss Indication (RFC 4585 §6.3.1), PSFB FMT=1.

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_PLI, HEADER_LENGTH, Header, PacketType};

const BODY_LENGTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PictureLossIndication {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
}

impl MarshalSize for PictureLossIndication {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + BODY_LENGTH
    }
}

impl Marshal for PictureLossIndication {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }
        let header = Header {
            padding: false,
            count: FORMAT_PLI,
            packet_type_raw: PacketType::PayloadSpecificFeedback.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;
        let mut b = &mut buf[offset..];
        b.put_u32(self.sender_ssrc);
        b.put_u32(self.media_ssrc);
        offset += BODY_LENGTH;
        Ok(offset)
    }
}

impl Unmarshal for PictureLossIndication {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::PayloadSpecificFeedback || header.count != FORMAT_PLI {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        if buf.remaining() < BODY_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        Ok(PictureLossIndication {
            sender_ssrc: buf.get_u32(),
            media_ssrc: buf.get_u32(),
        })
    }
}

use crate::packet::impl_packet;
impl_packet!(PictureLossIndication);
