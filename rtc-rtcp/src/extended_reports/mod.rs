//! Extended Report (XR, RFC 3611), PT=207.

pub mod dlrr;

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{HEADER_LENGTH, Header, PacketType};
use crate::packet::impl_packet;
use dlrr::Dlrr;

const BLOCK_HEADER_LENGTH: usize = 4;
const DLRR_BLOCK_TYPE: u8 = 5;

/// The subset of RFC 3611 report blocks this crate understands. Unknown
/// block types are preserved as opaque bytes so a compound XR packet can be
/// re-marshaled without silently dropping data this crate doesn't parse.
#[derive(Debug, Clone, PartialEq)]
pub enum XrBlock {
    Dlrr(Dlrr),
    Unknown { block_type: u8, payload: Vec<u8> },
}

impl XrBlock {
    fn marshal_size(&self) -> usize {
        BLOCK_HEADER_LENGTH
            + match self {
                XrBlock::Dlrr(d) => d.marshal_size(),
                XrBlock::Unknown { payload, .. } => payload.len(),
            }
    }

    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            XrBlock::Dlrr(d) => {
                let body_len = d.marshal_size();
                if buf.len() < BLOCK_HEADER_LENGTH + body_len {
                    return Err(Error::ErrPacketTooShort);
                }
                let mut b = &mut buf[..];
                b.put_u8(DLRR_BLOCK_TYPE);
                b.put_u8(0);
                b.put_u16((body_len / 4) as u16);
                let n = d.marshal_to(&mut buf[BLOCK_HEADER_LENGTH..])?;
                Ok(BLOCK_HEADER_LENGTH + n)
            }
            XrBlock::Unknown { block_type, payload } => {
                if buf.len() < BLOCK_HEADER_LENGTH + payload.len() {
                    return Err(Error::ErrPacketTooShort);
                }
                let mut b = &mut buf[..];
                b.put_u8(*block_type);
                b.put_u8(0);
                b.put_u16((payload.len() / 4) as u16);
                buf[BLOCK_HEADER_LENGTH..BLOCK_HEADER_LENGTH + payload.len()]
                    .copy_from_slice(payload);
                Ok(BLOCK_HEADER_LENGTH + payload.len())
            }
        }
    }

    fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        if buf.remaining() < BLOCK_HEADER_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        let block_type = buf.get_u8();
        let _reserved = buf.get_u8();
        let len_words = buf.get_u16() as usize;
        let body_len = len_words * 4;
        if buf.remaining() < body_len {
            return Err(Error::ErrPacketTooShort);
        }
        if block_type == DLRR_BLOCK_TYPE {
            let mut body = buf.copy_to_bytes(body_len);
            Ok(XrBlock::Dlrr(Dlrr::unmarshal(&mut body)?))
        } else {
            let mut payload = vec![0u8; body_len];
            buf.copy_to_slice(&mut payload);
            Ok(XrBlock::Unknown { block_type, payload })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtendedReport {
    pub sender_ssrc: u32,
    pub blocks: Vec<XrBlock>,
}

impl MarshalSize for ExtendedReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 4 + self.blocks.iter().map(XrBlock::marshal_size).sum::<usize>()
    }
}

impl Marshal for ExtendedReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }
        let header = Header {
            padding: false,
            count: 0,
            packet_type_raw: PacketType::ExtendedReport.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;
        {
            let mut b = &mut buf[offset..];
            b.put_u32(self.sender_ssrc);
            offset += 4;
        }
        for block in &self.blocks {
            offset += block.marshal_to(&mut buf[offset..])?;
        }
        Ok(offset)
    }
}

impl Unmarshal for ExtendedReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::ExtendedReport {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        let body_bytes = (header.length as usize + 1) * 4;
        if buf.remaining() < body_bytes || body_bytes < 4 {
            return Err(Error::ErrPacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let mut consumed = 4;
        let mut blocks = Vec::new();
        while consumed < body_bytes {
            let before = buf.remaining();
            blocks.push(XrBlock::unmarshal(buf)?);
            consumed += before - buf.remaining();
        }
        Ok(ExtendedReport { sender_ssrc, blocks })
    }
}

impl_packet!(ExtendedReport);

#[cfg(test)]
mod tests {
    use super::*;
    use dlrr::DlrrReport;

    #[test]
    fn round_trips_with_dlrr_block() {
        let xr = ExtendedReport {
            sender_ssrc: 0x902f9e2e,
            blocks: vec![XrBlock::Dlrr(Dlrr {
                reports: vec![DlrrReport {
                    ssrc: 0xbc5e9a40,
                    last_rr: 0x12345678,
                    delay_since_last_rr: 0x1000,
                }],
            })],
        };
        let raw = xr.marshal().unwrap();
        let mut buf = raw.clone();
        assert_eq!(ExtendedReport::unmarshal(&mut buf).unwrap(), xr);
    }

    #[test]
    fn preserves_unknown_block_bytes() {
        let xr = ExtendedReport {
            sender_ssrc: 1,
            blocks: vec![XrBlock::Unknown {
                block_type: 9,
                payload: vec![1, 2, 3, 4],
            }],
        };
        let raw = xr.marshal().unwrap();
        let mut buf = raw.clone();
        assert_eq!(ExtendedReport::unmarshal(&mut buf).unwrap(), xr);
    }
}
