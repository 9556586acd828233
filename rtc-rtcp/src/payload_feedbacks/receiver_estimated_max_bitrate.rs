//! Receiver Estimated Maximum Bitrate (REMB), PSFB FMT=15 (application feedback),
//! per draft-alvestrand-rmcat-remb-03.

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_AFB, HEADER_LENGTH, Header, PacketType};
use crate::packet::impl_packet;

const UNIQUE_IDENTIFIER: [u8; 4] = *b"REMB";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReceiverEstimatedMaximumBitrate {
    pub sender_ssrc: u32,
    pub ssrcs: Vec<u32>,
    pub bitrate: f32,
}

impl ReceiverEstimatedMaximumBitrate {
    fn body_len(&self) -> usize {
        // ssrc(4) + unique id(4) + num_ssrc/exp/mantissa word(4) + N*ssrc(4)
        12 + self.ssrcs.len() * 4
    }
}

impl MarshalSize for ReceiverEstimatedMaximumBitrate {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + self.body_len()
    }
}

impl Marshal for ReceiverEstimatedMaximumBitrate {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }
        if self.ssrcs.len() > 0xFF {
            return Err(Error::ErrPacketTooShort);
        }
        let header = Header {
            padding: false,
            count: FORMAT_AFB,
            packet_type_raw: PacketType::PayloadSpecificFeedback.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;
        {
            let mut b = &mut buf[offset..];
            b.put_u32(self.sender_ssrc);
            b.put_u32(0); // media ssrc is always 0 for REMB
            b.put_slice(&UNIQUE_IDENTIFIER);
            offset += 12;
        }

        let mut exp = 0u32;
        let mut mantissa = self.bitrate.max(0.0) as u64;
        while mantissa > 0x3FFFF && exp < 63 {
            mantissa >>= 1;
            exp += 1;
        }
        {
            let mut b = &mut buf[offset..];
            b.put_u8(self.ssrcs.len() as u8);
            b.put_u8(((exp << 2) | ((mantissa >> 16) & 0x3) as u32) as u8);
            b.put_u16((mantissa & 0xFFFF) as u16);
            offset += 4;
        }
        for ssrc in &self.ssrcs {
            let mut b = &mut buf[offset..];
            b.put_u32(*ssrc);
            offset += 4;
        }
        Ok(offset)
    }
}

impl Unmarshal for ReceiverEstimatedMaximumBitrate {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::PayloadSpecificFeedback || header.count != FORMAT_AFB {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        if buf.remaining() < 16 {
            return Err(Error::ErrPacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let _media_ssrc = buf.get_u32();
        let mut unique_id = [0u8; 4];
        buf.copy_to_slice(&mut unique_id);
        if unique_id != UNIQUE_IDENTIFIER {
            return Err(Error::ErrInvalidSdesItem);
        }
        let num_ssrc = buf.get_u8() as usize;
        let b1 = buf.get_u8();
        let b2_b3 = buf.get_u16();
        let exp = (b1 >> 2) as u32;
        let mantissa = (((b1 & 0x3) as u64) << 16) | b2_b3 as u64;
        let bitrate = (mantissa << exp) as f32;

        if buf.remaining() < num_ssrc * 4 {
            return Err(Error::ErrPacketTooShort);
        }
        let ssrcs = (0..num_ssrc).map(|_| buf.get_u32()).collect();

        Ok(ReceiverEstimatedMaximumBitrate {
            sender_ssrc,
            ssrcs,
            bitrate,
        })
    }
}

impl_packet!(ReceiverEstimatedMaximumBitrate);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let remb = ReceiverEstimatedMaximumBitrate {
            sender_ssrc: 0x902f9e2e,
            ssrcs: vec![0xbc5e9a40, 0x1234],
            bitrate: 1_500_000.0,
        };
        let raw = remb.marshal().unwrap();
        let mut buf = raw.clone();
        let decoded = ReceiverEstimatedMaximumBitrate::unmarshal(&mut buf).unwrap();
        assert_eq!(decoded.sender_ssrc, remb.sender_ssrc);
        assert_eq!(decoded.ssrcs, remb.ssrcs);
        assert!((decoded.bitrate - remb.bitrate).abs() < 1.0);
    }

    #[test]
    fn rejects_wrong_unique_identifier() {
        let remb = ReceiverEstimatedMaximumBitrate {
            sender_ssrc: 1,
            ssrcs: vec![2],
            bitrate: 1000.0,
        };
        let mut raw = remb.marshal().unwrap();
        raw[8] = b'X';
        let mut buf = raw.clone();
        assert!(ReceiverEstimatedMaximumBitrate::unmarshal(&mut buf).is_err());
    }
}
