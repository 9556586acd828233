//! Temporary Maximum Media Stream Bitrate Request (RFC 5104 §4.2.1), RTPFB FMT=3.

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_TMMBR, HEADER_LENGTH, Header, PacketType};
use crate::packet::impl_packet;

const FCI_LENGTH: usize = 8;

/// A single Feedback Control Information entry: an SSRC plus the bitrate
/// request for it, packed as `exp(6) | mantissa(17) | overhead(9)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TmmbItem {
    pub ssrc: u32,
    pub max_bitrate_bps: u64,
    pub measured_overhead: u16,
}

impl TmmbItem {
    pub(crate) fn pack_bitrate(self) -> u32 {
        // Largest mantissa (17 bits) * 2^exp (6 bits) that still fits the rate.
        let mut exp = 0u32;
        let mut mantissa = self.max_bitrate_bps;
        while mantissa >= (1 << 17) && exp < 63 {
            mantissa >>= 1;
            exp += 1;
        }
        let overhead = (self.measured_overhead & 0x1FF) as u32;
        (exp << 26) | ((mantissa as u32 & 0x1FFFF) << 9) | overhead
    }

    pub(crate) fn unpack_bitrate(v: u32) -> (u64, u16) {
        let exp = v >> 26;
        let mantissa = (v >> 9) & 0x1FFFF;
        let overhead = (v & 0x1FF) as u16;
        ((mantissa as u64) << exp, overhead)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransportLayerMaxBitrateRequest {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub entries: Vec<TmmbItem>,
}

impl MarshalSize for TransportLayerMaxBitrateRequest {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8 + self.entries.len() * FCI_LENGTH
    }
}

impl Marshal for TransportLayerMaxBitrateRequest {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }
        let header = Header {
            padding: false,
            count: FORMAT_TMMBR,
            packet_type_raw: PacketType::TransportSpecificFeedback.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;
        let mut b = &mut buf[offset..];
        b.put_u32(self.sender_ssrc);
        b.put_u32(self.media_ssrc);
        offset += 8;
        for entry in &self.entries {
            b.put_u32(entry.ssrc);
            b.put_u32(entry.pack_bitrate());
            offset += FCI_LENGTH;
        }
        Ok(offset)
    }
}

impl Unmarshal for TransportLayerMaxBitrateRequest {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::TransportSpecificFeedback || header.count != FORMAT_TMMBR {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        if buf.remaining() < 8 {
            return Err(Error::ErrPacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let num_entries = (header.length as usize + 1) * 4 / FCI_LENGTH;
        let num_entries = num_entries.saturating_sub(1);
        if buf.remaining() < num_entries * FCI_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        let mut entries = Vec::with_capacity(num_entries);
        for _ in 0..num_entries {
            let ssrc = buf.get_u32();
            let (max_bitrate_bps, measured_overhead) = TmmbItem::unpack_bitrate(buf.get_u32());
            entries.push(TmmbItem {
                ssrc,
                max_bitrate_bps,
                measured_overhead,
            });
        }
        Ok(TransportLayerMaxBitrateRequest {
            sender_ssrc,
            media_ssrc,
            entries,
        })
    }
}

impl_packet!(TransportLayerMaxBitrateRequest);
