//! Generic NACK (RFC 4585 §6.2.1), RTPFB FMT=1.

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_TLN, HEADER_LENGTH, Header, PacketType};
use crate::packet::impl_packet;

const NACK_PAIR_LENGTH: usize = 4;

/// One packet-id-plus-bitmask-of-16-following-losses pair (RFC 4585 §6.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NackPair {
    /// The sequence number of the first missing packet.
    pub packet_id: u16,
    /// Bit `i` (0-indexed) set ⇒ `packet_id.wrapping_add(i + 1)` is also lost.
    pub lost_packets: u16,
}

impl NackPair {
    fn pack(self) -> u32 {
        ((self.packet_id as u32) << 16) | self.lost_packets as u32
    }

    fn unpack(v: u32) -> Self {
        Self {
            packet_id: (v >> 16) as u16,
            lost_packets: v as u16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransportLayerNack {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub nacks: Vec<NackPair>,
}

impl MarshalSize for TransportLayerNack {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8 + self.nacks.len() * NACK_PAIR_LENGTH
    }
}

impl Marshal for TransportLayerNack {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }
        let header = Header {
            padding: false,
            count: FORMAT_TLN,
            packet_type_raw: PacketType::TransportSpecificFeedback.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;
        let mut b = &mut buf[offset..];
        b.put_u32(self.sender_ssrc);
        b.put_u32(self.media_ssrc);
        offset += 8;
        for pair in &self.nacks {
            b.put_u32(pair.pack());
            offset += NACK_PAIR_LENGTH;
        }
        Ok(offset)
    }
}

impl Unmarshal for TransportLayerNack {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::TransportSpecificFeedback || header.count != FORMAT_TLN {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        if buf.remaining() < 8 {
            return Err(Error::ErrPacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let num_pairs = (header.length as usize + 1) * 4 / NACK_PAIR_LENGTH;
        // subtract the 2 ssrc words already consumed
        let num_pairs = num_pairs.saturating_sub(2);
        if buf.remaining() < num_pairs * NACK_PAIR_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        let mut nacks = Vec::with_capacity(num_pairs);
        for _ in 0..num_pairs {
            nacks.push(NackPair::unpack(buf.get_u32()));
        }
        Ok(TransportLayerNack {
            sender_ssrc,
            media_ssrc,
            nacks,
        })
    }
}

/// Packs a sorted list of missing sequence numbers into the minimal set of
/// [`NackPair`]s, coalescing runs of up to 17 consecutive losses per pair.
pub fn nack_pairs_from_sequence_numbers(seqs: &[u16]) -> Vec<NackPair> {
    let mut pairs = Vec::new();
    let mut i = 0;
    while i < seqs.len() {
        let packet_id = seqs[i];
        let mut lost_packets = 0u16;
        let mut j = i + 1;
        while j < seqs.len() {
            let delta = seqs[j].wrapping_sub(packet_id);
            if delta == 0 || delta > 16 {
                break;
            }
            lost_packets |= 1 << (delta - 1);
            j += 1;
        }
        pairs.push(NackPair {
            packet_id,
            lost_packets,
        });
        i = j;
    }
    pairs
}

impl_packet!(TransportLayerNack);
