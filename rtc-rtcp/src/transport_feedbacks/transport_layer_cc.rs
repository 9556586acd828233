//! Transport-wide congestion control feedback (RTPFB FMT=15), per
//! draft-holmer-rmcat-transport-wide-cc-extensions-01.

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_TCC, HEADER_LENGTH, Header, PacketType};
use crate::packet::impl_packet;

const BASE_SEQUENCE_NUMBER_AND_STATUS_COUNT_LENGTH: usize = 4;
const REFERENCE_TIME_AND_FB_PKT_COUNT_LENGTH: usize = 4;

/// The two-bit status-chunk discriminant (top bit of each 16-bit chunk).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusChunkTypeTcc {
    #[default]
    RunLengthChunk,
    StatusVectorChunk,
}

/// Per-packet receive status, encoded as a 2-bit (or 1-bit) symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolTypeTcc {
    #[default]
    PacketNotReceived,
    PacketReceivedSmallDelta,
    PacketReceivedLargeDelta,
}

impl SymbolTypeTcc {
    fn to_two_bit(self) -> u8 {
        match self {
            SymbolTypeTcc::PacketNotReceived => 0,
            SymbolTypeTcc::PacketReceivedSmallDelta => 1,
            SymbolTypeTcc::PacketReceivedLargeDelta => 2,
        }
    }

    fn from_two_bit(v: u8) -> Result<Self> {
        match v {
            0 => Ok(SymbolTypeTcc::PacketNotReceived),
            1 => Ok(SymbolTypeTcc::PacketReceivedSmallDelta),
            2 => Ok(SymbolTypeTcc::PacketReceivedLargeDelta),
            _ => Err(Error::ErrPacketTooShort),
        }
    }

    fn to_one_bit(self) -> u8 {
        match self {
            SymbolTypeTcc::PacketNotReceived => 0,
            _ => 1,
        }
    }

    fn from_one_bit(v: u8) -> Self {
        if v == 0 {
            SymbolTypeTcc::PacketNotReceived
        } else {
            SymbolTypeTcc::PacketReceivedSmallDelta
        }
    }
}

/// Whether a [`StatusVectorChunk`]'s symbols are packed 1 bit or 2 bits wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymbolSizeTypeTcc {
    #[default]
    OneBit,
    TwoBit,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunLengthChunk {
    pub type_tcc: StatusChunkTypeTcc,
    pub packet_status_symbol: SymbolTypeTcc,
    pub run_length: u16,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusVectorChunk {
    pub type_tcc: StatusChunkTypeTcc,
    pub symbol_size: SymbolSizeTypeTcc,
    pub symbol_list: Vec<SymbolTypeTcc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PacketStatusChunk {
    RunLengthChunk(RunLengthChunk),
    StatusVectorChunk(StatusVectorChunk),
}

impl PacketStatusChunk {
    fn pack(&self) -> Result<u16> {
        match self {
            PacketStatusChunk::RunLengthChunk(c) => {
                if c.run_length > 0x1FFF {
                    return Err(Error::ErrPacketTooShort);
                }
                Ok((c.packet_status_symbol.to_two_bit() as u16) << 13 | c.run_length)
            }
            PacketStatusChunk::StatusVectorChunk(c) => {
                let mut v: u16 = 1 << 15;
                match c.symbol_size {
                    SymbolSizeTypeTcc::OneBit => {
                        if c.symbol_list.len() > 14 {
                            return Err(Error::ErrPacketTooShort);
                        }
                        for (i, sym) in c.symbol_list.iter().enumerate() {
                            v |= (sym.to_one_bit() as u16) << (13 - i);
                        }
                    }
                    SymbolSizeTypeTcc::TwoBit => {
                        if c.symbol_list.len() > 7 {
                            return Err(Error::ErrPacketTooShort);
                        }
                        v |= 1 << 14;
                        for (i, sym) in c.symbol_list.iter().enumerate() {
                            v |= (sym.to_two_bit() as u16) << (12 - i * 2);
                        }
                    }
                }
                Ok(v)
            }
        }
    }

    fn unpack(v: u16) -> Result<Self> {
        if v & (1 << 15) == 0 {
            let packet_status_symbol = SymbolTypeTcc::from_two_bit(((v >> 13) & 0x3) as u8)?;
            let run_length = v & 0x1FFF;
            Ok(PacketStatusChunk::RunLengthChunk(RunLengthChunk {
                type_tcc: StatusChunkTypeTcc::RunLengthChunk,
                packet_status_symbol,
                run_length,
            }))
        } else if v & (1 << 14) == 0 {
            let symbol_list = (0..14)
                .map(|i| SymbolTypeTcc::from_one_bit(((v >> (13 - i)) & 0x1) as u8))
                .collect();
            Ok(PacketStatusChunk::StatusVectorChunk(StatusVectorChunk {
                type_tcc: StatusChunkTypeTcc::StatusVectorChunk,
                symbol_size: SymbolSizeTypeTcc::OneBit,
                symbol_list,
            }))
        } else {
            let symbol_list = (0..7)
                .map(|i| SymbolTypeTcc::from_two_bit(((v >> (12 - i * 2)) & 0x3) as u8))
                .collect::<Result<Vec<_>>>()?;
            Ok(PacketStatusChunk::StatusVectorChunk(StatusVectorChunk {
                type_tcc: StatusChunkTypeTcc::StatusVectorChunk,
                symbol_size: SymbolSizeTypeTcc::TwoBit,
                symbol_list,
            }))
        }
    }
}

/// A single packet's receive delta, scaled in 250 microsecond units and
/// stored already-expanded to actual microseconds (see
/// `TYPE_TCC_DELTA_SCALE_FACTOR` at the call site).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecvDelta {
    pub type_tcc_packet: SymbolTypeTcc,
    pub delta: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransportLayerCc {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub base_sequence_number: u16,
    pub packet_status_count: u16,
    pub reference_time: u32,
    pub fb_pkt_count: u8,
    pub packet_chunks: Vec<PacketStatusChunk>,
    pub recv_deltas: Vec<RecvDelta>,
}

impl TransportLayerCc {
    fn deltas_wire_len(&self) -> usize {
        self.recv_deltas
            .iter()
            .map(|d| match d.type_tcc_packet {
                SymbolTypeTcc::PacketReceivedSmallDelta => 1,
                _ => 2,
            })
            .sum()
    }
}

impl MarshalSize for TransportLayerCc {
    fn marshal_size(&self) -> usize {
        let body = 8
            + BASE_SEQUENCE_NUMBER_AND_STATUS_COUNT_LENGTH
            + REFERENCE_TIME_AND_FB_PKT_COUNT_LENGTH
            + self.packet_chunks.len() * 2
            + self.deltas_wire_len();
        HEADER_LENGTH + body.div_ceil(4) * 4
    }
}

impl Marshal for TransportLayerCc {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }
        let header = Header {
            padding: false,
            count: FORMAT_TCC,
            packet_type_raw: PacketType::TransportSpecificFeedback.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;
        {
            let mut b = &mut buf[offset..];
            b.put_u32(self.sender_ssrc);
            b.put_u32(self.media_ssrc);
            b.put_u16(self.base_sequence_number);
            b.put_u16(self.packet_status_count);
            b.put_u32((self.reference_time << 8) | self.fb_pkt_count as u32);
            offset += 16;
        }
        for chunk in &self.packet_chunks {
            let mut b = &mut buf[offset..];
            b.put_u16(chunk.pack()?);
            offset += 2;
        }
        for delta in &self.recv_deltas {
            let mut b = &mut buf[offset..];
            match delta.type_tcc_packet {
                SymbolTypeTcc::PacketReceivedSmallDelta => {
                    b.put_u8((delta.delta / 250) as u8);
                    offset += 1;
                }
                _ => {
                    b.put_i16((delta.delta / 250) as i16);
                    offset += 2;
                }
            }
        }
        // zero-pad to the 32-bit boundary declared by `length`
        for byte in buf.iter_mut().take(size).skip(offset) {
            *byte = 0;
        }
        Ok(size)
    }
}

impl Unmarshal for TransportLayerCc {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::TransportSpecificFeedback || header.count != FORMAT_TCC {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        let body_bytes = (header.length as usize + 1) * 4;
        if buf.remaining() < body_bytes {
            return Err(Error::ErrPacketTooShort);
        }
        if body_bytes < 16 {
            return Err(Error::ErrPacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let base_sequence_number = buf.get_u16();
        let packet_status_count = buf.get_u16();
        let ref_and_count = buf.get_u32();
        let reference_time = ref_and_count >> 8;
        let fb_pkt_count = (ref_and_count & 0xFF) as u8;
        let mut consumed = 16;

        let mut packet_chunks = Vec::new();
        let mut symbols_seen: usize = 0;
        while symbols_seen < packet_status_count as usize {
            if buf.remaining() < 2 {
                return Err(Error::ErrPacketTooShort);
            }
            let chunk = PacketStatusChunk::unpack(buf.get_u16())?;
            consumed += 2;
            symbols_seen += match &chunk {
                PacketStatusChunk::RunLengthChunk(c) => c.run_length as usize,
                PacketStatusChunk::StatusVectorChunk(c) => c.symbol_list.len(),
            };
            packet_chunks.push(chunk);
        }

        let mut recv_deltas = Vec::new();
        for chunk in &packet_chunks {
            let symbols: Vec<SymbolTypeTcc> = match chunk {
                PacketStatusChunk::RunLengthChunk(c) => {
                    vec![c.packet_status_symbol; c.run_length as usize]
                }
                PacketStatusChunk::StatusVectorChunk(c) => c.symbol_list.clone(),
            };
            for sym in symbols {
                match sym {
                    SymbolTypeTcc::PacketNotReceived => {}
                    SymbolTypeTcc::PacketReceivedSmallDelta => {
                        if buf.remaining() < 1 || consumed + 1 > body_bytes {
                            return Err(Error::ErrPacketTooShort);
                        }
                        recv_deltas.push(RecvDelta {
                            type_tcc_packet: sym,
                            delta: buf.get_u8() as i64 * 250,
                        });
                        consumed += 1;
                    }
                    SymbolTypeTcc::PacketReceivedLargeDelta => {
                        if buf.remaining() < 2 || consumed + 2 > body_bytes {
                            return Err(Error::ErrPacketTooShort);
                        }
                        recv_deltas.push(RecvDelta {
                            type_tcc_packet: sym,
                            delta: buf.get_i16() as i64 * 250,
                        });
                        consumed += 2;
                    }
                }
            }
        }

        if consumed > body_bytes {
            return Err(Error::ErrPacketTooShort);
        }
        buf.advance(body_bytes - consumed);

        Ok(TransportLayerCc {
            sender_ssrc,
            media_ssrc,
            base_sequence_number,
            packet_status_count,
            reference_time,
            fb_pkt_count,
            packet_chunks,
            recv_deltas,
        })
    }
}

impl_packet!(TransportLayerCc);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_length_chunk_round_trips() {
        let tcc = TransportLayerCc {
            sender_ssrc: 1,
            media_ssrc: 2,
            base_sequence_number: 10,
            packet_status_count: 3,
            reference_time: 1234,
            fb_pkt_count: 7,
            packet_chunks: vec![PacketStatusChunk::RunLengthChunk(RunLengthChunk {
                type_tcc: StatusChunkTypeTcc::RunLengthChunk,
                packet_status_symbol: SymbolTypeTcc::PacketReceivedSmallDelta,
                run_length: 3,
            })],
            recv_deltas: vec![
                RecvDelta {
                    type_tcc_packet: SymbolTypeTcc::PacketReceivedSmallDelta,
                    delta: 250,
                },
                RecvDelta {
                    type_tcc_packet: SymbolTypeTcc::PacketReceivedSmallDelta,
                    delta: 500,
                },
                RecvDelta {
                    type_tcc_packet: SymbolTypeTcc::PacketReceivedSmallDelta,
                    delta: 250,
                },
            ],
        };
        let raw = tcc.marshal().unwrap();
        let mut buf = raw.clone();
        let decoded = TransportLayerCc::unmarshal(&mut buf).unwrap();
        assert_eq!(decoded, tcc);
    }

    #[test]
    fn status_vector_two_bit_round_trips() {
        let tcc = TransportLayerCc {
            sender_ssrc: 1,
            media_ssrc: 2,
            base_sequence_number: 0,
            packet_status_count: 3,
            reference_time: 0,
            fb_pkt_count: 0,
            packet_chunks: vec![PacketStatusChunk::StatusVectorChunk(StatusVectorChunk {
                type_tcc: StatusChunkTypeTcc::StatusVectorChunk,
                symbol_size: SymbolSizeTypeTcc::TwoBit,
                symbol_list: vec![
                    SymbolTypeTcc::PacketReceivedSmallDelta,
                    SymbolTypeTcc::PacketNotReceived,
                    SymbolTypeTcc::PacketReceivedLargeDelta,
                ],
            })],
            recv_deltas: vec![
                RecvDelta {
                    type_tcc_packet: SymbolTypeTcc::PacketReceivedSmallDelta,
                    delta: 250,
                },
                RecvDelta {
                    type_tcc_packet: SymbolTypeTcc::PacketReceivedLargeDelta,
                    delta: -500,
                },
            ],
        };
        let raw = tcc.marshal().unwrap();
        let mut buf = raw.clone();
        let decoded = TransportLayerCc::unmarshal(&mut buf).unwrap();
        assert_eq!(decoded, tcc);
    }
}
