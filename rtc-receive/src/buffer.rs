//! Receive packet buffer & frame assembler (§4.7): stores incoming RTP
//! packets indexed by wrap-aware 16-bit sequence number and assembles a
//! frame once its first packet, last packet (`marker=true`) and every
//! sequence in between have arrived. Grounded structurally on
//! `rtp_rtcp/rtp_video_receiver.hpp`'s `PacketBuffer`/`OnInsertedPacket`
//! flow; no C++ implementation of the buffer itself survived into the
//! retrieval pack, so the insert/assemble logic below is written directly
//! against the specification.

use std::collections::BTreeMap;

use bytes::Bytes;
use shared::error::{Error, Result};
use shared::time::Timestamp;

use crate::depacketizer::{CodecHeader, Depacketizer};

/// Default capacity before the oldest entries are evicted to bound memory
/// use against a stalled decoder or a burst of loss.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2048;

#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    pub sequence_number: u16,
    pub rtp_timestamp: u32,
    pub is_first_packet_in_frame: bool,
    pub marker: bool,
    pub payload: Bytes,
    pub payload_type: u8,
    pub receive_time: Timestamp,
}

/// A depacketized, contiguous frame ready for reference resolution (§4.8).
#[derive(Debug, Clone)]
pub struct FrameToDecode {
    pub rtp_timestamp: u32,
    pub first_sequence_number: u16,
    pub last_sequence_number: u16,
    pub is_keyframe: bool,
    pub payload: Bytes,
    pub receive_time: Timestamp,
    pub codec_header: CodecHeader,
}

impl FrameToDecode {
    pub fn codec_header(&self) -> CodecHeader {
        self.codec_header
    }
}

/// Sequence-indexed store of not-yet-assembled packets, keyed by the
/// wrap-aware unwrapped sequence number so ordering survives 16-bit
/// rollover.
pub struct ReceivePacketBuffer {
    capacity: usize,
    packets: BTreeMap<i64, ReceivedPacket>,
    unwrap_base: Option<u16>,
    last_unwrapped: i64,
}

impl Default for ReceivePacketBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl ReceivePacketBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            packets: BTreeMap::new(),
            unwrap_base: None,
            last_unwrapped: 0,
        }
    }

    fn unwrap(&mut self, seq: u16) -> i64 {
        let Some(base) = self.unwrap_base else {
            self.unwrap_base = Some(seq);
            self.last_unwrapped = seq as i64;
            return self.last_unwrapped;
        };
        let _ = base;
        // Pick the candidate (among the cycle below/at/above the last seen
        // unwrapped sequence) nearest to the last unwrapped value, matching
        // the forward-biased unwrap used by the send-side sequencer.
        let wraps = self.last_unwrapped.div_euclid(1 << 16);
        let candidates = [
            (wraps - 1) * (1 << 16) + seq as i64,
            wraps * (1 << 16) + seq as i64,
            (wraps + 1) * (1 << 16) + seq as i64,
        ];
        *candidates
            .iter()
            .min_by_key(|&&c| (c - self.last_unwrapped).abs())
            .unwrap()
    }

    /// Inserts one RTP packet. Returns any frames newly completed as a
    /// result (usually zero or one, but an in-order burst arriving after a
    /// gap fills in can complete several at once).
    pub fn insert(
        &mut self,
        packet: ReceivedPacket,
        depacketizers: &BTreeMap<u8, Box<dyn Depacketizer>>,
    ) -> Result<Vec<FrameToDecode>> {
        let unwrapped = self.unwrap(packet.sequence_number);
        if unwrapped > self.last_unwrapped {
            self.last_unwrapped = unwrapped;
        }
        self.packets.insert(unwrapped, packet);

        if self.packets.len() > self.capacity {
            // Drop the oldest packet; its frame, if any, can no longer
            // complete and is abandoned rather than held forever.
            if let Some((&oldest, _)) = self.packets.iter().next() {
                self.packets.remove(&oldest);
            }
        }

        self.try_assemble(depacketizers)
    }

    fn try_assemble(
        &mut self,
        depacketizers: &BTreeMap<u8, Box<dyn Depacketizer>>,
    ) -> Result<Vec<FrameToDecode>> {
        let mut frames = Vec::new();
        loop {
            let Some(range) = self.find_complete_frame() else {
                break;
            };
            let frame = self.assemble_frame(range, depacketizers)?;
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Scans forward from the earliest buffered packet for a run
    /// `[first, last]` where `first` starts a frame, `last` ends one with
    /// `marker=true`, and every sequence between is present with no gaps.
    fn find_complete_frame(&self) -> Option<(i64, i64)> {
        let mut start = None;
        let mut prev_seq = None;
        for (&seq, packet) in self.packets.iter() {
            if start.is_none() {
                if !packet.is_first_packet_in_frame {
                    continue;
                }
                start = Some(seq);
                prev_seq = Some(seq);
                if packet.marker {
                    return Some((seq, seq));
                }
                continue;
            }
            let expected = prev_seq.unwrap() + 1;
            if seq != expected {
                // Gap: this frame cannot complete yet with what we have.
                return None;
            }
            prev_seq = Some(seq);
            if packet.marker {
                return Some((start.unwrap(), seq));
            }
        }
        None
    }

    fn assemble_frame(
        &mut self,
        (first, last): (i64, i64),
        depacketizers: &BTreeMap<u8, Box<dyn Depacketizer>>,
    ) -> Result<FrameToDecode> {
        let mut payload = Vec::new();
        let mut is_keyframe = false;
        let mut rtp_timestamp = 0;
        let mut receive_time = Timestamp::minus_infinity();
        let mut payload_type = None;
        let mut codec_header = CodecHeader::None;

        for seq in first..=last {
            let packet = self.packets.remove(&seq).expect("range was verified contiguous");
            rtp_timestamp = packet.rtp_timestamp;
            receive_time = receive_time.max(packet.receive_time);
            payload_type.get_or_insert(packet.payload_type);
            let depacketizer = depacketizers
                .get(&packet.payload_type)
                .ok_or(Error::ErrUnknownDepacketizer(packet.payload_type))?;
            let unit = depacketizer.depacketize(&packet.payload)?;
            is_keyframe |= unit.is_keyframe;
            codec_header = unit.codec_header;
            payload.extend_from_slice(&unit.payload);
        }

        Ok(FrameToDecode {
            rtp_timestamp,
            first_sequence_number: (first.rem_euclid(1 << 16)) as u16,
            last_sequence_number: (last.rem_euclid(1 << 16)) as u16,
            is_keyframe,
            payload: Bytes::from(payload),
            receive_time,
            codec_header,
        })
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}
