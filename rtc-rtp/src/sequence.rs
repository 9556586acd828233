//! Assigns media and RTX sequence numbers and enforces the
//! marker-before-padding ordering rule (§4.4).

use shared::time::Timestamp;

use crate::packet::{Packet, PacketKind};

/// Per-stream monotonic sequence counters with 16-bit wrap-around.
#[derive(Debug, Default)]
pub struct Sequencer {
    media_sequence_num: u16,
    rtx_sequence_num: u16,
    started: bool,

    require_marker_before_media_padding: bool,
    last_payload_type: u8,
    last_rtp_timestamp: u32,
    last_capture_time: Timestamp,
    last_packet_marker_bit: bool,
}

impl Sequencer {
    pub fn new(require_marker_before_media_padding: bool) -> Self {
        Self {
            require_marker_before_media_padding,
            last_capture_time: Timestamp::zero(),
            ..Default::default()
        }
    }

    /// Assigns the next sequence number to `packet` on the media or RTX
    /// counter depending on `packet.metadata_kind`. Returns `false` (and
    /// assigns nothing) if `packet` is media-SSRC padding and the rule in
    /// §4.4 forbids it right now.
    pub fn assign(&mut self, packet: &mut Packet, kind: PacketKind, is_rtx_ssrc: bool) -> bool {
        if kind == PacketKind::Padding
            && !is_rtx_ssrc
            && self.require_marker_before_media_padding
            && self.started
            && !self.last_packet_marker_bit
        {
            return false;
        }

        let seq = if is_rtx_ssrc {
            let s = self.rtx_sequence_num;
            self.rtx_sequence_num = self.rtx_sequence_num.wrapping_add(1);
            s
        } else {
            let s = self.media_sequence_num;
            self.media_sequence_num = self.media_sequence_num.wrapping_add(1);
            s
        };
        packet.header.sequence_number = seq;

        if !is_rtx_ssrc {
            self.started = true;
            self.last_payload_type = packet.header.payload_type;
            self.last_rtp_timestamp = packet.header.timestamp;
            self.last_packet_marker_bit = packet.header.marker;
        }
        true
    }

    pub fn set_last_capture_time(&mut self, t: Timestamp) {
        self.last_capture_time = t;
    }

    pub fn last_payload_type(&self) -> u8 {
        self.last_payload_type
    }

    pub fn last_rtp_timestamp(&self) -> u32 {
        self.last_rtp_timestamp
    }

    pub fn last_capture_time(&self) -> Timestamp {
        self.last_capture_time
    }

    pub fn last_packet_marker_bit(&self) -> bool {
        self.last_packet_marker_bit
    }
}

/// Wrap-aware comparison: is `a` sequenced before `b`, treating the 16-bit
/// space as circular (RFC 3550 §5.1's "the lower sequence modulo 2^16" rule).
pub fn seq_num_less_than(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

pub fn seq_num_distance(a: u16, b: u16) -> i32 {
    a.wrapping_sub(b) as i16 as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;

    fn packet(ts: u32, marker: bool) -> Packet {
        Packet {
            header: Header {
                timestamp: ts,
                marker,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn assigns_increasing_media_sequence_numbers() {
        let mut seq = Sequencer::new(false);
        let mut p1 = packet(0, false);
        let mut p2 = packet(0, false);
        assert!(seq.assign(&mut p1, PacketKind::Video, false));
        assert!(seq.assign(&mut p2, PacketKind::Video, false));
        assert_eq!(p2.header.sequence_number, p1.header.sequence_number.wrapping_add(1));
    }

    #[test]
    fn rejects_media_padding_before_marker() {
        let mut seq = Sequencer::new(true);
        let mut media = packet(0, false);
        seq.assign(&mut media, PacketKind::Video, false);
        let mut pad = packet(0, false);
        assert!(!seq.assign(&mut pad, PacketKind::Padding, false));
    }

    #[test]
    fn allows_media_padding_after_marker() {
        let mut seq = Sequencer::new(true);
        let mut media = packet(0, true);
        seq.assign(&mut media, PacketKind::Video, false);
        let mut pad = packet(0, false);
        assert!(seq.assign(&mut pad, PacketKind::Padding, false));
    }

    #[test]
    fn wrap_around_comparison() {
        assert!(seq_num_less_than(65535, 0));
        assert!(!seq_num_less_than(0, 65535));
    }
}
