//! ULPFEC receiver: decode-side counterpart to `rtp::fec::UlpfecGenerator`.
//! Tracks recently-seen RED-wrapped media packets and recovers a single
//! dropped packet per protected group via the XOR parity carried in the
//! ULPFEC packet. Grounded on
//! `rtp_rtcp/rtp/fec/fec_receiver_ulp_unittest.cpp` for the insert/recover
//! flow shape; `UlpfecGenerator`'s simplified framing (group size and
//! parity length only, no explicit protected-sequence mask) means the
//! group here is inferred as the `count` sequence numbers immediately
//! preceding the FEC packet on the shared media sequence space, which is
//! exactly how the generator buffers and emits it.

use bytes::{Buf, Bytes};
use rtp::fec::recover_payload;
use shared::error::{Error, Result};
use shared::time::Timestamp;

use crate::buffer::ReceivedPacket;

const RED_HEADER_LEN: usize = 1;
const ULPFEC_HEADER_LEN: usize = 4;
/// How many past media packets (by unwrapped sequence) are retained for
/// recovery lookups.
const RECOVERY_WINDOW: usize = 64;

pub struct UlpfecReceiver {
    ulpfec_payload_type: u8,
    media_payload_type: u8,
    seen: std::collections::BTreeMap<i64, Bytes>,
    last_unwrapped: i64,
    has_base: bool,
}

impl UlpfecReceiver {
    pub fn new(ulpfec_payload_type: u8, media_payload_type: u8) -> Self {
        Self {
            ulpfec_payload_type,
            media_payload_type,
            seen: std::collections::BTreeMap::new(),
            last_unwrapped: 0,
            has_base: false,
        }
    }

    fn unwrap(&mut self, seq: u16) -> i64 {
        if !self.has_base {
            self.has_base = true;
            self.last_unwrapped = seq as i64;
            return self.last_unwrapped;
        }
        let wraps = self.last_unwrapped.div_euclid(1 << 16);
        let candidates = [
            (wraps - 1) * (1 << 16) + seq as i64,
            wraps * (1 << 16) + seq as i64,
            (wraps + 1) * (1 << 16) + seq as i64,
        ];
        let unwrapped = *candidates.iter().min_by_key(|&&c| (c - self.last_unwrapped).abs()).unwrap();
        if unwrapped > self.last_unwrapped {
            self.last_unwrapped = unwrapped;
        }
        unwrapped
    }

    fn remember(&mut self, unwrapped: i64, payload: Bytes) {
        self.seen.insert(unwrapped, payload);
        while self.seen.len() > RECOVERY_WINDOW {
            let Some(&oldest) = self.seen.keys().next() else { break };
            self.seen.remove(&oldest);
        }
    }

    /// Feeds one packet carried on the RED payload type. Returns the plain
    /// media packet (RED header stripped) when this was a media block, and
    /// a packet recovered as a side effect of this one's parity (an ULPFEC
    /// block can both carry parity and, separately, trigger a recovery).
    pub fn on_red_packet(
        &mut self,
        sequence_number: u16,
        rtp_timestamp: u32,
        marker: bool,
        is_first_packet_in_frame: bool,
        payload: &Bytes,
        receive_time: Timestamp,
    ) -> Result<(Option<ReceivedPacket>, Option<ReceivedPacket>)> {
        if payload.is_empty() {
            return Err(Error::ErrDepacketizeFailed("empty RED payload".into()));
        }
        let block_pt = payload[0] & 0x7F;
        let is_fec = payload[0] & 0x80 != 0;
        let unwrapped = self.unwrap(sequence_number);

        if is_fec && block_pt == self.ulpfec_payload_type {
            let recovered =
                self.try_recover(unwrapped, payload.slice(RED_HEADER_LEN..), rtp_timestamp, receive_time)?;
            return Ok((None, recovered));
        }

        let media_payload = payload.slice(RED_HEADER_LEN..);
        self.remember(unwrapped, media_payload.clone());
        Ok((
            Some(ReceivedPacket {
                sequence_number,
                rtp_timestamp,
                is_first_packet_in_frame,
                marker,
                payload: media_payload,
                payload_type: self.media_payload_type,
                receive_time,
            }),
            None,
        ))
    }

    fn try_recover(
        &mut self,
        fec_unwrapped: i64,
        fec_payload: Bytes,
        rtp_timestamp: u32,
        receive_time: Timestamp,
    ) -> Result<Option<ReceivedPacket>> {
        if fec_payload.len() < ULPFEC_HEADER_LEN {
            return Err(Error::ErrDepacketizeFailed("truncated ULPFEC header".into()));
        }
        let mut cursor = fec_payload;
        let parity_len = cursor.get_u16() as usize;
        let count = cursor.get_u16() as usize;
        let parity = cursor.copy_to_bytes(cursor.remaining().min(parity_len));

        let group: Vec<i64> = ((fec_unwrapped - count as i64)..fec_unwrapped).collect();
        let mut missing = Vec::new();
        let mut survivors = Vec::new();
        for &seq in &group {
            match self.seen.get(&seq) {
                Some(p) => survivors.push(p.clone()),
                None => missing.push(seq),
            }
        }
        // RFC 5109: a single XOR parity packet recovers exactly one loss in
        // its group. Zero losses: nothing to do. More than one: this parity
        // packet alone cannot disambiguate, so leave both missing.
        if missing.len() != 1 {
            return Ok(None);
        }

        let missing_seq = missing[0];
        let recovered_payload = recover_payload(&survivors, &parity);
        self.remember(missing_seq, recovered_payload.clone());

        Ok(Some(ReceivedPacket {
            sequence_number: missing_seq.rem_euclid(1 << 16) as u16,
            rtp_timestamp,
            is_first_packet_in_frame: missing_seq == group[0],
            marker: missing_seq == *group.last().unwrap(),
            payload: recovered_payload,
            payload_type: self.media_payload_type,
            receive_time,
        }))
    }
}
