//! Bounded store of sent RTP packets keyed by sequence number, used to
//! service NACK-driven retransmission and RTX-payload padding (§4.2).

use std::collections::BTreeMap;

use shared::time::{Timestamp, TimeDelta};

use crate::packet::Packet;
use crate::sequence::seq_num_distance;

pub const MAX_CAPACITY: usize = 9600;
const PACKET_CULLING_DELAY_FACTOR: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Disabled,
    StoreAndCull,
}

#[derive(Debug, Clone)]
struct Entry {
    packet: Packet,
    send_time: Option<Timestamp>,
    insert_order: u64,
    num_retransmitted: u32,
    pending_transmission: bool,
}

/// Ordered store of recently sent packets, culled by age/RTT and capped at
/// `number_to_store`.
pub struct PacketHistory {
    mode: StorageMode,
    number_to_store: usize,
    rtt: TimeDelta,
    entries: BTreeMap<u16, Entry>,
    next_insert_order: u64,
}

impl PacketHistory {
    pub fn new(mode: StorageMode, number_to_store: usize) -> Self {
        Self {
            mode,
            number_to_store: number_to_store.min(MAX_CAPACITY),
            rtt: TimeDelta::from_millis(200),
            entries: BTreeMap::new(),
            next_insert_order: 0,
        }
    }

    pub fn set_rtt(&mut self, rtt: TimeDelta) {
        self.rtt = rtt;
    }

    fn culling_window(&self) -> TimeDelta {
        let floor = TimeDelta::from_millis(1000);
        let three_rtt = self.rtt * 3.0;
        let window = if three_rtt.us() > floor.us() { three_rtt } else { floor };
        window * (PACKET_CULLING_DELAY_FACTOR as f64)
    }

    pub fn put(&mut self, packet: Packet, send_time: Option<Timestamp>) {
        if self.mode == StorageMode::Disabled {
            return;
        }
        let seq = packet.header.sequence_number;
        let order = self.next_insert_order;
        self.next_insert_order += 1;
        self.entries.insert(
            seq,
            Entry {
                packet,
                send_time,
                insert_order: order,
                num_retransmitted: 0,
                pending_transmission: false,
            },
        );
        self.cull(send_time);
    }

    fn cull(&mut self, now: Option<Timestamp>) {
        if let Some(now) = now {
            let window = self.culling_window();
            self.entries.retain(|_, e| {
                if let Some(send_time) = e.send_time {
                    now - send_time <= window
                } else {
                    true
                }
            });
        }
        while self.entries.len() > self.number_to_store {
            if let Some(&oldest) = self.entries.keys().next() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Returns the packet for retransmission, bumping its send time and
    /// retransmit counter, unless it was already (re)sent within the
    /// culling window's RTT-derived suppression interval.
    pub fn get_packet_and_set_send_time(&mut self, seq: u16, now: Timestamp) -> Option<Packet> {
        let suppression = {
            let floor = TimeDelta::from_millis(1000);
            let three_rtt = self.rtt * 3.0;
            if three_rtt.us() > floor.us() { three_rtt } else { floor }
        };
        let entry = self.entries.get_mut(&seq)?;
        if let Some(last) = entry.send_time {
            if now - last < suppression {
                return None;
            }
        }
        entry.send_time = Some(now);
        entry.num_retransmitted += 1;
        Some(entry.packet.clone())
    }

    pub fn get_packet_and_mark_as_pending(&mut self, seq: u16) -> Option<Packet> {
        let entry = self.entries.get_mut(&seq)?;
        if entry.pending_transmission {
            return None;
        }
        entry.pending_transmission = true;
        Some(entry.packet.clone())
    }

    pub fn mark_packet_as_sent(&mut self, seq: u16, now: Timestamp) {
        if let Some(entry) = self.entries.get_mut(&seq) {
            entry.pending_transmission = false;
            entry.send_time = Some(now);
            entry.num_retransmitted += 1;
        }
    }

    pub fn num_retransmitted(&self, seq: u16) -> Option<u32> {
        self.entries.get(&seq).map(|e| e.num_retransmitted)
    }

    /// Most recently sent packet with the lowest retransmit count, used to
    /// pad with RTX-wrapped media instead of synthetic padding.
    pub fn get_payload_padding_packet(&mut self) -> Option<Packet> {
        self.entries
            .values()
            .min_by_key(|e| (e.num_retransmitted, std::cmp::Reverse(e.insert_order)))
            .map(|e| e.packet.clone())
    }

    pub fn cull_acked_packets(&mut self, acked: &[u16]) {
        for seq in acked {
            self.entries.remove(seq);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether `seq` is ahead of `reference` in the wrap-aware sequence space.
pub fn is_newer(seq: u16, reference: u16) -> bool {
    seq_num_distance(seq, reference) > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;

    fn packet(seq: u16) -> Packet {
        Packet {
            header: Header {
                sequence_number: seq,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn caps_capacity_to_number_to_store() {
        let mut history = PacketHistory::new(StorageMode::StoreAndCull, 10);
        for i in 0..20u16 {
            history.put(packet(i), Some(Timestamp::from_millis(i as i64 * 10)));
        }
        assert!(history.len() <= 10);
    }

    #[test]
    fn retransmit_suppressed_within_window() {
        let mut history = PacketHistory::new(StorageMode::StoreAndCull, 100);
        history.set_rtt(TimeDelta::from_millis(20));
        history.put(packet(1), Some(Timestamp::from_millis(0)));
        let first = history.get_packet_and_set_send_time(1, Timestamp::from_millis(10));
        assert!(first.is_some());
        let second = history.get_packet_and_set_send_time(1, Timestamp::from_millis(20));
        assert!(second.is_none());
        let third = history.get_packet_and_set_send_time(1, Timestamp::from_millis(2000));
        assert!(third.is_some());
    }

    #[test]
    fn history_empties_after_culling_window_with_no_new_inserts() {
        let mut history = PacketHistory::new(StorageMode::StoreAndCull, 10);
        history.set_rtt(TimeDelta::from_millis(20));
        for i in 0..20u16 {
            history.put(packet(i), Some(Timestamp::from_millis(i as i64 * 10)));
        }
        // force a cull pass far in the future
        history.put(packet(9999), Some(Timestamp::from_millis(9000 + 200)));
        assert!(history.len() <= 1);
    }
}
