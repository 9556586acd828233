//! Inter-arrival delta grouper (§4.11). Groups send-time-adjacent packets
//! into bursts and reports the send/arrival/size deltas between completed
//! groups to the trendline estimator. Grounded on
//! `congestion_controller/goog_cc/inter_arrival_delta.cpp`.

use shared::time::{TimeDelta, Timestamp};

const BURST_DELTA_THRESHOLD: TimeDelta = TimeDelta::from_micros(5_000);
const MAX_BURST_DURATION: TimeDelta = TimeDelta::from_micros(100_000);
const CLOCK_JUMP_THRESHOLD: TimeDelta = TimeDelta::from_micros(3_000_000);
const MAX_CONSECUTIVE_REORDERED: u32 = 3;

#[derive(Debug, Clone, Copy)]
struct PacketGroup {
    size: usize,
    first_send_time: Timestamp,
    send_time: Timestamp,
    first_arrival_time: Timestamp,
    arrival_time: Timestamp,
    complete_time: Timestamp,
}

impl PacketGroup {
    fn empty() -> Self {
        Self {
            size: 0,
            first_send_time: Timestamp::minus_infinity(),
            send_time: Timestamp::minus_infinity(),
            first_arrival_time: Timestamp::minus_infinity(),
            arrival_time: Timestamp::minus_infinity(),
            complete_time: Timestamp::minus_infinity(),
        }
    }

    fn is_first_packet(&self) -> bool {
        self.complete_time.is_minus_infinity()
    }
}

/// Computed delta between two completed packet groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterArrivalDeltas {
    pub send_time_delta: TimeDelta,
    pub arrival_time_delta: TimeDelta,
    pub packet_size_delta: i64,
}

pub struct InterArrivalDelta {
    send_time_group_length: TimeDelta,
    current_group: PacketGroup,
    prev_group: PacketGroup,
    num_consecutive_reordered_packets: u32,
}

impl InterArrivalDelta {
    pub fn new(send_time_group_length: TimeDelta) -> Self {
        Self {
            send_time_group_length,
            current_group: PacketGroup::empty(),
            prev_group: PacketGroup::empty(),
            num_consecutive_reordered_packets: 0,
        }
    }

    pub fn reset(&mut self) {
        self.num_consecutive_reordered_packets = 0;
        self.current_group = PacketGroup::empty();
        self.prev_group = PacketGroup::empty();
    }

    /// Feeds one packet's send/arrival time and size. Returns the deltas to
    /// the previous completed group once the current packet completes a new
    /// group (i.e. a new group just started and the previous one is done).
    pub fn compute_deltas(
        &mut self,
        send_time: Timestamp,
        arrival_time: Timestamp,
        system_time: Timestamp,
        packet_size: usize,
    ) -> Option<InterArrivalDeltas> {
        let mut calculated = None;

        if self.current_group.is_first_packet() {
            self.current_group.first_send_time = send_time;
            self.current_group.send_time = send_time;
            self.current_group.first_arrival_time = arrival_time;
        } else if self.is_new_packet_group(arrival_time, send_time) {
            if self.prev_group.complete_time.is_finite() {
                let deltas = InterArrivalDeltas {
                    send_time_delta: self.current_group.send_time - self.prev_group.send_time,
                    arrival_time_delta: self.current_group.complete_time
                        - self.prev_group.complete_time,
                    packet_size_delta: self.current_group.size as i64 - self.prev_group.size as i64,
                };
                let system_time_delta = system_time - self.current_group.complete_time;
                if deltas.arrival_time_delta - system_time_delta >= CLOCK_JUMP_THRESHOLD {
                    log::warn!("Clock jump detected, resetting inter-arrival grouping state");
                    self.reset();
                    return None;
                }
                if deltas.arrival_time_delta < TimeDelta::zero() {
                    self.num_consecutive_reordered_packets += 1;
                    if self.num_consecutive_reordered_packets >= MAX_CONSECUTIVE_REORDERED {
                        log::warn!("Packets out of order, resetting inter-arrival state");
                        self.reset();
                    }
                    return None;
                }
                self.num_consecutive_reordered_packets = 0;
                calculated = Some(deltas);
            }
            self.prev_group = self.current_group;
            self.current_group = PacketGroup::empty();
            self.current_group.first_send_time = send_time;
            self.current_group.send_time = send_time;
            self.current_group.first_arrival_time = arrival_time;
        } else {
            self.current_group.send_time = self.current_group.send_time.max(send_time);
        }

        self.current_group.arrival_time = arrival_time;
        self.current_group.complete_time = arrival_time;
        self.current_group.size += packet_size;

        calculated
    }

    fn is_new_packet_group(&self, arrival_time: Timestamp, send_time: Timestamp) -> bool {
        if self.current_group.is_first_packet() {
            false
        } else if self.does_burst_happen(arrival_time, send_time) {
            false
        } else {
            send_time - self.current_group.first_send_time > self.send_time_group_length
        }
    }

    fn does_burst_happen(&self, arrival_time: Timestamp, send_time: Timestamp) -> bool {
        let send_time_delta = send_time - self.current_group.send_time;
        if send_time_delta.is_zero() {
            return true;
        }
        let arrival_time_delta = arrival_time - self.current_group.arrival_time;
        let transport_delay = arrival_time_delta - send_time_delta;
        transport_delay < TimeDelta::zero()
            && arrival_time_delta <= BURST_DELTA_THRESHOLD
            && arrival_time - self.current_group.first_arrival_time < MAX_BURST_DURATION
    }
}

impl Default for InterArrivalDelta {
    fn default() -> Self {
        Self::new(TimeDelta::from_millis(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_singleton_groups_six_ms_apart_emit_two_six_ms_deltas() {
        let mut ia = InterArrivalDelta::new(TimeDelta::from_millis(5));
        let t0 = Timestamp::from_millis(0);
        // Packet 1 starts group 1.
        assert!(ia.compute_deltas(t0, t0, t0, 100).is_none());
        // Packet 2, 6ms later, starts group 2 (gap > 5ms span) -> no delta yet
        // (prev group not complete).
        let t1 = t0 + TimeDelta::from_millis(6);
        assert!(ia.compute_deltas(t1, t1, t1, 100).is_none());
        // Packet 3, 6ms later, completes group 2 and starts group 3: emits
        // delta between group 1 and group 2.
        let t2 = t1 + TimeDelta::from_millis(6);
        let deltas = ia.compute_deltas(t2, t2, t2, 100);
        assert_eq!(deltas.unwrap().send_time_delta, TimeDelta::from_millis(6));
    }

    #[test]
    fn burst_merges_into_current_group() {
        let mut ia = InterArrivalDelta::new(TimeDelta::from_millis(5));
        let t0 = Timestamp::from_millis(0);
        ia.compute_deltas(t0, t0, t0, 100);
        // Send delta 0 within burst threshold -> merges.
        let t1 = t0 + TimeDelta::from_millis(1);
        let r = ia.compute_deltas(t0, t1, t1, 50);
        assert!(r.is_none());
    }
}
