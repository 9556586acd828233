//! Render-time estimation (§4.9/§4.9a): turns an assembled frame's RTP
//! timestamp and jitter estimate into a local render deadline. Grounded
//! structurally on `rtp_rtcp/rtp/receiver/video/jitter/timing_unittest.cpp`
//! and `.../timestamp_extrapolator_unittest.cpp` (only the unit tests for
//! both components survived into the retrieval pack; the extrapolation and
//! bookkeeping below are written directly against the specification).

use shared::time::{TimeDelta, Timestamp};

/// Caches the most recent `(rtp_timestamp, local_time)` pair plus a running
/// clock-drift estimate, so a later RTP timestamp (possibly wrapped past
/// 2^32) can be projected onto the local clock without a fresh NTP anchor
/// for every frame.
pub struct TimestampExtrapolator {
    clock_rate_hz: f64,
    base: Option<(i64, Timestamp)>,
    last_unwrapped_rtp_timestamp: i64,
    has_unwrap_base: bool,
    accumulated_drift_us: f64,
    packet_count: u32,
}

impl TimestampExtrapolator {
    pub fn new(clock_rate_hz: f64) -> Self {
        Self {
            clock_rate_hz,
            base: None,
            last_unwrapped_rtp_timestamp: 0,
            has_unwrap_base: false,
            accumulated_drift_us: 0.0,
            packet_count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.base = None;
        self.has_unwrap_base = false;
        self.accumulated_drift_us = 0.0;
        self.packet_count = 0;
    }

    fn unwrap(&mut self, rtp_timestamp: u32) -> i64 {
        if !self.has_unwrap_base {
            self.has_unwrap_base = true;
            self.last_unwrapped_rtp_timestamp = rtp_timestamp as i64;
            return self.last_unwrapped_rtp_timestamp;
        }
        let wraps = self.last_unwrapped_rtp_timestamp.div_euclid(1i64 << 32);
        let candidates = [
            (wraps - 1) * (1i64 << 32) + rtp_timestamp as i64,
            wraps * (1i64 << 32) + rtp_timestamp as i64,
            (wraps + 1) * (1i64 << 32) + rtp_timestamp as i64,
        ];
        let unwrapped = *candidates
            .iter()
            .min_by_key(|&&c| (c - self.last_unwrapped_rtp_timestamp).abs())
            .unwrap();
        if unwrapped > self.last_unwrapped_rtp_timestamp {
            self.last_unwrapped_rtp_timestamp = unwrapped;
        }
        unwrapped
    }

    /// Records an observed `(rtp_timestamp, local_time)` pair. The first
    /// call establishes the extrapolation base; subsequent calls refine the
    /// drift estimate so `extrapolate` stays accurate as the session runs.
    pub fn update(&mut self, rtp_timestamp: u32, local_time: Timestamp) {
        let unwrapped = self.unwrap(rtp_timestamp);
        match self.base {
            None => {
                self.base = Some((unwrapped, local_time));
            }
            Some((base_rtp, base_local)) => {
                let predicted = self.project(base_rtp, base_local, unwrapped);
                let observed_drift_us = (local_time - predicted).us() as f64;
                self.packet_count += 1;
                let alpha = 1.0 / self.packet_count.min(50) as f64;
                self.accumulated_drift_us += alpha * (observed_drift_us - self.accumulated_drift_us);
                // Re-base periodically so rounding error from a long-lived
                // base doesn't compound; a wrapped-forward RTP timestamp
                // always re-bases immediately since `unwrapped` only grows.
                if unwrapped > base_rtp {
                    self.base = Some((unwrapped, local_time));
                }
            }
        }
    }

    fn project(&self, base_rtp: i64, base_local: Timestamp, unwrapped_rtp: i64) -> Timestamp {
        let rtp_diff = (unwrapped_rtp - base_rtp) as f64;
        let delta_us = (rtp_diff / self.clock_rate_hz * 1_000_000.0) + self.accumulated_drift_us;
        base_local + TimeDelta::from_micros(delta_us.round() as i64)
    }

    /// Projects `rtp_timestamp` onto the local clock using the current base
    /// and drift estimate. Returns `None` until at least one observation has
    /// been recorded.
    pub fn extrapolate(&mut self, rtp_timestamp: u32) -> Option<Timestamp> {
        let unwrapped = self.unwrap(rtp_timestamp);
        let (base_rtp, base_local) = self.base?;
        Some(self.project(base_rtp, base_local, unwrapped))
    }
}

/// Computes a frame's render deadline per §4.9: receive time plus jitter,
/// decode and render delay, floored at the configured minimum playout
/// delay.
pub fn render_time(
    receive_time: Timestamp,
    jitter: TimeDelta,
    decode_delay: TimeDelta,
    render_delay: TimeDelta,
    min_playout_delay: TimeDelta,
) -> Timestamp {
    let deadline = receive_time + jitter + decode_delay + render_delay;
    let floor = receive_time + min_playout_delay;
    deadline.max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extrapolates_linearly_at_known_clock_rate() {
        let mut ext = TimestampExtrapolator::new(90_000.0);
        ext.update(0, Timestamp::from_millis(0));
        ext.update(90_000, Timestamp::from_millis(1000));
        let projected = ext.extrapolate(135_000).unwrap();
        assert!((projected.ms() - 1500).abs() <= 5);
    }

    #[test]
    fn no_extrapolation_before_first_observation() {
        let mut ext = TimestampExtrapolator::new(90_000.0);
        assert!(ext.extrapolate(1000).is_none());
    }

    #[test]
    fn render_time_is_floored_at_min_playout_delay() {
        let receive = Timestamp::from_millis(1000);
        let result = render_time(
            receive,
            TimeDelta::zero(),
            TimeDelta::zero(),
            TimeDelta::zero(),
            TimeDelta::from_millis(50),
        );
        assert_eq!(result, Timestamp::from_millis(1050));
    }

    #[test]
    fn render_time_adds_jitter_and_delays_above_floor() {
        let receive = Timestamp::from_millis(1000);
        let result = render_time(
            receive,
            TimeDelta::from_millis(20),
            TimeDelta::from_millis(5),
            TimeDelta::from_millis(5),
            TimeDelta::from_millis(10),
        );
        assert_eq!(result, Timestamp::from_millis(1030));
    }
}
