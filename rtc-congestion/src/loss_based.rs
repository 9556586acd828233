//! Loss-based send-side bandwidth estimator (§4.15 item 2): decreases target
//! bitrate when the receiver-reported loss fraction exceeds 10%, holds
//! between 2-10%, and allows an additive increase otherwise. Gated to at
//! most one decrease per `kBweDecreaseInterval`. Grounded on
//! `congestion_controller/goog_cc/send_side_bwe.cpp` and
//! `congestion_control/send_side/goog_cc/send_side_bwe.cpp`'s
//! `UpdateEstimate`/loss-report path.

use shared::time::{DataRate, TimeDelta, Timestamp};

const LOW_LOSS_THRESHOLD: f64 = 0.02;
const HIGH_LOSS_THRESHOLD: f64 = 0.1;
const BWE_INCREASE_INTERVAL: TimeDelta = TimeDelta::from_micros(1_000_000);
const BWE_DECREASE_INTERVAL: TimeDelta = TimeDelta::from_micros(300_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossBasedState {
    Increase,
    Hold,
    Decrease,
}

/// Tracks `fraction_lost` (8.8 fixed point, as carried by RTCP receiver
/// reports) and applies it to a target bitrate on each feedback round.
pub struct LossBasedBwe {
    last_fraction_loss: u8,
    time_last_decrease: Timestamp,
    has_decreased_since_last_loss_report: bool,
}

impl Default for LossBasedBwe {
    fn default() -> Self {
        Self {
            last_fraction_loss: 0,
            time_last_decrease: Timestamp::minus_infinity(),
            has_decreased_since_last_loss_report: false,
        }
    }
}

impl LossBasedBwe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fraction_loss(&self) -> u8 {
        self.last_fraction_loss
    }

    /// Records one RTCP receiver-report's loss counters. `num_packets` is the
    /// total expected since the previous report.
    pub fn update_packets_lost(&mut self, packets_lost: i64, num_packets: i64, _at_time: Timestamp) {
        if num_packets <= 0 {
            return;
        }
        let loss = (packets_lost.max(0) as f64 / num_packets as f64).clamp(0.0, 1.0);
        self.last_fraction_loss = (loss * 255.0).round() as u8;
    }

    /// Applies the loss-based transition to `current_bitrate`, returning the
    /// new target and the state the transition took.
    pub fn estimate(
        &mut self,
        min_bitrate: DataRate,
        current_bitrate: DataRate,
        at_time: Timestamp,
    ) -> (DataRate, LossBasedState) {
        let loss_fraction = self.last_fraction_loss as f64 / 255.0;

        if loss_fraction <= LOW_LOSS_THRESHOLD {
            // Additive increase capped at ~8%/s, applied once per
            // kBweIncreaseInterval so back-to-back feedback rounds don't
            // compound the increase.
            if at_time - self.time_last_decrease >= BWE_INCREASE_INTERVAL {
                self.has_decreased_since_last_loss_report = false;
            }
            let new_bitrate = current_bitrate * 1.08;
            (new_bitrate.max_(min_bitrate), LossBasedState::Increase)
        } else if loss_fraction <= HIGH_LOSS_THRESHOLD {
            (current_bitrate, LossBasedState::Hold)
        } else {
            if at_time - self.time_last_decrease < BWE_DECREASE_INTERVAL
                || self.has_decreased_since_last_loss_report
            {
                return (current_bitrate, LossBasedState::Hold);
            }
            self.time_last_decrease = at_time;
            self.has_decreased_since_last_loss_report = true;
            let new_bitrate = current_bitrate * (1.0 - 0.5 * loss_fraction);
            (new_bitrate.max_(min_bitrate), LossBasedState::Decrease)
        }
    }
}

trait MinMax: Sized {
    fn max_(self, other: Self) -> Self;
}

impl MinMax for DataRate {
    fn max_(self, other: Self) -> Self {
        if self > other { self } else { other }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_loss_decreases_bitrate() {
        let mut est = LossBasedBwe::new();
        est.update_packets_lost(30, 100, Timestamp::zero());
        let (bitrate, state) = est.estimate(
            DataRate::kilobits_per_sec(50),
            DataRate::kilobits_per_sec(1000),
            Timestamp::zero(),
        );
        assert_eq!(state, LossBasedState::Decrease);
        assert!(bitrate < DataRate::kilobits_per_sec(1000));
    }

    #[test]
    fn low_loss_increases_bitrate() {
        let mut est = LossBasedBwe::new();
        est.update_packets_lost(0, 100, Timestamp::zero());
        let (bitrate, state) = est.estimate(
            DataRate::kilobits_per_sec(50),
            DataRate::kilobits_per_sec(1000),
            Timestamp::zero(),
        );
        assert_eq!(state, LossBasedState::Increase);
        assert!(bitrate > DataRate::kilobits_per_sec(1000));
    }

    #[test]
    fn moderate_loss_holds() {
        let mut est = LossBasedBwe::new();
        est.update_packets_lost(5, 100, Timestamp::zero());
        let (bitrate, state) = est.estimate(
            DataRate::kilobits_per_sec(50),
            DataRate::kilobits_per_sec(1000),
            Timestamp::zero(),
        );
        assert_eq!(state, LossBasedState::Hold);
        assert_eq!(bitrate, DataRate::kilobits_per_sec(1000));
    }

    #[test]
    fn decrease_gated_to_once_per_interval() {
        let mut est = LossBasedBwe::new();
        est.update_packets_lost(30, 100, Timestamp::zero());
        let (first, _) = est.estimate(
            DataRate::kilobits_per_sec(50),
            DataRate::kilobits_per_sec(1000),
            Timestamp::zero(),
        );
        let soon = Timestamp::zero() + TimeDelta::from_millis(100);
        let (second, state) = est.estimate(DataRate::kilobits_per_sec(50), first, soon);
        assert_eq!(state, LossBasedState::Hold);
        assert_eq!(second, first);
    }
}
