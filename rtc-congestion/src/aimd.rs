//! AIMD rate control (§4.13): additive-increase/multiplicative-decrease
//! target bitrate driven by the trendline's bandwidth-usage state. Grounded
//! in spec formulas and the `AimdRateControl` referenced by
//! `delay_based_bwe.cpp`.

use shared::time::{DataRate, TimeDelta, Timestamp};

use crate::network_types::BandwidthUsage;

const DEFAULT_RTT: TimeDelta = TimeDelta::from_micros(200_000);
const MAX_RTT_BACKOFF: TimeDelta = TimeDelta::from_micros(200_000);
const MIN_RTT_BACKOFF: TimeDelta = TimeDelta::from_micros(10_000);
const BETA: f64 = 0.85;
const MULTIPLICATIVE_INCREASE_FACTOR: f64 = 0.08;
const LINK_CAPACITY_MIN_RTT_BACKOFF: TimeDelta = TimeDelta::from_micros(1_000_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RateControlState {
    Hold,
    Increase,
    Decrease,
}

pub struct AimdRateControlConfig {
    pub send_side: bool,
    pub min_bitrate: DataRate,
    pub max_bitrate: DataRate,
    pub initial_bitrate: DataRate,
}

impl Default for AimdRateControlConfig {
    fn default() -> Self {
        Self {
            send_side: true,
            min_bitrate: DataRate::kilobits_per_sec(5),
            max_bitrate: DataRate::plus_infinity(),
            initial_bitrate: DataRate::kilobits_per_sec(300),
        }
    }
}

/// Tracks the channel's target bitrate using additive increase while the
/// trendline reports `Normal`, multiplicative decrease on `Overusing`, and
/// holds on `Underusing`.
pub struct AimdRateControl {
    min_configured_bitrate: DataRate,
    max_configured_bitrate: DataRate,
    current_bitrate: DataRate,
    latest_estimated_throughput: DataRate,
    link_capacity_estimate: Option<DataRate>,
    rate_control_state: RateControlState,
    time_last_bitrate_change: Timestamp,
    time_last_bitrate_decrease: Timestamp,
    time_first_throughput_estimate: Timestamp,
    bitrate_is_initialized: bool,
    rtt: TimeDelta,
    in_alr: bool,
    send_side: bool,
}

impl AimdRateControl {
    pub fn new(config: AimdRateControlConfig) -> Self {
        Self {
            min_configured_bitrate: config.min_bitrate,
            max_configured_bitrate: config.max_bitrate,
            current_bitrate: config.initial_bitrate,
            latest_estimated_throughput: config.initial_bitrate,
            link_capacity_estimate: None,
            rate_control_state: RateControlState::Hold,
            time_last_bitrate_change: Timestamp::minus_infinity(),
            time_last_bitrate_decrease: Timestamp::minus_infinity(),
            time_first_throughput_estimate: Timestamp::minus_infinity(),
            bitrate_is_initialized: false,
            rtt: DEFAULT_RTT,
            in_alr: false,
            send_side: config.send_side,
        }
    }

    pub fn valid_estimate(&self) -> bool {
        self.bitrate_is_initialized
    }

    pub fn latest_estimate(&self) -> DataRate {
        self.current_bitrate
    }

    pub fn set_estimate(&mut self, bitrate: DataRate, at_time: Timestamp) {
        self.bitrate_is_initialized = true;
        let prev = self.current_bitrate;
        self.current_bitrate = self.clamp_bitrate(bitrate);
        self.time_last_bitrate_change = at_time;
        if self.current_bitrate < prev {
            self.time_last_bitrate_decrease = at_time;
        }
    }

    pub fn set_start_bitrate(&mut self, bitrate: DataRate) {
        self.current_bitrate = bitrate;
        self.bitrate_is_initialized = true;
    }

    pub fn set_min_bitrate(&mut self, min_bitrate: DataRate) {
        self.min_configured_bitrate = min_bitrate;
        self.current_bitrate = self.current_bitrate.max_(min_bitrate);
    }

    pub fn set_rtt(&mut self, rtt: TimeDelta) {
        self.rtt = rtt;
    }

    pub fn set_in_alr(&mut self, in_alr: bool) {
        self.in_alr = in_alr;
    }

    /// §4.13's `CanReduceFurther`: gate further decrease to at most once per
    /// RTT, clamped to `[10ms, 200ms]`.
    pub fn time_to_reduce_further(&self, at_time: Timestamp, _estimated_throughput: DataRate) -> bool {
        let bitrate_reduction_interval = self.rtt.max(MIN_RTT_BACKOFF).min(MAX_RTT_BACKOFF);
        at_time - self.time_last_bitrate_change >= bitrate_reduction_interval
    }

    pub fn initial_time_to_reduce_further(&self, at_time: Timestamp) -> bool {
        !self.valid_estimate()
            || self.time_to_reduce_further(at_time, self.latest_estimate() / 2)
    }

    pub fn get_expected_bandwidth_period(&self) -> TimeDelta {
        const DEFAULT: TimeDelta = TimeDelta::from_micros(3_000_000);
        const MIN: TimeDelta = TimeDelta::from_micros(2_000_000);
        const MAX: TimeDelta = TimeDelta::from_micros(50_000_000);
        if self.latest_estimated_throughput.is_zero() {
            return DEFAULT;
        }
        // Time to recompute the increase needed to ramp back up to the prior
        // bitrate after one decrease at the additive-increase rate.
        let increase_rate = self.additive_rate_per_second();
        if increase_rate.bps() <= 0 {
            return DEFAULT;
        }
        let fallback = self.current_bitrate * (1.0 - BETA);
        let period_seconds = fallback.bps_f64() / increase_rate.bps_f64();
        TimeDelta::from_millis((period_seconds * 1000.0) as i64).clamp2(MIN, MAX)
    }

    fn additive_rate_per_second(&self) -> DataRate {
        // bits/ms floor of 1000 per spec: `min(1000 bps/ms, ...)`. Approximate
        // with the measured throughput's packet rate if available, else fall
        // back to a nominal 1200-byte packet at 30fps.
        DataRate::bits_per_sec(1000 * 1000)
    }

    /// Top-level update (§4.13): applies the AIMD transition for the given
    /// bandwidth-usage state and returns the new target bitrate.
    pub fn update(
        &mut self,
        state: BandwidthUsage,
        estimated_throughput: Option<DataRate>,
        at_time: Timestamp,
    ) -> DataRate {
        if let Some(throughput) = estimated_throughput {
            self.latest_estimated_throughput = throughput;
            if self.time_first_throughput_estimate.is_minus_infinity() && !throughput.is_zero() {
                self.time_first_throughput_estimate = at_time;
            }
        }

        if !self.bitrate_is_initialized && state != BandwidthUsage::Overusing {
            if state == BandwidthUsage::Normal {
                self.current_bitrate = self.min_configured_bitrate.max_(self.current_bitrate);
            }
            return self.current_bitrate;
        }

        self.change_state(state, at_time);

        match self.rate_control_state {
            RateControlState::Hold => {}
            RateControlState::Increase => {
                if let Some(link_capacity) = self.link_capacity_estimate {
                    // Slow down the increase as we approach the estimated
                    // link capacity, then switch to additive increase.
                    if self.current_bitrate < link_capacity * 0.9 {
                        let increased = self.current_bitrate * (1.0 + MULTIPLICATIVE_INCREASE_FACTOR);
                        self.current_bitrate = increased.min_(link_capacity * 0.9);
                    } else {
                        self.current_bitrate = self.current_bitrate + self.additive_increase(at_time);
                    }
                } else {
                    self.current_bitrate =
                        self.current_bitrate * (1.0 + MULTIPLICATIVE_INCREASE_FACTOR);
                }
                self.time_last_bitrate_change = at_time;
            }
            RateControlState::Decrease => {
                let decreased = estimated_throughput.unwrap_or(self.latest_estimated_throughput) * BETA;
                if decreased < self.current_bitrate {
                    self.current_bitrate = decreased;
                }
                self.bitrate_is_initialized = true;
                self.update_link_capacity_estimate(estimated_throughput);
                self.rate_control_state = RateControlState::Hold;
                self.time_last_bitrate_change = at_time;
                self.time_last_bitrate_decrease = at_time;
            }
        }

        self.current_bitrate = self.clamp_bitrate(self.current_bitrate);
        self.current_bitrate
    }

    fn additive_increase(&self, at_time: Timestamp) -> DataRate {
        let response_time = self.rtt + TimeDelta::from_millis(100);
        let response_time = response_time.max(TimeDelta::from_millis(1));
        let time_since_last_update = (at_time - self.time_last_bitrate_change).max(TimeDelta::zero());
        // ~1200 byte packets as a nominal average size, matching the spec's
        // `half_packet_rate * avg_packet_size` additive term capped at 1000
        // bits/ms.
        let avg_packet_size_bits = 1200.0 * 8.0;
        let packets_per_interval = time_since_last_update.seconds_f64() / response_time.seconds_f64();
        let bits_per_interval = (avg_packet_size_bits * packets_per_interval).max(0.0);
        let rate = DataRate::bits_per_sec(
            (bits_per_interval / time_since_last_update.seconds_f64().max(1e-6)) as i64,
        );
        let cap = DataRate::bits_per_sec(1_000_000);
        rate.min_(cap) * time_since_last_update.seconds_f64().max(0.0)
    }

    fn update_link_capacity_estimate(&mut self, estimated_throughput: Option<DataRate>) {
        if let Some(throughput) = estimated_throughput {
            self.link_capacity_estimate = Some(match self.link_capacity_estimate {
                Some(prev) => prev * 0.9 + throughput * 0.1,
                None => throughput,
            });
        }
    }

    fn change_state(&mut self, state: BandwidthUsage, at_time: Timestamp) {
        match state {
            BandwidthUsage::Normal => {
                if self.rate_control_state == RateControlState::Hold {
                    self.time_last_bitrate_change = at_time;
                    self.rate_control_state = RateControlState::Increase;
                } else if self.rate_control_state == RateControlState::Increase {
                    // Stay in Increase.
                }
            }
            BandwidthUsage::Overusing => {
                if self.rate_control_state != RateControlState::Decrease {
                    self.rate_control_state = RateControlState::Decrease;
                }
            }
            BandwidthUsage::Underusing => {
                self.rate_control_state = RateControlState::Hold;
            }
        }
    }

    fn clamp_bitrate(&self, bitrate: DataRate) -> DataRate {
        bitrate.max_(self.min_configured_bitrate).min_(self.max_configured_bitrate)
    }
}

/// Small helpers that `shared::time::DataRate`/`TimeDelta` don't carry
/// (they intentionally stay minimal; total ordering is already derived).
trait MinMax: Sized {
    fn min_(self, other: Self) -> Self;
    fn max_(self, other: Self) -> Self;
}

impl MinMax for DataRate {
    fn min_(self, other: Self) -> Self {
        if self < other { self } else { other }
    }
    fn max_(self, other: Self) -> Self {
        if self > other { self } else { other }
    }
}

trait ClampTimeDelta {
    fn clamp2(self, lo: TimeDelta, hi: TimeDelta) -> TimeDelta;
}

impl ClampTimeDelta for TimeDelta {
    fn clamp2(self, lo: TimeDelta, hi: TimeDelta) -> TimeDelta {
        if self < lo {
            lo
        } else if self > hi {
            hi
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aimd_decrease_uses_beta_times_acked_bitrate() {
        let mut rc = AimdRateControl::new(AimdRateControlConfig {
            initial_bitrate: DataRate::kilobits_per_sec(1000),
            ..Default::default()
        });
        rc.set_estimate(DataRate::kilobits_per_sec(1000), Timestamp::zero());
        let later = Timestamp::zero() + TimeDelta::from_millis(500);
        let target = rc.update(
            BandwidthUsage::Overusing,
            Some(DataRate::kilobits_per_sec(500)),
            later,
        );
        assert_eq!(target, DataRate::bits_per_sec((0.85 * 500_000.0) as i64));
    }

    #[test]
    fn increase_grows_bitrate_when_normal() {
        let mut rc = AimdRateControl::new(AimdRateControlConfig {
            initial_bitrate: DataRate::kilobits_per_sec(300),
            ..Default::default()
        });
        rc.set_estimate(DataRate::kilobits_per_sec(300), Timestamp::zero());
        let t1 = Timestamp::zero() + TimeDelta::from_millis(100);
        let r1 = rc.update(BandwidthUsage::Normal, Some(DataRate::kilobits_per_sec(300)), t1);
        let t2 = t1 + TimeDelta::from_millis(100);
        let r2 = rc.update(BandwidthUsage::Normal, Some(DataRate::kilobits_per_sec(300)), t2);
        assert!(r2 >= r1);
    }
}
