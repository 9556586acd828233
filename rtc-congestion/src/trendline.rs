//! Trendline estimator (§4.12): windowed least-squares slope of the delay
//! signal compared against an adaptive threshold to classify the channel as
//! over/under/normal-using. Grounded in the `TrendlineEstimator` referenced
//! by the reference delay-based bandwidth estimator.

use std::collections::VecDeque;

use shared::time::TimeDelta;

use crate::network_types::BandwidthUsage;

const DEFAULT_WINDOW_SIZE: usize = 20;
const MIN_NUM_DELTAS: i32 = 60;
const THRESHOLD_GAIN: f64 = 4.0;
const OVERUSING_TIME_THRESHOLD_MS: f64 = 10.0;
const MAX_ADAPT_OFFSET_MS: f64 = 15.0;
const K_UP: f64 = 0.0087;
const K_DOWN: f64 = 0.039;

#[derive(Debug, Clone, Copy)]
struct DelaySample {
    arrival_time_ms: f64,
    smoothed_delay_ms: f64,
}

/// Slope of recent delay samples → [`BandwidthUsage`].
pub struct TrendlineEstimator {
    window_size: usize,
    smoothing_coef: f64,
    threshold_gain: f64,
    num_of_deltas: i32,
    first_arrival_time_ms: f64,
    accumulated_delay_ms: f64,
    smoothed_delay_ms: f64,
    delay_hist: VecDeque<DelaySample>,
    k_up: f64,
    k_down: f64,
    overusing_time_threshold: f64,
    threshold: f64,
    prev_modified_trend: f64,
    last_update_ms: f64,
    prev_trend: f64,
    time_over_using: f64,
    overuse_counter: i32,
    hypothesis: BandwidthUsage,
}

impl Default for TrendlineEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE, 0.9)
    }
}

impl TrendlineEstimator {
    pub fn new(window_size: usize, smoothing_coef: f64) -> Self {
        Self {
            window_size,
            smoothing_coef,
            threshold_gain: THRESHOLD_GAIN,
            num_of_deltas: 0,
            first_arrival_time_ms: -1.0,
            accumulated_delay_ms: 0.0,
            smoothed_delay_ms: 0.0,
            delay_hist: VecDeque::new(),
            k_up: K_UP,
            k_down: K_DOWN,
            overusing_time_threshold: OVERUSING_TIME_THRESHOLD_MS,
            threshold: 12.5,
            prev_modified_trend: f64::NAN,
            last_update_ms: -1.0,
            prev_trend: 0.0,
            time_over_using: -1.0,
            overuse_counter: 0,
            hypothesis: BandwidthUsage::Normal,
        }
    }

    pub fn state(&self) -> BandwidthUsage {
        self.hypothesis
    }

    /// Feeds one inter-arrival-group sample: `recv_delta_ms`/`send_delta_ms`
    /// are the arrival/send deltas between two adjacent groups,
    /// `send_time_ms`/`arrival_time_ms` are the send/arrival time of the
    /// latest group, `packet_size_delta` its size delta (unused beyond
    /// threading the signal through).
    pub fn update(
        &mut self,
        recv_delta_ms: f64,
        send_delta_ms: f64,
        _send_time_ms: i64,
        arrival_time_ms: i64,
        _packet_size: usize,
    ) {
        let delta_ms = recv_delta_ms - send_delta_ms;
        self.num_of_deltas += 1;
        self.num_of_deltas = self.num_of_deltas.min(1_000_000);
        if self.first_arrival_time_ms == -1.0 {
            self.first_arrival_time_ms = arrival_time_ms as f64;
        }

        // Exponential backoff filter: accumulate delay, then exponentially
        // smooth it.
        self.accumulated_delay_ms += delta_ms;
        self.smoothed_delay_ms = self.smoothing_coef * self.smoothed_delay_ms
            + (1.0 - self.smoothing_coef) * self.accumulated_delay_ms;

        self.delay_hist.push_back(DelaySample {
            arrival_time_ms: (arrival_time_ms as f64 - self.first_arrival_time_ms).max(0.0),
            smoothed_delay_ms: self.smoothed_delay_ms,
        });
        if self.delay_hist.len() > self.window_size {
            self.delay_hist.pop_front();
        }

        let trend = if self.delay_hist.len() >= self.window_size {
            self.linear_fit_slope().unwrap_or(self.prev_trend)
        } else {
            self.prev_trend
        };

        self.detect(trend, arrival_time_ms as f64);
    }

    fn linear_fit_slope(&self) -> Option<f64> {
        let n = self.delay_hist.len();
        if n < 2 {
            return None;
        }
        let avg_x: f64 = self.delay_hist.iter().map(|s| s.arrival_time_ms).sum::<f64>() / n as f64;
        let avg_y: f64 =
            self.delay_hist.iter().map(|s| s.smoothed_delay_ms).sum::<f64>() / n as f64;
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for s in &self.delay_hist {
            let dx = s.arrival_time_ms - avg_x;
            numerator += dx * (s.smoothed_delay_ms - avg_y);
            denominator += dx * dx;
        }
        if denominator == 0.0 {
            None
        } else {
            Some(numerator / denominator)
        }
    }

    fn detect(&mut self, trend: f64, now_ms: f64) {
        if self.num_of_deltas < 2 {
            self.hypothesis = BandwidthUsage::Normal;
            return;
        }
        let modified_trend =
            (self.num_of_deltas.min(MIN_NUM_DELTAS)) as f64 * trend * self.threshold_gain;
        self.prev_modified_trend = modified_trend;
        if modified_trend > self.threshold {
            if self.time_over_using == -1.0 {
                self.time_over_using = self.overusing_time_threshold / 2.0;
            } else {
                self.time_over_using += now_ms - self.last_update_ms;
            }
            self.overuse_counter += 1;
            if self.time_over_using > self.overusing_time_threshold
                && self.overuse_counter > 1
                && trend >= self.prev_trend
            {
                self.hypothesis = BandwidthUsage::Overusing;
            }
        } else if modified_trend < -self.threshold {
            self.time_over_using = -1.0;
            self.overuse_counter = 0;
            self.hypothesis = BandwidthUsage::Underusing;
        } else {
            self.time_over_using = -1.0;
            self.overuse_counter = 0;
            self.hypothesis = BandwidthUsage::Normal;
        }
        self.prev_trend = trend;
        self.update_threshold(modified_trend, now_ms);
        self.last_update_ms = now_ms;
    }

    fn update_threshold(&mut self, modified_trend: f64, now_ms: f64) {
        if self.last_update_ms == -1.0 {
            self.last_update_ms = now_ms;
        }
        if modified_trend.abs() > self.threshold + MAX_ADAPT_OFFSET_MS {
            self.last_update_ms = now_ms;
            return;
        }
        let k = if modified_trend.abs() < self.threshold {
            self.k_down
        } else {
            self.k_up
        };
        const MAX_TIME_DELTA_MS: f64 = 100.0;
        let time_delta_ms = (now_ms - self.last_update_ms).min(MAX_TIME_DELTA_MS);
        self.threshold += k * (modified_trend.abs() - self.threshold) * time_delta_ms;
        self.threshold = self.threshold.clamp(6.0, 600.0);
        self.last_update_ms = now_ms;
    }
}

/// Convenience used when driving the estimator straight from
/// [`crate::inter_arrival::InterArrivalDeltas`] (§4.11 → §4.12 wiring).
pub fn deltas_ms(delta: TimeDelta) -> f64 {
    delta.us() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_normal_with_constant_delay() {
        let mut t = TrendlineEstimator::default();
        let mut now = 0i64;
        for _ in 0..200 {
            t.update(10.0, 10.0, now, now, 1200);
            now += 10;
        }
        assert_eq!(t.state(), BandwidthUsage::Normal);
    }

    #[test]
    fn detects_overuse_with_growing_delay() {
        let mut t = TrendlineEstimator::default();
        let mut now = 0i64;
        let mut send = 0i64;
        for _ in 0..100 {
            // Arrival consistently later than send -> growing queueing delay.
            t.update(12.0, 10.0, send, now, 1200);
            now += 12;
            send += 10;
        }
        assert_eq!(t.state(), BandwidthUsage::Overusing);
    }
}
