//! Acknowledged bitrate estimator (§4.16): windowed throughput estimate
//! smoothed with a Bayesian update whose uncertainty depends on how far the
//! new sample is from the running estimate. Grounded on
//! `congestion_controller/goog_cc/bitrate_estimator.cpp`.

use shared::time::{DataRate, Timestamp};

use crate::network_types::PacketResult;

const MIN_RATE_WINDOW_MS: i64 = 150;
const MAX_RATE_WINDOW_MS: i64 = 1000;

pub struct BitrateEstimatorConfig {
    pub initial_window_ms: i64,
    pub noninitial_window_ms: i64,
    pub uncertainty_scale: f64,
    pub uncertainty_scale_in_alr: f64,
    pub small_sample_uncertainty_scale: f64,
    pub small_sample_threshold: i64,
    pub uncertainty_symmetry_cap: DataRate,
    pub estimate_floor: DataRate,
}

impl Default for BitrateEstimatorConfig {
    fn default() -> Self {
        Self {
            initial_window_ms: 500,
            noninitial_window_ms: 150,
            uncertainty_scale: 10.0,
            uncertainty_scale_in_alr: 10.0,
            small_sample_uncertainty_scale: 10.0,
            small_sample_threshold: 200,
            uncertainty_symmetry_cap: DataRate::kilobits_per_sec(10),
            estimate_floor: DataRate::zero(),
        }
    }
}

/// A single-window Bayesian throughput estimator; used both standalone (the
/// `PeekRate`-style sanity check) and wrapped by
/// [`AcknowledgedBitrateEstimator`] for the transport-feedback-driven path.
pub struct BitrateEstimator {
    config: BitrateEstimatorConfig,
    sum: i64,
    current_window_ms: i64,
    prev_time_ms: Option<i64>,
    bitrate_estimate_kbps: f64,
    bitrate_estimate_var: f64,
}

impl BitrateEstimator {
    pub fn new(config: BitrateEstimatorConfig) -> Self {
        assert!((MIN_RATE_WINDOW_MS..=MAX_RATE_WINDOW_MS).contains(&config.initial_window_ms));
        assert!((MIN_RATE_WINDOW_MS..=MAX_RATE_WINDOW_MS).contains(&config.noninitial_window_ms));
        Self {
            config,
            sum: 0,
            current_window_ms: 0,
            prev_time_ms: None,
            bitrate_estimate_kbps: -1.0,
            bitrate_estimate_var: 50.0,
        }
    }

    pub fn update(&mut self, at_time: Timestamp, amount: usize, in_alr: bool) {
        let rate_window_ms = if self.bitrate_estimate_kbps < 0.0 {
            self.config.initial_window_ms
        } else {
            self.config.noninitial_window_ms
        };
        let (bitrate_sample_kbps, is_small_sample) =
            self.update_window(at_time.ms(), amount as i64, rate_window_ms);
        if bitrate_sample_kbps < 0.0 {
            return;
        }
        if self.bitrate_estimate_kbps < 0.0 {
            self.bitrate_estimate_kbps = bitrate_sample_kbps;
            return;
        }

        let mut scale = self.config.uncertainty_scale;
        if is_small_sample && bitrate_sample_kbps < self.bitrate_estimate_kbps {
            scale = self.config.small_sample_uncertainty_scale;
        } else if in_alr && bitrate_sample_kbps < self.bitrate_estimate_kbps {
            scale = self.config.uncertainty_scale_in_alr;
        }

        let sample_uncertainty = scale * (self.bitrate_estimate_kbps - bitrate_sample_kbps).abs()
            / (self.bitrate_estimate_kbps
                + bitrate_sample_kbps.min(self.config.uncertainty_symmetry_cap.kbps_f64()));
        let sample_var = sample_uncertainty * sample_uncertainty;

        let pred_bitrate_estimate_var = self.bitrate_estimate_var + 5.0;
        self.bitrate_estimate_kbps = (sample_var * self.bitrate_estimate_kbps
            + pred_bitrate_estimate_var * bitrate_sample_kbps)
            / (sample_var + pred_bitrate_estimate_var);
        self.bitrate_estimate_kbps = self
            .bitrate_estimate_kbps
            .max(self.config.estimate_floor.kbps_f64());
        self.bitrate_estimate_var =
            sample_var * pred_bitrate_estimate_var / (sample_var + pred_bitrate_estimate_var);
    }

    pub fn estimate(&self) -> Option<DataRate> {
        if self.bitrate_estimate_kbps >= 0.0 {
            Some(DataRate::kilobits_per_sec(self.bitrate_estimate_kbps as i64))
        } else {
            None
        }
    }

    pub fn peek_rate(&self) -> Option<DataRate> {
        if self.current_window_ms > 0 {
            Some(DataRate::bytes_per_sec(
                self.sum * 1000 / self.current_window_ms,
            ))
        } else {
            None
        }
    }

    pub fn expect_fast_rate_change(&mut self) {
        self.bitrate_estimate_var += 200.0;
    }

    fn update_window(&mut self, now_ms: i64, bytes: i64, rate_window_ms: i64) -> (f64, bool) {
        if let Some(prev) = self.prev_time_ms {
            if now_ms < prev {
                self.prev_time_ms = None;
                self.sum = 0;
                self.current_window_ms = 0;
            } else {
                let elapsed = now_ms - prev;
                self.current_window_ms += elapsed;
                if elapsed > rate_window_ms {
                    self.sum = 0;
                    self.current_window_ms %= rate_window_ms;
                }
            }
        }
        self.prev_time_ms = Some(now_ms);
        let mut bitrate_sample = -1.0;
        let mut is_small_sample = false;
        if self.current_window_ms >= rate_window_ms {
            is_small_sample = self.sum < self.config.small_sample_threshold;
            bitrate_sample = 8.0 * self.sum as f64 / rate_window_ms as f64;
            self.current_window_ms -= rate_window_ms;
            self.sum = 0;
        }
        self.sum += bytes;
        (bitrate_sample, is_small_sample)
    }
}

/// Drives a [`BitrateEstimator`] from transport-feedback packet results
/// (§4.16): feeds one sample per acknowledged packet's payload size.
pub struct AcknowledgedBitrateEstimator {
    estimator: BitrateEstimator,
    in_alr: bool,
    alr_ended_time: Option<Timestamp>,
}

impl Default for AcknowledgedBitrateEstimator {
    fn default() -> Self {
        Self {
            estimator: BitrateEstimator::new(BitrateEstimatorConfig::default()),
            in_alr: false,
            alr_ended_time: None,
        }
    }
}

impl AcknowledgedBitrateEstimator {
    pub fn set_in_alr(&mut self, in_alr: bool) {
        self.in_alr = in_alr;
    }

    pub fn set_alr_ended_time(&mut self, at_time: Timestamp) {
        self.alr_ended_time = Some(at_time);
    }

    pub fn incoming_packet_feedbacks(&mut self, feedbacks: &[PacketResult]) {
        for feedback in feedbacks {
            if feedback.is_lost() {
                continue;
            }
            if let Some(alr_ended) = self.alr_ended_time
                && feedback.sent_packet.send_time > alr_ended
            {
                self.estimator.expect_fast_rate_change();
                self.alr_ended_time = None;
            }
            self.estimator
                .update(feedback.recv_time, feedback.sent_packet.size, self.in_alr);
        }
    }

    pub fn estimate(&self) -> Option<DataRate> {
        self.estimator.estimate()
    }

    pub fn peek_rate(&self) -> Option<DataRate> {
        self.estimator.peek_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_types::{PacingInfo, SentPacket};

    #[test]
    fn estimate_is_none_before_first_window() {
        let est = AcknowledgedBitrateEstimator::default();
        assert!(est.estimate().is_none());
    }

    #[test]
    fn estimate_converges_toward_steady_rate() {
        let mut est = AcknowledgedBitrateEstimator::default();
        let mut feedbacks = Vec::new();
        for i in 0..40 {
            feedbacks.push(PacketResult {
                sent_packet: SentPacket {
                    send_time: Timestamp::from_millis(i * 20),
                    size: 1250,
                    is_audio: false,
                    pacing_info: PacingInfo::none(),
                },
                recv_time: Timestamp::from_millis(i * 20 + 5),
            });
        }
        est.incoming_packet_feedbacks(&feedbacks);
        let estimate = est.estimate().expect("estimate available after window fills");
        // 1250 bytes / 20ms = 500 kbps nominal.
        assert!(estimate.kbps_f64() > 100.0);
    }
}
