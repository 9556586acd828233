//! Top-level GoogCC controller (§4.15): combines the delay-based, loss-based
//! and probe estimators into one target bitrate per feedback round, priority
//! probe > delay-based > loss-based, clamped by REMB/min/max configuration
//! and an RTT-backoff floor. Grounded on
//! `congestion_controller/goog_cc/goog_cc_network_controller.cpp`.

use std::collections::VecDeque;

use shared::time::{DataRate, TimeDelta, Timestamp};

use crate::ack_bitrate::AcknowledgedBitrateEstimator;
use crate::aimd::AimdRateControlConfig;
use crate::delay_based::DelayBasedBwe;
use crate::loss_based::LossBasedBwe;
use crate::network_types::{NetworkControlUpdate, PacketResult, TransportPacketsFeedback};
use crate::probe::ProbeBitrateEstimator;

const PROBE_DROP_THROUGHPUT_FRACTION: f64 = 0.85;
const LOSS_UPDATE_INTERVAL: TimeDelta = TimeDelta::from_micros(1_000_000);
const MAX_FEEDBACK_RTT_WINDOW: usize = 32;
const DEFAULT_RTT_LIMIT: TimeDelta = TimeDelta::from_micros(3_000_000);
const DROP_INTERVAL: TimeDelta = TimeDelta::from_micros(300_000);
const DROP_FACTOR: f64 = 0.8;

pub struct GoogCcControllerConfig {
    pub min_bitrate: DataRate,
    pub max_bitrate: DataRate,
    pub starting_bitrate: DataRate,
    pub bandwidth_floor: DataRate,
    pub rtt_limit: TimeDelta,
}

impl Default for GoogCcControllerConfig {
    fn default() -> Self {
        Self {
            min_bitrate: DataRate::kilobits_per_sec(5),
            max_bitrate: DataRate::plus_infinity(),
            starting_bitrate: DataRate::kilobits_per_sec(300),
            bandwidth_floor: DataRate::kilobits_per_sec(5),
            rtt_limit: DEFAULT_RTT_LIMIT,
        }
    }
}

/// Combines delay-based, loss-based and probe signals into one
/// `NetworkControlUpdate` per round of transport-wide feedback.
pub struct GoogCcController {
    config: GoogCcControllerConfig,
    delay_based: DelayBasedBwe,
    loss_based: LossBasedBwe,
    ack_bitrate_estimator: AcknowledgedBitrateEstimator,
    probe_bitrate_estimator: ProbeBitrateEstimator,
    remb_limit: DataRate,
    current_target_bitrate: DataRate,
    last_rtt: TimeDelta,
    feedback_max_rtts_ms: VecDeque<i64>,
    time_last_rtt_backoff_decrease: Timestamp,
    expected_packets_since_last_loss_update: i64,
    lost_packets_since_last_loss_update: i64,
    time_next_loss_update: Timestamp,
}

impl GoogCcController {
    pub fn new(config: GoogCcControllerConfig) -> Self {
        let mut delay_based = DelayBasedBwe::new(AimdRateControlConfig {
            min_bitrate: config.min_bitrate,
            max_bitrate: config.max_bitrate,
            initial_bitrate: config.starting_bitrate,
            send_side: true,
        });
        delay_based.set_min_bitrate(config.min_bitrate);
        let current_target_bitrate = config.starting_bitrate;
        Self {
            delay_based,
            loss_based: LossBasedBwe::new(),
            ack_bitrate_estimator: AcknowledgedBitrateEstimator::default(),
            probe_bitrate_estimator: ProbeBitrateEstimator::new(),
            remb_limit: DataRate::plus_infinity(),
            current_target_bitrate,
            last_rtt: TimeDelta::zero(),
            feedback_max_rtts_ms: VecDeque::new(),
            time_last_rtt_backoff_decrease: Timestamp::minus_infinity(),
            expected_packets_since_last_loss_update: 0,
            lost_packets_since_last_loss_update: 0,
            time_next_loss_update: Timestamp::minus_infinity(),
            config,
        }
    }

    pub fn on_remb(&mut self, bitrate: DataRate) {
        self.remb_limit = if bitrate.is_zero() { DataRate::plus_infinity() } else { bitrate };
    }

    pub fn on_rtt_update(&mut self, rtt: TimeDelta) {
        if rtt > TimeDelta::zero() {
            self.delay_based.on_rtt_update(rtt);
            self.last_rtt = rtt;
        }
    }

    pub fn target_bitrate(&self) -> DataRate {
        self.current_target_bitrate
    }

    /// §4.15's combining step. `in_alr` marks whether the sender is
    /// currently application-limited (affects the delay-based ALR backoff
    /// path).
    pub fn on_transport_packets_feedback(
        &mut self,
        report: &TransportPacketsFeedback,
        in_alr: bool,
    ) -> NetworkControlUpdate {
        if report.packet_feedbacks.is_empty() {
            return NetworkControlUpdate::default();
        }

        let received = report.received_with_send_info();
        let feedback_time = report.feedback_time();
        let max_recv_time = received
            .iter()
            .map(|p| p.recv_time)
            .max()
            .unwrap_or(Timestamp::minus_infinity());

        let mut max_feedback_rtt = TimeDelta::minus_infinity();
        for feedback in &received {
            let feedback_rtt = feedback_time - feedback.sent_packet.send_time;
            max_feedback_rtt = max_feedback_rtt.max(feedback_rtt);
        }
        if max_feedback_rtt.is_finite() {
            self.feedback_max_rtts_ms.push_back(max_feedback_rtt.ms());
            if self.feedback_max_rtts_ms.len() > MAX_FEEDBACK_RTT_WINDOW {
                self.feedback_max_rtts_ms.pop_front();
            }
        }

        self.update_loss_counters(report, feedback_time);

        let ack_bitrate_estimator = &mut self.ack_bitrate_estimator;
        ack_bitrate_estimator.incoming_packet_feedbacks(&received);
        let ack_bitrate = ack_bitrate_estimator.estimate();

        for feedback in &received {
            if feedback.sent_packet.pacing_info.is_probe() {
                self.probe_bitrate_estimator
                    .handle_probe_and_estimate_bitrate(feedback);
            }
        }
        let mut probe_bitrate = self.probe_bitrate_estimator.fetch_and_reset_last_estimate();

        if let (Some(probe), Some(ack)) = (probe_bitrate, ack_bitrate) {
            let backed_off_ack = ack * PROBE_DROP_THROUGHPUT_FRACTION;
            let (current_bwe, _) = self.delay_based.latest_estimate();
            let floor = current_bwe.min_(backed_off_ack);
            probe_bitrate = Some(probe.max_(floor));
        }

        let result = self
            .delay_based
            .incoming_packet_feedbacks(report, ack_bitrate, probe_bitrate, in_alr);

        if result.updated {
            if let Some(target) = result.target_bitrate {
                self.apply_delay_based_bitrate(target, feedback_time);
            }
        }

        self.apply_rtt_backoff(feedback_time);

        NetworkControlUpdate {
            target_rate: Some(self.current_target_bitrate),
            pacer_rate: Some(self.current_target_bitrate * 2.5),
            probe_cluster_config: None,
            congestion_window: None,
        }
    }

    fn update_loss_counters(&mut self, report: &TransportPacketsFeedback, feedback_time: Timestamp) {
        self.expected_packets_since_last_loss_update += report.packet_feedbacks.len() as i64;
        self.lost_packets_since_last_loss_update +=
            report.packet_feedbacks.iter().filter(|p: &&PacketResult| p.is_lost()).count() as i64;

        if self.time_next_loss_update.is_minus_infinity() {
            self.time_next_loss_update = feedback_time + LOSS_UPDATE_INTERVAL;
            return;
        }
        if feedback_time > self.time_next_loss_update {
            self.time_next_loss_update = feedback_time + LOSS_UPDATE_INTERVAL;
            self.loss_based.update_packets_lost(
                self.lost_packets_since_last_loss_update,
                self.expected_packets_since_last_loss_update,
                feedback_time,
            );
            self.expected_packets_since_last_loss_update = 0;
            self.lost_packets_since_last_loss_update = 0;
            let (bitrate, _state) =
                self.loss_based
                    .estimate(self.config.min_bitrate, self.current_target_bitrate, feedback_time);
            self.update_target_bitrate(bitrate, feedback_time);
        }
    }

    fn apply_delay_based_bitrate(&mut self, bitrate: DataRate, at_time: Timestamp) {
        self.update_target_bitrate(bitrate, at_time);
    }

    fn update_target_bitrate(&mut self, mut new_bitrate: DataRate, _at_time: Timestamp) {
        if self.remb_limit.is_finite() {
            new_bitrate = new_bitrate.min_(self.remb_limit);
        }
        new_bitrate = new_bitrate.min_(self.config.max_bitrate);
        if new_bitrate < self.config.min_bitrate {
            new_bitrate = self.config.min_bitrate;
        }
        self.current_target_bitrate = new_bitrate;
    }

    /// §4.15's RTT-backoff floor: if the corrected RTT stays above the
    /// configured limit, multiplicatively decrease down to `bandwidth_floor`
    /// at most once per `drop_interval`.
    fn apply_rtt_backoff(&mut self, at_time: Timestamp) {
        if self.feedback_max_rtts_ms.is_empty() {
            return;
        }
        let sum: i64 = self.feedback_max_rtts_ms.iter().sum();
        let mean_rtt = TimeDelta::from_millis(sum / self.feedback_max_rtts_ms.len() as i64);
        if mean_rtt <= self.config.rtt_limit {
            return;
        }
        if at_time - self.time_last_rtt_backoff_decrease < DROP_INTERVAL
            || self.current_target_bitrate <= self.config.bandwidth_floor
        {
            return;
        }
        self.time_last_rtt_backoff_decrease = at_time;
        let new_bitrate = (self.current_target_bitrate * DROP_FACTOR).max_(self.config.bandwidth_floor);
        self.update_target_bitrate(new_bitrate, at_time);
    }
}

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_types::{PacingInfo, SentPacket};

    fn feedback_with(packets: Vec<(i64, i64, usize)>, feedback_ms: i64) -> TransportPacketsFeedback {
        TransportPacketsFeedback {
            feedback_time: Some(Timestamp::from_millis(feedback_ms)),
            packet_feedbacks: packets
                .into_iter()
                .map(|(send_ms, recv_ms, size)| PacketResult {
                    sent_packet: SentPacket {
                        send_time: Timestamp::from_millis(send_ms),
                        size,
                        is_audio: false,
                        pacing_info: PacingInfo::none(),
                    },
                    recv_time: Timestamp::from_millis(recv_ms),
                })
                .collect(),
        }
    }

    #[test]
    fn empty_feedback_is_a_no_op() {
        let mut controller = GoogCcController::new(GoogCcControllerConfig::default());
        let report = TransportPacketsFeedback::default();
        let update = controller.on_transport_packets_feedback(&report, false);
        assert!(update.target_rate.is_none());
    }

    #[test]
    fn steady_feedback_keeps_target_within_configured_bounds() {
        let mut controller = GoogCcController::new(GoogCcControllerConfig::default());
        let mut now = 0i64;
        for i in 0..30 {
            let report = feedback_with(
                vec![
                    (now, now + 10, 1200),
                    (now + 5, now + 15, 1200),
                ],
                now + 20,
            );
            let update = controller.on_transport_packets_feedback(&report, false);
            assert!(update.target_rate.is_some());
            let rate = update.target_rate.unwrap();
            assert!(rate >= GoogCcControllerConfig::default().min_bitrate);
            now += 20;
            let _ = i;
        }
    }

    #[test]
    fn remb_clamps_target_bitrate() {
        let mut controller = GoogCcController::new(GoogCcControllerConfig {
            starting_bitrate: DataRate::kilobits_per_sec(2000),
            ..Default::default()
        });
        controller.on_remb(DataRate::kilobits_per_sec(100));
        let report = feedback_with(vec![(0, 10, 1200), (5, 15, 1200)], 20);
        let update = controller.on_transport_packets_feedback(&report, false);
        assert!(update.target_rate.unwrap() <= DataRate::kilobits_per_sec(100));
    }
}
