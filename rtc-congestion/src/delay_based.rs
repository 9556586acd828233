//! Delay-based bandwidth estimator (§4.15 item 1): feeds transport-feedback
//! packet results through the inter-arrival grouper and trendline
//! estimator, then lets the AIMD rate controller turn the bandwidth-usage
//! classification into a target bitrate. Grounded on
//! `congestion_controller/goog_cc/delay_based_bwe.cpp`.

use shared::time::{DataRate, TimeDelta, Timestamp};

use crate::aimd::{AimdRateControl, AimdRateControlConfig};
use crate::inter_arrival::InterArrivalDelta;
use crate::network_types::{BandwidthUsage, PacketResult, TransportPacketsFeedback};
use crate::trendline::TrendlineEstimator;

const STREAM_TIMEOUT: TimeDelta = TimeDelta::from_micros(2_000_000);
const SEND_TIME_GROUP_LENGTH: TimeDelta = TimeDelta::from_micros(5_000);

#[derive(Debug, Clone, Copy, Default)]
pub struct DelayBasedResult {
    pub target_bitrate: Option<DataRate>,
    pub updated: bool,
    pub probe: bool,
    pub backoff_in_alr: bool,
    pub recovered_from_overuse: bool,
}

pub struct DelayBasedBwe {
    inter_arrival: InterArrivalDelta,
    delay_detector: TrendlineEstimator,
    rate_control: AimdRateControl,
    last_seen_packet: Timestamp,
    prev_bitrate: DataRate,
    prev_state: BandwidthUsage,
    has_once_detected_overuse: bool,
    alr_limited_backoff_enabled: bool,
}

impl DelayBasedBwe {
    pub fn new(config: AimdRateControlConfig) -> Self {
        Self {
            inter_arrival: InterArrivalDelta::new(SEND_TIME_GROUP_LENGTH),
            delay_detector: TrendlineEstimator::default(),
            rate_control: AimdRateControl::new(config),
            last_seen_packet: Timestamp::minus_infinity(),
            prev_bitrate: DataRate::zero(),
            prev_state: BandwidthUsage::Normal,
            has_once_detected_overuse: false,
            alr_limited_backoff_enabled: false,
        }
    }

    pub fn set_alr_limited_backoff_enabled(&mut self, enabled: bool) {
        self.alr_limited_backoff_enabled = enabled;
    }

    pub fn on_rtt_update(&mut self, avg_rtt: TimeDelta) {
        self.rate_control.set_rtt(avg_rtt);
    }

    pub fn set_start_bitrate(&mut self, bitrate: DataRate) {
        self.rate_control.set_start_bitrate(bitrate);
    }

    pub fn set_min_bitrate(&mut self, bitrate: DataRate) {
        self.rate_control.set_min_bitrate(bitrate);
    }

    pub fn last_estimate(&self) -> DataRate {
        self.prev_bitrate
    }

    pub fn latest_estimate(&self) -> (DataRate, bool) {
        (self.rate_control.latest_estimate(), self.rate_control.valid_estimate())
    }

    pub fn get_expected_bwe_period(&self) -> TimeDelta {
        self.rate_control.get_expected_bandwidth_period()
    }

    pub fn incoming_packet_feedbacks(
        &mut self,
        report: &TransportPacketsFeedback,
        acked_bitrate: Option<DataRate>,
        probe_bitrate: Option<DataRate>,
        in_alr: bool,
    ) -> DelayBasedResult {
        let sorted = report.sorted_by_receive_time();
        if sorted.is_empty() {
            log::debug!("very late feedback received, no packets to process");
            return DelayBasedResult::default();
        }

        let mut recovered_from_overuse = false;
        let mut prev_detector_state = self.delay_detector.state();
        for packet in &sorted {
            self.incoming_packet_feedback(packet, report.feedback_time());
            if prev_detector_state == BandwidthUsage::Underusing
                && self.delay_detector.state() == BandwidthUsage::Normal
            {
                recovered_from_overuse = true;
            }
            prev_detector_state = self.delay_detector.state();
        }

        self.rate_control.set_in_alr(in_alr);
        self.maybe_update_estimate(
            acked_bitrate,
            probe_bitrate,
            recovered_from_overuse,
            in_alr,
            report.feedback_time(),
        )
    }

    fn incoming_packet_feedback(&mut self, packet: &PacketResult, at_time: Timestamp) {
        if self.last_seen_packet.is_infinite() || at_time - self.last_seen_packet > STREAM_TIMEOUT {
            self.inter_arrival = InterArrivalDelta::new(SEND_TIME_GROUP_LENGTH);
            self.delay_detector = TrendlineEstimator::default();
        }
        self.last_seen_packet = at_time;

        let packet_size = packet.sent_packet.size;
        if let Some(deltas) = self.inter_arrival.compute_deltas(
            packet.sent_packet.send_time,
            packet.recv_time,
            at_time,
            packet_size,
        ) {
            self.delay_detector.update(
                deltas.arrival_time_delta.ms() as f64,
                deltas.send_time_delta.ms() as f64,
                packet.sent_packet.send_time.ms(),
                packet.recv_time.ms(),
                packet_size,
            );
        }
    }

    fn maybe_update_estimate(
        &mut self,
        acked_bitrate: Option<DataRate>,
        probe_bitrate: Option<DataRate>,
        recovered_from_overuse: bool,
        _in_alr: bool,
        at_time: Timestamp,
    ) -> DelayBasedResult {
        let mut result = DelayBasedResult::default();
        let state = self.delay_detector.state();

        if state == BandwidthUsage::Overusing {
            if self.has_once_detected_overuse && self.alr_limited_backoff_enabled && _in_alr {
                if self
                    .rate_control
                    .time_to_reduce_further(at_time, self.prev_bitrate)
                {
                    let target = self.rate_control.update(state, Some(self.prev_bitrate), at_time);
                    result.updated = true;
                    result.target_bitrate = Some(target);
                    result.backoff_in_alr = true;
                }
            } else if let Some(acked) = acked_bitrate {
                if self.rate_control.time_to_reduce_further(at_time, acked) {
                    let target = self.rate_control.update(state, Some(acked), at_time);
                    result.updated = true;
                    result.target_bitrate = Some(target);
                }
            } else if acked_bitrate.is_none()
                && self.rate_control.valid_estimate()
                && self.rate_control.initial_time_to_reduce_further(at_time)
            {
                let halved = self.rate_control.latest_estimate() / 2.0;
                self.rate_control.set_estimate(halved, at_time);
                result.updated = true;
                result.probe = false;
                result.target_bitrate = Some(self.rate_control.latest_estimate());
            }
            self.has_once_detected_overuse = true;
        } else if let Some(probe) = probe_bitrate {
            result.probe = true;
            result.updated = true;
            result.target_bitrate = Some(probe);
            self.rate_control.set_estimate(probe, at_time);
        } else {
            let target = self.rate_control.update(state, acked_bitrate, at_time);
            result.updated = self.rate_control.valid_estimate();
            result.target_bitrate = Some(target);
            result.recovered_from_overuse = recovered_from_overuse;
        }

        let detector_state = self.delay_detector.state();
        if (result.updated && result.target_bitrate != Some(self.prev_bitrate))
            || detector_state != self.prev_state
        {
            if let Some(bitrate) = result.target_bitrate {
                self.prev_bitrate = bitrate;
            }
            self.prev_state = detector_state;
        }
        result
    }
}
