//! Jitter buffer & timing (§4.9): combines the Kalman jitter estimator, the
//! RTT filter that feeds it, and render-time extrapolation into the single
//! per-frame decision of "when should this be handed to the decoder".

pub mod kalman;
pub mod rtt_filter;
pub mod timing;

use shared::time::{TimeDelta, Timestamp};

pub use kalman::{JitterEstimator, JitterEstimatorConfig};
pub use rtt_filter::RttFilter;
pub use timing::{render_time, TimestampExtrapolator};

/// Configuration for the fixed, non-jitter components of the render-time
/// formula (§4.9's "decode_delay + render_delay" terms plus the floor).
#[derive(Debug, Clone, Copy)]
pub struct JitterBufferConfig {
    pub decode_delay: TimeDelta,
    pub render_delay: TimeDelta,
    pub min_playout_delay: TimeDelta,
    pub rtt_multiplier: f64,
    pub rtt_mult_add_cap_ms: Option<f64>,
    pub enable_reduced_delay: bool,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            decode_delay: TimeDelta::zero(),
            render_delay: TimeDelta::from_millis(10),
            min_playout_delay: TimeDelta::zero(),
            rtt_multiplier: 0.0,
            rtt_mult_add_cap_ms: None,
            enable_reduced_delay: false,
        }
    }
}

/// Owns one stream's Kalman jitter estimate, RTT smoothing, and RTP-to-local
/// clock extrapolation, and turns them into a render deadline for each
/// incoming frame.
pub struct JitterBuffer {
    config: JitterBufferConfig,
    clock_rate_hz: f64,
    estimator: JitterEstimator,
    extrapolator: TimestampExtrapolator,
    last_frame: Option<(u32, Timestamp, u32)>,
}

impl JitterBuffer {
    pub fn new(config: JitterBufferConfig, clock_rate_hz: f64) -> Self {
        Self {
            config,
            clock_rate_hz,
            estimator: JitterEstimator::default(),
            extrapolator: TimestampExtrapolator::new(clock_rate_hz),
            last_frame: None,
        }
    }

    pub fn update_rtt(&mut self, rtt: TimeDelta) {
        self.estimator.update_rtt(rtt);
    }

    pub fn on_nack(&mut self, now_us: i64) {
        self.estimator.on_nack(now_us);
    }

    /// Feeds one assembled frame's timing and returns its render deadline.
    /// `frame_size` is the encoded payload size in bytes, used by the
    /// Kalman estimator's channel-rate model.
    pub fn on_frame(
        &mut self,
        rtp_timestamp: u32,
        receive_time: Timestamp,
        frame_size: u32,
        incomplete_frame: bool,
    ) -> Timestamp {
        self.extrapolator.update(rtp_timestamp, receive_time);

        if let Some((prev_rtp, prev_receive, _prev_size)) = self.last_frame {
            let frame_delay_ms = (receive_time - prev_receive).ms()
                - frame_transmission_delay_ms(prev_rtp, rtp_timestamp, self.clock_rate_hz);
            self.estimator
                .update_estimate(frame_delay_ms, frame_size, incomplete_frame, receive_time.us());
        }
        self.last_frame = Some((rtp_timestamp, receive_time, frame_size));

        let jitter_ms = self.estimator.get_jitter_estimate(
            self.config.rtt_multiplier,
            self.config.rtt_mult_add_cap_ms,
            self.config.enable_reduced_delay,
            receive_time.us(),
        );

        render_time(
            receive_time,
            TimeDelta::from_millis(jitter_ms),
            self.config.decode_delay,
            self.config.render_delay,
            self.config.min_playout_delay,
        )
    }

}

/// The Kalman estimator models delay relative to the frame's *expected*
/// arrival under the channel's nominal clock rate, not its raw receive-time
/// delta; this converts an RTP timestamp delta into milliseconds at the
/// given clock rate so `frame_delay_ms` reflects queueing delay alone.
fn frame_transmission_delay_ms(prev_rtp: u32, rtp: u32, clock_rate_hz: f64) -> i64 {
    let diff = rtp.wrapping_sub(prev_rtp) as i32;
    ((diff as f64 / clock_rate_hz) * 1000.0).round() as i64
}
