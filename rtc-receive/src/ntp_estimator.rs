//! Remote NTP estimator: maps a sender's RTP timestamps onto local NTP time
//! by fitting a line through the `(rtp_timestamp, ntp_time)` pairs carried
//! in successive sender reports. Grounded on the surviving declaration in
//! `rtp_rtcp/components/rtp_to_ntp_estimator.hpp` (its `.cpp` did not
//! survive into the retrieval pack, so the linear-regression fit below is
//! written directly against the specification).

use std::collections::VecDeque;

use rtcp::sender_report::SenderReport;
use shared::time::NtpTime;

/// One `(ntp_time, unwrapped_rtp_timestamp)` sample taken from a sender
/// report, matching the original `Measurement` struct layout.
#[derive(Debug, Clone, Copy)]
struct Measurement {
    ntp_time: NtpTime,
    unwrapped_rtp_timestamp: i64,
}

/// Only the two most recent measurements are kept: the frequency estimate
/// they imply is assumed stable for the life of a stream, so older samples
/// add nothing beyond what the latest pair already captures.
const MAX_MEASUREMENTS: usize = 2;

pub struct RtpToNtpEstimator {
    measurements: VecDeque<Measurement>,
    rtp_timestamps_per_ms: Option<f64>,
    last_unwrapped_rtp_timestamp: i64,
    has_unwrap_base: bool,
}

impl Default for RtpToNtpEstimator {
    fn default() -> Self {
        Self {
            measurements: VecDeque::with_capacity(MAX_MEASUREMENTS),
            rtp_timestamps_per_ms: None,
            last_unwrapped_rtp_timestamp: 0,
            has_unwrap_base: false,
        }
    }
}

impl RtpToNtpEstimator {
    pub fn new() -> Self {
        Self::default()
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

    /// Feeds one sender report's `(ntp_time, rtp_time)` pair. Returns
    /// `false` if the sample is invalid (zero NTP time) or out of order and
    /// was ignored.
    pub fn update_from_sender_report(&mut self, report: &SenderReport) -> bool {
        let ntp_time = NtpTime::new(report.ntp_time);
        if !ntp_time.valid() {
            return false;
        }
        let unwrapped = self.unwrap(report.rtp_time);
        if let Some(last) = self.measurements.back() {
            if unwrapped <= last.unwrapped_rtp_timestamp || ntp_time.to_ms() <= last.ntp_time.to_ms() {
                return false;
            }
        }
        self.measurements.push_back(Measurement { ntp_time, unwrapped_rtp_timestamp: unwrapped });
        if self.measurements.len() > MAX_MEASUREMENTS {
            self.measurements.pop_front();
        }
        self.update_parameters();
        true
    }

    fn update_parameters(&mut self) {
        let (Some(first), Some(last)) = (self.measurements.front(), self.measurements.back()) else {
            return;
        };
        let rtp_diff = (last.unwrapped_rtp_timestamp - first.unwrapped_rtp_timestamp) as f64;
        let ntp_diff_ms = (last.ntp_time.to_ms() - first.ntp_time.to_ms()) as f64;
        if rtp_diff < 1.0 || ntp_diff_ms < 1.0 {
            return;
        }
        self.rtp_timestamps_per_ms = Some(rtp_diff / ntp_diff_ms);
    }

    /// Estimates the local NTP time (in ms) a frame stamped with
    /// `rtp_timestamp` was captured at. Returns `None` until at least two
    /// sender reports have established a frequency estimate.
    pub fn estimate_ntp_ms(&mut self, rtp_timestamp: u32) -> Option<i64> {
        let freq = self.rtp_timestamps_per_ms?;
        let unwrapped = self.unwrap(rtp_timestamp);
        let anchor = *self.measurements.back()?;
        let diff_ms = (unwrapped - anchor.unwrapped_rtp_timestamp) as f64 / freq;
        Some(anchor.ntp_time.to_ms() + diff_ms.round() as i64)
    }
}
