//! RTT filter (§4.9): smooths a stream of per-SR round-trip samples with a
//! moving average and detects both sudden jumps and slow drift against the
//! running variance, so a single bad sample doesn't dominate the jitter
//! estimator's RTT input. Grounded on
//! `rtp_rtcp/rtp/receiver/video/jitter/rtt_filter.cpp`.

use shared::time::TimeDelta;

const MAX_RTT_MS: i64 = 3000;
const MAX_SAMPLE_COUNT: u8 = 35;
const JUMP_STANDARD_DEVIATION: f64 = 2.5;
const DRIFT_STANDARD_DEVIATION: f64 = 3.5;
const DETECT_THRESHOLD: usize = 5;

pub struct RttFilter {
    has_first_non_zero_update: bool,
    avg_rtt_ms: f64,
    var_rtt: f64,
    max_rtt_ms: i64,
    jump_count: i8,
    drift_count: i8,
    sample_count: u8,
    jump_buffer: [i64; DETECT_THRESHOLD],
    drift_buffer: [i64; DETECT_THRESHOLD],
}

impl Default for RttFilter {
    fn default() -> Self {
        Self {
            has_first_non_zero_update: false,
            avg_rtt_ms: 0.0,
            var_rtt: 0.0,
            max_rtt_ms: 0,
            jump_count: 0,
            drift_count: 0,
            sample_count: 1,
            jump_buffer: [0; DETECT_THRESHOLD],
            drift_buffer: [0; DETECT_THRESHOLD],
        }
    }
}

impl RttFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn rtt(&self) -> TimeDelta {
        TimeDelta::from_millis((self.max_rtt_ms as f64 + 0.5) as i64)
    }

    pub fn add_rtt(&mut self, rtt: TimeDelta) {
        let mut rtt_ms = rtt.ms();
        if !self.has_first_non_zero_update {
            if rtt_ms == 0 {
                return;
            }
            self.has_first_non_zero_update = true;
        }
        rtt_ms = rtt_ms.min(MAX_RTT_MS);

        let filt_factor = if self.sample_count > 1 {
            (self.sample_count - 1) as f64 / self.sample_count as f64
        } else {
            0.0
        };
        self.sample_count += 1;
        if self.sample_count > MAX_SAMPLE_COUNT {
            self.sample_count = MAX_SAMPLE_COUNT;
        }

        let old_avg = self.avg_rtt_ms;
        let old_var = self.var_rtt;
        self.avg_rtt_ms = filt_factor * self.avg_rtt_ms + (1.0 - filt_factor) * rtt_ms as f64;
        let diff_sq = (rtt_ms as f64 - self.avg_rtt_ms).powi(2);
        self.var_rtt = filt_factor * self.var_rtt + (1.0 - filt_factor) * diff_sq;
        self.max_rtt_ms = self.max_rtt_ms.max(rtt_ms);

        if !self.jump_detection(rtt_ms) || !self.drift_detection(rtt_ms) {
            self.avg_rtt_ms = old_avg;
            self.var_rtt = old_var;
        }
    }

    fn jump_detection(&mut self, rtt_ms: i64) -> bool {
        let diff_from_avg = self.avg_rtt_ms - rtt_ms as f64;
        if diff_from_avg.abs() > JUMP_STANDARD_DEVIATION * self.var_rtt.sqrt() {
            let diff_sign: i8 = if diff_from_avg >= 0.0 { 1 } else { -1 };
            let jump_count_sign: i8 = if self.jump_count >= 0 { 1 } else { -1 };
            if diff_sign != jump_count_sign {
                self.jump_count = 0;
            }
            if (self.jump_count.unsigned_abs() as usize) < DETECT_THRESHOLD {
                self.jump_buffer[self.jump_count.unsigned_abs() as usize] = rtt_ms;
                self.jump_count += diff_sign;
            }
            if self.jump_count.unsigned_abs() as usize >= DETECT_THRESHOLD {
                let count = self.jump_count.unsigned_abs() as usize;
                self.update_rtts_from_jump_buffer(count);
                self.sample_count = DETECT_THRESHOLD as u8 + 1;
                self.jump_count = 0;
            } else {
                return false;
            }
        } else {
            self.jump_count = 0;
        }
        true
    }

    fn drift_detection(&mut self, rtt_ms: i64) -> bool {
        if self.max_rtt_ms as f64 - self.avg_rtt_ms > DRIFT_STANDARD_DEVIATION * self.var_rtt.sqrt() {
            if (self.drift_count as usize) < DETECT_THRESHOLD {
                self.drift_buffer[self.drift_count as usize] = rtt_ms;
                self.drift_count += 1;
            }
            if self.drift_count as usize >= DETECT_THRESHOLD {
                let count = self.drift_count as usize;
                self.update_rtts_from_drift_buffer(count);
                self.sample_count = DETECT_THRESHOLD as u8 + 1;
                self.drift_count = 0;
            }
        } else {
            self.drift_count = 0;
        }
        true
    }

    fn update_rtts_from_jump_buffer(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let mut max = 0i64;
        let mut sum = 0i64;
        for &v in &self.jump_buffer[..count] {
            max = max.max(v);
            sum += v;
        }
        self.max_rtt_ms = max;
        self.avg_rtt_ms = sum as f64 / count as f64;
    }

    fn update_rtts_from_drift_buffer(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let mut max = 0i64;
        let mut sum = 0i64;
        for &v in &self.drift_buffer[..count] {
            max = max.max(v);
            sum += v;
        }
        self.max_rtt_ms = max;
        self.avg_rtt_ms = sum as f64 / count as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_zero_sample_is_ignored() {
        let mut f = RttFilter::new();
        f.add_rtt(TimeDelta::zero());
        assert_eq!(f.rtt(), TimeDelta::zero());
    }

    #[test]
    fn converges_toward_steady_rtt() {
        let mut f = RttFilter::new();
        for _ in 0..20 {
            f.add_rtt(TimeDelta::from_millis(50));
        }
        assert!((f.rtt().ms() - 50).abs() <= 1);
    }

    #[test]
    fn caps_at_max_rtt() {
        let mut f = RttFilter::new();
        for _ in 0..10 {
            f.add_rtt(TimeDelta::from_millis(50));
        }
        f.add_rtt(TimeDelta::from_millis(10_000));
        assert!(f.rtt().ms() <= MAX_RTT_MS);
    }
}
