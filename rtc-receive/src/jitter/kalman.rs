//! Kalman jitter estimator (§4.9): tracks channel rate `1/C` and queueing
//! delay mean `m` from successive frame inter-arrival deltas, rejecting
//! extreme outliers while still feeding them into the random-jitter
//! variance. Grounded on
//! `rtp_rtcp/rtp/receiver/video/jitter/jitter_estimator.cpp`.

use shared::time::TimeDelta;

use crate::jitter::rtt_filter::RttFilter;

const STARTUP_DELAY_SAMPLES: u32 = 30;
const FS_ACCU_STARTUP_SAMPLES: i64 = 5;
const MAX_ESTIMATED_FRAME_RATE: f64 = 200.0;
const NACK_COUNT_TIMEOUT_MS: i64 = 60_000;
const JUMP_STD_DEV_FOR_DETECTING_KEYFRAME: f64 = 2.0;
const OPERATING_SYSTEM_JITTER_MS: f64 = 0.0;

/// Windowed mean of frame-arrival deltas, used to estimate FPS. The
/// `frame_delta_us_accumulator_` is a fixed-window rational accumulator; a
/// simple bounded moving sum is equivalent for the window sizes used here.
struct DeltaAccumulator {
    window: usize,
    samples: std::collections::VecDeque<i64>,
}

impl DeltaAccumulator {
    fn new(window: usize) -> Self {
        Self { window, samples: std::collections::VecDeque::new() }
    }

    fn reset(&mut self) {
        self.samples.clear();
    }

    fn add_sample(&mut self, delta_us: i64) {
        self.samples.push_back(delta_us);
        if self.samples.len() > self.window {
            self.samples.pop_front();
        }
    }

    fn compute_mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<i64>() as f64 / self.samples.len() as f64
    }
}

pub struct JitterEstimatorConfig {
    pub phi: f64,
    pub psi: f64,
    pub sample_count_max: u32,
    pub theta_lower_bound: f64,
    pub nack_limit: u32,
    pub num_std_dev_delay_outlier: f64,
    pub num_std_dev_frame_size_outlier: f64,
    pub noise_std_devs: f64,
    pub noise_std_dev_offset: f64,
    pub time_deviation_upper_bound: f64,
}

impl Default for JitterEstimatorConfig {
    fn default() -> Self {
        Self {
            phi: 0.97,
            psi: 0.9999,
            sample_count_max: 400,
            theta_lower_bound: 1e-6,
            nack_limit: 3,
            num_std_dev_delay_outlier: 15.0,
            num_std_dev_frame_size_outlier: 3.0,
            noise_std_devs: 2.33,
            noise_std_dev_offset: 30.0,
            time_deviation_upper_bound: 3.5,
        }
    }
}

pub struct JitterEstimator {
    config: JitterEstimatorConfig,
    theta: [f64; 2],
    theta_cov: [[f64; 2]; 2],
    q_cov: [[f64; 2]; 2],
    var_noise: f64,
    avg_frame_size: f64,
    max_frame_size: f64,
    var_frame_size: f64,
    prev_frame_size: u32,
    avg_noise: f64,
    sample_count: u32,
    filtered_sum_of_jitter_estimates_ms: f64,
    prev_estimate_ms: f64,
    nack_count: u32,
    latest_nack_time_us: i64,
    frame_size_sum: u64,
    frame_count: i64,
    startup_count: u32,
    frame_delta_accumulator: DeltaAccumulator,
    last_update_time_us: Option<i64>,
    rtt_filter: RttFilter,
}

impl Default for JitterEstimator {
    fn default() -> Self {
        Self::new(JitterEstimatorConfig::default())
    }
}

impl JitterEstimator {
    pub fn new(config: JitterEstimatorConfig) -> Self {
        Self {
            config,
            theta: [1.0 / (512e3 / 8.0), 0.0],
            theta_cov: [[1e-4, 0.0], [0.0, 1e2]],
            q_cov: [[2.5e-10, 0.0], [0.0, 1e-10]],
            var_noise: 4.0,
            avg_frame_size: 500.0,
            max_frame_size: 500.0,
            var_frame_size: 100.0,
            prev_frame_size: 0,
            avg_noise: 0.0,
            sample_count: 1,
            filtered_sum_of_jitter_estimates_ms: 0.0,
            prev_estimate_ms: -1.0,
            nack_count: 0,
            latest_nack_time_us: 0,
            frame_size_sum: 0,
            frame_count: 0,
            startup_count: 0,
            frame_delta_accumulator: DeltaAccumulator::new(30),
            last_update_time_us: None,
            rtt_filter: RttFilter::new(),
        }
    }

    pub fn reset(&mut self) {
        let config = std::mem::replace(&mut self.config, JitterEstimatorConfig::default());
        *self = Self::new(config);
    }

    pub fn update_rtt(&mut self, rtt: TimeDelta) {
        self.rtt_filter.add_rtt(rtt);
    }

    pub fn on_nack(&mut self, now_us: i64) {
        self.latest_nack_time_us = now_us;
        self.nack_count += 1;
    }

    /// Feeds one frame's delay-from-expected (`frame_delay_ms`, already
    /// relative to the channel's nominal transmission time) and size.
    /// `incomplete_frame` marks a frame assembled from a partial/recovered
    /// set of packets (§4.7), which is weighted more cautiously.
    pub fn update_estimate(&mut self, frame_delay_ms: i64, frame_size: u32, incomplete_frame: bool, now_us: i64) {
        if frame_size == 0 {
            return;
        }
        let frame_size_delta = frame_size as i64 - self.prev_frame_size as i64;

        if self.frame_count < FS_ACCU_STARTUP_SAMPLES {
            self.frame_size_sum += frame_size as u64;
            self.frame_count += 1;
        } else if self.frame_count == FS_ACCU_STARTUP_SAMPLES {
            self.avg_frame_size = self.frame_size_sum as f64 / self.frame_count as f64;
            self.frame_count += 1;
        }

        if !incomplete_frame || frame_size as f64 > self.avg_frame_size {
            let new_avg_frame_size =
                self.config.phi * self.avg_frame_size + (1.0 - self.config.phi) * frame_size as f64;
            if (frame_size as f64)
                < self.avg_frame_size + JUMP_STD_DEV_FOR_DETECTING_KEYFRAME * self.var_frame_size.sqrt()
            {
                self.avg_frame_size = new_avg_frame_size;
            }
            self.var_frame_size = self.config.phi * self.var_frame_size
                + (1.0 - self.config.phi) * (frame_size as f64 - new_avg_frame_size).powi(2);
            self.var_frame_size = self.var_frame_size.min(1.0);
        }

        self.max_frame_size = (self.config.psi * self.max_frame_size).max(frame_size as f64);

        if self.prev_frame_size == 0 {
            self.prev_frame_size = frame_size;
            return;
        }
        self.prev_frame_size = frame_size;

        let std_dev_noise = self.var_noise.sqrt();
        let max_time_deviation_ms = (self.config.time_deviation_upper_bound * std_dev_noise + 0.5) as i64;
        let frame_delay_ms = frame_delay_ms.clamp(-max_time_deviation_ms, max_time_deviation_ms);

        let estimated_delay_deviation = self.deviation_from_expected_delay(frame_delay_ms, frame_size_delta);

        if estimated_delay_deviation.abs() < self.config.num_std_dev_delay_outlier * std_dev_noise
            || frame_size as f64
                > self.avg_frame_size + self.config.num_std_dev_frame_size_outlier * self.var_frame_size.sqrt()
        {
            self.estimate_random_jitter(estimated_delay_deviation, incomplete_frame, now_us);
            if (!incomplete_frame || estimated_delay_deviation >= 0.0)
                && frame_size_delta as f64 > -0.25 * self.max_frame_size
            {
                self.kalman_estimate_channel(frame_delay_ms, frame_size_delta);
            }
        } else {
            let num_std_dev = if estimated_delay_deviation > 0.0 {
                self.config.num_std_dev_delay_outlier
            } else {
                -self.config.num_std_dev_delay_outlier
            };
            self.estimate_random_jitter(num_std_dev * std_dev_noise, incomplete_frame, now_us);
        }

        if self.startup_count >= STARTUP_DELAY_SAMPLES {
            self.filtered_sum_of_jitter_estimates_ms = self.calc_jitter_estimate();
            self.prev_estimate_ms = self.filtered_sum_of_jitter_estimates_ms;
        } else {
            self.startup_count += 1;
        }
    }

    /// §4.9's top-level jitter query: base estimate plus an RTT-driven
    /// addend once enough NACKs have fired, with the fps-dependent scaling
    /// for reduced-delay mode.
    pub fn get_jitter_estimate(
        &mut self,
        rtt_multiplier: f64,
        rtt_mult_add_cap_ms: Option<f64>,
        enable_reduced_delay: bool,
        now_us: i64,
    ) -> i64 {
        let mut jitter_ms = self.calc_jitter_estimate() + OPERATING_SYSTEM_JITTER_MS;
        self.prev_estimate_ms = jitter_ms;

        if now_us - self.latest_nack_time_us > NACK_COUNT_TIMEOUT_MS * 1000 {
            self.nack_count = 0;
        }

        if self.filtered_sum_of_jitter_estimates_ms > jitter_ms {
            jitter_ms = self.filtered_sum_of_jitter_estimates_ms;
        }

        if self.nack_count >= self.config.nack_limit {
            let rtt_addend = self.rtt_filter.rtt().ms() as f64 * rtt_multiplier;
            jitter_ms += match rtt_mult_add_cap_ms {
                Some(cap) => rtt_addend.min(cap),
                None => rtt_addend,
            };
        }

        if enable_reduced_delay {
            const JITTER_SCALE_LOW_THRESHOLD: f64 = 5.0;
            const JITTER_SCALE_HIGH_THRESHOLD: f64 = 10.0;
            let estimated_fps = self.estimated_frame_rate();
            if estimated_fps < JITTER_SCALE_LOW_THRESHOLD {
                if estimated_fps == 0.0 {
                    return (jitter_ms.max(0.0) + 0.5) as i64;
                }
                return 0;
            }
            if estimated_fps < JITTER_SCALE_HIGH_THRESHOLD {
                jitter_ms = (1.0 / (JITTER_SCALE_HIGH_THRESHOLD - JITTER_SCALE_LOW_THRESHOLD))
                    * (estimated_fps - JITTER_SCALE_LOW_THRESHOLD)
                    * jitter_ms;
            }
        }

        (jitter_ms.max(0.0) + 0.5) as i64
    }

    fn deviation_from_expected_delay(&self, frame_delay_ms: i64, frame_size_delta: i64) -> f64 {
        let estimated_delay_ms = self.theta[0] * frame_size_delta as f64 + self.theta[1];
        frame_delay_ms as f64 - estimated_delay_ms
    }

    fn estimate_random_jitter(&mut self, d_dt: f64, incomplete_frame: bool, now_us: i64) {
        if let Some(last) = self.last_update_time_us {
            self.frame_delta_accumulator.add_sample(now_us - last);
        }
        self.last_update_time_us = Some(now_us);

        if self.sample_count == 0 {
            return;
        }

        let mut filt_factor = (self.sample_count - 1) as f64 / self.sample_count as f64;
        self.sample_count += 1;
        if self.sample_count > self.config.sample_count_max {
            self.sample_count = self.config.sample_count_max;
        }

        let estimated_fps = self.estimated_frame_rate();
        if estimated_fps > 0.0 {
            let mut rate_scale = 30.0 / estimated_fps;
            if self.sample_count < STARTUP_DELAY_SAMPLES {
                rate_scale = (self.sample_count as f64 * rate_scale
                    + (STARTUP_DELAY_SAMPLES - self.sample_count) as f64)
                    / STARTUP_DELAY_SAMPLES as f64;
            }
            filt_factor = filt_factor.powf(rate_scale);
        }

        let new_avg_noise = filt_factor * self.avg_noise + (1.0 - filt_factor) * d_dt;
        let new_var_noise =
            filt_factor * self.var_noise + (1.0 - filt_factor) * (d_dt - self.avg_noise).powi(2);
        if !incomplete_frame || new_var_noise > self.var_noise {
            self.avg_noise = new_avg_noise;
            self.var_noise = new_var_noise;
        }
        self.var_noise = self.var_noise.max(1.0);
    }

    fn estimated_frame_rate(&self) -> f64 {
        let mean = self.frame_delta_accumulator.compute_mean();
        if mean == 0.0 {
            return 0.0;
        }
        (1_000_000.0 / mean).min(MAX_ESTIMATED_FRAME_RATE)
    }

    fn kalman_estimate_channel(&mut self, frame_delay_ms: i64, frame_size_delta: i64) {
        self.theta_cov[0][0] += self.q_cov[0][0];
        self.theta_cov[0][1] += self.q_cov[0][1];
        self.theta_cov[1][0] += self.q_cov[1][0];
        self.theta_cov[1][1] += self.q_cov[1][1];

        let delta = frame_size_delta as f64;
        let mh = [
            self.theta_cov[0][0] * delta + self.theta_cov[0][1],
            self.theta_cov[1][0] * delta + self.theta_cov[1][1],
        ];

        if self.max_frame_size < 1.0 {
            return;
        }

        let sigma = ((300.0 * (-delta.abs() / self.max_frame_size).exp() + 1.0) * self.var_noise.sqrt())
            .max(1.0);

        let hmh_sigma = delta * mh[0] + mh[1] + sigma;
        if hmh_sigma.abs() < 1e-9 {
            log::warn!("invalid Kalman innovation covariance, skipping update");
            return;
        }

        let kalman_gain = [mh[0] / hmh_sigma, mh[1] / hmh_sigma];

        let measure_res = frame_delay_ms as f64 - (delta * self.theta[0] + self.theta[1]);
        self.theta[0] += kalman_gain[0] * measure_res;
        self.theta[1] += kalman_gain[1] * measure_res;
        self.theta[0] = self.theta[0].max(self.config.theta_lower_bound);

        let theta_cov_00 = self.theta_cov[0][0];
        let theta_cov_01 = self.theta_cov[0][1];
        self.theta_cov[0][0] = (1.0 - kalman_gain[0] * delta) * theta_cov_00 - kalman_gain[0] * self.theta_cov[1][0];
        self.theta_cov[0][1] = (1.0 - kalman_gain[0] * delta) * theta_cov_01 - kalman_gain[0] * self.theta_cov[1][1];
        self.theta_cov[1][0] = self.theta_cov[1][0] * (1.0 - kalman_gain[1]) - kalman_gain[1] * delta * theta_cov_00;
        self.theta_cov[1][1] = self.theta_cov[1][1] * (1.0 - kalman_gain[1]) - kalman_gain[1] * delta * theta_cov_01;
    }

    fn calc_noise_threshold(&self) -> f64 {
        (self.config.noise_std_devs * self.var_noise.sqrt() - self.config.noise_std_dev_offset).max(1.0)
    }

    fn calc_jitter_estimate(&self) -> f64 {
        let mut estimate = self.theta[0] * (self.max_frame_size - self.avg_frame_size) + self.calc_noise_threshold();
        if estimate < 1.0 {
            estimate = if self.prev_estimate_ms <= 0.01 { 1.0 } else { self.prev_estimate_ms };
        }
        estimate
    }
}
