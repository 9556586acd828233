//! Monotonic time and data-rate value types.
//!
//! [`Timestamp`], [`TimeDelta`] and [`DataRate`] are the strongly-typed
//! scalars threaded through the congestion controller and the jitter buffer
//! so that a microsecond value can never be silently compared against a
//! bits-per-second one. All three support the `PlusInfinity`/`MinusInfinity`
//! sentinels used throughout the bandwidth estimator (an "unbounded" max
//! bitrate, a "not yet known" RTT) and saturate rather than overflow.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const PLUS_INFINITY: i64 = i64::MAX;
const MINUS_INFINITY: i64 = i64::MIN;

macro_rules! impl_unit_base {
    ($name:ident) => {
        impl $name {
            pub const fn zero() -> Self {
                Self(0)
            }

            pub const fn plus_infinity() -> Self {
                Self(PLUS_INFINITY)
            }

            pub const fn minus_infinity() -> Self {
                Self(MINUS_INFINITY)
            }

            pub fn is_finite(&self) -> bool {
                self.0 != PLUS_INFINITY && self.0 != MINUS_INFINITY
            }

            pub fn is_infinite(&self) -> bool {
                !self.is_finite()
            }

            pub fn is_plus_infinity(&self) -> bool {
                self.0 == PLUS_INFINITY
            }

            pub fn is_minus_infinity(&self) -> bool {
                self.0 == MINUS_INFINITY
            }

            pub fn is_zero(&self) -> bool {
                self.0 == 0
            }

            /// Saturating add of the two underlying raw values.
            fn saturating_add_raw(a: i64, b: i64) -> i64 {
                if a == PLUS_INFINITY || b == PLUS_INFINITY {
                    return PLUS_INFINITY;
                }
                if a == MINUS_INFINITY || b == MINUS_INFINITY {
                    return MINUS_INFINITY;
                }
                a.saturating_add(b)
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.0.cmp(&other.0))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.0.cmp(&other.0)
            }
        }
    };
}

/// A point in time relative to an unspecified, monotonic epoch. Microsecond
/// precision, saturating arithmetic, `PlusInfinity`/`MinusInfinity` sentinels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Timestamp(i64);

impl_unit_base!(Timestamp);

impl Timestamp {
    pub const fn from_micros(us: i64) -> Self {
        Self(us)
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(1000))
    }

    pub fn us(&self) -> i64 {
        self.0
    }

    pub fn ms(&self) -> i64 {
        if !self.is_finite() {
            return self.0;
        }
        self.0.div_euclid(1000)
    }
}

impl Sub for Timestamp {
    type Output = TimeDelta;
    fn sub(self, rhs: Timestamp) -> TimeDelta {
        if self.0 == PLUS_INFINITY || rhs.0 == MINUS_INFINITY {
            return TimeDelta::plus_infinity();
        }
        if self.0 == MINUS_INFINITY || rhs.0 == PLUS_INFINITY {
            return TimeDelta::minus_infinity();
        }
        TimeDelta(self.0.saturating_sub(rhs.0))
    }
}

impl Add<TimeDelta> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: TimeDelta) -> Timestamp {
        Timestamp(Self::saturating_add_raw(self.0, rhs.0))
    }
}

impl Sub<TimeDelta> for Timestamp {
    type Output = Timestamp;
    fn sub(self, rhs: TimeDelta) -> Timestamp {
        self + (-rhs)
    }
}

impl AddAssign<TimeDelta> for Timestamp {
    fn add_assign(&mut self, rhs: TimeDelta) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_plus_infinity() {
            write!(f, "+inf")
        } else if self.is_minus_infinity() {
            write!(f, "-inf")
        } else {
            write!(f, "{}us", self.0)
        }
    }
}

/// A signed duration. Microsecond precision, saturating arithmetic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TimeDelta(i64);

impl_unit_base!(TimeDelta);

impl TimeDelta {
    pub const fn from_micros(us: i64) -> Self {
        Self(us)
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms.saturating_mul(1000))
    }

    pub fn from_seconds(s: i64) -> Self {
        Self(s.saturating_mul(1_000_000))
    }

    pub fn us(&self) -> i64 {
        self.0
    }

    pub fn ms(&self) -> i64 {
        if !self.is_finite() {
            return self.0;
        }
        // Round to nearest, matching the original implementation's rounding.
        if self.0 >= 0 {
            (self.0 + 500) / 1000
        } else {
            (self.0 - 500) / 1000
        }
    }

    pub fn seconds_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl Add for TimeDelta {
    type Output = TimeDelta;
    fn add(self, rhs: TimeDelta) -> TimeDelta {
        TimeDelta(Self::saturating_add_raw(self.0, rhs.0))
    }
}

impl Sub for TimeDelta {
    type Output = TimeDelta;
    fn sub(self, rhs: TimeDelta) -> TimeDelta {
        self + (-rhs)
    }
}

impl Neg for TimeDelta {
    type Output = TimeDelta;
    fn neg(self) -> TimeDelta {
        if self.0 == PLUS_INFINITY {
            return TimeDelta::minus_infinity();
        }
        if self.0 == MINUS_INFINITY {
            return TimeDelta::plus_infinity();
        }
        TimeDelta(-self.0)
    }
}

impl Mul<f64> for TimeDelta {
    type Output = TimeDelta;
    fn mul(self, rhs: f64) -> TimeDelta {
        if !self.is_finite() {
            return self;
        }
        TimeDelta((self.0 as f64 * rhs).round() as i64)
    }
}

impl Div<i64> for TimeDelta {
    type Output = TimeDelta;
    fn div(self, rhs: i64) -> TimeDelta {
        if !self.is_finite() || rhs == 0 {
            return self;
        }
        TimeDelta(self.0 / rhs)
    }
}

impl fmt::Display for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_plus_infinity() {
            write!(f, "+inf")
        } else if self.is_minus_infinity() {
            write!(f, "-inf")
        } else {
            write!(f, "{}us", self.0)
        }
    }
}

/// A data rate in bits per second. Saturating arithmetic.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DataRate(i64);

impl_unit_base!(DataRate);

impl DataRate {
    pub const fn bits_per_sec(bps: i64) -> Self {
        Self(bps)
    }

    pub fn kilobits_per_sec(kbps: i64) -> Self {
        Self(kbps.saturating_mul(1000))
    }

    pub fn bytes_per_sec(bytes_per_sec: i64) -> Self {
        Self(bytes_per_sec.saturating_mul(8))
    }

    pub fn bps(&self) -> i64 {
        self.0
    }

    pub fn bps_f64(&self) -> f64 {
        self.0 as f64
    }

    pub fn kbps_f64(&self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

impl Add for DataRate {
    type Output = DataRate;
    fn add(self, rhs: DataRate) -> DataRate {
        DataRate(Self::saturating_add_raw(self.0, rhs.0))
    }
}

impl Sub for DataRate {
    type Output = DataRate;
    fn sub(self, rhs: DataRate) -> DataRate {
        if rhs.0 == PLUS_INFINITY {
            return DataRate::minus_infinity();
        }
        DataRate::bits_per_sec(Self::saturating_add_raw(self.0, -rhs.0))
    }
}

impl Mul<f64> for DataRate {
    type Output = DataRate;
    fn mul(self, rhs: f64) -> DataRate {
        if !self.is_finite() {
            return self;
        }
        DataRate((self.0 as f64 * rhs).round() as i64)
    }
}

impl Div<f64> for DataRate {
    type Output = DataRate;
    fn div(self, rhs: f64) -> DataRate {
        if !self.is_finite() || rhs == 0.0 {
            return self;
        }
        DataRate((self.0 as f64 / rhs).round() as i64)
    }
}

/// TimeDelta over which a DataRate was measured, producing data volume in
/// bits: `rate * delta`.
impl Mul<TimeDelta> for DataRate {
    type Output = f64;
    fn mul(self, rhs: TimeDelta) -> f64 {
        self.bps_f64() * rhs.seconds_f64()
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_plus_infinity() {
            write!(f, "+inf")
        } else if self.is_minus_infinity() {
            write!(f, "-inf")
        } else {
            write!(f, "{}bps", self.0)
        }
    }
}

/// A 64-bit Q32.32 fixed-point NTP timestamp (RFC 5905): seconds since
/// 1900-01-01 UTC in the high 32 bits, fractional seconds in the low 32.
/// Per RFC 1305 §3.1, `value == 0` is explicitly invalid.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct NtpTime(u64);

const NTP_FRACTIONS_PER_SECOND: u64 = 0x1_0000_0000;

impl NtpTime {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn from_parts(seconds: u32, fractions: u32) -> Self {
        Self((seconds as u64) * NTP_FRACTIONS_PER_SECOND + fractions as u64)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// RFC 1305 §3.1: a value of zero is never a valid NTP time.
    pub fn valid(&self) -> bool {
        self.0 != 0
    }

    pub fn seconds(&self) -> u32 {
        (self.0 / NTP_FRACTIONS_PER_SECOND) as u32
    }

    pub fn fractions(&self) -> u32 {
        (self.0 % NTP_FRACTIONS_PER_SECOND) as u32
    }

    /// The middle 32 bits of the 64-bit value: low 16 bits of the seconds
    /// field concatenated with the high 16 bits of the fraction field. Used
    /// verbatim in SR/RR `last_sr` and `delay_since_last_sr` report fields.
    pub fn to_compact_ntp(&self) -> u32 {
        (self.0 >> 16) as u32
    }

    pub fn to_ms(&self) -> i64 {
        const NTP_FRAC_PER_MS: f64 = 4.294967296e6; // 2^32 / 1000
        let frac_ms = self.fractions() as f64 / NTP_FRAC_PER_MS;
        self.seconds() as i64 * 1000 + (frac_ms + 0.5) as i64
    }
}

/// Converts a difference between two [`NtpTime::to_compact_ntp`] values
/// (1/65536-second units) into milliseconds, per the SR/RR round-trip-time
/// formula: `now_compact_ntp - last_sr_compact_ntp - delay_since_last_sr`.
///
/// A non-monotonic NTP clock can make the subtraction wrap instead of going
/// negative; intervals above `0x8000_0000` are treated as that case and
/// floored to 1ms rather than read as a multi-hour RTT. An exact-zero result
/// is also floored to 1ms as too good to be true.
pub fn compact_ntp_rtt_ms(compact_ntp_interval: u32) -> i64 {
    if compact_ntp_interval > 0x8000_0000 {
        return 1;
    }
    let value = compact_ntp_interval as i64;
    let ms = (value * 1000 + (1 << 15)) / (1 << 16);
    ms.max(1)
}

/// Converts milliseconds to Q32.32 fixed-point seconds, saturating on
/// overflow/underflow rather than wrapping.
pub fn int64_ms_to_q32x32(milliseconds: i64) -> i64 {
    let result = (milliseconds as f64 * (NTP_FRACTIONS_PER_SECOND as f64 / 1000.0)).round();
    if result <= i64::MIN as f64 {
        i64::MIN
    } else if result >= i64::MAX as f64 {
        i64::MAX
    } else {
        result as i64
    }
}

/// The inverse of [`int64_ms_to_q32x32`].
pub fn q32x32_to_int64_ms(q32x32: i64) -> i64 {
    (q32x32 as f64 * (1000.0 / NTP_FRACTIONS_PER_SECOND as f64)).round() as i64
}

/// Caches the one-time offset between the system UTC clock and a monotonic
/// [`Instant`], so NTP conversions never need to re-sample `SystemTime`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SystemInstant {
    instant: Instant,
    duration_since_unix_epoch: Duration,
}

impl SystemInstant {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            duration_since_unix_epoch: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_secs(0)),
        }
    }

    pub fn duration_since_unix_epoch(&self, now: Instant) -> Duration {
        now.duration_since(self.instant)
            .add(self.duration_since_unix_epoch)
    }

    /// Offset in seconds between the Unix epoch (1970) and the NTP epoch
    /// (1900). The NTP era wraps again in 2036 (not handled: out of scope).
    const NTP_EPOCH_OFFSET_SECS: u64 = 0x83AA_7E80;

    pub fn ntp(&self, now: Instant) -> NtpTime {
        let unix = self.duration_since_unix_epoch(now);
        let seconds = unix.as_secs() + Self::NTP_EPOCH_OFFSET_SECS;
        let fractions =
            ((unix.subsec_nanos() as u64) << 32) / 1_000_000_000;
        NtpTime::from_parts(seconds as u32, fractions as u32)
    }

    pub fn instant(&self, ntp: NtpTime) -> Instant {
        let seconds = ntp.seconds() as u64 - Self::NTP_EPOCH_OFFSET_SECS;
        let nanos = ((ntp.fractions() as u64) * 1_000_000_000) >> 32;
        let unix = Duration::new(seconds, nanos as u32);
        self.instant + unix - self.duration_since_unix_epoch
    }
}

/// Read-only, shared time source. Implementations must guarantee
/// monotonicity; components receive a handle at construction rather than
/// reaching for a process-global clock.
pub trait Clock: Send + Sync {
    /// A timestamp relative to an unspecified, monotonic epoch.
    fn current_time(&self) -> Timestamp;

    /// Converts a timestamp returned by this clock into absolute NTP time.
    fn convert_timestamp_to_ntp_time(&self, timestamp: Timestamp) -> NtpTime;

    fn current_ntp_time(&self) -> NtpTime {
        self.convert_timestamp_to_ntp_time(self.current_time())
    }
}

/// Wall-clock implementation backed by [`Instant`]/[`SystemTime`].
pub struct RealTimeClock {
    origin: SystemInstant,
    start: Instant,
}

impl Default for RealTimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RealTimeClock {
    pub fn new() -> Self {
        Self {
            origin: SystemInstant::now(),
            start: Instant::now(),
        }
    }
}

impl Clock for RealTimeClock {
    fn current_time(&self) -> Timestamp {
        Timestamp::from_micros(Instant::now().duration_since(self.start).as_micros() as i64)
    }

    fn convert_timestamp_to_ntp_time(&self, timestamp: Timestamp) -> NtpTime {
        let instant = self.start + Duration::from_micros(timestamp.us().max(0) as u64);
        self.origin.ntp(instant)
    }
}

/// Drop-in deterministic clock for tests: time only advances when told to.
pub struct SimulatedClock {
    time_us: std::sync::atomic::AtomicI64,
}

impl SimulatedClock {
    pub fn new(initial_time: Timestamp) -> Self {
        Self {
            time_us: std::sync::atomic::AtomicI64::new(initial_time.us()),
        }
    }

    pub fn advance_time(&self, delta: TimeDelta) {
        self.time_us
            .fetch_add(delta.us(), std::sync::atomic::Ordering::Relaxed);
    }
}

impl Clock for SimulatedClock {
    fn current_time(&self) -> Timestamp {
        Timestamp::from_micros(self.time_us.load(std::sync::atomic::Ordering::Relaxed))
    }

    fn convert_timestamp_to_ntp_time(&self, timestamp: Timestamp) -> NtpTime {
        // 1900-01-01 epoch offset applied directly; tests don't need wall time.
        let us = timestamp.us().max(0) as u64;
        let seconds = us / 1_000_000 + SystemInstant::NTP_EPOCH_OFFSET_SECS;
        let fractions = ((us % 1_000_000) << 32) / 1_000_000;
        NtpTime::from_parts(seconds as u32, fractions as u32)
    }
}
