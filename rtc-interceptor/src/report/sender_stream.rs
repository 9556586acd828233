use log::warn;
use shared::time::{compact_ntp_rtt_ms, SystemInstant};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Window over which [`SenderStream::send_bitrate_kbps`] estimates outgoing
/// bitrate, the `Instant`-based counterpart of `RtpPacketEgresser`'s rolling
/// bitrate window.
const BITRATE_WINDOW: Duration = Duration::from_secs(1);

pub(crate) struct SenderStream {
    ssrc: u32,
    clock_rate: f64,
    is_video: bool,

    /// data from rtp packets
    last_rtp_time_rtp: u32,
    last_rtp_time_time: Instant,
    counters: Counters,
    rtt: RttStats,
    bitrate: BitrateWindow,
}

impl SenderStream {
    pub(crate) fn new(ssrc: u32, clock_rate: u32, is_video: bool) -> Self {
        SenderStream {
            ssrc,
            clock_rate: clock_rate as f64,
            is_video,
            last_rtp_time_rtp: 0,
            last_rtp_time_time: Instant::now(),
            counters: Default::default(),
            rtt: Default::default(),
            bitrate: BitrateWindow::new(BITRATE_WINDOW),
        }
    }

    pub(crate) fn is_video(&self) -> bool {
        self.is_video
    }

    /// Estimated outgoing bitrate over the trailing [`BITRATE_WINDOW`].
    pub(crate) fn send_bitrate_kbps(&self) -> f64 {
        self.bitrate.bitrate_bps() / 1000.0
    }

    /// Derives round-trip time from a Receiver Report block echoing one of
    /// our Sender Reports (RFC 3550 §6.4.1): `last_sender_report`/`delay`
    /// are the block's LSR/DLSR fields, `now` the compact NTP time at
    /// reception. A block with `last_sender_report == 0` means the peer
    /// hasn't seen one of our SRs yet and is skipped.
    pub(crate) fn process_receiver_report(&mut self, block: &rtcp::reception_report::ReceptionReport) {
        if block.last_sender_report == 0 {
            return;
        }
        let now_compact_ntp = SystemInstant::now().ntp(Instant::now()).to_compact_ntp();
        let rtt_compact = now_compact_ntp
            .wrapping_sub(block.last_sender_report)
            .wrapping_sub(block.delay);
        self.rtt.add_rtt_ms(compact_ntp_rtt_ms(rtt_compact));
    }

    pub(crate) fn rtt(&self) -> RttStats {
        self.rtt
    }

    pub(crate) fn process_rtp(&mut self, now: Instant, pkt: &rtp::packet::Packet) {
        // always update time to minimize errors
        self.last_rtp_time_rtp = pkt.header.timestamp;
        self.last_rtp_time_time = now;

        self.counters.increment_packets();
        self.counters.count_octets(pkt.payload.len());
        self.bitrate.add(now, pkt.payload.len());
    }

    pub(crate) fn generate_report(&mut self, now: Instant) -> rtcp::sender_report::SenderReport {
        rtcp::sender_report::SenderReport {
            ssrc: self.ssrc,
            ntp_time: SystemInstant::now().ntp(now).value(),
            rtp_time: self.last_rtp_time_rtp.wrapping_add(
                (now.duration_since(self.last_rtp_time_time).as_secs_f64() * self.clock_rate)
                    as u32,
            ),
            packet_count: self.counters.packet_count(),
            octet_count: self.counters.octet_count(),
            ..Default::default()
        }
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    packets: u32,
    octets: u32,
}

/// Wrapping counters used for generating [`rtcp::sender_report::SenderReport`]
impl Counters {
    pub(crate) fn increment_packets(&mut self) {
        self.packets = self.packets.wrapping_add(1);
    }

    pub(crate) fn count_octets(&mut self, octets: usize) {
        // account for a payload size of at most `u32::MAX`
        // and log a message if larger
        self.octets = self
            .octets
            .wrapping_add(octets.try_into().unwrap_or_else(|_| {
                warn!("packet payload larger than 32 bits");
                u32::MAX
            }));
    }

    pub(crate) fn packet_count(&self) -> u32 {
        self.packets
    }

    pub(crate) fn octet_count(&self) -> u32 {
        self.octets
    }

    #[cfg(test)]
    pub(crate) fn mock(packets: u32, octets: u32) -> Self {
        Self { packets, octets }
    }
}

/// Rolling window of (time, bytes) samples used to estimate outgoing
/// bitrate for the bitrate-scaled sender report interval (RFC 3550 §6.2).
struct BitrateWindow {
    window: Duration,
    samples: VecDeque<(Instant, usize)>,
    accumulated: usize,
}

impl BitrateWindow {
    fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            accumulated: 0,
        }
    }

    fn add(&mut self, now: Instant, bytes: usize) {
        self.samples.push_back((now, bytes));
        self.accumulated += bytes;
        while let Some(&(t, b)) = self.samples.front() {
            if now.duration_since(t) > self.window {
                self.accumulated -= b;
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn bitrate_bps(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        (self.accumulated as f64 * 8.0) / self.window.as_secs_f64()
    }
}

/// Round-trip-time samples derived from Receiver Report LSR/DLSR echoes,
/// one set per remote sender SSRC (`report_block_data.hpp`'s `RttStats`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RttStats {
    last_ms: i64,
    min_ms: i64,
    max_ms: i64,
    sum_ms: i64,
    count: u64,
}

impl RttStats {
    fn add_rtt_ms(&mut self, rtt_ms: i64) {
        if self.count == 0 || rtt_ms < self.min_ms {
            self.min_ms = rtt_ms;
        }
        if rtt_ms > self.max_ms {
            self.max_ms = rtt_ms;
        }
        self.last_ms = rtt_ms;
        self.sum_ms += rtt_ms;
        self.count += 1;
    }

    pub(crate) fn last_ms(&self) -> i64 {
        self.last_ms
    }

    pub(crate) fn min_ms(&self) -> i64 {
        self.min_ms
    }

    pub(crate) fn max_ms(&self) -> i64 {
        self.max_ms
    }

    pub(crate) fn average_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ms as f64 / self.count as f64
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}
