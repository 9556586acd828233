//! Sender Report Interceptor - Generates RTCP Sender Reports.

use crate::report::sender_stream::SenderStream;
use crate::{Interceptor, Packet, TaggedPacket};
use bytes::Bytes;
use rtcp::source_description::{SdesType, SourceDescription, SourceDescriptionChunk, SourceDescriptionItem};
use shared::TransportContext;
use shared::error::Error;
use shared::util::rand_alpha_number;
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::time::{Duration, Instant};

/// Video senders scale their report interval down as their bitrate grows,
/// per RFC 3550 §6.2: `min(rtcp_report_interval, 360_000ms / send_bitrate_kbps)`.
const RTCP_BANDWIDTH_INTERVAL_CONSTANT_MS: f64 = 360_000.0;

/// Length, in characters, of the randomly minted session CNAME.
const CNAME_LENGTH: usize = 16;

/// Builder for the SenderReportInterceptor.
///
/// # Example
///
/// ```ignore
/// use rtc_interceptor::{Registry, SenderReportBuilder};
/// use std::time::Duration;
///
/// let chain = Registry::new()
///     .with(SenderReportBuilder::new().with_interval(Duration::from_millis(500)).build())
///     .build();
/// ```
pub struct SenderReportBuilder<P> {
    /// Interval between sender reports.
    interval: Duration,
    _phantom: PhantomData<P>,
}

impl<P> Default for SenderReportBuilder<P> {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            _phantom: PhantomData,
        }
    }
}

impl<P> SenderReportBuilder<P> {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the interval between sender reports.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Build the interceptor factory function.
    pub fn build(self) -> impl FnOnce(P) -> SenderReportInterceptor<P> {
        move |inner| SenderReportInterceptor::new(inner, self.interval)
    }
}

/// Interceptor that generates RTCP Sender Reports for locally sent streams.
///
/// This interceptor monitors outgoing RTP packets, tracks per-stream packet
/// and octet counters, and periodically emits RTCP Sender Reports carrying
/// the NTP/RTP timestamp pair a peer needs to compute round-trip time,
/// compounded with an SDES CNAME chunk binding the report to the session.
pub struct SenderReportInterceptor<P> {
    inner: P,

    /// Minimum/configured interval between reports; the actual schedule is
    /// this value scaled down for high-bitrate video senders and jittered.
    interval: Duration,
    eto: Instant,
    /// Reference point the interval jitter is derived from.
    epoch: Instant,

    /// Stable per-session CNAME, minted once and reused across every SDES
    /// chunk this interceptor emits.
    cname: String,

    streams: HashMap<u32, SenderStream>,

    write_queue: VecDeque<TaggedPacket>,
}

impl<P> SenderReportInterceptor<P> {
    /// Create a new SenderReportInterceptor.
    fn new(inner: P, interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            inner,
            interval,
            eto: now,
            epoch: now,
            cname: rand_alpha_number(CNAME_LENGTH),
            streams: HashMap::new(),
            write_queue: VecDeque::new(),
        }
    }

    /// Register a new local stream with its clock rate.
    fn register_stream(&mut self, ssrc: u32, clock_rate: u32, is_video: bool) {
        self.streams
            .entry(ssrc)
            .or_insert_with(|| SenderStream::new(ssrc, clock_rate, is_video));
    }

    /// Account for an outgoing RTP packet.
    fn process_rtp(&mut self, now: Instant, pkt: &rtp::packet::Packet) {
        if let Some(stream) = self.streams.get_mut(&pkt.header.ssrc) {
            stream.process_rtp(now, pkt);
        }
    }

    /// Generate sender reports for all tracked streams.
    fn generate_reports(&mut self, now: Instant) -> Vec<rtcp::sender_report::SenderReport> {
        self.streams
            .values_mut()
            .map(|stream| stream.generate_report(now))
            .collect()
    }

    /// Wraps an SDES chunk carrying the session CNAME around an outgoing
    /// Sender Report, forming a compound packet (RFC 3550 §6.1).
    fn compound_with_cname(&self, report: rtcp::sender_report::SenderReport) -> Vec<Box<dyn rtcp::packet::Packet>> {
        let sdes = SourceDescription {
            chunks: vec![SourceDescriptionChunk {
                source: report.ssrc,
                items: vec![SourceDescriptionItem {
                    sdes_type: SdesType::SdesCname,
                    text: Bytes::from(self.cname.clone()),
                }],
            }],
        };
        vec![Box::new(report), Box::new(sdes)]
    }

    /// Combined outgoing bitrate of tracked video streams, which scales down
    /// the report interval per RFC 3550 §6.2.
    fn video_send_bitrate_kbps(&self) -> f64 {
        self.streams
            .values()
            .filter(|s| s.is_video())
            .map(|s| s.send_bitrate_kbps())
            .sum()
    }

    /// Deterministic jitter factor in `[0.5, 1.5)`, derived from how far
    /// `now` sits past construction rather than from wall-clock randomness,
    /// so the same clock reading always yields the same jitter.
    fn jitter_factor(&self, now: Instant) -> f64 {
        let nanos = now.duration_since(self.epoch).as_nanos() as u64;
        let frac = (nanos % 1_000_000) as f64 / 1_000_000.0;
        0.5 + frac
    }

    /// Next report interval: the configured interval, scaled down for
    /// high-bitrate video senders and jittered to `[1/2, 3/2]` of that
    /// scaled value (RFC 3550 §6.2).
    fn next_interval(&self, now: Instant) -> Duration {
        let bitrate_kbps = self.video_send_bitrate_kbps();
        let scaled = if bitrate_kbps > 0.0 {
            let bounded_ms = (RTCP_BANDWIDTH_INTERVAL_CONSTANT_MS / bitrate_kbps).max(1.0);
            self.interval.min(Duration::from_millis(bounded_ms as u64))
        } else {
            self.interval
        };
        scaled.mul_f64(self.jitter_factor(now))
    }

    /// Feeds an incoming Receiver Report back to the stream(s) it reports
    /// on, deriving round-trip time from each block's LSR/DLSR echo of one
    /// of our own Sender Reports.
    fn process_receiver_report(&mut self, rr: &rtcp::receiver_report::ReceiverReport) {
        for block in &rr.reports {
            if let Some(stream) = self.streams.get_mut(&block.ssrc) {
                stream.process_receiver_report(block);
            }
        }
    }
}

impl<P: Interceptor> sansio::Protocol<TaggedPacket, TaggedPacket, ()>
    for SenderReportInterceptor<P>
{
    type Rout = TaggedPacket;
    type Wout = TaggedPacket;
    type Eout = ();
    type Error = Error;
    type Time = Instant;

    fn handle_read(&mut self, msg: TaggedPacket) -> Result<(), Self::Error> {
        if let Packet::Rtcp(rtcp_packets) = &msg.message {
            for rtcp_packet in rtcp_packets {
                if let Some(rr) = rtcp_packet
                    .as_any()
                    .downcast_ref::<rtcp::receiver_report::ReceiverReport>()
                {
                    self.process_receiver_report(rr);
                }
            }
        }

        self.inner.handle_read(msg)
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        self.inner.poll_read()
    }

    fn handle_write(&mut self, msg: TaggedPacket) -> Result<(), Self::Error> {
        if let Packet::Rtp(ref rtp_packet) = msg.message {
            self.process_rtp(msg.now, rtp_packet);
        }

        self.inner.handle_write(msg)
    }

    fn poll_write(&mut self) -> Option<Self::Wout> {
        if let Some(pkt) = self.write_queue.pop_front() {
            return Some(pkt);
        }
        self.inner.poll_write()
    }

    fn handle_timeout(&mut self, now: Self::Time) -> Result<(), Self::Error> {
        if self.eto <= now {
            self.eto = now + self.next_interval(now);

            for report in self.generate_reports(now) {
                self.write_queue.push_back(TaggedPacket {
                    now,
                    transport: TransportContext::default(),
                    message: Packet::Rtcp(self.compound_with_cname(report)),
                });
            }
        }

        self.inner.handle_timeout(now)
    }

    fn poll_timeout(&mut self) -> Option<Self::Time> {
        if let Some(eto) = self.inner.poll_timeout()
            && eto < self.eto
        {
            Some(eto)
        } else {
            Some(self.eto)
        }
    }
}

impl<P: Interceptor> Interceptor for SenderReportInterceptor<P> {
    fn bind_local_stream(&mut self, info: &crate::StreamInfo) {
        let is_video = info.mime_type.starts_with("video/");
        self.register_stream(info.ssrc, info.clock_rate, is_video);
        self.inner.bind_local_stream(info);
    }

    fn unbind_local_stream(&mut self, info: &crate::StreamInfo) {
        self.streams.remove(&info.ssrc);
        self.inner.unbind_local_stream(info);
    }

    fn bind_remote_stream(&mut self, info: &crate::StreamInfo) {
        self.inner.bind_remote_stream(info);
    }

    fn unbind_remote_stream(&mut self, info: &crate::StreamInfo) {
        self.inner.unbind_remote_stream(info);
    }
}
