//! RTP packet egress (§4.3): the final send stage. Stamps timing
//! extensions, updates statistics, and hands packets to the transport.

use std::collections::VecDeque;

use shared::error::{Error, Result};
use shared::time::{Clock, TimeDelta, Timestamp};

use crate::extension::{self, ExtensionRegistry, ExtensionType};
use crate::fec::{ProtectionParameters, UlpfecGenerator};
use crate::history::PacketHistory;
use crate::packet::{Packet, PacketKind, PacketMetadata};

/// Per-send options threaded through to the transport for feedback
/// correlation (transport-wide sequence number accounting, etc).
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketOptions {
    pub packet_id: u16,
}

/// External collaborator: the datagram transport. Out of scope per the
/// core's charter, consumed only through this trait.
pub trait Transport {
    fn send_rtp(&mut self, buf: &[u8], options: PacketOptions, is_rtcp: bool) -> Result<usize>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RtpStreamDataCounters {
    pub transmitted_packets: u64,
    pub transmitted_bytes: u64,
    pub retransmitted_packets: u64,
    pub retransmitted_bytes: u64,
    pub fec_packets: u64,
    pub fec_bytes: u64,
}

/// Rolling window of (timestamp, bytes) samples used for both the
/// send-delay observer and the per-type bitrate statistics (§4.3 step 5/7).
struct RollingBitrateWindow {
    window: TimeDelta,
    samples: VecDeque<(Timestamp, usize)>,
    accumulated: usize,
}

impl RollingBitrateWindow {
    fn new(window: TimeDelta) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            accumulated: 0,
        }
    }

    fn add(&mut self, now: Timestamp, bytes: usize) {
        self.samples.push_back((now, bytes));
        self.accumulated += bytes;
        while let Some(&(t, b)) = self.samples.front() {
            if now - t > self.window {
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
        (self.accumulated as f64 * 8.0) / self.window.seconds_f64()
    }
}

/// SSRC bucket a packet is allowed to be sent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SsrcBucket {
    Media(u32),
    Rtx(u32),
    Fec(u32),
}

impl SsrcBucket {
    fn matches(&self, ssrc: u32) -> bool {
        match self {
            SsrcBucket::Media(s) | SsrcBucket::Rtx(s) | SsrcBucket::Fec(s) => *s == ssrc,
        }
    }
}

pub struct RtpPacketEgresser<C: Clock> {
    clock: std::sync::Arc<C>,
    buckets: Vec<SsrcBucket>,
    extensions: ExtensionRegistry,
    history: PacketHistory,
    media_has_been_sent: bool,
    next_transport_seq: u16,
    send_delay_window: RollingBitrateWindow,
    counters: RtpStreamDataCounters,
    bitrate_window: RollingBitrateWindow,
    fec: Option<UlpfecGenerator>,
    pending_fec_params: Option<ProtectionParameters>,
}

impl<C: Clock> RtpPacketEgresser<C> {
    pub fn new(
        clock: std::sync::Arc<C>,
        buckets: Vec<SsrcBucket>,
        extensions: ExtensionRegistry,
        history: PacketHistory,
    ) -> Self {
        Self {
            clock,
            buckets,
            extensions,
            history,
            media_has_been_sent: false,
            next_transport_seq: 0,
            send_delay_window: RollingBitrateWindow::new(TimeDelta::from_seconds(1)),
            counters: RtpStreamDataCounters::default(),
            bitrate_window: RollingBitrateWindow::new(TimeDelta::from_seconds(1)),
            fec: None,
            pending_fec_params: None,
        }
    }

    pub fn counters(&self) -> RtpStreamDataCounters {
        self.counters
    }

    pub fn bitrate_bps(&self) -> f64 {
        self.bitrate_window.bitrate_bps()
    }

    /// Enables FEC protection (§4.3 step 3) on this stream's egress.
    pub fn set_fec_generator(&mut self, fec: UlpfecGenerator) {
        self.fec = Some(fec);
    }

    /// Queues protection parameters (delta/key frame FEC rate) to take
    /// effect on the next protected packet, per `VideoFecGenerator`'s
    /// "pending parameters" handshake.
    pub fn set_pending_protection_parameters(&mut self, params: ProtectionParameters) {
        self.pending_fec_params = Some(params);
    }

    /// Runs the packet through the full egress sequence and sends it.
    pub fn send_packet(
        &mut self,
        mut packet: Packet,
        meta: &PacketMetadata,
        transport: &mut dyn Transport,
    ) -> Result<usize> {
        if packet.payload.is_empty() && packet.padding_size == 0 {
            return Err(Error::ErrEmptyPacket);
        }
        if !self.buckets.iter().any(|b| b.matches(packet.header.ssrc)) {
            return Err(Error::ErrUnknownSsrc(packet.header.ssrc));
        }

        let now = self.clock.current_time();

        let mut packet_id = 0u16;
        if let Some(id) = self.extensions.id_of(ExtensionType::TransportSequenceNumber) {
            packet_id = self.next_transport_seq;
            self.next_transport_seq = self.next_transport_seq.wrapping_add(1);
            packet
                .header
                .set_extension(id, extension::marshal_transport_sequence_number(packet_id))
                .ok();
        }

        if let Some(id) = self.extensions.id_of(ExtensionType::TransmissionTimeOffset) {
            let offset_ticks =
                ((now - meta.capture_time).ms() as i64 * 90) as i32;
            packet
                .header
                .set_extension(id, extension::marshal_transmission_time_offset(offset_ticks))
                .ok();
        }
        if let Some(id) = self.extensions.id_of(ExtensionType::AbsoluteSendTime) {
            packet
                .header
                .set_extension(id, extension::marshal_absolute_send_time(now.ms()))
                .ok();
        }

        if !matches!(meta.kind, PacketKind::Padding) {
            self.send_delay_window.add(now, (now - meta.capture_time).ms().max(0) as usize);
        }

        if matches!(meta.kind, PacketKind::Video | PacketKind::Audio) && meta.allow_retransmission
        {
            self.history.put(packet.clone(), Some(now));
        } else if matches!(meta.kind, PacketKind::Retransmission) {
            if let Some(original_seq) = meta.retransmitted_sequence_number {
                self.history.mark_packet_as_sent(original_seq, now);
            }
        }

        // §4.3 step 3: if FEC is enabled and this packet requests protection,
        // swap in any pending FEC parameters and feed it to the generator as
        // RED or protected media before it goes out on the wire.
        let mut fec_to_send = None;
        if matches!(meta.kind, PacketKind::Video | PacketKind::Audio)
            && (meta.fec_protection_need || meta.red_protection_need)
        {
            if let Some(fec) = self.fec.as_mut() {
                if let Some(params) = self.pending_fec_params.take() {
                    fec.set_protection_parameters(params);
                }
                fec.push_media_packet(packet.clone())?;
                if meta.red_protection_need {
                    packet = fec.red_wrap_media(&packet);
                }
                if packet.header.marker {
                    // RED-multiplexed FEC shares the media SSRC/sequence
                    // space; the next slot after this frame's last packet.
                    let fec_seq = packet.header.sequence_number.wrapping_add(1);
                    fec_to_send = fec.generate_fec_packet(true, fec_seq, packet.header.timestamp);
                }
            }
        }

        let options = PacketOptions { packet_id };
        let buf = {
            use shared::marshal::Marshal;
            packet.marshal()?
        };
        let n = transport.send_rtp(&buf, options, false)?;

        self.media_has_been_sent = true;
        self.bitrate_window.add(now, n);
        match meta.kind {
            PacketKind::Retransmission => {
                self.counters.retransmitted_packets += 1;
                self.counters.retransmitted_bytes += n as u64;
            }
            PacketKind::Fec => {
                self.counters.fec_packets += 1;
                self.counters.fec_bytes += n as u64;
            }
            _ => {}
        }
        self.counters.transmitted_packets += 1;
        self.counters.transmitted_bytes += n as u64;

        if let Some(fec_packet) = fec_to_send {
            use shared::marshal::Marshal;
            let fec_buf = fec_packet.marshal()?;
            let fec_n = transport.send_rtp(&fec_buf, PacketOptions::default(), false)?;
            self.counters.fec_packets += 1;
            self.counters.fec_bytes += fec_n as u64;
            self.counters.transmitted_packets += 1;
            self.counters.transmitted_bytes += fec_n as u64;
        }

        Ok(n)
    }
}
