//! Shared value types threaded between the congestion controller's
//! estimators (§3, §6): per-packet send/receive feedback, the bandwidth
//! usage classification produced by the trendline estimator, and the
//! controller's output.

use shared::time::{DataRate, TimeDelta, Timestamp};

/// Over/under/normal classification of the delay-based bandwidth signal
/// (§4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BandwidthUsage {
    #[default]
    Normal,
    Underusing,
    Overusing,
}

/// Identifies a probe burst a packet belongs to (§4.14).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingInfo {
    pub probe_cluster_id: i32,
    pub probe_cluster_min_bytes: usize,
    pub probe_cluster_min_probes: usize,
}

impl PacingInfo {
    pub const NOT_A_PROBE: i32 = -1;

    pub fn none() -> Self {
        Self {
            probe_cluster_id: Self::NOT_A_PROBE,
            probe_cluster_min_bytes: 0,
            probe_cluster_min_probes: 0,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe_cluster_id != Self::NOT_A_PROBE
    }
}

impl Default for PacingInfo {
    fn default() -> Self {
        Self::none()
    }
}

/// What the sender recorded about a packet at the moment it was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentPacket {
    pub send_time: Timestamp,
    pub size: usize,
    pub is_audio: bool,
    pub pacing_info: PacingInfo,
}

/// One packet's round trip through the transport-wide feedback loop:
/// sent at `sent_packet.send_time`, received (or lost) at `recv_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketResult {
    pub sent_packet: SentPacket,
    /// `Timestamp::plus_infinity()` marks the packet as lost.
    pub recv_time: Timestamp,
}

impl PacketResult {
    pub fn is_lost(&self) -> bool {
        self.recv_time.is_plus_infinity()
    }
}

/// One round of transport-wide feedback (RFC 8888 / transport-cc),
/// covering every packet sent since the previous report.
#[derive(Debug, Clone, Default)]
pub struct TransportPacketsFeedback {
    pub feedback_time: Option<Timestamp>,
    pub packet_feedbacks: Vec<PacketResult>,
}

impl TransportPacketsFeedback {
    pub fn feedback_time(&self) -> Timestamp {
        self.feedback_time.unwrap_or(Timestamp::minus_infinity())
    }

    /// Packets sorted by `recv_time`, ascending. Lost packets (`recv_time ==
    /// +inf`) sort last.
    pub fn sorted_by_receive_time(&self) -> Vec<PacketResult> {
        let mut v: Vec<PacketResult> = self
            .packet_feedbacks
            .iter()
            .filter(|p| !p.is_lost())
            .copied()
            .collect();
        v.sort_by_key(|p| p.recv_time);
        v
    }

    pub fn received_with_send_info(&self) -> Vec<PacketResult> {
        self.packet_feedbacks
            .iter()
            .filter(|p| !p.is_lost())
            .copied()
            .collect()
    }
}

/// The controller's output for one feedback round (§4.15).
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkControlUpdate {
    pub target_rate: Option<DataRate>,
    pub pacer_rate: Option<DataRate>,
    pub probe_cluster_config: Option<ProbeClusterConfig>,
    pub congestion_window: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeClusterConfig {
    pub at_time: Timestamp,
    pub target_data_rate: DataRate,
    pub target_duration: TimeDelta,
    pub min_probes: usize,
    pub id: i32,
}
