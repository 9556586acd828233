//! GoogCC-equivalent congestion controller (§4.11-4.15): bandwidth
//! estimation driven by transport-wide feedback, combining delay, loss and
//! probe signals into one target send bitrate per round.

pub mod ack_bitrate;
pub mod aimd;
pub mod controller;
pub mod delay_based;
pub mod inter_arrival;
pub mod loss_based;
pub mod network_types;
pub mod probe;
pub mod trendline;

pub use ack_bitrate::{AcknowledgedBitrateEstimator, BitrateEstimator, BitrateEstimatorConfig};
pub use aimd::{AimdRateControl, AimdRateControlConfig};
pub use controller::{GoogCcController, GoogCcControllerConfig};
pub use delay_based::{DelayBasedBwe, DelayBasedResult};
pub use inter_arrival::{InterArrivalDelta, InterArrivalDeltas};
pub use loss_based::{LossBasedBwe, LossBasedState};
pub use network_types::{
    BandwidthUsage, NetworkControlUpdate, PacingInfo, PacketResult, ProbeClusterConfig,
    SentPacket, TransportPacketsFeedback,
};
pub use probe::ProbeBitrateEstimator;
pub use trendline::TrendlineEstimator;
