//! Error types shared across the RTP/RTCP media-transport core.
//!
//! Errors are grouped the way the core's components report failure: parse
//! errors are recoverable locally by dropping the offending packet, config
//! errors propagate to the call site, resource errors degrade gracefully,
//! and transient errors are logged and left to the normal NACK/RTX path.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    // --- Parse: malformed wire data. Drop the packet, never propagate. ---
    #[error("packet is too short to contain a valid header")]
    ErrHeaderTooSmall,
    #[error("RTP version field is not 2")]
    ErrInvalidRtpVersion,
    #[error("RTCP version field is not 2")]
    ErrInvalidRtcpVersion,
    #[error("extension header is malformed")]
    ErrInvalidExtensionHeader,
    #[error("header extension id {0} is already registered")]
    ErrExtensionAlreadyRegistered(u8),
    #[error("header extension id {0} is not registered")]
    ErrExtensionNotRegistered(u8),
    #[error("payload is shorter than the declared padding")]
    ErrInvalidPadding,
    #[error("rtcp packet type {0} is not recognised")]
    ErrUnknownRtcpPacketType(u8),
    #[error("rtcp packet is truncated")]
    ErrPacketTooShort,
    #[error("too many reports/reception blocks for a single rtcp packet")]
    ErrTooManyReports,
    #[error("sdes item is malformed")]
    ErrInvalidSdesItem,
    #[error("depacketization failed: {0}")]
    ErrDepacketizeFailed(String),

    // --- Config: caller-visible misconfiguration. No state change. ---
    #[error("max packet size {0} is out of the allowed range [100, mtu]")]
    ErrInvalidMaxPacketSize(usize),
    #[error("payload type {0} has no registered RTX mapping")]
    ErrUnmappedPayloadType(u8),
    #[error("no RTX SSRC has been configured for this stream")]
    ErrNoRtxSsrcConfigured,
    #[error("SSRC {0:#010x} does not belong to any configured bucket")]
    ErrUnknownSsrc(u32),
    #[error("payload type {0} is out of the valid 0-127 range")]
    ErrInvalidPayloadType(u8),
    #[error("payload type {0} has no registered depacketizer")]
    ErrUnknownDepacketizer(u8),

    // --- Resource: local backpressure, never blocks the producer. ---
    #[error("packet history capacity exceeded")]
    ErrHistoryFull,
    #[error("too many media packets queued for FEC protection ({0} > 48)")]
    ErrTooManyProtectedPackets(usize),
    #[error("nack list exceeded its maximum size")]
    ErrNackListFull,
    #[error("receive packet buffer capacity exceeded")]
    ErrReceiveBufferFull,

    // --- Transient: the caller should just retry / ignore. ---
    #[error("transport send failed: {0}")]
    ErrTransportSend(String),

    #[error("empty packet may not be sent")]
    ErrEmptyPacket,
    #[error("attempted arithmetic on a non-finite timestamp")]
    ErrNonFiniteTimestamp,
}
