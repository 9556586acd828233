//! Transport-layer feedback (RTPFB, PT=205) packets: RFC 4585 generic NACK,
//! RFC 5104 temporary maximum media stream bitrate request/notification, and
//! the transport-wide congestion control feedback used by TWCC.

pub mod tmmbn;
pub mod tmmbr;
pub mod transport_layer_cc;
pub mod transport_layer_nack;
