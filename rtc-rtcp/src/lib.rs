//! RTCP control-protocol packets (RFC 3550 §6) and their RTPFB/PSFB/XR
//! extensions, wired as a heterogeneous `Vec<Box<dyn Packet>>` compound
//! datagram.

#![warn(rust_2018_idioms)]

pub mod application_defined;
pub mod extended_reports;
pub mod goodbye;
pub mod header;
pub mod packet;
pub mod payload_feedbacks;
pub mod receiver_report;
pub mod reception_report;
pub mod sender_report;
pub mod source_description;
pub mod transport_feedbacks;

pub use packet::Packet;

use bytes::Buf;
use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use header::{FORMAT_AFB, FORMAT_FIR, FORMAT_PLI, FORMAT_SLI, FORMAT_TCC, FORMAT_TLN, FORMAT_TMMBN, FORMAT_TMMBR, Header, PacketType};

/// Parses a raw compound RTCP datagram into its constituent packets,
/// dispatching on each sub-packet's `PacketType`/format field in turn.
pub fn unmarshal(raw: &[u8]) -> Result<Vec<Box<dyn Packet>>> {
    let mut buf = raw;
    let mut packets: Vec<Box<dyn Packet>> = Vec::new();
    if buf.is_empty() {
        return Err(Error::ErrEmptyPacket);
    }
    while buf.has_remaining() {
        if buf.remaining() < header::HEADER_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        let peek = &buf[..header::HEADER_LENGTH];
        let mut peek_buf = peek;
        let header = Header::unmarshal(&mut peek_buf)?;

        let packet: Box<dyn Packet> = match header.packet_type() {
            PacketType::SenderReport => {
                Box::new(sender_report::SenderReport::unmarshal(&mut buf)?)
            }
            PacketType::ReceiverReport => {
                Box::new(receiver_report::ReceiverReport::unmarshal(&mut buf)?)
            }
            PacketType::SourceDescription => {
                Box::new(source_description::SourceDescription::unmarshal(&mut buf)?)
            }
            PacketType::Goodbye => Box::new(goodbye::Goodbye::unmarshal(&mut buf)?),
            PacketType::ApplicationDefined => {
                Box::new(application_defined::ApplicationDefined::unmarshal(&mut buf)?)
            }
            PacketType::ExtendedReport => {
                Box::new(extended_reports::ExtendedReport::unmarshal(&mut buf)?)
            }
            PacketType::TransportSpecificFeedback => match header.count {
                FORMAT_TLN => Box::new(
                    transport_feedbacks::transport_layer_nack::TransportLayerNack::unmarshal(
                        &mut buf,
                    )?,
                ),
                FORMAT_TMMBR => Box::new(
                    transport_feedbacks::tmmbr::TransportLayerMaxBitrateRequest::unmarshal(
                        &mut buf,
                    )?,
                ),
                FORMAT_TMMBN => Box::new(
                    transport_feedbacks::tmmbn::TransportLayerMaxBitrateNotification::unmarshal(
                        &mut buf,
                    )?,
                ),
                FORMAT_TCC => Box::new(
                    transport_feedbacks::transport_layer_cc::TransportLayerCc::unmarshal(
                        &mut buf,
                    )?,
                ),
                other => return Err(Error::ErrUnknownRtcpPacketType(other)),
            },
            PacketType::PayloadSpecificFeedback => match header.count {
                FORMAT_PLI => Box::new(
                    payload_feedbacks::picture_loss_indication::PictureLossIndication::unmarshal(
                        &mut buf,
                    )?,
                ),
                FORMAT_SLI => Box::new(
                    payload_feedbacks::slice_loss_indication::SliceLossIndication::unmarshal(
                        &mut buf,
                    )?,
                ),
                FORMAT_FIR => Box::new(
                    payload_feedbacks::full_intra_request::FullIntraRequest::unmarshal(&mut buf)?,
                ),
                FORMAT_AFB => Box::new(
                    payload_feedbacks::receiver_estimated_max_bitrate::ReceiverEstimatedMaximumBitrate::unmarshal(&mut buf)?,
                ),
                other => return Err(Error::ErrUnknownRtcpPacketType(other)),
            },
            PacketType::Unknown(other) => return Err(Error::ErrUnknownRtcpPacketType(other)),
        };
        packets.push(packet);
    }
    Ok(packets)
}

/// Marshals a compound RTCP datagram from its constituent packets back to
/// back, per RFC 3550 §6: "multiple RTCP packets can be concatenated
/// without any intervening separators".
pub fn marshal(packets: &[Box<dyn Packet>]) -> Result<bytes::Bytes> {
    let size: usize = packets.iter().map(|p| p.marshal_size()).sum();
    let mut buf = bytes::BytesMut::zeroed(size);
    let mut offset = 0;
    for packet in packets {
        offset += packet.marshal_to(&mut buf[offset..])?;
    }
    buf.truncate(offset);
    Ok(buf.freeze())
}
