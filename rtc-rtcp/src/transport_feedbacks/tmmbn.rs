//! Temporary Maximum Media Stream Bitrate Notification (RFC 5104 §4.2.2), RTPFB FMT=4.

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{FORMAT_TMMBN, HEADER_LENGTH, Header, PacketType};
use crate::packet::impl_packet;
use crate::transport_feedbacks::tmmbr::TmmbItem;

const FCI_LENGTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransportLayerMaxBitrateNotification {
    pub sender_ssrc: u32,
    pub media_ssrc: u32,
    pub entries: Vec<TmmbItem>,
}

impl MarshalSize for TransportLayerMaxBitrateNotification {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 8 + self.entries.len() * FCI_LENGTH
    }
}

impl Marshal for TransportLayerMaxBitrateNotification {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }
        let header = Header {
            padding: false,
            count: FORMAT_TMMBN,
            packet_type_raw: PacketType::TransportSpecificFeedback.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;
        let mut b = &mut buf[offset..];
        b.put_u32(self.sender_ssrc);
        b.put_u32(self.media_ssrc);
        offset += 8;
        for entry in &self.entries {
            b.put_u32(entry.ssrc);
            b.put_u32(entry.pack_bitrate());
            offset += FCI_LENGTH;
        }
        Ok(offset)
    }
}

impl Unmarshal for TransportLayerMaxBitrateNotification {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::TransportSpecificFeedback || header.count != FORMAT_TMMBN {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        if buf.remaining() < 8 {
            return Err(Error::ErrPacketTooShort);
        }
        let sender_ssrc = buf.get_u32();
        let media_ssrc = buf.get_u32();
        let num_entries = (header.length as usize + 1) * 4 / FCI_LENGTH;
        let num_entries = num_entries.saturating_sub(1);
        if buf.remaining() < num_entries * FCI_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        let mut entries = Vec::with_capacity(num_entries);
        for _ in 0..num_entries {
            let ssrc = buf.get_u32();
            let (max_bitrate_bps, measured_overhead) = TmmbItem::unpack_bitrate(buf.get_u32());
            entries.push(TmmbItem {
                ssrc,
                max_bitrate_bps,
                measured_overhead,
            });
        }
        Ok(TransportLayerMaxBitrateNotification {
            sender_ssrc,
            media_ssrc,
            entries,
        })
    }
}

impl_packet!(TransportLayerMaxBitrateNotification);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let tmmbn = TransportLayerMaxBitrateNotification {
            sender_ssrc: 0x902f9e2e,
            media_ssrc: 0,
            entries: vec![TmmbItem {
                ssrc: 0xbc5e9a40,
                max_bitrate_bps: 500_000,
                measured_overhead: 20,
            }],
        };
        let raw = tmmbn.marshal().unwrap();
        let mut buf = raw.clone();
        let decoded = TransportLayerMaxBitrateNotification::unmarshal(&mut buf).unwrap();
        assert_eq!(decoded.sender_ssrc, tmmbn.sender_ssrc);
        assert_eq!(decoded.entries[0].ssrc, tmmbn.entries[0].ssrc);
    }
}
