//! Sender report (RFC 3550 §6.4.1), RTCP packet type 200.

use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, HEADER_LENGTH, PacketType};
use crate::reception_report::{RECEPTION_REPORT_LENGTH, ReceptionReport};

const SENDER_INFO_LENGTH: usize = 20;
pub const MAX_REPORTS: usize = 31;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_time: u64,
    pub rtp_time: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<ReceptionReport>,
    pub profile_extensions: Bytes,
}

impl MarshalSize for SenderReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
            + 4
            + SENDER_INFO_LENGTH
            + self.reports.len() * RECEPTION_REPORT_LENGTH
            + self.profile_extensions.len()
    }
}

impl Marshal for SenderReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if self.reports.len() > MAX_REPORTS {
            return Err(Error::ErrTooManyReports);
        }
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrPacketTooShort);
        }

        let header = Header {
            padding: false,
            count: self.reports.len() as u8,
            packet_type_raw: PacketType::SenderReport.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;

        {
            let mut b = &mut buf[offset..];
            b.put_u32(self.ssrc);
            b.put_u64(self.ntp_time);
            b.put_u32(self.rtp_time);
            b.put_u32(self.packet_count);
            b.put_u32(self.octet_count);
        }
        offset += 4 + SENDER_INFO_LENGTH;

        for report in &self.reports {
            offset += report.marshal_to(&mut buf[offset..])?;
        }

        buf[offset..offset + self.profile_extensions.len()]
            .copy_from_slice(&self.profile_extensions);
        offset += self.profile_extensions.len();

        Ok(offset)
    }
}

impl Unmarshal for SenderReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::SenderReport {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        let body_len = header.length as usize * 4;
        if buf.remaining() < body_len || body_len < 4 + SENDER_INFO_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }

        let ssrc = buf.get_u32();
        let ntp_time = buf.get_u64();
        let rtp_time = buf.get_u32();
        let packet_count = buf.get_u32();
        let octet_count = buf.get_u32();

        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }

        let consumed = 4 + SENDER_INFO_LENGTH + reports.len() * RECEPTION_REPORT_LENGTH;
        let extension_len = body_len - consumed;
        let profile_extensions = buf.copy_to_bytes(extension_len);

        Ok(SenderReport {
            ssrc,
            ntp_time,
            rtp_time,
            packet_count,
            octet_count,
            reports,
            profile_extensions,
        })
    }
}

use crate::packet::impl_packet;
impl_packet!(SenderReport);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_reports() {
        let sr = SenderReport {
            ssrc: 0x902f9e2e,
            ntp_time: 0xda8bd1fcdddda05a,
            rtp_time: 0xaaf4edd5,
            packet_count: 1000,
            octet_count: 50000,
            reports: vec![ReceptionReport {
                ssrc: 0xbc5e9a40,
                fraction_lost: 10,
                total_lost: 100,
                last_sequence_number: 0x46e1,
                jitter: 273,
                last_sender_report: 0x9f36432,
                delay: 150137,
            }],
            profile_extensions: Bytes::new(),
        };
        let raw = sr.marshal().unwrap();
        let mut buf = raw.clone();
        assert_eq!(SenderReport::unmarshal(&mut buf).unwrap(), sr);
    }
}
