//! Receiver report (RFC 3550 §6.4.2), RTCP packet type 201.

use bytes::{Buf, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

use crate::header::{Header, HEADER_LENGTH, PacketType};
use crate::reception_report::{RECEPTION_REPORT_LENGTH, ReceptionReport};
use crate::sender_report::MAX_REPORTS;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<ReceptionReport>,
    pub profile_extensions: Bytes,
}

impl MarshalSize for ReceiverReport {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + 4 + self.reports.len() * RECEPTION_REPORT_LENGTH + self.profile_extensions.len()
    }
}

impl Marshal for ReceiverReport {
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
            packet_type_raw: PacketType::ReceiverReport.into(),
            length: ((size / 4) - 1) as u16,
        };
        let mut offset = header.marshal_to(buf)?;
        buf[offset..offset + 4].copy_from_slice(&self.ssrc.to_be_bytes());
        offset += 4;

        for report in &self.reports {
            offset += report.marshal_to(&mut buf[offset..])?;
        }

        buf[offset..offset + self.profile_extensions.len()]
            .copy_from_slice(&self.profile_extensions);
        offset += self.profile_extensions.len();

        Ok(offset)
    }
}

impl Unmarshal for ReceiverReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let header = Header::unmarshal(buf)?;
        if header.packet_type() != PacketType::ReceiverReport {
            return Err(Error::ErrUnknownRtcpPacketType(header.packet_type_raw));
        }
        let body_len = header.length as usize * 4;
        if buf.remaining() < body_len || body_len < 4 {
            return Err(Error::ErrPacketTooShort);
        }

        let ssrc = buf.get_u32();
        let mut reports = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            reports.push(ReceptionReport::unmarshal(buf)?);
        }

        let consumed = 4 + reports.len() * RECEPTION_REPORT_LENGTH;
        let profile_extensions = buf.copy_to_bytes(body_len - consumed);

        Ok(ReceiverReport {
            ssrc,
            reports,
            profile_extensions,
        })
    }
}

use crate::packet::impl_packet;
impl_packet!(ReceiverReport);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_empty_reports() {
        let rr = ReceiverReport {
            ssrc: 0x902f9e2e,
            reports: vec![],
            profile_extensions: Bytes::new(),
        };
        let raw = rr.marshal().unwrap();
        let mut buf = raw.clone();
        assert_eq!(ReceiverReport::unmarshal(&mut buf).unwrap(), rr);
    }
}
