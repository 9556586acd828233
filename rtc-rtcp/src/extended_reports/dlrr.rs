//! DLRR Report Block (RFC 3611 §4.5): delay since last receiver report, for
//! RTT measurement in topologies where a receiver never sends SR/RR itself.

use bytes::{Buf, BufMut};

use shared::error::Result;

const REPORT_LENGTH: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DlrrReport {
    pub ssrc: u32,
    /// Middle 32 bits of the NTP timestamp of the last RR received from `ssrc`.
    pub last_rr: u32,
    /// Delay since `last_rr`, in units of 1/65536 second.
    pub delay_since_last_rr: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dlrr {
    pub reports: Vec<DlrrReport>,
}

impl Dlrr {
    pub(crate) fn marshal_size(&self) -> usize {
        self.reports.len() * REPORT_LENGTH
    }

    pub(crate) fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        for report in &self.reports {
            let mut b = &mut buf[offset..];
            b.put_u32(report.ssrc);
            b.put_u32(report.last_rr);
            b.put_u32(report.delay_since_last_rr);
            offset += REPORT_LENGTH;
        }
        Ok(offset)
    }

    pub(crate) fn unmarshal<B: Buf>(buf: &mut B) -> Result<Self> {
        let mut reports = Vec::new();
        while buf.remaining() >= REPORT_LENGTH {
            reports.push(DlrrReport {
                ssrc: buf.get_u32(),
                last_rr: buf.get_u32(),
                delay_since_last_rr: buf.get_u32(),
            });
        }
        Ok(Dlrr { reports })
    }
}
