//! Reception report block (RFC 3550 §6.4.1), the 24-byte structure embedded
//! (0 or more times) in both SR and RR packets.

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const RECEPTION_REPORT_LENGTH: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceptionReport {
    pub ssrc: u32,
    pub fraction_lost: u8,
    /// 24-bit signed cumulative count of packets lost, sign-extended into i32.
    pub total_lost: u32,
    /// Extended highest sequence number received: cycle count (upper 16)
    /// concatenated with the highest sequence number (lower 16).
    pub last_sequence_number: u32,
    pub jitter: u32,
    /// Compact NTP (middle 32 bits) of the last SR received from this source.
    pub last_sender_report: u32,
    /// Delay since that SR, in units of 1/65536 seconds.
    pub delay: u32,
}

impl MarshalSize for ReceptionReport {
    fn marshal_size(&self) -> usize {
        RECEPTION_REPORT_LENGTH
    }
}

impl Marshal for ReceptionReport {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < RECEPTION_REPORT_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        if self.total_lost > 0x00FF_FFFF {
            return Err(Error::ErrPacketTooShort);
        }
        let mut b = &mut buf[..];
        b.put_u32(self.ssrc);
        b.put_u8(self.fraction_lost);
        b.put_u8((self.total_lost >> 16) as u8);
        b.put_u8((self.total_lost >> 8) as u8);
        b.put_u8(self.total_lost as u8);
        b.put_u32(self.last_sequence_number);
        b.put_u32(self.jitter);
        b.put_u32(self.last_sender_report);
        b.put_u32(self.delay);
        Ok(RECEPTION_REPORT_LENGTH)
    }
}

impl Unmarshal for ReceptionReport {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < RECEPTION_REPORT_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        let ssrc = buf.get_u32();
        let fraction_lost = buf.get_u8();
        let total_lost =
            ((buf.get_u8() as u32) << 16) | ((buf.get_u8() as u32) << 8) | buf.get_u8() as u32;
        let last_sequence_number = buf.get_u32();
        let jitter = buf.get_u32();
        let last_sender_report = buf.get_u32();
        let delay = buf.get_u32();
        Ok(ReceptionReport {
            ssrc,
            fraction_lost,
            total_lost,
            last_sequence_number,
            jitter,
            last_sender_report,
            delay,
        })
    }
}
