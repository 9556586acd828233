//! RTCP common header (RFC 3550 §6.1): `V=2 | P | RC/FMT(5) | PT(8) | Length`.

use bytes::{Buf, BufMut};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const HEADER_LENGTH: usize = 4;
pub const VERSION: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    SenderReport,
    ReceiverReport,
    SourceDescription,
    Goodbye,
    ApplicationDefined,
    TransportSpecificFeedback,
    PayloadSpecificFeedback,
    ExtendedReport,
    Unknown(u8),
}

impl From<u8> for PacketType {
    fn from(v: u8) -> Self {
        match v {
            200 => PacketType::SenderReport,
            201 => PacketType::ReceiverReport,
            202 => PacketType::SourceDescription,
            203 => PacketType::Goodbye,
            204 => PacketType::ApplicationDefined,
            205 => PacketType::TransportSpecificFeedback,
            206 => PacketType::PayloadSpecificFeedback,
            207 => PacketType::ExtendedReport,
            other => PacketType::Unknown(other),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(v: PacketType) -> Self {
        match v {
            PacketType::SenderReport => 200,
            PacketType::ReceiverReport => 201,
            PacketType::SourceDescription => 202,
            PacketType::Goodbye => 203,
            PacketType::ApplicationDefined => 204,
            PacketType::TransportSpecificFeedback => 205,
            PacketType::PayloadSpecificFeedback => 206,
            PacketType::ExtendedReport => 207,
            PacketType::Unknown(other) => other,
        }
    }
}

/// RTPFB (transport-layer feedback, PT=205) format subtypes.
pub const FORMAT_TLN: u8 = 1;
pub const FORMAT_TMMBR: u8 = 3;
pub const FORMAT_TMMBN: u8 = 4;
pub const FORMAT_TCC: u8 = 15;

/// PSFB (payload-specific feedback, PT=206) format subtypes.
pub const FORMAT_PLI: u8 = 1;
pub const FORMAT_SLI: u8 = 2;
pub const FORMAT_RPSI: u8 = 3;
pub const FORMAT_FIR: u8 = 4;
pub const FORMAT_AFB: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub padding: bool,
    /// Reception-report-count for SR/RR, or FMT for RTPFB/PSFB.
    pub count: u8,
    pub packet_type_raw: u8,
    /// Length of the packet body in 32-bit words, excluding the header word.
    pub length: u16,
}

impl Header {
    pub fn packet_type(&self) -> PacketType {
        PacketType::from(self.packet_type_raw)
    }
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH
    }
}

impl Marshal for Header {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.len() < HEADER_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        if self.count > 0x1F {
            return Err(Error::ErrTooManyReports);
        }
        let mut b = &mut buf[..];
        let mut first = (VERSION << 6) | (self.count & 0x1F);
        if self.padding {
            first |= 0x20;
        }
        b.put_u8(first);
        b.put_u8(self.packet_type_raw);
        b.put_u16(self.length);
        Ok(HEADER_LENGTH)
    }
}

impl Unmarshal for Header {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < HEADER_LENGTH {
            return Err(Error::ErrPacketTooShort);
        }
        let first = buf.get_u8();
        let version = first >> 6;
        if version != VERSION {
            return Err(Error::ErrInvalidRtcpVersion);
        }
        let padding = (first & 0x20) != 0;
        let count = first & 0x1F;
        let packet_type_raw = buf.get_u8();
        let length = buf.get_u16();
        Ok(Header {
            padding,
            count,
            packet_type_raw,
            length,
        })
    }
}
