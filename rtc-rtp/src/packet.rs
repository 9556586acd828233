//! Typed RTP packet: [`crate::header::Header`] plus payload/padding and the
//! send-pipeline metadata the generator/history/egress stages attach to it.

use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};
use shared::time::Timestamp;

use crate::header::Header;

/// Why this packet exists on the wire, distinct from its RTP payload type.
/// Drives padding/retransmission/statistics handling in the egress stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Audio,
    Video,
    Retransmission,
    Padding,
    Fec,
}

/// A single RTP packet together with the send-pipeline bookkeeping fields
/// attached to it while it travels generator → history → egress.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
    pub padding_size: u8,
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            header: Header::default(),
            payload: Bytes::new(),
            padding_size: 0,
        }
    }
}

impl Packet {
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self {
            header,
            payload,
            padding_size: 0,
        }
    }
}

impl MarshalSize for Packet {
    fn marshal_size(&self) -> usize {
        self.header.marshal_size() + self.payload.len() + self.padding_size as usize
    }
}

impl Marshal for Packet {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrHeaderTooSmall);
        }
        if self.padding_size > 0 && self.padding_size < 1 {
            return Err(Error::ErrInvalidPadding);
        }

        let header_len = self.header.marshal_to(buf)?;
        let mut w = &mut buf[header_len..];
        w.put_slice(&self.payload);
        if self.padding_size > 0 {
            for _ in 0..self.padding_size - 1 {
                w.put_u8(0);
            }
            w.put_u8(self.padding_size);
        }
        Ok(size)
    }
}

impl Unmarshal for Packet {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let remaining = buf.remaining();
        let mut raw = buf.copy_to_bytes(remaining);
        let mut cursor = raw.clone();
        let header = Header::unmarshal(&mut cursor)?;
        let header_len = remaining - cursor.remaining();
        raw.advance(header_len);

        let mut padding_size = 0u8;
        if header.padding {
            if raw.is_empty() {
                return Err(Error::ErrInvalidPadding);
            }
            padding_size = raw[raw.len() - 1];
            if padding_size == 0 || padding_size as usize > raw.len() {
                return Err(Error::ErrInvalidPadding);
            }
            raw.truncate(raw.len() - padding_size as usize);
        }

        Ok(Packet {
            header,
            payload: raw,
            padding_size,
        })
    }
}

/// Per-packet send-pipeline metadata tracked alongside the wire packet
/// itself, used by history/egress/statistics (kept out of [`Packet`] so the
/// wire type stays exactly what RFC 3550 describes).
#[derive(Debug, Clone)]
pub struct PacketMetadata {
    pub kind: PacketKind,
    pub capture_time: Timestamp,
    pub allow_retransmission: bool,
    pub fec_protection_need: bool,
    pub red_protection_need: bool,
    pub retransmitted_sequence_number: Option<u16>,
}

impl Default for PacketMetadata {
    fn default() -> Self {
        Self {
            kind: PacketKind::Video,
            capture_time: Timestamp::zero(),
            allow_retransmission: false,
            fec_protection_need: false,
            red_protection_need: false,
            retransmitted_sequence_number: None,
        }
    }
}
