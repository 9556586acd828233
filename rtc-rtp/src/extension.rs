//! Typed encode/decode helpers for the RTP header extensions named in
//! RFC 5285 profile registrations, layered on top of [`crate::header::Header`]'s
//! raw extension-element storage.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use shared::error::{Error, Result};

/// Well-known header extension URIs. The numeric id each maps to is
/// negotiated out-of-band (SDP) and recorded in a per-session [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionType {
    AbsoluteSendTime,
    TransmissionTimeOffset,
    TransportSequenceNumber,
    AbsoluteCaptureTime,
    PlayoutDelayLimits,
    RtpMid,
    RtpStreamId,
    RepairedRtpStreamId,
}

impl ExtensionType {
    pub fn uri(&self) -> &'static str {
        match self {
            ExtensionType::AbsoluteSendTime => {
                "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time"
            }
            ExtensionType::TransmissionTimeOffset => "urn:ietf:params:rtp-hdrext:toffset",
            ExtensionType::TransportSequenceNumber => {
                "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01"
            }
            ExtensionType::AbsoluteCaptureTime => {
                "http://www.webrtc.org/experiments/rtp-hdrext/abs-capture-time"
            }
            ExtensionType::PlayoutDelayLimits => {
                "http://www.webrtc.org/experiments/rtp-hdrext/playout-delay"
            }
            ExtensionType::RtpMid => "urn:ietf:params:rtp-hdrext:sdes:mid",
            ExtensionType::RtpStreamId => "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id",
            ExtensionType::RepairedRtpStreamId => {
                "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id"
            }
        }
    }

    /// True for extensions that only appear on a subset of packets
    /// (playout-delay, capture-time); false for ones expected on every
    /// packet once registered (mid, rid, abs-send-time).
    pub fn is_volatile(&self) -> bool {
        matches!(
            self,
            ExtensionType::PlayoutDelayLimits | ExtensionType::AbsoluteCaptureTime
        )
    }
}

/// Maps negotiated extension numeric ids to [`ExtensionType`]s for one
/// session. Built once from SDP and shared read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct ExtensionRegistry {
    by_id: std::collections::HashMap<u8, ExtensionType>,
    by_type: std::collections::HashMap<&'static str, u8>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: u8, ext: ExtensionType) -> Result<()> {
        if self.by_id.contains_key(&id) {
            return Err(Error::ErrExtensionAlreadyRegistered(id));
        }
        self.by_id.insert(id, ext);
        self.by_type.insert(ext.uri(), id);
        Ok(())
    }

    pub fn id_of(&self, ext: ExtensionType) -> Option<u8> {
        self.by_type.get(ext.uri()).copied()
    }

    pub fn type_of(&self, id: u8) -> Option<ExtensionType> {
        self.by_id.get(&id).copied()
    }
}

/// 24-bit fixed-point seconds, Q6.18, per RFC for abs-send-time.
pub fn marshal_absolute_send_time(now_ms: i64) -> Bytes {
    let seconds = (now_ms as f64) / 1000.0;
    let fixed = ((seconds * (1u32 << 18) as f64) as u64) & 0x00FF_FFFF;
    let mut b = BytesMut::with_capacity(3);
    b.put_u8((fixed >> 16) as u8);
    b.put_u8((fixed >> 8) as u8);
    b.put_u8(fixed as u8);
    b.freeze()
}

pub fn unmarshal_absolute_send_time(buf: &Bytes) -> Result<u32> {
    if buf.len() != 3 {
        return Err(Error::ErrInvalidExtensionHeader);
    }
    Ok(((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | buf[2] as u32)
}

/// 24-bit signed 1/90000s offset, per RFC for transmission-time-offset.
pub fn marshal_transmission_time_offset(offset_90khz_ticks: i32) -> Bytes {
    let v = (offset_90khz_ticks as u32) & 0x00FF_FFFF;
    let mut b = BytesMut::with_capacity(3);
    b.put_u8((v >> 16) as u8);
    b.put_u8((v >> 8) as u8);
    b.put_u8(v as u8);
    b.freeze()
}

pub fn unmarshal_transmission_time_offset(buf: &Bytes) -> Result<i32> {
    if buf.len() != 3 {
        return Err(Error::ErrInvalidExtensionHeader);
    }
    let raw = ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | buf[2] as u32;
    // sign-extend the 24-bit value
    let shifted = (raw << 8) as i32;
    Ok(shifted >> 8)
}

pub fn marshal_transport_sequence_number(seq: u16) -> Bytes {
    let mut b = BytesMut::with_capacity(2);
    b.put_u16(seq);
    b.freeze()
}

pub fn unmarshal_transport_sequence_number(buf: &Bytes) -> Result<u16> {
    if buf.len() < 2 {
        return Err(Error::ErrInvalidExtensionHeader);
    }
    Ok(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Two 12-bit values in units of 10ms: {min, max} playout delay.
pub fn marshal_playout_delay(min_ms: u32, max_ms: u32) -> Bytes {
    let min = ((min_ms / 10) & 0x0FFF).min(0x0FFF);
    let max = ((max_ms / 10) & 0x0FFF).min(0x0FFF);
    let mut b = BytesMut::with_capacity(3);
    b.put_u8((min >> 4) as u8);
    b.put_u8((((min & 0x0F) << 4) | (max >> 8)) as u8);
    b.put_u8(max as u8);
    b.freeze()
}

pub fn unmarshal_playout_delay(buf: &Bytes) -> Result<(u32, u32)> {
    if buf.len() != 3 {
        return Err(Error::ErrInvalidExtensionHeader);
    }
    let min = ((buf[0] as u32) << 4) | ((buf[1] as u32) >> 4);
    let max = (((buf[1] as u32) & 0x0F) << 8) | buf[2] as u32;
    Ok((min * 10, max * 10))
}

pub fn marshal_string_extension(s: &str) -> Result<Bytes> {
    if s.len() > 16 || !s.is_ascii() {
        return Err(Error::ErrInvalidExtensionHeader);
    }
    Ok(Bytes::copy_from_slice(s.as_bytes()))
}

pub fn unmarshal_string_extension(buf: &Bytes) -> Result<String> {
    String::from_utf8(buf.to_vec()).map_err(|_| Error::ErrInvalidExtensionHeader)
}

/// UQ32.32 NTP time, optionally followed by a signed Q32.32 clock offset.
pub fn marshal_absolute_capture_time(ntp: u64, clock_offset: Option<i64>) -> Bytes {
    let mut b = BytesMut::with_capacity(if clock_offset.is_some() { 16 } else { 8 });
    b.put_u64(ntp);
    if let Some(offset) = clock_offset {
        b.put_i64(offset);
    }
    b.freeze()
}

pub fn unmarshal_absolute_capture_time(mut buf: Bytes) -> Result<(u64, Option<i64>)> {
    if buf.len() != 8 && buf.len() != 16 {
        return Err(Error::ErrInvalidExtensionHeader);
    }
    let ntp = buf.get_u64();
    let offset = if buf.remaining() == 8 {
        Some(buf.get_i64())
    } else {
        None
    };
    Ok((ntp, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmission_time_offset_round_trips_negative_values() {
        let buf = marshal_transmission_time_offset(-42);
        assert_eq!(unmarshal_transmission_time_offset(&buf).unwrap(), -42);
    }

    #[test]
    fn playout_delay_round_trips_to_nearest_10ms() {
        let buf = marshal_playout_delay(100, 200);
        assert_eq!(unmarshal_playout_delay(&buf).unwrap(), (100, 200));
    }

    #[test]
    fn registry_rejects_duplicate_ids() {
        let mut reg = ExtensionRegistry::new();
        reg.register(1, ExtensionType::AbsoluteSendTime).unwrap();
        assert!(matches!(
            reg.register(1, ExtensionType::TransmissionTimeOffset),
            Err(Error::ErrExtensionAlreadyRegistered(1))
        ));
    }
}
