//! Codec-specific depacketizers (§4.7/§4.8): turn one packetized RTP
//! payload into a contiguous media unit plus the codec header fields the
//! frame reference finder needs. Trait shape follows the
//! `rtc_rtp::codec::*::Depacketizer` (send-side packetizers mirror this
//! split); the per-codec bit layouts follow RFC 6184 (H.264), RFC 7741
//! (VP8) and the VP9 payload descriptor draft.

use bytes::Bytes;

use shared::error::{Error, Result};

/// Codec-specific hints the frame reference finder (§4.8) consumes to
/// resolve a frame's dependencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CodecHeader {
    #[default]
    None,
    H264,
    Vp8 {
        picture_id: Option<i64>,
        tl0_pic_idx: Option<u8>,
        temporal_layer: Option<u8>,
    },
    Vp9 {
        picture_id: Option<i64>,
        tl0_pic_idx: Option<u8>,
        temporal_layer: Option<u8>,
    },
}

/// One packet's payload after depacketization.
#[derive(Debug, Clone)]
pub struct DepacketizedUnit {
    pub payload: Bytes,
    pub is_keyframe: bool,
    pub codec_header: CodecHeader,
}

pub trait Depacketizer: Send + Sync {
    fn depacketize(&self, payload: &Bytes) -> Result<DepacketizedUnit>;
}

/// Used for codecs (Opus, generic) and in tests where the payload needs no
/// unwrapping and keyframe/reference concepts don't apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughDepacketizer;

impl Depacketizer for PassthroughDepacketizer {
    fn depacketize(&self, payload: &Bytes) -> Result<DepacketizedUnit> {
        Ok(DepacketizedUnit {
            payload: payload.clone(),
            is_keyframe: false,
            codec_header: CodecHeader::None,
        })
    }
}

/// H.264 (RFC 6184): single NAL units and the common STAP-A aggregation
/// packet. FU-A fragmentation is forwarded byte-for-byte reassembled by the
/// frame assembler (§4.7 already guarantees contiguity across one frame's
/// sequence run), so only keyframe detection is performed here.
#[derive(Debug, Clone, Copy, Default)]
pub struct H264Depacketizer;

const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_FU_A: u8 = 28;
const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;

impl Depacketizer for H264Depacketizer {
    fn depacketize(&self, payload: &Bytes) -> Result<DepacketizedUnit> {
        if payload.is_empty() {
            return Err(Error::ErrDepacketizeFailed("empty H.264 payload".into()));
        }
        let nal_type = payload[0] & 0x1F;
        let is_keyframe = match nal_type {
            NAL_TYPE_IDR | NAL_TYPE_SPS | NAL_TYPE_PPS => true,
            NAL_TYPE_STAP_A => contains_idr_in_stap_a(payload),
            NAL_TYPE_FU_A => {
                payload.len() >= 2 && (payload[1] & 0x1F) == NAL_TYPE_IDR && (payload[1] & 0x80) != 0
            }
            _ => false,
        };
        Ok(DepacketizedUnit {
            payload: payload.clone(),
            is_keyframe,
            codec_header: CodecHeader::H264,
        })
    }
}

fn contains_idr_in_stap_a(payload: &Bytes) -> bool {
    let mut offset = 1;
    while offset + 2 <= payload.len() {
        let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
        offset += 2;
        if offset >= payload.len() {
            break;
        }
        let nal_type = payload[offset] & 0x1F;
        if nal_type == NAL_TYPE_IDR || nal_type == NAL_TYPE_SPS {
            return true;
        }
        offset += size;
    }
    false
}

/// VP8 payload descriptor (RFC 7741 §4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct Vp8Depacketizer;

impl Depacketizer for Vp8Depacketizer {
    fn depacketize(&self, payload: &Bytes) -> Result<DepacketizedUnit> {
        if payload.is_empty() {
            return Err(Error::ErrDepacketizeFailed("empty VP8 payload".into()));
        }
        let mut offset = 0;
        let b0 = payload[offset];
        let extended = b0 & 0x80 != 0;
        offset += 1;

        let mut picture_id = None;
        let mut tl0_pic_idx = None;
        let mut temporal_layer = None;

        if extended {
            if offset >= payload.len() {
                return Err(Error::ErrDepacketizeFailed("truncated VP8 extension byte".into()));
            }
            let ext = payload[offset];
            let has_picture_id = ext & 0x80 != 0;
            let has_tl0_pic_idx = ext & 0x40 != 0;
            let has_tid_or_key_idx = ext & 0x20 != 0;
            offset += 1;

            if has_picture_id {
                if offset >= payload.len() {
                    return Err(Error::ErrDepacketizeFailed("truncated VP8 picture id".into()));
                }
                if payload[offset] & 0x80 != 0 {
                    if offset + 1 >= payload.len() {
                        return Err(Error::ErrDepacketizeFailed("truncated VP8 16-bit picture id".into()));
                    }
                    let id = (((payload[offset] & 0x7F) as i64) << 8) | payload[offset + 1] as i64;
                    picture_id = Some(id);
                    offset += 2;
                } else {
                    picture_id = Some((payload[offset] & 0x7F) as i64);
                    offset += 1;
                }
            }
            if has_tl0_pic_idx {
                if offset >= payload.len() {
                    return Err(Error::ErrDepacketizeFailed("truncated VP8 tl0_pic_idx".into()));
                }
                tl0_pic_idx = Some(payload[offset]);
                offset += 1;
            }
            if has_tid_or_key_idx {
                if offset >= payload.len() {
                    return Err(Error::ErrDepacketizeFailed("truncated VP8 TID/KEYIDX byte".into()));
                }
                temporal_layer = Some((payload[offset] >> 6) & 0x03);
                offset += 1;
            }
        }

        let is_keyframe = offset < payload.len() && (payload[offset] & 0x01) == 0;

        Ok(DepacketizedUnit {
            payload: payload.slice(offset.min(payload.len())..),
            is_keyframe,
            codec_header: CodecHeader::Vp8 { picture_id, tl0_pic_idx, temporal_layer },
        })
    }
}

/// VP9 payload descriptor (draft-ietf-payload-vp9, flexible-mode subset).
#[derive(Debug, Clone, Copy, Default)]
pub struct Vp9Depacketizer;

impl Depacketizer for Vp9Depacketizer {
    fn depacketize(&self, payload: &Bytes) -> Result<DepacketizedUnit> {
        if payload.is_empty() {
            return Err(Error::ErrDepacketizeFailed("empty VP9 payload".into()));
        }
        let b0 = payload[0];
        let has_picture_id = b0 & 0x80 != 0;
        let has_layer_indices = b0 & 0x20 != 0;
        let is_start_of_frame = b0 & 0x08 != 0;
        let mut offset = 1;

        let mut picture_id = None;
        if has_picture_id {
            if offset >= payload.len() {
                return Err(Error::ErrDepacketizeFailed("truncated VP9 picture id".into()));
            }
            if payload[offset] & 0x80 != 0 {
                if offset + 1 >= payload.len() {
                    return Err(Error::ErrDepacketizeFailed("truncated VP9 16-bit picture id".into()));
                }
                let id = (((payload[offset] & 0x7F) as i64) << 8) | payload[offset + 1] as i64;
                picture_id = Some(id);
                offset += 2;
            } else {
                picture_id = Some((payload[offset] & 0x7F) as i64);
                offset += 1;
            }
        }

        let mut temporal_layer = None;
        let mut tl0_pic_idx = None;
        if has_layer_indices && offset < payload.len() {
            let layer_byte = payload[offset];
            temporal_layer = Some((layer_byte >> 5) & 0x07);
            offset += 1;
            // Non-flexible mode appends a TL0PICIDX byte; flexible mode
            // (U=1 in the layer byte) does not.
            if layer_byte & 0x10 == 0 && offset < payload.len() {
                tl0_pic_idx = Some(payload[offset]);
                offset += 1;
            }
        }

        Ok(DepacketizedUnit {
            payload: payload.slice(offset.min(payload.len())..),
            is_keyframe: is_start_of_frame && temporal_layer.unwrap_or(0) == 0,
            codec_header: CodecHeader::Vp9 { picture_id, tl0_pic_idx, temporal_layer },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h264_idr_nal_is_keyframe() {
        let dep = H264Depacketizer;
        let payload = Bytes::from_static(&[0x65, 0x01, 0x02]);
        let unit = dep.depacketize(&payload).unwrap();
        assert!(unit.is_keyframe);
    }

    #[test]
    fn h264_non_idr_nal_is_not_keyframe() {
        let dep = H264Depacketizer;
        let payload = Bytes::from_static(&[0x61, 0x01, 0x02]);
        let unit = dep.depacketize(&payload).unwrap();
        assert!(!unit.is_keyframe);
    }

    #[test]
    fn vp8_non_extended_descriptor_parses() {
        let dep = Vp8Depacketizer;
        let payload = Bytes::from_static(&[0x00, 0xAA, 0xBB]);
        let unit = dep.depacketize(&payload).unwrap();
        assert!(unit.is_keyframe);
        assert_eq!(unit.payload.as_ref(), &[0xAA, 0xBB]);
    }

    #[test]
    fn vp8_extended_descriptor_with_picture_id_parses() {
        let dep = Vp8Depacketizer;
        // X=1, then extension byte I=1, then 15-bit picture id 0x1234 (with M bit set).
        let payload = Bytes::from_static(&[0x80, 0x80, 0x92, 0x34, 0x01]);
        let unit = dep.depacketize(&payload).unwrap();
        match unit.codec_header {
            CodecHeader::Vp8 { picture_id, .. } => assert_eq!(picture_id, Some(0x1234)),
            _ => panic!("expected VP8 header"),
        }
    }
}
