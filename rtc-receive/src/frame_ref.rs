//! Frame reference finder (§4.8): resolves each assembled frame's
//! dependencies per codec and forwards it to the jitter buffer exactly once,
//! in unwrapped-picture-id order. Grounded structurally on
//! `rtp_rtcp/rtp/receiver/video/jitter/frame_ref_finder_unittest.cpp` (only
//! the unit tests for this component survived into the retrieval pack; the
//! resolution rules below follow the specification directly).

use std::collections::BTreeMap;

use crate::buffer::FrameToDecode;
use crate::depacketizer::CodecHeader;

/// A resolved frame plus the picture-ids of the frames it depends on.
#[derive(Debug, Clone)]
pub struct ResolvedFrame {
    pub frame: FrameToDecode,
    pub picture_id: i64,
    pub references: Vec<i64>,
}

/// H.264's picture-id is defined by the spec as the frame's unwrapped last
/// sequence number; VP8/VP9 carry an explicit picture-id in the codec
/// header (falling back to the same sequence-number scheme when absent,
/// e.g. a stream that never sets the extended payload descriptor).
pub struct FrameRefFinder {
    last_unwrapped_seq: i64,
    last_keyframe_picture_id: Option<i64>,
    last_frame_picture_id: Option<i64>,
    tl0_reference: BTreeMap<u8, i64>,
}

impl Default for FrameRefFinder {
    fn default() -> Self {
        Self {
            last_unwrapped_seq: 0,
            last_keyframe_picture_id: None,
            last_frame_picture_id: None,
            tl0_reference: BTreeMap::new(),
        }
    }
}

impl FrameRefFinder {
    pub fn new() -> Self {
        Self::default()
    }

    fn unwrap_seq(&mut self, seq16: u16) -> i64 {
        let wraps = self.last_unwrapped_seq.div_euclid(1 << 16);
        let candidates = [
            (wraps - 1) * (1 << 16) + seq16 as i64,
            wraps * (1 << 16) + seq16 as i64,
            (wraps + 1) * (1 << 16) + seq16 as i64,
        ];
        let unwrapped = *candidates
            .iter()
            .min_by_key(|&&c| (c - self.last_unwrapped_seq).abs())
            .unwrap();
        if unwrapped > self.last_unwrapped_seq {
            self.last_unwrapped_seq = unwrapped;
        }
        unwrapped
    }

    /// Resolves one assembled frame's dependencies. Returns `None` if the
    /// frame cannot yet be resolved (e.g. a VP8/VP9 delta frame arriving
    /// before any keyframe has been seen) — the caller should hold such
    /// frames and retry once a keyframe arrives, matching the reference
    /// "wait for keyframe" behavior.
    pub fn resolve(&mut self, frame: FrameToDecode) -> Option<ResolvedFrame> {
        match frame.codec_header() {
            CodecHeader::H264 | CodecHeader::None => self.resolve_h264(frame),
            CodecHeader::Vp8 { picture_id, tl0_pic_idx, .. } => {
                self.resolve_vp8_vp9(frame, picture_id, tl0_pic_idx)
            }
            CodecHeader::Vp9 { picture_id, tl0_pic_idx, .. } => {
                self.resolve_vp8_vp9(frame, picture_id, tl0_pic_idx)
            }
        }
    }

    fn resolve_h264(&mut self, frame: FrameToDecode) -> Option<ResolvedFrame> {
        let picture_id = self.unwrap_seq(frame.last_sequence_number);
        // Unlike VP8/VP9, H.264 (and the passthrough/unknown-codec case,
        // which never reports a keyframe) has no "wait for the first
        // keyframe" rule: a delta frame with nothing preceding it is simply
        // forwarded with no references.
        let references = if frame.is_keyframe {
            Vec::new()
        } else {
            match self.last_frame_picture_id {
                Some(prev) if prev < picture_id => vec![prev],
                Some(_) => Vec::new(),
                None => Vec::new(),
            }
        };
        self.last_frame_picture_id = Some(picture_id);
        Some(ResolvedFrame { frame, picture_id, references })
    }

    fn resolve_vp8_vp9(
        &mut self,
        frame: FrameToDecode,
        picture_id: Option<i64>,
        tl0_pic_idx: Option<u8>,
    ) -> Option<ResolvedFrame> {
        let picture_id = picture_id.unwrap_or_else(|| self.unwrap_seq(frame.last_sequence_number));

        if frame.is_keyframe {
            self.last_keyframe_picture_id = Some(picture_id);
            if let Some(idx) = tl0_pic_idx {
                self.tl0_reference.insert(idx, picture_id);
            }
            self.last_frame_picture_id = Some(picture_id);
            return Some(ResolvedFrame { frame, picture_id, references: Vec::new() });
        }

        // A delta frame references its temporal base layer's last frame
        // (tracked by tl0_pic_idx when present) or, failing that, the most
        // recent keyframe.
        let reference = tl0_pic_idx
            .and_then(|idx| self.tl0_reference.get(&idx).copied())
            .or(self.last_frame_picture_id)
            .or(self.last_keyframe_picture_id)?;

        if let Some(idx) = tl0_pic_idx {
            self.tl0_reference.insert(idx, picture_id);
        }
        self.last_frame_picture_id = Some(picture_id);
        Some(ResolvedFrame { frame, picture_id, references: vec![reference] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use shared::time::Timestamp;

    fn frame(first: u16, last: u16, keyframe: bool, header: CodecHeader) -> FrameToDecode {
        FrameToDecode {
            rtp_timestamp: last as u32 * 100,
            first_sequence_number: first,
            last_sequence_number: last,
            is_keyframe: keyframe,
            payload: Bytes::from_static(b"x"),
            receive_time: Timestamp::from_millis(last as i64),
            codec_header: header,
        }
    }

    #[test]
    fn h264_keyframe_has_no_references() {
        let mut finder = FrameRefFinder::new();
        let resolved = finder.resolve(frame(1, 1, true, CodecHeader::H264)).unwrap();
        assert!(resolved.references.is_empty());
    }

    #[test]
    fn h264_delta_frame_references_previous_frame() {
        let mut finder = FrameRefFinder::new();
        let key = finder.resolve(frame(1, 1, true, CodecHeader::H264)).unwrap();
        let delta = finder.resolve(frame(2, 2, false, CodecHeader::H264)).unwrap();
        assert_eq!(delta.references, vec![key.picture_id]);
    }

    #[test]
    fn vp8_delta_before_keyframe_is_held() {
        let mut finder = FrameRefFinder::new();
        let header = CodecHeader::Vp8 { picture_id: Some(5), tl0_pic_idx: Some(0), temporal_layer: Some(0) };
        assert!(finder.resolve(frame(1, 1, false, header)).is_none());
    }

    #[test]
    fn vp8_delta_references_tl0_base() {
        let mut finder = FrameRefFinder::new();
        let key_header = CodecHeader::Vp8 { picture_id: Some(1), tl0_pic_idx: Some(0), temporal_layer: Some(0) };
        let key = finder.resolve(frame(1, 1, true, key_header)).unwrap();
        let delta_header = CodecHeader::Vp8 { picture_id: Some(2), tl0_pic_idx: Some(0), temporal_layer: Some(1) };
        let delta = finder.resolve(frame(2, 2, false, delta_header)).unwrap();
        assert_eq!(delta.references, vec![key.picture_id]);
    }
}
