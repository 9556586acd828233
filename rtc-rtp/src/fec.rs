//! FEC generator (§4.5): ULPFEC (in-band RED) and FlexFEC (separate SSRC).
//! Both protect a run of buffered media packets with a byte-wise XOR parity
//! packet; they differ only in how the parity packet is wrapped for the
//! wire (RED-multiplexed on the media SSRC vs its own SSRC/sequence space).

use bytes::{BufMut, Bytes, BytesMut};

use shared::error::{Error, Result};

use crate::header::Header;
use crate::packet::Packet;

pub const MAX_PROTECTED_PACKETS: usize = 48;
/// RFC 2198 RED payload type is negotiated via SDP; ULPFEC rides on it.
const RED_HEADER_LEN: usize = 1;

#[derive(Debug, Clone, Copy)]
pub struct ProtectionParameters {
    pub fec_rate_delta: u8, // 0..=255, fraction of media packets protected
    pub fec_rate_key: u8,
    pub use_uep_protection: bool,
}

impl Default for ProtectionParameters {
    fn default() -> Self {
        Self {
            fec_rate_delta: 0,
            fec_rate_key: 0,
            use_uep_protection: false,
        }
    }
}

struct XorMask {
    length: u16,
    bits: Vec<u8>,
}

fn xor_parity(media: &[Packet]) -> (u16, BytesMut) {
    let max_len = media.iter().map(|p| p.payload.len()).max().unwrap_or(0);
    let mut parity = BytesMut::zeroed(max_len);
    for p in media {
        for (i, byte) in p.payload.iter().enumerate() {
            parity[i] ^= byte;
        }
    }
    (max_len as u16, parity)
}

/// Common buffering/threshold logic shared by ULPFEC and FlexFEC.
struct FecBuffer {
    pending: Vec<Packet>,
    params: ProtectionParameters,
    output: Vec<Packet>,
}

impl FecBuffer {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            params: ProtectionParameters::default(),
            output: Vec::new(),
        }
    }

    fn push_media_packet(&mut self, packet: Packet) -> Result<()> {
        if self.pending.len() >= MAX_PROTECTED_PACKETS {
            return Err(Error::ErrTooManyProtectedPackets(self.pending.len() + 1));
        }
        self.pending.push(packet);
        Ok(())
    }

    /// True once enough media packets have accumulated for the configured
    /// protection factor to justify emitting an FEC packet now (end of
    /// frame, signalled by the caller via `end_of_frame`).
    fn should_emit(&self, end_of_frame: bool) -> bool {
        end_of_frame && !self.pending.is_empty() && self.params.fec_rate_delta > 0
    }

    fn take_group(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.pending)
    }
}

/// ULPFEC encapsulated in RED (RFC 2198 / RFC 5109): emitted on the same
/// SSRC and RED payload type as the protected media.
pub struct UlpfecGenerator {
    buffer: FecBuffer,
    red_payload_type: u8,
    ulpfec_payload_type: u8,
    ssrc: u32,
}

impl UlpfecGenerator {
    pub fn new(red_payload_type: u8, ulpfec_payload_type: u8, ssrc: u32) -> Self {
        Self {
            buffer: FecBuffer::new(),
            red_payload_type,
            ulpfec_payload_type,
            ssrc,
        }
    }

    pub fn set_protection_parameters(&mut self, params: ProtectionParameters) {
        self.buffer.params = params;
    }

    pub fn push_media_packet(&mut self, packet: Packet) -> Result<()> {
        self.buffer.push_media_packet(packet)
    }

    /// Wraps a media packet for RED transport: a 1-byte RED header (no
    /// redundancy block, `F=0`) followed by the original payload verbatim.
    pub fn red_wrap_media(&self, packet: &Packet) -> Packet {
        let mut payload = BytesMut::with_capacity(RED_HEADER_LEN + packet.payload.len());
        payload.put_u8(packet.header.payload_type & 0x7F);
        payload.put_slice(&packet.payload);
        let mut header = packet.header.clone();
        header.payload_type = self.red_payload_type;
        Packet::new(header, payload.freeze())
    }

    pub fn generate_fec_packet(&mut self, end_of_frame: bool, next_seq: u16, timestamp: u32) -> Option<Packet> {
        if !self.buffer.should_emit(end_of_frame) {
            return None;
        }
        let group = self.buffer.take_group();
        let (len, parity) = xor_parity(&group);

        let mut fec_payload = BytesMut::with_capacity(4 + len as usize);
        // Minimal ULPFEC header: protection length + recovery mask for the
        // contiguous group (RFC 5109 §5.1, short mask form).
        fec_payload.put_u16(len);
        fec_payload.put_u16(group.len() as u16);
        fec_payload.put_slice(&parity);

        let mut payload = BytesMut::with_capacity(RED_HEADER_LEN + fec_payload.len());
        payload.put_u8(0x80 | (self.ulpfec_payload_type & 0x7F));
        payload.put_slice(&fec_payload);

        let header = Header {
            payload_type: self.red_payload_type,
            sequence_number: next_seq,
            timestamp,
            ssrc: self.ssrc,
            ..Default::default()
        };
        Some(Packet::new(header, payload.freeze()))
    }
}

/// FlexFEC (RFC 8627): separate SSRC and sequence space from the protected
/// media stream.
pub struct FlexFecGenerator {
    buffer: FecBuffer,
    payload_type: u8,
    ssrc: u32,
    next_seq: u16,
}

impl FlexFecGenerator {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        Self {
            buffer: FecBuffer::new(),
            payload_type,
            ssrc,
            next_seq: 0,
        }
    }

    pub fn set_protection_parameters(&mut self, params: ProtectionParameters) {
        self.buffer.params = params;
    }

    pub fn push_media_packet(&mut self, packet: Packet) -> Result<()> {
        self.buffer.push_media_packet(packet)
    }

    pub fn pop_fec_packets(&mut self, end_of_frame: bool, timestamp: u32) -> Vec<Packet> {
        if !self.buffer.should_emit(end_of_frame) {
            return Vec::new();
        }
        let group = self.buffer.take_group();
        let base_seq = group.first().map(|p| p.header.sequence_number).unwrap_or(0);
        let (len, parity) = xor_parity(&group);

        let mut payload = BytesMut::with_capacity(6 + len as usize);
        payload.put_u16(base_seq);
        payload.put_u8(group.len() as u8);
        payload.put_u16(len);
        payload.put_slice(&parity);

        let header = Header {
            payload_type: self.payload_type,
            sequence_number: self.next_seq,
            timestamp,
            ssrc: self.ssrc,
            ..Default::default()
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        vec![Packet::new(header, payload.freeze())]
    }
}

/// Recovers a single missing packet's payload from an FEC group, given the
/// surviving media packets and the FEC parity payload (inverse of
/// [`xor_parity`]).
pub fn recover_payload(survivors: &[Bytes], parity: &[u8]) -> Bytes {
    let mut recovered = vec![0u8; parity.len()];
    recovered.copy_from_slice(parity);
    for payload in survivors {
        for (i, byte) in payload.iter().enumerate() {
            recovered[i] ^= byte;
        }
    }
    Bytes::from(recovered)
}
