//! RTP fixed header (RFC 3550 §5.1) and one-/two-byte header extensions
//! (RFC 8285).

use bytes::{Buf, BufMut, Bytes};

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

pub const HEADER_LENGTH: usize = 4;
pub const VERSION: u8 = 2;
pub const SSRC_LENGTH: usize = 4;
pub const CSRC_LENGTH: usize = 4;

/// One-byte header extension profile id (RFC 8285 §4.2).
pub const EXTENSION_PROFILE_ONE_BYTE: u16 = 0xBEDE;
/// Two-byte header extension profile ids occupy 0x1000..=0x100F (RFC 8285 §4.3).
pub const EXTENSION_PROFILE_TWO_BYTE: u16 = 0x1000;

fn is_two_byte_profile(profile: u16) -> bool {
    (EXTENSION_PROFILE_TWO_BYTE..=0x100F).contains(&profile)
}

/// A single, still-opaque extension element: an id (1-14 one-byte, 1-255
/// two-byte; id 15 is reserved as the one-byte "stop" marker and is never
/// stored) and its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionElement {
    pub id: u8,
    pub payload: Bytes,
}

/// RTP fixed header plus CSRC list and raw (undecoded) header extensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: u8,
    pub padding: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension_profile: u16,
    pub extensions: Vec<ExtensionElement>,
    /// True once any extension has been written; distinguishes "no
    /// extension header at all" from "extension header with zero elements".
    pub extension: bool,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            version: VERSION,
            padding: false,
            marker: false,
            payload_type: 0,
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0,
            csrc: Vec::new(),
            extension_profile: EXTENSION_PROFILE_ONE_BYTE,
            extensions: Vec::new(),
            extension: false,
        }
    }
}

impl Header {
    /// Returns the payload of the first element registered under `id`, if any.
    pub fn get_extension(&self, id: u8) -> Option<&Bytes> {
        self.extensions.iter().find(|e| e.id == id).map(|e| &e.payload)
    }

    /// Replaces (or inserts) the extension registered under `id`. Returns an
    /// error if `id` is out of range for the header's current profile.
    pub fn set_extension(&mut self, id: u8, payload: Bytes) -> Result<()> {
        if is_two_byte_profile(self.extension_profile) {
            if id == 0 {
                return Err(Error::ErrInvalidExtensionHeader);
            }
        } else if !(1..=14).contains(&id) {
            return Err(Error::ErrInvalidExtensionHeader);
        }
        self.extension = true;
        if let Some(existing) = self.extensions.iter_mut().find(|e| e.id == id) {
            existing.payload = payload;
        } else {
            self.extensions.push(ExtensionElement { id, payload });
        }
        Ok(())
    }

    pub fn del_extension(&mut self, id: u8) -> bool {
        let before = self.extensions.len();
        self.extensions.retain(|e| e.id != id);
        self.extensions.len() != before
    }

    fn extensions_payload_len(&self) -> usize {
        if is_two_byte_profile(self.extension_profile) {
            self.extensions.iter().map(|e| 2 + e.payload.len()).sum()
        } else {
            self.extensions.iter().map(|e| 1 + e.payload.len()).sum()
        }
    }

    /// Length of the extension header block (4-byte profile+length word plus
    /// padded elements), zero if there is no extension.
    fn extension_header_len(&self) -> usize {
        if !self.extension {
            return 0;
        }
        let raw = self.extensions_payload_len();
        let padded = raw.div_ceil(4) * 4;
        4 + padded
    }
}

impl MarshalSize for Header {
    fn marshal_size(&self) -> usize {
        HEADER_LENGTH + SSRC_LENGTH + self.csrc.len() * CSRC_LENGTH + self.extension_header_len()
    }
}

impl Marshal for Header {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.marshal_size();
        if buf.len() < size {
            return Err(Error::ErrHeaderTooSmall);
        }
        if self.csrc.len() > 0xF {
            return Err(Error::ErrInvalidExtensionHeader);
        }

        let mut b = &mut buf[..];
        let mut first = (self.version << 6) | (self.csrc.len() as u8 & 0x0F);
        if self.padding {
            first |= 0x20;
        }
        if self.extension {
            first |= 0x10;
        }
        b.put_u8(first);

        let mut second = self.payload_type & 0x7F;
        if self.marker {
            second |= 0x80;
        }
        b.put_u8(second);

        b.put_u16(self.sequence_number);
        b.put_u32(self.timestamp);
        b.put_u32(self.ssrc);
        for csrc in &self.csrc {
            b.put_u32(*csrc);
        }

        if self.extension {
            b.put_u16(self.extension_profile);
            let raw = self.extensions_payload_len();
            let padded = raw.div_ceil(4) * 4;
            b.put_u16((padded / 4) as u16);

            let two_byte = is_two_byte_profile(self.extension_profile);
            for e in &self.extensions {
                if two_byte {
                    b.put_u8(e.id);
                    b.put_u8(e.payload.len() as u8);
                } else {
                    b.put_u8((e.id << 4) | (e.payload.len() as u8 & 0x0F));
                }
                b.put_slice(&e.payload);
            }
            for _ in 0..(padded - raw) {
                b.put_u8(0);
            }
        }

        Ok(size)
    }
}

impl Unmarshal for Header {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < HEADER_LENGTH + SSRC_LENGTH {
            return Err(Error::ErrHeaderTooSmall);
        }

        let first = buf.get_u8();
        let version = first >> 6;
        if version != VERSION {
            return Err(Error::ErrInvalidRtpVersion);
        }
        let padding = (first & 0x20) != 0;
        let extension = (first & 0x10) != 0;
        let cc = (first & 0x0F) as usize;

        let second = buf.get_u8();
        let marker = (second & 0x80) != 0;
        let payload_type = second & 0x7F;

        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        if buf.remaining() < cc * CSRC_LENGTH {
            return Err(Error::ErrHeaderTooSmall);
        }
        let mut csrc = Vec::with_capacity(cc);
        for _ in 0..cc {
            csrc.push(buf.get_u32());
        }

        let mut extension_profile = EXTENSION_PROFILE_ONE_BYTE;
        let mut extensions = Vec::new();

        if extension {
            if buf.remaining() < 4 {
                return Err(Error::ErrInvalidExtensionHeader);
            }
            extension_profile = buf.get_u16();
            let len_words = buf.get_u16() as usize;
            let ext_len = len_words * 4;
            if buf.remaining() < ext_len {
                return Err(Error::ErrInvalidExtensionHeader);
            }
            let mut body = buf.copy_to_bytes(ext_len);

            if is_two_byte_profile(extension_profile) {
                while body.remaining() >= 2 {
                    let id = body[0];
                    let len = body[1] as usize;
                    body.advance(2);
                    if id == 0 {
                        continue; // padding byte
                    }
                    if body.remaining() < len {
                        return Err(Error::ErrInvalidExtensionHeader);
                    }
                    extensions.push(ExtensionElement {
                        id,
                        payload: body.copy_to_bytes(len),
                    });
                }
            } else {
                while body.remaining() >= 1 {
                    let b0 = body[0];
                    if b0 == 0 {
                        body.advance(1); // padding byte
                        continue;
                    }
                    let id = b0 >> 4;
                    let len = (b0 & 0x0F) as usize + 1;
                    body.advance(1);
                    if id == 15 {
                        break; // reserved stop element
                    }
                    if body.remaining() < len {
                        return Err(Error::ErrInvalidExtensionHeader);
                    }
                    extensions.push(ExtensionElement {
                        id,
                        payload: body.copy_to_bytes(len),
                    });
                }
            }
        }

        Ok(Header {
            version,
            padding,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension_profile,
            extensions,
            extension,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_with_one_byte_extensions() {
        let mut h = Header {
            payload_type: 96,
            sequence_number: 1,
            timestamp: 1000,
            ssrc: 0xdead_beef,
            marker: true,
            csrc: vec![0x1111_1111],
            ..Default::default()
        };
        h.set_extension(1, Bytes::from_static(&[0xAA, 0xBB, 0xCC]))
            .unwrap();

        let mut buf = vec![0u8; h.marshal_size()];
        let n = h.marshal_to(&mut buf).unwrap();
        assert_eq!(n, buf.len());

        let mut cursor = Bytes::from(buf);
        let parsed = Header::unmarshal(&mut cursor).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn rejects_non_version_two() {
        let buf = [0x00u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut cursor = Bytes::copy_from_slice(&buf);
        assert!(matches!(
            Header::unmarshal(&mut cursor),
            Err(Error::ErrInvalidRtpVersion)
        ));
    }
}
