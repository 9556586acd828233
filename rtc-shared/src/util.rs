use rand::{Rng, rng};

/// Demultiplexes RTP from RTCP on a single transport as described in
/// RFC 5761 §4: RTCP packet types occupy \[192..223\], RTP payload types
/// never do.
pub fn is_rtcp(buf: &[u8]) -> bool {
    if buf.len() < 2 {
        return false;
    }
    let packet_type = buf[1];
    (192..=223).contains(&packet_type)
}

const RUNES_ALPHA_NUMBER: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates a random alphanumeric string, used to mint a default RTCP SDES
/// CNAME when the caller doesn't supply one.
pub fn rand_alpha_number(n: usize) -> String {
    let mut rng = rng();
    (0..n)
        .map(|_| {
            let idx = rng.random_range(0..RUNES_ALPHA_NUMBER.len());
            RUNES_ALPHA_NUMBER[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_rtcp_recognises_sender_and_receiver_reports() {
        assert!(is_rtcp(&[0x80, 200, 0, 0]));
        assert!(is_rtcp(&[0x80, 201, 0, 0]));
        assert!(!is_rtcp(&[0x80, 96, 0, 0]));
        assert!(!is_rtcp(&[0x80]));
    }

    #[test]
    fn rand_alpha_number_has_requested_length() {
        assert_eq!(rand_alpha_number(8).len(), 8);
    }
}
