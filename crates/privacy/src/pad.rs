//! Message-length padding.
//!
//! Messages are padded up to the next 256-byte boundary with random filler so
//! that observed ciphertext sizes leak only a coarse length bucket. The final
//! byte of the padded buffer records the padding size; the whole buffer is
//! base-64 encoded for transport.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;

/// Padded buffers are always a positive multiple of this many bytes.
pub const PADDING_BLOCK: usize = 256;

/// Pad a UTF-8 message and base-64 encode the result.
///
/// Layout: `message || random filler || pad_size`. The padding size is stored
/// as a single octet, so a full block of padding (256) wraps to 0 and is
/// restored by [`unpad`].
pub fn pad(message: &str) -> String {
    let msg = message.as_bytes();
    let padded_len = ((msg.len() + 1 + PADDING_BLOCK - 1) / PADDING_BLOCK) * PADDING_BLOCK;

    let mut buf = vec![0u8; padded_len];
    buf[..msg.len()].copy_from_slice(msg);
    rand::rngs::OsRng.fill_bytes(&mut buf[msg.len()..padded_len - 1]);
    buf[padded_len - 1] = (padded_len - msg.len()) as u8;

    STANDARD.encode(&buf)
}

/// Invert [`pad`]. Inputs that do not look like a padded buffer are returned
/// unchanged so that peers with padding disabled stay interoperable.
pub fn unpad(data: &str) -> String {
    let raw = match STANDARD.decode(data) {
        Ok(raw) if !raw.is_empty() => raw,
        _ => return data.to_string(),
    };

    let mut pad_size = raw[raw.len() - 1] as usize;
    if pad_size == 0 {
        pad_size = PADDING_BLOCK;
    }
    if pad_size > raw.len() {
        return data.to_string();
    }

    match std::str::from_utf8(&raw[..raw.len() - pad_size]) {
        Ok(s) => s.to_string(),
        Err(_) => data.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        for msg in ["", "a", "hello world", "ünïcødé ✓", &"x".repeat(1000)] {
            assert_eq!(unpad(&pad(msg)), msg);
        }
    }

    #[test]
    fn test_block_multiple() {
        for msg in ["", "a", &"b".repeat(255), &"c".repeat(256), &"d".repeat(700)] {
            let raw = STANDARD.decode(pad(msg)).unwrap();
            assert!(!raw.is_empty());
            assert_eq!(raw.len() % PADDING_BLOCK, 0);
        }
    }

    #[test]
    fn test_short_messages_share_a_bucket() {
        let a = pad("a");
        let b = pad(&"a".repeat(200));
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_unpadded_input_passes_through() {
        assert_eq!(unpad("not base64 at all!"), "not base64 at all!");
        // Valid base64 but implausible padding byte.
        let bogus = STANDARD.encode([1u8, 2, 200]);
        assert_eq!(unpad(&bogus), bogus);
    }
}
