//! Final-state reporting: content digest and the result line.

use md5::{Digest, Md5};
use std::fmt::Write;
use std::time::Duration;

/// MD5 over the final interior bytes, rendered as 32 uppercase hex chars.
pub fn digest_hex(bytes: &[u8]) -> String {
    let digest = Md5::digest(bytes);
    let mut out = String::with_capacity(32);
    for byte in digest {
        write!(out, "{:02X}", byte).expect("writing to a String cannot fail");
    }
    out
}

/// The single result line: digest of the final grid and the wall-clock time
/// for upload + compute + download, milliseconds with one decimal.
pub fn result_line(digest: &str, elapsed: Duration) -> String {
    format!("hash gpu: {}\ttime: {:.1} ms", digest, elapsed.as_secs_f64() * 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable() {
        let data = vec![0u8, 1, 1, 0, 1];
        assert_eq!(digest_hex(&data), digest_hex(&data.clone()));
    }

    #[test]
    fn test_digest_format() {
        let hex = digest_hex(&[1u8; 64]);
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_single_bit_flip_changes_digest() {
        let mut data = vec![0u8; 256];
        let before = digest_hex(&data);
        data[100] ^= 1;
        assert_ne!(digest_hex(&data), before);
    }

    #[test]
    fn test_known_vector() {
        // RFC 1321 test vector: MD5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(digest_hex(&[]), "D41D8CD98F00B204E9800998ECF8427E");
    }

    #[test]
    fn test_result_line_format() {
        let line = result_line("D41D8CD98F00B204E9800998ECF8427E", Duration::from_micros(12_340));
        assert_eq!(line, "hash gpu: D41D8CD98F00B204E9800998ECF8427E\ttime: 12.3 ms");
    }
}
