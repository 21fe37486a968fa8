//! Frames and their display format

use std::fmt::{self, Write};
use std::time::Duration;

/// Lowercase hex pairs joined by `-`, e.g. `[0x0a, 0xff]` -> `"0a-ff"`
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push('-');
        }
        // Writing into a String cannot fail
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// One run of bytes closed by an idle gap
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Time since the reader started
    pub elapsed: Duration,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(elapsed: Duration, payload: Vec<u8>) -> Self {
        Self { elapsed, payload }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    pub fn payload_hex(&self) -> String {
        hex_encode(&self.payload)
    }
}

impl fmt::Display for Frame {
    /// `<elapsed, 4 decimals, right-aligned in 24 columns> : <hex>`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>24.4} : {}", self.elapsed_seconds(), self.payload_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_decode(text: &str) -> Vec<u8> {
        if text.is_empty() {
            return Vec::new();
        }
        text.split('-')
            .map(|pair| u8::from_str_radix(pair, 16).unwrap())
            .collect()
    }

    #[test]
    fn test_hex_encode() {
        assert_eq!(hex_encode(&[0x0a, 0xff]), "0a-ff");
        assert_eq!(hex_encode(&[0x00]), "00");
        assert_eq!(hex_encode(&[]), "");
    }

    #[test]
    fn test_hex_encode_fills_presized_buffer() {
        let bytes = [0xab; 64];
        let text = hex_encode(&bytes);
        assert_eq!(text.len(), 64 * 3 - 1);
        assert!(text.capacity() <= 64 * 3);
        assert!(text.split('-').all(|pair| pair == "ab"));
    }

    #[test]
    fn test_hex_encode_length_and_inverse() {
        let samples: [&[u8]; 4] = [&[0x01], &[0xde, 0xad, 0xbe, 0xef], &[0x7f; 31], &[0u8, 255, 16, 1]];
        for bytes in samples {
            let text = hex_encode(bytes);
            assert_eq!(text.len(), 3 * bytes.len() - 1);
            assert_eq!(hex_decode(&text), bytes);
        }

        let all: Vec<u8> = (0..=255).collect();
        assert_eq!(hex_decode(&hex_encode(&all)), all);
    }

    #[test]
    fn test_display_format() {
        let frame = Frame::new(Duration::from_millis(1500), vec![0x01, 0x02, 0x03]);
        let text = frame.to_string();

        assert_eq!(text, format!("{}1.5000 : 01-02-03", " ".repeat(18)));
        assert_eq!(text.find(" : "), Some(24));
    }

    #[test]
    fn test_display_empty_payload() {
        let frame = Frame::new(Duration::from_secs(12), Vec::new());
        assert_eq!(frame.to_string(), format!("{}12.0000 : ", " ".repeat(17)));
    }
}
