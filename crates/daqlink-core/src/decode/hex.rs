//! Hex token decoding
//!
//! Machine-serial responses arrive one byte at a time and are rendered as
//! `0xNN` tokens. Multi-byte samples are rebuilt by grouping consecutive tokens,
//! optionally reversing each group (little-endian devices), and reading the
//! concatenated digits as a big-endian integer.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use super::DecodeError;

/// Widest group that still fits an `i64` sample
pub const MAX_GROUP_SIZE: usize = 8;

/// A single received byte in `0xNN` text form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HexToken(String);

impl HexToken {
    /// Wrap token text without validating it
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Render a byte the way it is logged off the wire (no zero padding, e.g. `0x5`)
    pub fn from_byte(byte: u8) -> Self {
        Self(format!("{:#x}", byte))
    }

    /// Parse and validate a token
    pub fn parse(text: &str) -> Option<Self> {
        let token = Self::new(text);
        token.value().map(|_| token)
    }

    /// Raw token text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex digits normalized to exactly two uppercase characters
    ///
    /// A one-digit byte (`0x5`) is zero padded to `05` so it cannot shift the
    /// alignment of the reconstructed word.
    pub fn digits(&self) -> Option<String> {
        let text = self.0.trim();
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);

        if digits.is_empty() || digits.len() > 2 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }

        Some(format!("{:0>2}", digits.to_ascii_uppercase()))
    }

    /// Byte value of the token
    pub fn value(&self) -> Option<u8> {
        self.digits()
            .and_then(|d| u8::from_str_radix(&d, 16).ok())
    }
}

impl fmt::Display for HexToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a whitespace-joined token dump into validated tokens
pub fn parse_tokens(text: &str) -> Result<Vec<HexToken>, DecodeError> {
    text.split_whitespace()
        .enumerate()
        .map(|(index, raw)| {
            HexToken::parse(raw).ok_or_else(|| DecodeError::InvalidHexToken {
                index,
                token: raw.to_string(),
            })
        })
        .collect()
}

/// Concatenate tokens into one uppercase, zero-padded hex string
pub fn hex_string(tokens: &[HexToken]) -> Result<String, DecodeError> {
    tokens
        .iter()
        .enumerate()
        .map(|(index, token)| {
            token.digits().ok_or_else(|| DecodeError::InvalidHexToken {
                index,
                token: token.to_string(),
            })
        })
        .collect()
}

/// Check that `group_size` bytes fit an `i64` result
///
/// Signed groups may be 1 to 8 bytes wide. Unsigned groups stop at 7 bytes,
/// since an 8-byte unsigned value does not fit in `i64`.
pub fn check_group_size(group_size: usize, signed: bool) -> Result<(), DecodeError> {
    let max = if signed { MAX_GROUP_SIZE } else { MAX_GROUP_SIZE - 1 };
    if group_size == 0 || group_size > max {
        return Err(DecodeError::InvalidGroupSize(group_size));
    }
    Ok(())
}

/// Rebuild integers from fixed-size groups of hex tokens
///
/// Groups never overlap; a trailing partial group is dropped. With
/// `reverse_group` each group is reversed before concatenation. The result is
/// read as a big-endian integer `group_size * 8` bits wide, sign extended when
/// `signed` is set.
pub fn decode(
    tokens: &[HexToken],
    group_size: usize,
    reverse_group: bool,
    signed: bool,
) -> Result<Vec<i64>, DecodeError> {
    check_group_size(group_size, signed)?;

    let mut values = Vec::with_capacity(tokens.len() / group_size);
    let mut buf = [0u8; MAX_GROUP_SIZE];

    for (group_index, group) in tokens.chunks_exact(group_size).enumerate() {
        let bytes = &mut buf[..group_size];
        for (offset, token) in group.iter().enumerate() {
            bytes[offset] = token.value().ok_or_else(|| DecodeError::InvalidHexToken {
                index: group_index * group_size + offset,
                token: token.to_string(),
            })?;
        }
        if reverse_group {
            bytes.reverse();
        }

        let value = if signed {
            BigEndian::read_int(bytes, group_size)
        } else {
            // at most 56 bits, always positive as i64
            BigEndian::read_uint(bytes, group_size) as i64
        };
        values.push(value);
    }

    Ok(values)
}

/// Render integers as the token stream a device would send
///
/// Inverse of [`decode`]: each value contributes its low `group_size` bytes,
/// big-endian, reversed per group when `reverse_group` is set.
pub fn encode(
    values: &[i64],
    group_size: usize,
    reverse_group: bool,
) -> Result<Vec<HexToken>, DecodeError> {
    if group_size == 0 || group_size > MAX_GROUP_SIZE {
        return Err(DecodeError::InvalidGroupSize(group_size));
    }

    let mut tokens = Vec::with_capacity(values.len() * group_size);
    for value in values {
        let be = value.to_be_bytes();
        let mut group = be[MAX_GROUP_SIZE - group_size..].to_vec();
        if reverse_group {
            group.reverse();
        }
        tokens.extend(group.into_iter().map(HexToken::from_byte));
    }
    Ok(tokens)
}

/// Device framing around a hex payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HexFrame {
    /// Leading header tokens excluded from decoding
    pub preamble: usize,
    /// Trailing tokens (checksum / terminator) excluded from decoding
    pub trailer: usize,
}

impl HexFrame {
    /// Unframed payload
    pub const NONE: HexFrame = HexFrame {
        preamble: 0,
        trailer: 0,
    };

    /// DSM machine-serial frame: 6 header tokens and one trailing token
    pub const MACHINE_SERIAL: HexFrame = HexFrame {
        preamble: 6,
        trailer: 1,
    };

    /// Payload tokens between preamble and trailer
    pub fn strip<'a>(&self, tokens: &'a [HexToken]) -> &'a [HexToken] {
        if tokens.len() <= self.preamble + self.trailer {
            return &[];
        }
        &tokens[self.preamble..tokens.len() - self.trailer]
    }
}

impl Default for HexFrame {
    fn default() -> Self {
        Self::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn toks(s: &str) -> Vec<HexToken> {
        parse_tokens(s).unwrap()
    }

    #[test]
    fn test_token_normalization() {
        assert_eq!(HexToken::from_byte(5).as_str(), "0x5");
        assert_eq!(HexToken::from_byte(5).digits().as_deref(), Some("05"));
        assert_eq!(HexToken::new("0xab").digits().as_deref(), Some("AB"));
        assert_eq!(HexToken::new("0X0").value(), Some(0));
        assert_eq!(HexToken::new("0x").value(), None);
        assert_eq!(HexToken::new("0x1ff").value(), None);
        assert_eq!(HexToken::new("0xzz").value(), None);
    }

    #[test]
    fn test_single_digit_bytes_keep_alignment() {
        // 0x1 0x2 must read as 0x0102, not 0x12
        let values = decode(&toks("0x1 0x2"), 2, false, false).unwrap();
        assert_eq!(values, vec![0x0102]);
    }

    #[test]
    fn test_reverse_group() {
        let values = decode(&toks("0x34 0x12"), 2, true, false).unwrap();
        assert_eq!(values, vec![0x1234]);
    }

    #[test]
    fn test_signed_decode() {
        assert_eq!(decode(&toks("0xff 0xfe"), 2, false, true).unwrap(), vec![-2]);
        assert_eq!(decode(&toks("0xff 0xfe"), 2, false, false).unwrap(), vec![0xfffe]);
        assert_eq!(
            decode(&toks("0xff 0xff 0xff 0x85"), 4, false, true).unwrap(),
            vec![-123]
        );
    }

    #[test]
    fn test_partial_group_dropped() {
        let values = decode(&toks("0x0 0x1 0x0 0x2 0x7"), 2, false, false).unwrap();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_invalid_token_aborts() {
        let tokens = vec![HexToken::new("0x01"), HexToken::new("0xq1")];
        let err = decode(&tokens, 1, false, false).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidHexToken {
                index: 1,
                token: "0xq1".to_string()
            }
        );
    }

    #[test]
    fn test_group_size_bounds() {
        assert_eq!(
            decode(&[], 0, false, false).unwrap_err(),
            DecodeError::InvalidGroupSize(0)
        );
        assert_eq!(
            decode(&[], 9, false, false).unwrap_err(),
            DecodeError::InvalidGroupSize(9)
        );
    }

    #[test]
    fn test_eight_byte_groups() {
        let tokens = toks("0xff 0xff 0xff 0xff 0xff 0xff 0xff 0xfe");
        assert_eq!(
            decode(&tokens, 8, false, false).unwrap_err(),
            DecodeError::InvalidGroupSize(8)
        );
        assert_eq!(decode(&tokens, 8, false, true).unwrap(), vec![-2]);

        let widest = toks("0xff 0xff 0xff 0xff 0xff 0xff 0xfe");
        assert_eq!(decode(&widest, 7, false, false).unwrap(), vec![0xff_ffff_ffff_fffe]);
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&toks("0xa 0x1f 0x0")).unwrap(), "0A1F00");
    }

    #[test]
    fn test_frame_strip() {
        let tokens = toks("0xaa 0x1 0x2 0x3 0x4 0x5 0x10 0x20 0xcc");
        let payload = HexFrame::MACHINE_SERIAL.strip(&tokens);
        assert_eq!(payload, &toks("0x10 0x20")[..]);

        assert!(HexFrame::MACHINE_SERIAL.strip(&tokens[..7]).is_empty());
        assert_eq!(HexFrame::NONE.strip(&tokens).len(), tokens.len());
    }

    #[test]
    fn test_parse_tokens_rejects_garbage() {
        assert!(matches!(
            parse_tokens("0x01 nope"),
            Err(DecodeError::InvalidHexToken { index: 1, .. })
        ));
    }
}
