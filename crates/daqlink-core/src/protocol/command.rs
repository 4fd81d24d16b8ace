//! Command framing
//!
//! A [`Command`] is a text or binary payload plus the line terminator the
//! target device family expects.

use serde::{Deserialize, Serialize};

/// Line terminator appended to outgoing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Terminator {
    /// Binary passthrough, nothing appended
    #[default]
    None,
    /// `\r`
    Cr,
    /// `\n`
    Lf,
    /// `\n\r` (LF first, as the instruments expect)
    CrLf,
}

impl Terminator {
    /// Wire bytes for this terminator
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Terminator::None => b"",
            Terminator::Cr => b"\r",
            Terminator::Lf => b"\n",
            Terminator::CrLf => b"\n\r",
        }
    }
}

/// Command body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// ASCII/UTF-8 command text
    Text(String),
    /// Raw bytes sent as-is
    Binary(Vec<u8>),
}

/// A framed outgoing command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command body
    pub payload: Payload,
    /// Terminator appended after the body
    pub terminator: Terminator,
    /// Whether the device answers this command
    pub expects_response: bool,
}

impl Command {
    /// Text command with the given terminator
    pub fn text(text: impl Into<String>, terminator: Terminator) -> Self {
        Self {
            payload: Payload::Text(text.into()),
            terminator,
            expects_response: true,
        }
    }

    /// Binary command, sent without a terminator
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Payload::Binary(bytes.into()),
            terminator: Terminator::None,
            expects_response: true,
        }
    }

    /// Mark the command as fire-and-forget
    pub fn no_response(mut self) -> Self {
        self.expects_response = false;
        self
    }

    /// Bytes written to the channel: body followed by terminator
    pub fn to_bytes(&self) -> Vec<u8> {
        let body: &[u8] = match &self.payload {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes.as_slice(),
        };
        let mut bytes = Vec::with_capacity(body.len() + 2);
        bytes.extend_from_slice(body);
        bytes.extend_from_slice(self.terminator.as_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_terminator_bytes() {
        assert_eq!(Command::text("VER", Terminator::Cr).to_bytes(), b"VER\r".to_vec());
        assert_eq!(Command::text("VER", Terminator::Lf).to_bytes(), b"VER\n".to_vec());
        assert_eq!(Command::text("*IDN?", Terminator::CrLf).to_bytes(), b"*IDN?\n\r".to_vec());
        assert_eq!(Command::text("OUT1", Terminator::None).to_bytes(), b"OUT1".to_vec());
    }

    #[test]
    fn test_binary_passthrough() {
        let cmd = Command::binary(vec![0x02, 0x10, 0x03]);
        assert_eq!(cmd.terminator, Terminator::None);
        assert_eq!(cmd.to_bytes(), vec![0x02, 0x10, 0x03]);
        assert!(cmd.expects_response);
        assert!(!cmd.no_response().expects_response);
    }
}
