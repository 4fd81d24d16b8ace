//! Telemetry Decoding
//!
//! Turns raw instrument output into numbers:
//! - [`hex`]: machine-serial hex token streams → multi-byte integers
//! - [`capture`]: tab/CRLF capture dumps → metadata, header and numeric rows

pub mod capture;
pub mod hex;

use thiserror::Error;

pub use capture::{
    filter_outliers, parse_capture, CaptureBlock, CaptureLayout, DataRow, OutlierFilter,
};
pub use hex::{check_group_size, decode, encode, parse_tokens, HexFrame, HexToken};

/// Errors that can occur while decoding device output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// A token is not a single `0x`-prefixed byte
    #[error("Invalid hex token '{token}' at position {index}")]
    InvalidHexToken {
        /// Position of the token in the stream
        index: usize,
        /// Token text as received
        token: String,
    },

    /// Group size outside 1..=8 bytes signed or 1..=7 bytes unsigned
    #[error("Invalid group size {0}: must be 1 to 8 bytes signed, 1 to 7 bytes unsigned")]
    InvalidGroupSize(usize),

    /// The capture ends before its column header row
    #[error("Capture block has {records} records, header row {header_row} is missing")]
    MissingHeader {
        /// Records present in the block
        records: usize,
        /// Zero-based index the header was expected at
        header_row: usize,
    },
}
