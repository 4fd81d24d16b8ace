//! Response reading
//!
//! A [`ResponseReader`] drives one read loop against a channel and reports how
//! it ended:
//!
//! ```text
//! Idle ──write──▶ Reading ──┬──▶ Complete
//!                           ├──▶ TimedOut
//!                           └──▶ Empty
//! ```
//!
//! Timeouts are outcomes, not errors. Only genuine I/O failures come back as
//! `Err`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ConnectionError, SerialChannel};
use crate::decode::HexToken;

/// How a device's answer is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseMode {
    /// Read lines until the receive queue is drained
    LineAccumulate,
    /// Read lines until a line read comes back empty
    TabbedAccumulate,
    /// Read raw bytes until an empty read follows data, or the timeout expires
    HexBinary,
}

/// Terminal state of a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadOutcome {
    /// The response ended normally
    Complete,
    /// The timeout expired before the response ended
    TimedOut,
    /// Nothing was received
    Empty,
}

/// Received data in arrival order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseData {
    /// Text lines, terminators included
    Lines(Vec<String>),
    /// Raw bytes
    Bytes(Vec<u8>),
}

/// Result of one command/response exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    /// Received data
    pub data: ResponseData,
    /// How the read ended
    pub outcome: ReadOutcome,
    /// Time spent reading
    pub elapsed: Duration,
}

impl RawResponse {
    /// Response for a command that expects no answer
    pub fn none() -> Self {
        Self {
            data: ResponseData::Bytes(Vec::new()),
            outcome: ReadOutcome::Empty,
            elapsed: Duration::ZERO,
        }
    }

    /// Whole response as text
    pub fn text(&self) -> String {
        match &self.data {
            ResponseData::Lines(lines) => lines.concat(),
            ResponseData::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Received lines, if this was a line-mode read
    pub fn lines(&self) -> Option<&[String]> {
        match &self.data {
            ResponseData::Lines(lines) => Some(lines),
            ResponseData::Bytes(_) => None,
        }
    }

    /// Received bytes
    pub fn bytes(&self) -> Vec<u8> {
        match &self.data {
            ResponseData::Lines(lines) => lines.concat().into_bytes(),
            ResponseData::Bytes(bytes) => bytes.clone(),
        }
    }

    /// One `0xNN` token per received byte
    pub fn hex_tokens(&self) -> Vec<HexToken> {
        self.bytes().into_iter().map(HexToken::from_byte).collect()
    }

    /// Space-joined token dump, e.g. `0x1 0xa 0xff`
    pub fn hex_dump(&self) -> String {
        self.hex_tokens()
            .iter()
            .map(HexToken::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Uppercase, zero-padded hex rendering of every received byte
    pub fn hex_string(&self) -> String {
        self.bytes().iter().map(|b| format!("{:02X}", b)).collect()
    }

    /// Whether the read ended normally
    pub fn is_complete(&self) -> bool {
        self.outcome == ReadOutcome::Complete
    }

    /// Whether the read hit the timeout or was cancelled
    pub fn timed_out(&self) -> bool {
        self.outcome == ReadOutcome::TimedOut
    }
}

/// Shared flag that ends an in-progress binary read at its next poll
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a previous cancellation
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read loop over a borrowed channel
pub struct ResponseReader<'a> {
    channel: &'a mut dyn SerialChannel,
    timeout: Duration,
    cancel: Option<CancelToken>,
}

impl<'a> ResponseReader<'a> {
    /// Reader over `channel` with an overall `timeout` per response
    pub fn new(channel: &'a mut dyn SerialChannel, timeout: Duration) -> Self {
        Self {
            channel,
            timeout,
            cancel: None,
        }
    }

    /// Attach a cancellation token
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Run the loop for `mode`
    pub fn read(&mut self, mode: ResponseMode) -> Result<RawResponse, ConnectionError> {
        match mode {
            ResponseMode::LineAccumulate => self.read_until_drained(),
            ResponseMode::TabbedAccumulate => self.read_until_blank(),
            ResponseMode::HexBinary => self.read_binary(),
        }
    }

    /// Read one line: up to and including `\n`, or whatever arrived before an
    /// empty read or the timeout
    pub fn read_line(&mut self) -> Result<String, ConnectionError> {
        let start = Instant::now();
        let mut line = Vec::new();

        while let Some(byte) = self.channel.read_unit()? {
            line.push(byte);
            if byte == b'\n' || start.elapsed() > self.timeout {
                break;
            }
        }

        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Line-accumulate: keep reading lines while the channel reports buffered bytes
    pub fn read_until_drained(&mut self) -> Result<RawResponse, ConnectionError> {
        let start = Instant::now();
        let mut lines = Vec::new();

        loop {
            let line = self.read_line()?;
            if !line.is_empty() {
                lines.push(line);
            }
            if self.channel.bytes_to_read()? == 0 || self.cancelled() {
                break;
            }
        }

        debug!("read_until_drained: {} lines in {:?}", lines.len(), start.elapsed());
        Ok(lines_response(lines, start.elapsed()))
    }

    /// Tabbed-accumulate: keep reading lines until one comes back empty
    pub fn read_until_blank(&mut self) -> Result<RawResponse, ConnectionError> {
        let start = Instant::now();
        let mut lines = Vec::new();

        loop {
            let line = self.read_line()?;
            if line.is_empty() {
                break;
            }
            lines.push(line);
            if self.cancelled() {
                break;
            }
        }

        debug!("read_until_blank: {} lines in {:?}", lines.len(), start.elapsed());
        Ok(lines_response(lines, start.elapsed()))
    }

    /// Hex-binary: read single units until an empty read follows data
    ///
    /// An empty read right after data is taken as end of frame. A device that
    /// pauses mid-burst for longer than one read timeout is cut short here.
    pub fn read_binary(&mut self) -> Result<RawResponse, ConnectionError> {
        let start = Instant::now();
        let mut bytes = Vec::new();
        let mut prev_data = false;
        let mut unit = self.channel.read_unit()?;

        let outcome = loop {
            if prev_data && unit.is_none() {
                break ReadOutcome::Complete;
            }
            if start.elapsed() > self.timeout || self.cancelled() {
                break ReadOutcome::TimedOut;
            }
            if let Some(byte) = unit {
                prev_data = true;
                bytes.push(byte);
            }
            unit = self.channel.read_unit()?;
        };

        let elapsed = start.elapsed();
        debug!(
            "read_binary: {:?} after {:?}, {} bytes: {:02x?}",
            outcome,
            elapsed,
            bytes.len(),
            bytes
        );

        Ok(RawResponse {
            data: ResponseData::Bytes(bytes),
            outcome,
            elapsed,
        })
    }
}

fn lines_response(lines: Vec<String>, elapsed: Duration) -> RawResponse {
    let outcome = if lines.is_empty() {
        ReadOutcome::Empty
    } else {
        ReadOutcome::Complete
    };
    RawResponse {
        data: ResponseData::Lines(lines),
        outcome,
        elapsed,
    }
}
