//! Serial Instrument Communication
//!
//! Byte-level plumbing shared by every instrument driver: channel abstraction,
//! connection lifecycle, command framing and the response read loops.
//!
//! All I/O is synchronous and blocking. Timeouts are reported as
//! [`ReadOutcome::TimedOut`], never as errors.

pub mod channel;
pub mod command;
pub mod config;
mod connection;
mod error;
pub mod mock;
pub mod reader;
pub mod serial;

pub use channel::{PortChannel, SerialChannel};
pub use command::{Command, Payload, Terminator};
pub use config::{ConfigError, ConnectionConfig, Parity};
pub use connection::{
    ConnectionManager, ConnectionState, DeviceConnection, PortOpener, SystemPortOpener,
};
pub use error::ConnectionError;
pub use reader::{CancelToken, RawResponse, ReadOutcome, ResponseData, ResponseMode, ResponseReader};
pub use serial::{clear_buffers, list_ports, open_port, PortInfo};

/// Default baud rate for instrument communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default read timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Reconnect attempts before comm loss is reported as fatal
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
