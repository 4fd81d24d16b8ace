//! Connection configuration
//!
//! Serial parameters are supplied by an external configuration loader as JSON;
//! any field left out takes the usual 8N1 default.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// Errors that can occur while loading a connection configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The JSON is malformed or has a field of the wrong type
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(p: Parity) -> Self {
        match p {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Serial channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port name (e.g. "/dev/ttyUSB0" or "COM3")
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character (5-8)
    pub byte_size: u8,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Read timeout in milliseconds
    pub timeout_ms: u64,
    /// Receive buffer size hint in bytes
    pub buffer_size: Option<usize>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            byte_size: 8,
            parity: Parity::None,
            stop_bits: 1,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            buffer_size: None,
        }
    }
}

impl ConnectionConfig {
    /// 8N1 configuration for a port at the given baud rate
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Self::default()
        }
    }

    /// Builder-style timeout override
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_ms(timeout);
        self
    }

    /// Builder-style receive buffer hint
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Read timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Whole milliseconds in `duration`, rounded up so short timeouts stay non-zero
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let cfg = ConnectionConfig::from_json_str(r#"{"port_name": "COM4", "baud_rate": 57600}"#)
            .unwrap();
        assert_eq!(cfg.port_name, "COM4");
        assert_eq!(cfg.baud_rate, 57600);
        assert_eq!(cfg.byte_size, 8);
        assert_eq!(cfg.parity, Parity::None);
        assert_eq!(cfg.stop_bits, 1);
        assert_eq!(cfg.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(cfg.buffer_size, None);
    }

    #[test]
    fn test_parity_names() {
        let cfg = ConnectionConfig::from_json_str(r#"{"parity": "even"}"#).unwrap();
        assert_eq!(cfg.parity, Parity::Even);
        assert!(ConnectionConfig::from_json_str(r#"{"parity": "mark"}"#).is_err());
    }

    #[test]
    fn test_builders() {
        let cfg = ConnectionConfig::new("/dev/ttyUSB0", 921600)
            .with_timeout(Duration::from_millis(250))
            .with_buffer_size(256_000);
        assert_eq!(cfg.timeout_ms, 250);
        assert_eq!(cfg.buffer_size, Some(256_000));
    }

    #[test]
    fn test_timeout_rounds_up_to_whole_ms() {
        let cfg = ConnectionConfig::new("COM1", 9600).with_timeout(Duration::from_micros(500));
        assert_eq!(cfg.timeout_ms, 1);

        let cfg = cfg.with_timeout(Duration::from_micros(1500));
        assert_eq!(cfg.timeout_ms, 2);

        let cfg = cfg.with_timeout(Duration::from_millis(250));
        assert_eq!(cfg.timeout_ms, 250);
        assert_eq!(duration_ms(Duration::ZERO), 0);
    }
}
