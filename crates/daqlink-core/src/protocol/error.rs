//! Connection errors

use thiserror::Error;

/// Errors that can occur while opening or talking to a serial channel
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The port could not be opened
    #[error("Failed to open {port}: {reason}")]
    OpenFailed {
        /// Port that was being opened
        port: String,
        /// Reason reported by the opener
        reason: String,
    },

    /// The connection holds no channel (closed or mid-reconnect)
    #[error("Connection to {0} is closed")]
    NotOpen(String),

    /// Every reconnect attempt failed
    #[error("Lost connection to {port}: gave up after {attempts} reconnect attempts")]
    ReconnectExhausted {
        /// Port that was lost
        port: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Error from the `serialport` crate
    #[error("Serial port error: {0}")]
    Serial(String),

    /// I/O error on an open channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serialport::Error> for ConnectionError {
    fn from(e: serialport::Error) -> Self {
        ConnectionError::Serial(e.to_string())
    }
}

impl ConnectionError {
    /// True for errors that end the current operation for good
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::OpenFailed { .. } | ConnectionError::ReconnectExhausted { .. }
        )
    }
}
