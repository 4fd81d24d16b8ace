//! Crate-level error type
//!
//! Instrument operations cross several layers, so they return [`Error`], which
//! wraps each layer's own error without losing it.

use thiserror::Error;

use crate::decode::DecodeError;
use crate::protocol::{ConfigError, ConnectionError};
use crate::units::UnitError;

/// Errors returned by [`Instrument`](crate::device::Instrument) operations
#[derive(Error, Debug)]
pub enum Error {
    /// Opening, reconnecting or talking to the port failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Device output could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A reading could not be parsed or rescaled
    #[error(transparent)]
    Unit(#[from] UnitError),

    /// A connection configuration could not be loaded or saved
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// True when the device is gone and retrying will not help
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connection(e) if e.is_fatal())
    }
}

/// Result alias for instrument operations
pub type Result<T> = std::result::Result<T, Error>;
