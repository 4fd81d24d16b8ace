//! # DAQLink Core Library
//!
//! Serial communication and data-acquisition core for bench instruments.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial connection lifecycle with bounded reconnection
//! - Command framing and response read loops (line, tabbed, hex-binary)
//! - Hex telemetry decoding into multi-byte integers
//! - Capture dump sanitizing and outlier rejection
//! - Metric-prefix unit scaling for engineering readings
//!
//! ## Supported Instruments
//!
//! - Korad KA-series power supplies
//! - BK Precision 891 LCR meter
//! - DSM MD-90, PSC controller and spin-test driver
//! - Any other serial device via [`device::DeviceProfile::generic`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use daqlink_core::prelude::*;
//!
//! let manager = ConnectionManager::new();
//! let mut psc = Instrument::open(&manager, DeviceProfile::PSC, "/dev/ttyUSB0")?;
//!
//! // Read two signed 16-bit values from a machine-serial frame
//! let reading = psc.query_hex("TARG", 2, false, true)?;
//! if reading.outcome == ReadOutcome::Complete {
//!     println!("target: {:?}", reading.values);
//! }
//! ```

pub mod decode;
pub mod device;
pub mod error;
pub mod protocol;
pub mod units;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::decode::{CaptureBlock, CaptureLayout, DataRow, HexToken, OutlierFilter};
    pub use crate::device::{DeviceProfile, HexReading, Instrument};
    pub use crate::error::Error;
    pub use crate::protocol::{
        Command, ConnectionConfig, ConnectionManager, RawResponse, ReadOutcome, ResponseMode,
        Terminator,
    };
    pub use crate::units::{EngineeringValue, UnitScaler};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
