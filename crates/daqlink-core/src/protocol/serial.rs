//! Serial port handling
//!
//! Provides low-level serial port access for instrument communication.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use tracing::debug;

use super::{ConnectionConfig, ConnectionError};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => Self {
                name: info.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key placing USB-serial adapters first:
///  - ttyUSB* ports (sorted numerically by suffix)
///  - then ttyACM* ports (sorted numerically)
///  - then everything else by name (COM ports included)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("COM") {
        if let Ok(num) = rest.parse::<usize>() {
            return (2, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Linux-only: pick up adapters the enumeration API missed
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

fn data_bits(bits: u8) -> Result<serialport::DataBits, String> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        other => Err(format!("unsupported byte size {}", other)),
    }
}

fn stop_bits(bits: u8) -> Result<serialport::StopBits, String> {
    match bits {
        1 => Ok(serialport::StopBits::One),
        2 => Ok(serialport::StopBits::Two),
        other => Err(format!("unsupported stop bits {}", other)),
    }
}

/// Open and configure a serial port from a [`ConnectionConfig`]
pub fn open_port(config: &ConnectionConfig) -> Result<Box<dyn SerialPort>, ConnectionError> {
    let open_failed = |reason: String| ConnectionError::OpenFailed {
        port: config.port_name.clone(),
        reason,
    };

    let port = serialport::new(&config.port_name, config.baud_rate)
        .data_bits(data_bits(config.byte_size).map_err(open_failed)?)
        .parity(config.parity.into())
        .stop_bits(stop_bits(config.stop_bits).map_err(open_failed)?)
        .flow_control(serialport::FlowControl::None)
        .timeout(config.timeout())
        .open()
        .map_err(|e| open_failed(e.to_string()))?;

    if let Some(size) = config.buffer_size {
        // serialport exposes no portable driver buffer setter
        debug!(
            "open_port: {} requested a {} byte receive buffer (left to the driver)",
            config.port_name, size
        );
    }

    debug!(
        "open_port: opened {} at {} baud, {}{:?}{}, timeout {}ms",
        config.port_name,
        config.baud_rate,
        config.byte_size,
        config.parity,
        config.stop_bits,
        config.timeout_ms
    );

    Ok(port)
}

/// Clear both serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), ConnectionError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| ConnectionError::Serial(e.to_string()))
}
