//! Connection management
//!
//! Handles the serial channel lifecycle: open, flush, timeout changes,
//! reconnection after comm loss, and close.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    serial::{clear_buffers, list_ports, open_port, PortInfo},
    config::duration_ms, CancelToken, Command, ConnectionConfig, ConnectionError, PortChannel, RawResponse,
    ResponseMode, ResponseReader, SerialChannel, MAX_RECONNECT_ATTEMPTS,
};

/// Delay between reconnect attempts
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Creates channels from a [`ConnectionConfig`]
///
/// [`SystemPortOpener`] opens real ports; tests plug in
/// [`MockOpener`](super::mock::MockOpener).
pub trait PortOpener: Send + Sync {
    /// Open a channel configured from `config`
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SerialChannel>, ConnectionError>;
}

/// Opens system serial ports through `serialport`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SerialChannel>, ConnectionError> {
        let mut port = open_port(config)?;
        clear_buffers(port.as_mut())?;
        Ok(Box::new(PortChannel::new(port)))
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connected and ready
    Connected,
    /// Last open, flush, write or read failed
    Error,
}

/// An open (or recoverable) connection to one device
pub struct DeviceConnection {
    /// Channel handle, `None` while closed
    channel: Option<Box<dyn SerialChannel>>,
    /// Current connection state
    state: ConnectionState,
    /// Parameters used for every (re)open
    config: ConnectionConfig,
    /// Metrics: cumulative bytes sent & received
    tx_bytes: u64,
    rx_bytes: u64,
}

impl std::fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("port", &self.config.port_name)
            .field("state", &self.state)
            .field("tx_bytes", &self.tx_bytes)
            .field("rx_bytes", &self.rx_bytes)
            .finish()
    }
}

impl DeviceConnection {
    fn new(config: ConnectionConfig, channel: Box<dyn SerialChannel>) -> Self {
        Self {
            channel: Some(channel),
            state: ConnectionState::Connected,
            config,
            tx_bytes: 0,
            rx_bytes: 0,
        }
    }

    /// Parameters used for every (re)open
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Name of the port this connection targets
    pub fn port_name(&self) -> &str {
        &self.config.port_name
    }

    /// Overall response timeout
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a channel is held
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Get cumulative tx/rx byte counters
    pub fn counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.rx_bytes)
    }

    fn channel_mut(&mut self) -> Result<&mut (dyn SerialChannel + 'static), ConnectionError> {
        match self.channel.as_mut() {
            Some(channel) => Ok(channel.as_mut()),
            None => Err(ConnectionError::NotOpen(self.config.port_name.clone())),
        }
    }

    /// Bytes received and not yet read
    pub fn pending_input(&mut self) -> Result<u32, ConnectionError> {
        Ok(self.channel_mut()?.bytes_to_read()?)
    }

    /// Write raw bytes and push them out
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let channel = self.channel_mut()?;
        let result = channel.write_all(bytes).and_then(|_| channel.flush());
        if let Err(e) = result {
            self.state = ConnectionState::Error;
            return Err(e.into());
        }

        debug!("write_bytes: sent {} bytes: {:02x?}", bytes.len(), bytes);
        self.tx_bytes = self.tx_bytes.saturating_add(bytes.len() as u64);
        Ok(())
    }

    /// Write a framed command
    pub fn write_command(&mut self, command: &Command) -> Result<(), ConnectionError> {
        self.write_bytes(&command.to_bytes())
    }

    /// Read one response with the given loop
    pub fn read_response(
        &mut self,
        mode: ResponseMode,
        cancel: Option<&CancelToken>,
    ) -> Result<RawResponse, ConnectionError> {
        let timeout = self.config.timeout();
        let channel = self.channel_mut()?;
        let mut reader = ResponseReader::new(channel, timeout);
        if let Some(token) = cancel {
            reader = reader.with_cancel(token.clone());
        }
        let response = match reader.read(mode) {
            Ok(response) => response,
            Err(e) => {
                self.state = ConnectionState::Error;
                return Err(e);
            }
        };

        self.rx_bytes = self.rx_bytes.saturating_add(response.bytes().len() as u64);
        Ok(response)
    }

    fn shutdown(&mut self) {
        if self.channel.take().is_some() {
            info!("Closed {}", self.config.port_name);
        }
        self.state = ConnectionState::Disconnected;
    }
}

impl Drop for DeviceConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Opens, recovers and closes [`DeviceConnection`]s
#[derive(Clone)]
pub struct ConnectionManager {
    opener: Arc<dyn PortOpener>,
    max_reconnect_attempts: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Manager for system serial ports
    pub fn new() -> Self {
        Self::with_opener(Box::new(SystemPortOpener))
    }

    /// Manager using a custom channel source
    pub fn with_opener(opener: Box<dyn PortOpener>) -> Self {
        Self {
            opener: Arc::from(opener),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Cap the number of reopen attempts made by [`recover`](Self::recover)
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the pause between reopen attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Reopen attempts made by [`recover`](Self::recover) before giving up
    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    /// List available serial ports
    pub fn list_ports() -> Vec<PortInfo> {
        list_ports()
    }

    /// Open a connection
    pub fn open(&self, config: ConnectionConfig) -> Result<DeviceConnection, ConnectionError> {
        let channel = self.opener.open(&config)?;
        info!(
            "Opened {} at {} baud (timeout {}ms)",
            config.port_name, config.baud_rate, config.timeout_ms
        );
        Ok(DeviceConnection::new(config, channel))
    }

    /// One attempt to reopen the channel from the stored config
    pub fn reconnect(&self, conn: &mut DeviceConnection) -> Result<(), ConnectionError> {
        // Release the old handle first so the port is free to reopen
        conn.channel = None;
        conn.state = ConnectionState::Disconnected;

        match self.opener.open(&conn.config) {
            Ok(channel) => {
                conn.channel = Some(channel);
                conn.state = ConnectionState::Connected;
                info!("Reconnected to {}", conn.config.port_name);
                Ok(())
            }
            Err(e) => {
                conn.state = ConnectionState::Error;
                Err(e)
            }
        }
    }

    /// Reconnect with bounded retries
    pub fn recover(&self, conn: &mut DeviceConnection) -> Result<(), ConnectionError> {
        for attempt in 1..=self.max_reconnect_attempts {
            match self.reconnect(conn) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Reconnect attempt {}/{} to {} failed: {}",
                        attempt, self.max_reconnect_attempts, conn.config.port_name, e
                    );
                    if attempt < self.max_reconnect_attempts && !self.retry_delay.is_zero() {
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        Err(ConnectionError::ReconnectExhausted {
            port: conn.config.port_name.clone(),
            attempts: self.max_reconnect_attempts,
        })
    }

    /// Discard unread input and unsent output
    pub fn flush(&self, conn: &mut DeviceConnection) -> Result<(), ConnectionError> {
        let channel = conn.channel_mut()?;
        let result = channel
            .clear_input_buffer()
            .and_then(|_| channel.clear_output_buffer());
        if let Err(e) = result {
            conn.state = ConnectionState::Error;
            return Err(e.into());
        }
        Ok(())
    }

    /// Change the response timeout, on the open channel and for later reopens
    pub fn set_timeout(
        &self,
        conn: &mut DeviceConnection,
        timeout: Duration,
    ) -> Result<(), ConnectionError> {
        conn.config.timeout_ms = duration_ms(timeout);
        let timeout = conn.config.timeout();
        if let Some(channel) = conn.channel.as_mut() {
            channel.set_timeout(timeout)?;
        }
        debug!("set_timeout: {} now {:?}", conn.config.port_name, timeout);
        Ok(())
    }

    /// Close a connection
    pub fn close(&self, mut conn: DeviceConnection) {
        conn.shutdown();
    }
}
