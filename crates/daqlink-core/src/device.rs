//! Instrument drivers
//!
//! A [`DeviceProfile`] is the static description of one instrument family:
//! serial parameters, command terminator, how its answers are delimited and
//! how its hex frames are laid out. An [`Instrument`] pairs a profile with an
//! open [`DeviceConnection`] and runs the flush → write → read exchange.
//!
//! ```rust,ignore
//! use daqlink_core::prelude::*;
//!
//! let manager = ConnectionManager::new();
//! let mut lcr = Instrument::open(&manager, DeviceProfile::BK891, "/dev/ttyUSB0")?;
//! let (primary, secondary) = lcr.read_pair("FETC?")?;
//! ```

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::decode::{
    check_group_size, decode, CaptureBlock, CaptureLayout, HexFrame, HexToken, OutlierFilter,
};
use crate::error::Result;
use crate::protocol::{
    CancelToken, Command, ConnectionConfig, ConnectionError, ConnectionManager, DeviceConnection,
    Parity, RawResponse, ReadOutcome, ResponseData, ResponseMode, Terminator,
};
use crate::units::{normalize, parse_reading_pair, EngineeringValue, UnitScaler};

/// Static description of an instrument family
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceProfile {
    /// Human-readable name
    pub name: &'static str,
    /// Line speed in baud
    pub baud_rate: u32,
    /// Data bits per character
    pub byte_size: u8,
    /// Parity mode
    pub parity: Parity,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Default read timeout in milliseconds
    pub timeout_ms: u64,
    /// Receive buffer size hint
    pub buffer_size: Option<usize>,
    /// Terminator appended to text commands
    pub terminator: Terminator,
    /// Read loop used by [`Instrument::query`]
    pub response_mode: ResponseMode,
    /// Framing around hex payloads
    pub hex_frame: HexFrame,
    /// Layout of capture dumps, for devices that produce them
    pub capture: Option<CaptureLayout>,
    /// Identification query, if the device has one
    pub id_command: Option<&'static str>,
}

impl DeviceProfile {
    /// Korad KA-series bench power supply
    pub const KORAD: DeviceProfile = DeviceProfile {
        name: "Korad power supply",
        baud_rate: 9600,
        terminator: Terminator::None,
        id_command: Some("*IDN?"),
        ..DeviceProfile::GENERIC
    };

    /// BK Precision 891 LCR meter
    pub const BK891: DeviceProfile = DeviceProfile {
        name: "BK Precision 891",
        baud_rate: 57600,
        terminator: Terminator::CrLf,
        id_command: Some("*IDN?"),
        ..DeviceProfile::GENERIC
    };

    /// DSM MD-90 motor driver
    pub const MD90: DeviceProfile = DeviceProfile {
        name: "DSM MD-90",
        baud_rate: 115200,
        terminator: Terminator::Cr,
        id_command: Some("VER"),
        ..DeviceProfile::GENERIC
    };

    /// DSM PSC controller, menu driven with machine-serial hex answers
    pub const PSC: DeviceProfile = DeviceProfile {
        name: "DSM PSC controller",
        baud_rate: 921600,
        terminator: Terminator::Cr,
        response_mode: ResponseMode::TabbedAccumulate,
        hex_frame: HexFrame::MACHINE_SERIAL,
        ..DeviceProfile::GENERIC
    };

    /// DSM spin-test driver with on-chip data capture
    pub const SPIN_TEST: DeviceProfile = DeviceProfile {
        name: "DSM spin-test driver",
        baud_rate: 921600,
        terminator: Terminator::Cr,
        buffer_size: Some(256_000),
        capture: Some(CaptureLayout::SPIN_TEST),
        ..DeviceProfile::GENERIC
    };

    const GENERIC: DeviceProfile = DeviceProfile {
        name: "generic serial device",
        baud_rate: crate::protocol::DEFAULT_BAUD_RATE,
        byte_size: 8,
        parity: Parity::None,
        stop_bits: 1,
        timeout_ms: crate::protocol::DEFAULT_TIMEOUT_MS,
        buffer_size: None,
        terminator: Terminator::Cr,
        response_mode: ResponseMode::LineAccumulate,
        hex_frame: HexFrame::NONE,
        capture: None,
        id_command: None,
    };

    /// 8N1 line-mode profile for an arbitrary device
    pub fn generic(baud_rate: u32, terminator: Terminator) -> Self {
        Self {
            baud_rate,
            terminator,
            ..Self::GENERIC
        }
    }

    /// Connection parameters for this device on `port`
    pub fn connection_config(&self, port: impl Into<String>) -> ConnectionConfig {
        ConnectionConfig {
            port_name: port.into(),
            baud_rate: self.baud_rate,
            byte_size: self.byte_size,
            parity: self.parity,
            stop_bits: self.stop_bits,
            timeout_ms: self.timeout_ms,
            buffer_size: self.buffer_size,
        }
    }
}

/// Decoded answer to a hex query
#[derive(Debug, Clone, PartialEq)]
pub struct HexReading {
    /// How the read ended
    pub outcome: ReadOutcome,
    /// Every received byte as a token, frame included
    pub tokens: Vec<HexToken>,
    /// Decoded payload values; empty unless the read completed
    pub values: Vec<i64>,
}

/// A device profile bound to an open connection
#[derive(Debug)]
pub struct Instrument {
    manager: ConnectionManager,
    connection: DeviceConnection,
    profile: DeviceProfile,
    /// Record responses in the transcript
    echo: bool,
    transcript: Vec<String>,
    cancel: Option<CancelToken>,
    scaler: UnitScaler,
}

impl Instrument {
    /// Open `port` with the profile's parameters
    pub fn open(
        manager: &ConnectionManager,
        profile: DeviceProfile,
        port: impl Into<String>,
    ) -> Result<Self> {
        Self::open_with_config(manager, profile, profile.connection_config(port))
    }

    /// Open with explicit connection parameters, e.g. loaded from a config file
    pub fn open_with_config(
        manager: &ConnectionManager,
        profile: DeviceProfile,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let connection = manager.open(config)?;
        info!("{} ready on {}", profile.name, connection.port_name());
        Ok(Self::new(connection, profile).with_manager(manager.clone()))
    }

    /// Wrap an already open connection
    ///
    /// Recovery after comm loss reopens system serial ports unless another
    /// manager is supplied with [`with_manager`](Self::with_manager).
    pub fn new(connection: DeviceConnection, profile: DeviceProfile) -> Self {
        Self {
            manager: ConnectionManager::new(),
            connection,
            profile,
            echo: true,
            transcript: Vec::new(),
            cancel: None,
            scaler: UnitScaler::new(),
        }
    }

    /// Use `manager` to recover from comm loss
    pub fn with_manager(mut self, manager: ConnectionManager) -> Self {
        self.manager = manager;
        self
    }

    /// Profile this instrument was opened with
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// The underlying connection
    pub fn connection(&self) -> &DeviceConnection {
        &self.connection
    }

    /// Frame text with the profile's terminator
    pub fn frame(&self, text: &str) -> Command {
        Command::text(text, self.profile.terminator)
    }

    /// Send a command without reading an answer
    pub fn send(&mut self, text: &str) -> Result<()> {
        let command = self.frame(text).no_response();
        self.execute(&command, self.profile.response_mode)?;
        Ok(())
    }

    /// Send a command and read the answer with the profile's default loop
    pub fn query(&mut self, text: &str) -> Result<RawResponse> {
        self.query_with(text, self.profile.response_mode)
    }

    /// Send a command and read the answer with an explicit loop
    pub fn query_with(&mut self, text: &str, mode: ResponseMode) -> Result<RawResponse> {
        let command = self.frame(text);
        self.execute(&command, mode)
    }

    /// Send raw bytes, no terminator, and read the answer
    pub fn send_raw(&mut self, bytes: &[u8], mode: ResponseMode) -> Result<RawResponse> {
        self.execute(&Command::binary(bytes), mode)
    }

    /// Run one exchange: flush, write, then read if an answer is expected
    ///
    /// An I/O failure at any step triggers bounded reconnection, after which
    /// the whole exchange is retried once.
    pub fn execute(&mut self, command: &Command, mode: ResponseMode) -> Result<RawResponse> {
        let response = match self.exchange(command, mode) {
            Err(ConnectionError::Io(e)) => {
                warn!(
                    "Exchange with {} failed ({}), reconnecting",
                    self.connection.port_name(),
                    e
                );
                self.manager.recover(&mut self.connection)?;
                self.exchange(command, mode)?
            }
            other => other?,
        };

        if !command.expects_response {
            return Ok(response);
        }
        if response.timed_out() {
            debug!(
                "{}: response timed out after {:?}",
                self.connection.port_name(),
                response.elapsed
            );
        }
        self.record(&response);
        Ok(response)
    }

    fn exchange(
        &mut self,
        command: &Command,
        mode: ResponseMode,
    ) -> std::result::Result<RawResponse, ConnectionError> {
        self.manager.flush(&mut self.connection)?;
        self.connection.write_command(command)?;
        if !command.expects_response {
            return Ok(RawResponse::none());
        }
        self.connection.read_response(mode, self.cancel.as_ref())
    }

    fn record(&mut self, response: &RawResponse) {
        if !self.echo {
            return;
        }
        let entry = match &response.data {
            ResponseData::Lines(_) => response.text(),
            ResponseData::Bytes(_) => response.hex_dump(),
        };
        info!("{}: {}", self.profile.name, entry.trim_end());
        self.transcript.push(entry);
    }

    /// Query in hex-binary mode and decode the framed payload
    pub fn query_hex(
        &mut self,
        text: &str,
        group_size: usize,
        reverse_group: bool,
        signed: bool,
    ) -> Result<HexReading> {
        check_group_size(group_size, signed)?;

        let response = self.query_with(text, ResponseMode::HexBinary)?;
        let tokens = response.hex_tokens();
        let values = if response.is_complete() {
            decode(self.profile.hex_frame.strip(&tokens), group_size, reverse_group, signed)?
        } else {
            Vec::new()
        };

        Ok(HexReading {
            outcome: response.outcome,
            tokens,
            values,
        })
    }

    /// Request a capture dump and sanitize it
    ///
    /// Uses the profile's capture layout, or the spin-test layout when the
    /// profile has none. The dump itself is kept out of the transcript.
    pub fn fetch_capture(
        &mut self,
        text: &str,
        filter: Option<&OutlierFilter>,
    ) -> Result<CaptureBlock> {
        let layout = self.profile.capture.unwrap_or(CaptureLayout::SPIN_TEST);
        let response = self.quietly(|inst| inst.query_with(text, ResponseMode::LineAccumulate))?;

        let mut block = CaptureBlock::parse(&response.text(), &layout)?;
        if let Some(filter) = filter {
            let removed = block.retain_inliers(filter);
            debug!("fetch_capture: removed {} outlier rows", removed);
        }
        info!(
            "{}: captured {} rows ({} malformed records dropped)",
            self.profile.name,
            block.rows.len(),
            block.dropped
        );
        Ok(block)
    }

    /// Query a two-channel meter reading and rescale both values to base units
    pub fn read_pair(&mut self, text: &str) -> Result<(EngineeringValue, EngineeringValue)> {
        let response = self.quietly(|inst| inst.query(text))?;
        let (primary, secondary) = parse_reading_pair(&response.text())?;
        Ok((
            normalize(&self.scaler, &primary)?,
            normalize(&self.scaler, &secondary)?,
        ))
    }

    /// Ask the device to identify itself
    pub fn identify(&mut self) -> Result<Option<String>> {
        let Some(command) = self.profile.id_command else {
            return Ok(None);
        };
        let response = self.query(command)?;
        Ok(Some(response.text().trim().to_string()))
    }

    /// Run `f` with the transcript off, restoring the previous setting afterwards
    pub fn quietly<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let previous = std::mem::replace(&mut self.echo, false);
        let result = f(self);
        self.echo = previous;
        result
    }

    /// Whether responses are recorded in the transcript
    pub fn echo(&self) -> bool {
        self.echo
    }

    /// Turn transcript recording on or off
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    /// Responses recorded while echo was on
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Change the response timeout
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.manager.set_timeout(&mut self.connection, timeout)?;
        Ok(())
    }

    /// Attach a token that cancels in-progress hex reads
    pub fn set_cancel_token(&mut self, token: Option<CancelToken>) {
        self.cancel = token;
    }

    /// Close the underlying connection
    pub fn close(self) {
        let Instrument {
            manager,
            connection,
            ..
        } = self;
        manager.close(connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{encode, DecodeError};
    use crate::protocol::ConnectionState;
    use crate::protocol::mock::{MockChannel, MockOpener};
    use pretty_assertions::assert_eq;

    fn mock_instrument(profile: DeviceProfile) -> (Instrument, MockChannel) {
        let channel = MockChannel::new();
        let opener = MockOpener::new(channel.clone());
        let manager =
            ConnectionManager::with_opener(Box::new(opener)).with_retry_delay(Duration::ZERO);
        let inst = Instrument::open(&manager, profile, "mock0").unwrap();
        (inst, channel)
    }

    #[test]
    fn test_profile_connection_config() {
        let cfg = DeviceProfile::SPIN_TEST.connection_config("/dev/ttyUSB0");
        assert_eq!(cfg.baud_rate, 921600);
        assert_eq!(cfg.buffer_size, Some(256_000));
        assert_eq!(cfg.byte_size, 8);
        assert_eq!(cfg.parity, Parity::None);
        assert_eq!(cfg.timeout_ms, 100);

        assert_eq!(DeviceProfile::KORAD.baud_rate, 9600);
        assert_eq!(DeviceProfile::PSC.hex_frame, HexFrame::MACHINE_SERIAL);
        assert_eq!(DeviceProfile::PSC.response_mode, ResponseMode::TabbedAccumulate);
    }

    #[test]
    fn test_frame_uses_profile_terminator() {
        let (inst, _) = mock_instrument(DeviceProfile::BK891);
        assert_eq!(inst.frame("*IDN?").to_bytes(), b"*IDN?\n\r".to_vec());
        let (inst, _) = mock_instrument(DeviceProfile::KORAD);
        assert_eq!(inst.frame("VOUT1?").to_bytes(), b"VOUT1?".to_vec());
    }

    #[test]
    fn test_query_flushes_stale_input() {
        let (mut inst, ch) = mock_instrument(DeviceProfile::MD90);
        ch.inject_input(b"leftover\r\n");
        ch.respond_to(b"GEE\r", b"1234\r\n");

        let resp = inst.query("GEE").unwrap();
        assert_eq!(resp.text(), "1234\r\n");
        assert_eq!(ch.pending_at_write(), vec![0]);
        assert_eq!(inst.transcript(), &["1234\r\n".to_string()]);
    }

    #[test]
    fn test_send_does_not_read() {
        let (mut inst, ch) = mock_instrument(DeviceProfile::KORAD);
        ch.queue_reply(b"unexpected");
        inst.send("OUT1").unwrap();
        assert_eq!(ch.writes(), vec![b"OUT1".to_vec()]);
        assert_eq!(ch.unread(), 10);
        assert!(inst.transcript().is_empty());
    }

    #[test]
    fn test_identify() {
        let (mut inst, ch) = mock_instrument(DeviceProfile::MD90);
        ch.respond_to(b"VER\r", b"MD90 v2.1\r\n");
        assert_eq!(inst.identify().unwrap(), Some("MD90 v2.1".to_string()));

        let (mut inst, _) = mock_instrument(DeviceProfile::PSC);
        assert_eq!(inst.identify().unwrap(), None);
    }

    #[test]
    fn test_query_hex_strips_frame() {
        let (mut inst, ch) = mock_instrument(DeviceProfile::PSC);
        let payload = encode(&[-2, 300], 2, false).unwrap();
        let mut reply = vec![0xaa, 0x01, 0x02, 0x03, 0x04, 0x05];
        reply.extend(payload.iter().filter_map(HexToken::value));
        reply.push(0x55);
        ch.respond_to(b"TARG\r", &reply);

        let reading = inst.query_hex("TARG", 2, false, true).unwrap();
        assert_eq!(reading.outcome, ReadOutcome::Complete);
        assert_eq!(reading.tokens.len(), 11);
        assert_eq!(reading.values, vec![-2, 300]);
        assert_eq!(inst.transcript()[0], "0xaa 0x1 0x2 0x3 0x4 0x5 0xff 0xfe 0x1 0x2c 0x55");
    }

    #[test]
    fn test_query_hex_rejects_group_size_before_sending() {
        let (mut inst, ch) = mock_instrument(DeviceProfile::PSC);
        let err = inst.query_hex("TARG", 9, false, false).unwrap_err();
        assert!(matches!(err, crate::Error::Decode(DecodeError::InvalidGroupSize(9))));
        assert!(ch.writes().is_empty());

        let err = inst.query_hex("TARG", 8, false, false).unwrap_err();
        assert!(matches!(err, crate::Error::Decode(DecodeError::InvalidGroupSize(8))));
        assert!(ch.writes().is_empty());
    }

    #[test]
    fn test_query_hex_timeout_decodes_nothing() {
        let (mut inst, _ch) = mock_instrument(DeviceProfile::PSC);
        inst.set_timeout(Duration::from_millis(50)).unwrap();
        let reading = inst.query_hex("TARG", 2, false, false).unwrap();
        assert_eq!(reading.outcome, ReadOutcome::TimedOut);
        assert!(reading.values.is_empty());
    }

    #[test]
    fn test_quietly_restores_echo() {
        let (mut inst, ch) = mock_instrument(DeviceProfile::MD90);
        ch.respond_to(b"GDB\r", b"12\r\n");

        inst.quietly(|i| i.query("GDB")).unwrap();
        assert!(inst.echo());
        assert!(inst.transcript().is_empty());

        inst.set_echo(false);
        let failed: Result<RawResponse> = inst.quietly(|i| {
            i.set_echo(true);
            Err(DecodeError::InvalidGroupSize(0).into())
        });
        assert!(failed.is_err());
        assert!(!inst.echo());
    }

    #[test]
    fn test_read_pair_normalizes() {
        let (mut inst, ch) = mock_instrument(DeviceProfile::BK891);
        ch.respond_to(b"FETC?\n\r", b"4.7 kohm, 12.5 deg\r\n");

        let (primary, secondary) = inst.read_pair("FETC?").unwrap();
        assert_eq!(primary, EngineeringValue::new(4700.0, "ohm"));
        assert_eq!(secondary, EngineeringValue::new(12.5, "deg"));
        assert!(inst.transcript().is_empty());
    }

    #[test]
    fn test_write_failure_recovers() {
        let (mut inst, ch) = mock_instrument(DeviceProfile::MD90);
        ch.respond_to(b"VER\r", b"v1\r\n");
        ch.fail_next_writes(1);

        let resp = inst.query("VER").unwrap();
        assert_eq!(resp.text(), "v1\r\n");
        assert_eq!(ch.writes(), vec![b"VER\r".to_vec()]);
    }

    #[test]
    fn test_clear_failure_recovers() {
        let (mut inst, ch) = mock_instrument(DeviceProfile::MD90);
        ch.respond_to(b"VER\r", b"v1\r\n");
        ch.fail_next_clears(1);

        let resp = inst.query("VER").unwrap();
        assert_eq!(resp.text(), "v1\r\n");
        assert_eq!(ch.writes(), vec![b"VER\r".to_vec()]);
        assert_eq!(inst.connection().state(), ConnectionState::Connected);
    }

    #[test]
    fn test_read_failure_retries_exchange() {
        let (mut inst, ch) = mock_instrument(DeviceProfile::MD90);
        ch.respond_to(b"GEE\r", b"42\r\n");
        ch.fail_next_reads(1);

        let resp = inst.query("GEE").unwrap();
        assert_eq!(resp.text(), "42\r\n");
        assert_eq!(ch.writes(), vec![b"GEE\r".to_vec(), b"GEE\r".to_vec()]);
        assert_eq!(inst.transcript(), &["42\r\n".to_string()]);
    }

    #[test]
    fn test_fetch_capture() {
        let (mut inst, ch) = mock_instrument(DeviceProfile::SPIN_TEST);
        let mut dump = String::new();
        for i in 0..8 {
            dump.push_str(&format!("meta{}\tvalue\r\n", i));
        }
        dump.push_str("\r\n");
        dump.push_str("idx\ta\tb\tc\td\tspeed\r\n");
        dump.push_str("1\t0\t0\t0\t0\t100\r\n");
        dump.push_str("2\t0\t0\t0\t0\t101\r\n");
        dump.push_str("1005\t0\t0\t0\t0\t101\r\n");
        dump.push_str("3\t0\t0\tbad\t0\t102\r\n");
        dump.push_str("4\t0\t0\t0\t0\t102\r\n");
        ch.respond_to(b"DMO\r", dump.as_bytes());

        let block = inst
            .fetch_capture("DMO", Some(&OutlierFilter::SPIN_TEST))
            .unwrap();
        assert_eq!(block.metadata.len(), 8);
        assert_eq!(block.columns[5], "speed");
        assert_eq!(block.column("idx").unwrap(), vec![1.0, 2.0, 4.0]);
        assert_eq!(block.dropped, 1);
        assert!(inst.transcript().is_empty());
    }
}
