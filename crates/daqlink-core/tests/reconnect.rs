use daqlink_core::device::{DeviceProfile, Instrument};
use daqlink_core::protocol::mock::{MockChannel, MockOpener};
use daqlink_core::protocol::{ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState};
use daqlink_core::Error;
use pretty_assertions::assert_eq;
use std::time::Duration;

fn manager(opener: &MockOpener) -> ConnectionManager {
    ConnectionManager::with_opener(Box::new(opener.clone())).with_retry_delay(Duration::ZERO)
}

#[test]
fn test_gives_up_after_five_attempts() {
    let opener = MockOpener::new(MockChannel::new());
    let manager = manager(&opener);
    let mut conn = manager.open(ConnectionConfig::new("mock0", 115200)).unwrap();

    opener.fail_next(u32::MAX);
    let err = manager.recover(&mut conn).unwrap_err();

    match err {
        ConnectionError::ReconnectExhausted { port, attempts } => {
            assert_eq!(port, "mock0");
            assert_eq!(attempts, 5);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(opener.attempts(), 1 + 5);
    assert_eq!(conn.state(), ConnectionState::Error);
}

#[test]
fn test_custom_attempt_budget() {
    let opener = MockOpener::new(MockChannel::new());
    let manager = manager(&opener).with_max_reconnect_attempts(2);
    let mut conn = manager.open(ConnectionConfig::new("mock0", 115200)).unwrap();

    opener.fail_next(u32::MAX);
    assert!(manager.recover(&mut conn).is_err());
    assert_eq!(opener.attempts(), 3);
}

#[test]
fn test_instrument_recovers_from_write_failure() {
    let channel = MockChannel::new();
    let opener = MockOpener::new(channel.clone());
    let mut inst = Instrument::open(&manager(&opener), DeviceProfile::MD90, "mock0").unwrap();

    channel.respond_to(b"VER\r", b"MD90\r\n");
    channel.fail_next_writes(1);
    opener.fail_next(2);

    let resp = inst.query("VER").unwrap();
    assert_eq!(resp.text(), "MD90\r\n");
    // initial open, two refused reopens, one successful reopen
    assert_eq!(opener.attempts(), 4);
    assert_eq!(inst.connection().state(), ConnectionState::Connected);
}

#[test]
fn test_instrument_reports_fatal_comm_loss() {
    let channel = MockChannel::new();
    let opener = MockOpener::new(channel.clone());
    let mut inst = Instrument::open(&manager(&opener), DeviceProfile::MD90, "mock0").unwrap();

    channel.set_fail_writes(true);
    opener.fail_next(u32::MAX);

    let err = inst.query("VER").unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        Error::Connection(ConnectionError::ReconnectExhausted { attempts: 5, .. })
    ));
}

#[test]
fn test_open_failure_is_reported() {
    let opener = MockOpener::new(MockChannel::new());
    opener.fail_next(1);
    let err = Instrument::open(&manager(&opener), DeviceProfile::KORAD, "mock0").unwrap_err();
    assert!(matches!(
        err,
        Error::Connection(ConnectionError::OpenFailed { .. })
    ));
}

#[test]
fn test_instrument_recovers_from_failed_flush() {
    let channel = MockChannel::new();
    let opener = MockOpener::new(channel.clone());
    let mut inst = Instrument::open(&manager(&opener), DeviceProfile::MD90, "mock0").unwrap();

    channel.respond_to(b"VER\r", b"MD90\r\n");
    channel.fail_next_clears(1);
    opener.fail_next(2);

    let resp = inst.query("VER").unwrap();
    assert_eq!(resp.text(), "MD90\r\n");
    assert_eq!(opener.attempts(), 4);
    assert_eq!(channel.writes(), vec![b"VER\r".to_vec()]);
}

#[test]
fn test_failed_flush_with_port_gone_is_fatal() {
    let channel = MockChannel::new();
    let opener = MockOpener::new(channel.clone());
    let mut inst = Instrument::open(&manager(&opener), DeviceProfile::MD90, "mock0").unwrap();

    channel.fail_next_clears(1);
    opener.fail_next(u32::MAX);

    let err = inst.query("VER").unwrap_err();
    assert!(err.is_fatal());
    assert!(channel.writes().is_empty());
    assert_eq!(inst.connection().state(), ConnectionState::Error);
}

#[test]
fn test_exchange_is_retried_only_once() {
    let channel = MockChannel::new();
    let opener = MockOpener::new(channel.clone());
    let mut inst = Instrument::open(&manager(&opener), DeviceProfile::MD90, "mock0").unwrap();

    channel.fail_next_clears(2);

    let err = inst.query("VER").unwrap_err();
    assert!(matches!(err, Error::Connection(ConnectionError::Io(_))));
    assert!(!err.is_fatal());
    assert_eq!(opener.attempts(), 2);
    assert!(channel.writes().is_empty());
}
