use daqlink_core::device::{DeviceProfile, Instrument};
use daqlink_core::protocol::mock::{MockChannel, MockOpener};
use daqlink_core::protocol::{CancelToken, ConnectionManager, ReadOutcome, ResponseMode};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn open(profile: DeviceProfile) -> (Instrument, MockChannel) {
    let channel = MockChannel::new();
    let manager = ConnectionManager::with_opener(Box::new(MockOpener::new(channel.clone())))
        .with_retry_delay(Duration::ZERO);
    let inst = Instrument::open(&manager, profile, "mock0").unwrap();
    (inst, channel)
}

#[test]
fn test_input_is_empty_before_every_write() {
    let (mut inst, ch) = open(DeviceProfile::MD90);
    ch.respond_to(b"GEE\r", b"100\r\n");
    ch.respond_to(b"GDB\r", b"5\r\n");

    for cmd in ["GEE", "GDB", "GEE"] {
        // Stale bytes from a previous exchange, or unsolicited output
        ch.inject_input(b"noise\r\n");
        inst.query(cmd).unwrap();
    }

    assert_eq!(ch.pending_at_write(), vec![0, 0, 0]);
    assert_eq!(ch.flush_count(), 3);
    assert_eq!(
        inst.transcript(),
        &["100\r\n".to_string(), "5\r\n".to_string(), "100\r\n".to_string()]
    );
}

#[test]
fn test_line_mode_collects_multi_line_answer() {
    let (mut inst, ch) = open(DeviceProfile::MD90);
    ch.respond_to(b"HELP\r", b"GEE get position\r\n\r\nSDB set deadband\r\n");

    let resp = inst.query("HELP").unwrap();
    assert_eq!(resp.outcome, ReadOutcome::Complete);
    assert_eq!(resp.lines().unwrap().len(), 3);
    assert_eq!(resp.text(), "GEE get position\r\n\r\nSDB set deadband\r\n");
}

#[test]
fn test_tabbed_menu() {
    let (mut inst, ch) = open(DeviceProfile::PSC);
    ch.respond_to(b"MENU\r", b"MAIN MENU\r\n\tSERV\r\n\tSTRM\r\n");

    let resp = inst.query("MENU").unwrap();
    assert_eq!(resp.outcome, ReadOutcome::Complete);
    assert_eq!(
        resp.lines().unwrap(),
        &[
            "MAIN MENU\r\n".to_string(),
            "\tSERV\r\n".to_string(),
            "\tSTRM\r\n".to_string()
        ]
    );
}

#[test]
fn test_hex_read_ends_on_first_pause() {
    let (mut inst, ch) = open(DeviceProfile::PSC);
    ch.queue_reply_chunks(&[&[0x01u8, 0x02, 0x03][..], &[0x04u8, 0x05][..]]);

    let resp = inst.query_with("STRM", ResponseMode::HexBinary).unwrap();
    assert_eq!(resp.outcome, ReadOutcome::Complete);
    assert_eq!(resp.bytes(), vec![0x01, 0x02, 0x03]);
    assert_eq!(ch.unread(), 2);
}

#[test]
fn test_hex_read_times_out_without_error() {
    let (mut inst, _ch) = open(DeviceProfile::PSC);
    inst.set_timeout(Duration::from_millis(200)).unwrap();

    let resp = inst.query_with("TARG", ResponseMode::HexBinary).unwrap();
    assert_eq!(resp.outcome, ReadOutcome::TimedOut);
    assert!(resp.elapsed >= Duration::from_millis(200));
    assert!(resp.bytes().is_empty());
}

#[test]
fn test_cancelled_hex_read() {
    let (mut inst, _ch) = open(DeviceProfile::PSC);
    inst.set_timeout(Duration::from_secs(60)).unwrap();
    let token = CancelToken::new();
    token.cancel();
    inst.set_cancel_token(Some(token));

    let reading = inst.query_hex("TARG", 4, false, false).unwrap();
    assert_eq!(reading.outcome, ReadOutcome::TimedOut);
    assert!(reading.values.is_empty());
}

#[test]
fn test_send_raw_binary() {
    let (mut inst, ch) = open(DeviceProfile::PSC);
    ch.respond_to([0x02u8, 0x10, 0x03], [0x06u8]);

    let resp = inst
        .send_raw(&[0x02, 0x10, 0x03], ResponseMode::HexBinary)
        .unwrap();
    assert_eq!(resp.hex_string(), "06");
    assert_eq!(ch.writes(), vec![vec![0x02, 0x10, 0x03]]);
}

#[test]
fn test_echo_off_keeps_transcript_empty() {
    let (mut inst, ch) = open(DeviceProfile::KORAD);
    ch.respond_to(b"VOUT1?", b"12.00\n");
    inst.set_echo(false);

    let resp = inst.query("VOUT1?").unwrap();
    assert_eq!(resp.text(), "12.00\n");
    assert!(inst.transcript().is_empty());
}
