//! Instrument Query Tool
//!
//! Sends one command to a serial instrument and prints the answer.
//!
//! Usage:
//!   cargo run --example query_instrument -- [OPTIONS] COMMAND
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyUSB0)
//!   --device NAME     korad | bk891 | md90 | psc | spin (default: md90)
//!   --timeout MS      Read timeout in ms (default: profile value)
//!   --hex BYTES       Read a hex-binary answer and decode BYTES-wide signed values
//!   --reverse         Reverse each hex group before decoding
//!   --list            List serial ports and exit
//!   --mock            Talk to a scripted in-memory device instead of a port
//!
//! Set RUST_LOG=daqlink_core=debug to see the byte traffic.

use anyhow::{bail, Context, Result};
use daqlink_core::decode::encode;
use daqlink_core::prelude::*;
use daqlink_core::protocol::mock::{MockChannel, MockOpener};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn profile_by_name(name: &str) -> Result<DeviceProfile> {
    Ok(match name {
        "korad" => DeviceProfile::KORAD,
        "bk891" => DeviceProfile::BK891,
        "md90" => DeviceProfile::MD90,
        "psc" => DeviceProfile::PSC,
        "spin" => DeviceProfile::SPIN_TEST,
        other => bail!("unknown device '{}'", other),
    })
}

/// Scripted device answering the given command with a plausible reply
fn mock_manager(command: &str, profile: &DeviceProfile, hex: bool) -> Result<ConnectionManager> {
    let channel = MockChannel::new();
    let framed = Command::text(command, profile.terminator).to_bytes();
    if hex {
        let mut reply = vec![0xaa, 0x55, 0x00, 0x04, 0x01, 0x00];
        for token in encode(&[1000, -1000], 2, false)? {
            reply.extend(token.value());
        }
        reply.push(0x7e);
        channel.respond_to(framed, reply);
    } else {
        channel.respond_to(framed, format!("{} OK\r\n", command));
    }
    Ok(ConnectionManager::with_opener(Box::new(MockOpener::new(channel))))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("daqlink_core=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port_name = "/dev/ttyUSB0".to_string();
    let mut device = "md90".to_string();
    let mut timeout_ms: Option<u64> = None;
    let mut hex_group: Option<usize> = None;
    let mut reverse = false;
    let mut use_mock = false;
    let mut command: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                port_name = args.get(i).context("--port needs a value")?.clone();
            }
            "--device" | "-d" => {
                i += 1;
                device = args.get(i).context("--device needs a value")?.clone();
            }
            "--timeout" | "-t" => {
                i += 1;
                let value = args.get(i).context("--timeout needs a value")?;
                timeout_ms = Some(value.parse().context("invalid --timeout")?);
            }
            "--hex" => {
                i += 1;
                let value = args.get(i).context("--hex needs a value")?;
                hex_group = Some(value.parse().context("invalid --hex")?);
            }
            "--reverse" => reverse = true,
            "--mock" => use_mock = true,
            "--list" | "-l" => {
                for port in ConnectionManager::list_ports() {
                    println!(
                        "{}\t{}",
                        port.name,
                        port.product.as_deref().unwrap_or("-")
                    );
                }
                return Ok(());
            }
            other if !other.starts_with('-') => command = Some(other.to_string()),
            other => bail!("unknown option '{}'", other),
        }
        i += 1;
    }

    let Some(command) = command else {
        bail!("no command given (try --help in the source header)");
    };
    let profile = profile_by_name(&device)?;

    let manager = if use_mock {
        port_name = "mock0".to_string();
        mock_manager(&command, &profile, hex_group.is_some())?
    } else {
        ConnectionManager::new()
    };

    let mut inst = Instrument::open(&manager, profile, &port_name)
        .with_context(|| format!("opening {} on {}", profile.name, port_name))?;
    if let Some(ms) = timeout_ms {
        inst.set_timeout(Duration::from_millis(ms))?;
    }

    match hex_group {
        Some(group_size) => {
            let reading = inst.query_hex(&command, group_size, reverse, true)?;
            info!("{:?} with {} tokens", reading.outcome, reading.tokens.len());
            println!("{:?}", reading.values);
        }
        None => {
            let response = inst.query(&command)?;
            if response.outcome != ReadOutcome::Complete {
                println!("({:?} after {:?})", response.outcome, response.elapsed);
            }
            print!("{}", response.text());
        }
    }

    inst.close();
    Ok(())
}
