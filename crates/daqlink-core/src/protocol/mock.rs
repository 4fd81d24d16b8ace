//! Scripted in-memory serial channel
//!
//! [`MockChannel`] stands in for a real port when no hardware is attached. It
//! provides:
//! - Replies released when a command is written (queued or keyed by command)
//! - Gaps between reply chunks to model devices that pause mid-transmission
//! - Stale-byte injection and write-failure injection (persistent or one-shot)
//! - One-shot failures of buffer clears and reads, as after an unplug
//! - A log of every write and of the unread input length at write time
//!
//! Clones share state, so a test keeps one handle while the connection owns
//! another.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{ConnectionConfig, ConnectionError, PortOpener, SerialChannel};

/// One unit of scripted input: a byte, or a read that comes back empty
type Unit = Option<u8>;

#[derive(Debug, Default)]
struct MockState {
    input: VecDeque<Unit>,
    queued: VecDeque<Vec<Unit>>,
    responders: HashMap<Vec<u8>, Vec<Unit>>,
    writes: Vec<Vec<u8>>,
    pending_at_write: Vec<usize>,
    fail_writes: bool,
    write_failures: u32,
    clear_failures: u32,
    read_failures: u32,
    flushes: usize,
    timeout: Duration,
}

/// Scripted serial channel for tests and demos
#[derive(Debug, Clone, Default)]
pub struct MockChannel {
    state: Arc<Mutex<MockState>>,
}

fn chunks_to_units(chunks: &[&[u8]]) -> Vec<Unit> {
    let mut units = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            units.push(None);
        }
        units.extend(chunk.iter().copied().map(Some));
    }
    units
}

fn unplugged() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")
}

impl MockChannel {
    /// Create an idle channel
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Release `reply` after the next write that no responder matches
    pub fn queue_reply(&self, reply: impl AsRef<[u8]>) {
        self.queue_reply_chunks(&[reply.as_ref()]);
    }

    /// Like [`queue_reply`](Self::queue_reply), with one empty read between chunks
    pub fn queue_reply_chunks(&self, chunks: &[&[u8]]) {
        self.state().queued.push_back(chunks_to_units(chunks));
    }

    /// Answer every write of exactly `command` with `reply`
    pub fn respond_to(&self, command: impl AsRef<[u8]>, reply: impl AsRef<[u8]>) {
        self.state().responders.insert(
            command.as_ref().to_vec(),
            reply.as_ref().iter().copied().map(Some).collect(),
        );
    }

    /// Put bytes into the receive buffer right now, as a leftover from an
    /// earlier exchange would be
    pub fn inject_input(&self, bytes: impl AsRef<[u8]>) {
        self.state()
            .input
            .extend(bytes.as_ref().iter().copied().map(Some));
    }

    /// Make every following write fail with a broken pipe
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Make only the next `count` writes fail
    pub fn fail_next_writes(&self, count: u32) {
        self.state().write_failures = count;
    }

    /// Make the next `count` input buffer clears fail
    pub fn fail_next_clears(&self, count: u32) {
        self.state().clear_failures = count;
    }

    /// Make the next `count` reads fail with a broken pipe instead of data
    pub fn fail_next_reads(&self, count: u32) {
        self.state().read_failures = count;
    }

    /// Every write so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    /// Unread input length observed at the moment of each write
    pub fn pending_at_write(&self) -> Vec<usize> {
        self.state().pending_at_write.clone()
    }

    /// Number of input buffer clears
    pub fn flush_count(&self) -> usize {
        self.state().flushes
    }

    /// Bytes still waiting to be read, gaps excluded
    pub fn unread(&self) -> usize {
        self.state().input.iter().filter(|u| u.is_some()).count()
    }
}

impl Read for MockChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Err(unplugged());
        }
        match state.input.front().copied() {
            None => return Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
            Some(None) => {
                state.input.pop_front();
                return Err(io::Error::new(io::ErrorKind::TimedOut, "gap"));
            }
            Some(Some(_)) => {}
        }

        let mut n = 0;
        while n < buf.len() {
            match state.input.front().copied() {
                Some(Some(b)) => {
                    buf[n] = b;
                    state.input.pop_front();
                    n += 1;
                }
                _ => break,
            }
        }
        Ok(n)
    }
}

impl Write for MockChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.state();
        let state = &mut *guard;
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(unplugged());
        }
        if state.fail_writes {
            return Err(unplugged());
        }

        let pending = state.input.iter().filter(|u| u.is_some()).count();
        state.pending_at_write.push(pending);
        state.writes.push(buf.to_vec());

        let reply = match state.responders.get(buf) {
            Some(reply) => Some(reply.clone()),
            None => state.queued.pop_front(),
        };
        if let Some(reply) = reply {
            state.input.extend(reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialChannel for MockChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.state().timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.state().timeout
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        let mut state = self.state();
        if state.clear_failures > 0 {
            state.clear_failures -= 1;
            return Err(unplugged());
        }
        state.input.clear();
        state.flushes += 1;
        Ok(())
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<u32> {
        let state = self.state();
        Ok(state.input.iter().take_while(|u| u.is_some()).count() as u32)
    }
}

/// Opener handing out clones of one [`MockChannel`]
///
/// Reopening yields the same scripted device, the way reconnecting to a
/// physical port reaches the same instrument.
#[derive(Debug, Clone, Default)]
pub struct MockOpener {
    channel: MockChannel,
    failures_remaining: Arc<AtomicU32>,
    opens: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl MockOpener {
    /// Opener for the given channel
    pub fn new(channel: MockChannel) -> Self {
        Self {
            channel,
            ..Self::default()
        }
    }

    /// Fail the next `count` open attempts
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Successful opens so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Open attempts so far, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The channel this opener hands out
    pub fn channel(&self) -> &MockChannel {
        &self.channel
    }
}

impl PortOpener for MockOpener {
    fn open(&self, config: &ConnectionConfig) -> Result<Box<dyn SerialChannel>, ConnectionError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ConnectionError::OpenFailed {
                port: config.port_name.clone(),
                reason: "device busy".to_string(),
            });
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut channel = self.channel.clone();
        channel.set_timeout(config.timeout())?;
        Ok(Box::new(channel))
    }
}
