//! Connection engine shared by the server and both client roles.
//!
//! One [`Connection`] drives one socket. Each cycle it
//! 1. checks liveness and posts a `@PING` or gives up on a silent peer,
//! 2. reads and dispatches at most one inbound line,
//! 3. writes what the socket accepts of the lines queued in its [`Outbox`],
//!
//! then sleeps for the configured tick. Bytes the socket did not take are kept and written first
//! on the next cycle. A peer that takes none of them for longer than the ping budget is dropped. What the lines mean is decided by the [`Protocol`]
//! plugged into it.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, info, instrument, trace, warn};

use crate::configuration::Configuration;
use crate::error::ProtocolError;
use crate::lock;
use crate::protocol::{Frame, Message};

/// Identifies one physical connection for the lifetime of the process.
pub type ConnectionId = u64;

/// Outbound queue of one connection, shared with whoever needs to reach the peer.
///
/// Lines are delivered in the order they were posted. Posting to a closed outbox is a no-op.
#[derive(Debug)]
pub struct Outbox {
    id: ConnectionId,
    queue: Mutex<VecDeque<String>>,
    open: AtomicBool,
}

impl Outbox {
    /// A new open outbox.
    pub fn new(id: ConnectionId) -> Arc<Self> {
        Arc::new(Outbox {
            id,
            queue: Mutex::new(VecDeque::new()),
            open: AtomicBool::new(true),
        })
    }

    /// Connection this outbox belongs to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues one line. Returns false if the connection is closed.
    pub fn post_line(&self, line: impl Into<String>) -> bool {
        if !self.is_open() {
            return false;
        }
        lock(&self.queue).push_back(line.into());
        true
    }

    /// Queues `message`. Returns false if the connection is closed.
    pub fn post(&self, message: Message) -> bool {
        self.post_line(message.to_string())
    }

    /// Takes every queued line, oldest first.
    pub fn drain(&self) -> Vec<String> {
        lock(&self.queue).drain(..).collect()
    }

    /// True until [`Outbox::close`] is called.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Asks the engine to stop after flushing. Returns true for the call that closed it.
    pub fn close(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }
}

/// Ping policy of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    /// Silence tolerated before pinging, and between two pings.
    pub quiet_window: Duration,
    /// Unanswered pings before the peer is considered gone.
    pub max_pings: u32,
}

impl Liveness {
    /// Longest a peer may leave written lines unread.
    pub fn write_patience(&self) -> Duration {
        self.quiet_window * (self.max_pings + 1)
    }
}

impl From<&Configuration> for Liveness {
    fn from(config: &Configuration) -> Self {
        Liveness {
            quiet_window: config.quiet_window,
            max_pings: config.max_pings,
        }
    }
}

/// What the heartbeat asks the engine to do this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pulse {
    Alive,
    Ping,
    GiveUp,
}

#[derive(Debug)]
pub(crate) struct Heartbeat {
    policy: Liveness,
    last_received: Instant,
    last_ping: Instant,
    pings: u32,
}

impl Heartbeat {
    pub(crate) fn new(policy: Liveness, now: Instant) -> Self {
        Heartbeat {
            policy,
            last_received: now,
            last_ping: now,
            pings: 0,
        }
    }

    pub(crate) fn received(&mut self, now: Instant) {
        self.last_received = now;
        self.pings = 0;
    }

    pub(crate) fn check(&mut self, now: Instant) -> Pulse {
        let quiet = self.policy.quiet_window;
        if now.saturating_duration_since(self.last_received) < quiet {
            self.pings = 0;
            return Pulse::Alive;
        }
        if now.saturating_duration_since(self.last_ping) <= quiet {
            return Pulse::Alive;
        }
        if self.pings >= self.policy.max_pings {
            return Pulse::GiveUp;
        }
        self.last_ping = now;
        self.pings += 1;
        Pulse::Ping
    }
}

/// Command semantics plugged into a [`Connection`].
pub trait Protocol: Send + 'static {
    /// Queue this protocol writes to.
    fn outbox(&self) -> &Arc<Outbox>;

    /// Handles one inbound line.
    fn dispatch(&mut self, frame: &Frame) -> Result<(), ProtocolError>;

    /// Reports a faulty line back to the peer. The connection stays open.
    fn on_error(&mut self, error: ProtocolError) {
        self.outbox().post(Message::Error(error.to_string()));
    }

    /// Called once, after the socket is released.
    fn on_close(&mut self) {}
}

enum Inbound {
    Line(String),
    Pending,
    Eof,
}

/// The engine driving one socket.
pub struct Connection<P: Protocol> {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    outbox: Arc<Outbox>,
    protocol: P,
    heartbeat: Heartbeat,
    tick: Duration,
    partial: Vec<u8>,
    unsent: Vec<u8>,
    sent: usize,
    stalled_since: Option<Instant>,
    write_patience: Duration,
    closed: bool,
}

impl<P: Protocol> Connection<P> {
    /// Wraps `stream`. The socket is switched to non-blocking mode.
    pub fn new(stream: TcpStream, protocol: P, config: &Configuration) -> anyhow::Result<Self> {
        stream
            .set_nonblocking(true)
            .context("could not set socket non-blocking")?;
        let writer = stream.try_clone().context("could not clone socket")?;
        let liveness = Liveness::from(config);
        Ok(Connection {
            reader: BufReader::new(stream),
            writer,
            outbox: protocol.outbox().clone(),
            protocol,
            heartbeat: Heartbeat::new(liveness, Instant::now()),
            tick: config.connection_tick,
            partial: vec![],
            unsent: vec![],
            sent: 0,
            stalled_since: None,
            write_patience: liveness.write_patience(),
            closed: false,
        })
    }

    /// Runs the engine on a new thread. The handle yields the protocol once the connection ends.
    pub fn spawn(self) -> JoinHandle<P> {
        thread::spawn(move || self.run())
    }

    /// Runs until the peer leaves, stops answering pings, or the outbox is closed.
    #[instrument(name = "connection", skip_all, fields(id = self.outbox.id()))]
    pub fn run(mut self) -> P {
        info!("connection open");
        let reason = loop {
            let now = Instant::now();
            match self.heartbeat.check(now) {
                Pulse::Alive => {}
                Pulse::Ping => {
                    debug!("peer quiet, sending ping");
                    self.outbox.post(Message::Ping);
                }
                Pulse::GiveUp => break "peer stopped answering pings",
            }

            match self.read_line() {
                Ok(Inbound::Line(line)) => {
                    self.heartbeat.received(Instant::now());
                    trace!(%line, "received");
                    let frame = Frame::parse(&line);
                    if !frame.is_empty() {
                        if let Err(error) = self.protocol.dispatch(&frame) {
                            debug!(%error, %line, "rejected line");
                            self.protocol.on_error(error);
                        }
                    }
                }
                Ok(Inbound::Pending) => {}
                Ok(Inbound::Eof) => break "peer hung up",
                Err(e) => {
                    warn!("read error: {e}");
                    break "read error";
                }
            }

            if let Err(e) = self.flush() {
                warn!("write error: {e}");
                break "write error";
            }
            if self
                .stalled_since
                .is_some_and(|since| since.elapsed() > self.write_patience)
            {
                break "peer stopped reading";
            }
            if !self.outbox.is_open() && self.unsent.is_empty() {
                break "closed locally";
            }
            thread::sleep(self.tick);
        };
        info!(reason, "connection closed");
        self.close();
        self.protocol
    }

    fn read_line(&mut self) -> io::Result<Inbound> {
        match self.reader.read_until(b'\n', &mut self.partial) {
            Ok(0) if self.partial.is_empty() => Ok(Inbound::Eof),
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                Ok(Inbound::Line(line))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Inbound::Pending),
            Err(e) => Err(e),
        }
    }

    /// Writes leftover bytes, then queued lines, until the socket would block.
    fn flush(&mut self) -> io::Result<()> {
        let mut progressed = false;
        loop {
            if self.sent == self.unsent.len() {
                self.unsent.clear();
                self.sent = 0;
                let lines = self.outbox.drain();
                if lines.is_empty() {
                    self.stalled_since = None;
                    return self.writer.flush();
                }
                for line in &lines {
                    trace!(%line, "sent");
                    self.unsent.extend_from_slice(line.as_bytes());
                    self.unsent.push(b'\n');
                }
            }
            match self.writer.write(&self.unsent[self.sent..]) {
                Ok(0) => return Err(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.sent += n;
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if progressed {
                        self.stalled_since = None;
                    } else if self.stalled_since.is_none() {
                        debug!(pending = self.unsent.len() - self.sent, "peer not reading");
                        self.stalled_since = Some(Instant::now());
                    }
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.outbox.close();
        let _ = self.writer.shutdown(Shutdown::Both);
        self.protocol.on_close();
    }
}
