//! Accept loop of the game server.
//!
//! [`GameServer`] owns the listening socket and the shared [`Registry`]. Every accepted socket
//! gets its own [`Connection`] engine running a [`ClientSession`] on a dedicated thread, up to
//! the configured connection ceiling. Sockets over the ceiling are told so and dropped.
//!
//! ```no_run
//! use rr_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::from_env().with_log(true);
//!     let server = GameServer::bind(config)?;
//!     println!("listening on {}", server.local_addr()?);
//!     server.run()
//! }
//! ```

use std::io::{ErrorKind, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use socket2::{Domain, Protocol as SocketProtocol, Socket, Type};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::configuration::Configuration;
use crate::connection::{Connection, Outbox};
use crate::game_interface::GameCatalog;
use crate::logger::init_logger;
use crate::protocol::Message;
use crate::registry::Registry;
use crate::session::ClientSession;

const BACKLOG: i32 = 128;
const SWEEP_PERIOD: Duration = Duration::from_secs(5);

/// The listening side of the server.
pub struct GameServer {
    listener: TcpListener,
    config: Configuration,
    registry: Arc<Registry>,
    shutdown: Arc<AtomicBool>,
    open_connections: Arc<AtomicUsize>,
    next_connection: AtomicU64,
}

impl GameServer {
    /// Binds the configured port on every interface, serving the built-in games.
    pub fn bind(config: Configuration) -> anyhow::Result<Self> {
        Self::with_catalog(GameCatalog::builtin(), config)
    }

    /// Binds the configured port on every interface, serving the games of `catalog`.
    ///
    /// Installs the tracing subscriber first when logging is enabled.
    #[instrument(name = "bind", skip_all, fields(port = config.port))]
    pub fn with_catalog(catalog: GameCatalog, config: Configuration) -> anyhow::Result<Self> {
        if config.log {
            init_logger(&config)?;
        }
        trace!(?config);

        let address = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port));
        let listener = create_listener(address)
            .with_context(|| format!("could not listen on port {}", config.port))?;
        listener
            .set_nonblocking(true)
            .context("could not set listener non-blocking")?;
        info!(games = ?catalog.names(), "server bound");

        Ok(GameServer {
            listener,
            config,
            registry: Registry::new(catalog, config),
            shutdown: Arc::new(AtomicBool::new(false)),
            open_connections: Arc::new(AtomicUsize::new(0)),
            next_connection: AtomicU64::new(1),
        })
    }

    /// Address actually bound, useful with port `0`.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("could not read listener address")
    }

    /// Flag stopping [`GameServer::run`] once set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Players and tournaments known to the server.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Number of connections currently served.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::Acquire)
    }

    /// Accepts connections until the shutdown flag is set, then ends every tournament.
    ///
    /// Connections still open keep running on their own threads.
    #[instrument(name = "server", skip_all)]
    pub fn run(&self) -> anyhow::Result<()> {
        info!(max_connections = self.config.max_connections, "accepting connections");
        let mut last_sweep = Instant::now();

        while !self.shutdown.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(self.config.accept_poll)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => warn!("accept failed: {e}"),
            }

            let now = Instant::now();
            if now.duration_since(last_sweep) >= SWEEP_PERIOD {
                self.registry.sweep(now);
                last_sweep = now;
            }
        }

        info!("shutting down");
        self.registry.shutdown();
        Ok(())
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr) {
        let Some(slot) = ConnectionSlot::acquire(&self.open_connections, self.config.max_connections)
        else {
            warn!(%peer, "connection ceiling reached, refusing client");
            refuse(stream, self.config.max_connections);
            return;
        };

        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let outbox = Outbox::new(id);
        let session = ClientSession::new(self.registry.clone(), outbox);
        let connection = match Connection::new(stream, session, &self.config) {
            Ok(connection) => connection,
            Err(e) => {
                error!(%peer, "could not set up connection: {e:#}");
                return;
            }
        };
        debug!(%peer, connection = id, "client accepted");
        thread::spawn(move || {
            let _slot = slot;
            connection.run();
        });
    }
}

/// One unit of the connection ceiling, given back when dropped.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(open: &Arc<AtomicUsize>, ceiling: usize) -> Option<Self> {
        open.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < ceiling).then_some(n + 1)
        })
        .ok()
        .map(|_| ConnectionSlot(open.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn refuse(mut stream: TcpStream, ceiling: usize) {
    let reply = Message::Error(format!("Maximum number of clients ({ceiling}) reached."));
    let _ = stream.set_nonblocking(false);
    if let Err(e) = writeln!(stream, "{reply}") {
        debug!("could not tell refused client: {e}");
    }
}

fn create_listener(address: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(
        Domain::for_address(address),
        Type::STREAM,
        Some(SocketProtocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.bind(&address.into())?;
    socket.listen(BACKLOG)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_respect_the_ceiling() {
        let open = Arc::new(AtomicUsize::new(0));
        let first = ConnectionSlot::acquire(&open, 2).unwrap();
        let _second = ConnectionSlot::acquire(&open, 2).unwrap();
        assert!(ConnectionSlot::acquire(&open, 2).is_none());
        drop(first);
        assert_eq!(open.load(Ordering::SeqCst), 1);
        assert!(ConnectionSlot::acquire(&open, 2).is_some());
        assert_eq!(open.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_reports_the_chosen_port() {
        let server = GameServer::bind(Configuration::new().with_port(0)).unwrap();
        assert!(server.local_addr().unwrap().port() > 0);
        assert_eq!(server.open_connections(), 0);
    }
}
