//! Client roles speaking the same protocol as the server.
//!
//! Both roles are [`Protocol`](crate::connection::Protocol) implementations driven by the same
//! [`Connection`] engine as the server side, each with its own command table:
//!
//! - [`PlayerClient`]: a competitor whose moves come from a built-in [`Ai`](crate::game_interface::Ai).
//! - [`TourManager`]: an organizer creating and steering a tournament and keeping standings.

use std::net::TcpStream;
use std::str::FromStr;

use anyhow::Context;
use tracing::warn;

use crate::configuration::{Configuration, DEFAULT_PORT};
use crate::connection::{Connection, Outbox, Protocol};
use crate::player::PlayerId;
use crate::tournament::TournamentId;

mod player_client;
mod tour_manager;

pub use player_client::{PlayerClient, Tally};
pub use tour_manager::{Standing, TourControls, TourManager};

/// Where and as whom a client connects.
///
/// # Environment Variables
///
/// - `ARENA_HOST`: Server host (default: `127.0.0.1`)
/// - `ARENA_PORT`: Server port (default: `1350`)
/// - `ARENA_NAME`: Display name (default: none, the server picks `Player <id>`)
/// - `ARENA_PID`: Player id to resume instead of registering a new player
/// - `ARENA_TID`: Tournament id to join instead of the first one available
/// - `ARENA_GAME`: Game type played by a competitor (default: `NIM`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Name announced after the handshake.
    pub name: Option<String>,
    /// Existing player to resume.
    pub pid: Option<PlayerId>,
    /// Tournament to join.
    pub tid: Option<TournamentId>,
    /// Game type, used by competitors to build their mirror and AI.
    pub game: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            name: None,
            pid: None,
            tid: None,
            game: "NIM".to_string(),
        }
    }
}

impl ClientSettings {
    /// Reads the settings from the environment, see the type documentation.
    pub fn from_env() -> Self {
        fn optional<T: FromStr>(var: &str) -> Option<T> {
            let raw = std::env::var(var).ok()?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(var, value = %raw, "ignoring unparseable variable");
                    None
                }
            }
        }

        let default = Self::default();
        ClientSettings {
            host: std::env::var("ARENA_HOST").unwrap_or(default.host),
            port: optional("ARENA_PORT").unwrap_or(default.port),
            name: std::env::var("ARENA_NAME").ok().filter(|n| !n.trim().is_empty()),
            pid: optional("ARENA_PID"),
            tid: optional("ARENA_TID"),
            game: std::env::var("ARENA_GAME").unwrap_or(default.game),
        }
    }

    /// Player to resume.
    pub fn with_pid(mut self, pid: PlayerId) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Name to announce.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Tournament to join.
    pub fn with_tid(mut self, tid: TournamentId) -> Self {
        self.tid = Some(tid);
        self
    }
}

/// Opens a TCP connection to the server described by `settings` and wraps it in a connection
/// engine running `protocol`.
pub fn connect<P: Protocol>(
    settings: &ClientSettings,
    protocol: P,
    config: &Configuration,
) -> anyhow::Result<Connection<P>> {
    let stream = TcpStream::connect((settings.host.as_str(), settings.port))
        .with_context(|| format!("could not connect to {}:{}", settings.host, settings.port))?;
    Connection::new(stream, protocol, config)
}

/// Outbox for a client connection. Clients only ever hold one connection.
pub(crate) fn client_outbox() -> std::sync::Arc<Outbox> {
    Outbox::new(0)
}
