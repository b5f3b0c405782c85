//! # RR Arena
//!
//! A game server running turn-based two-player games between remote participants, organized
//! in round-robin tournaments over a persistent line-oriented TCP protocol.
//!
//! It provides:
//! - A connection engine (framing, outbound queue, ping liveness) shared by the server and the
//!   client roles, see [`connection`]
//! - Player sessions that survive disconnection and can be resumed by id, see [`player`]
//! - A match state machine relaying moves and forfeiting misbehaving players, see
//!   [`match_runner`]
//! - A round-robin scheduler starting any match whose two players are free, see [`tournament`]
//! - The accept loop enforcing a connection ceiling, see [`server`]
//!
//! # Documentation Overview
//!
//! - For the wire format and the list of commands, see [`protocol`].
//! - For configuring ports, timings and logging, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For adding games, implement the [`Game`](crate::game_interface::Game),
//!   [`Ai`](crate::game_interface::Ai) and [`GameFactory`](crate::game_interface::GameFactory)
//!   traits and register the factory in a [`GameCatalog`](crate::game_interface::GameCatalog).
//! - For competitor and organizer programs, see [`client`].
//!
//! # Usage Example
//!
//! ```no_run
//! use std::thread;
//!
//! use rr_arena::client::{connect, ClientSettings, PlayerClient};
//! use rr_arena::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Configuration::new().with_port(0);
//!     let server = GameServer::bind(config)?;
//!     let settings = ClientSettings {
//!         port: server.local_addr()?.port(),
//!         ..ClientSettings::default()
//!     };
//!     thread::spawn(move || server.run());
//!
//!     // a competitor joining the first tournament available and playing Nim
//!     let factory = GameCatalog::builtin().get("NIM").expect("built-in game");
//!     let bot = connect(&settings, PlayerClient::new(&settings, factory), &config)?.run();
//!     println!("{:?}", bot.tally());
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use anyhow;

pub mod client;
pub mod configuration;
pub mod connection;
pub mod error;
pub mod game_interface;
pub mod games;
mod logger;
pub mod match_runner;
pub mod player;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod tournament;

pub use logger::init_logger;

/// Commonly used types and traits for quick access.
///
/// Import this prelude to get started easily:
/// ```rust
/// use rr_arena::prelude::*;
/// ```
///
/// Includes:
/// - [`Configuration`](crate::configuration::Configuration)
/// - [`GameServer`](crate::server::GameServer)
/// - the game contract: [`Game`](crate::game_interface::Game),
///   [`Ai`](crate::game_interface::Ai), [`GameFactory`](crate::game_interface::GameFactory),
///   [`GameCatalog`](crate::game_interface::GameCatalog)
pub mod prelude {
    pub use crate::configuration::Configuration;
    pub use crate::game_interface::{
        Ai, Game, GameCatalog, GameFactory, MoveRejected, Outcome, Side, Winner,
    };
    pub use crate::server::GameServer;
}

/// Locks `mutex`, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
