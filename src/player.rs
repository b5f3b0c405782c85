//! Player sessions.
//!
//! A [`Player`] outlives the connections that represent it: when the socket drops, the player
//! keeps its tournament and match and can be resumed from another connection with its id.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::connection::{ConnectionId, Outbox};
use crate::lock;
use crate::match_runner::Match;
use crate::protocol::Message;
use crate::tournament::RRTournament;

/// Player identity, stable across reconnections.
pub type PlayerId = u32;

#[derive(Default)]
struct Binding {
    name: Option<String>,
    connection: Option<Arc<Outbox>>,
    tournament: Option<Weak<RRTournament>>,
    current_match: Option<Arc<Match>>,
    disconnected_since: Option<Instant>,
}

/// One participant.
pub struct Player {
    id: PlayerId,
    binding: Mutex<Binding>,
}

impl Player {
    /// A player with no connection, tournament nor match.
    pub fn new(id: PlayerId) -> Arc<Self> {
        Arc::new(Player {
            id,
            binding: Mutex::new(Binding {
                disconnected_since: Some(Instant::now()),
                ..Binding::default()
            }),
        })
    }

    /// Identity of the player.
    pub fn id(&self) -> PlayerId {
        self.id
    }

    /// Display name, `Player <id>` until one is set.
    pub fn name(&self) -> String {
        lock(&self.binding)
            .name
            .clone()
            .unwrap_or_else(|| format!("Player {}", self.id))
    }

    /// Sets the display name.
    pub fn set_name(&self, name: &str) {
        lock(&self.binding).name = Some(name.trim().to_string());
    }

    /// Binds `outbox` as the live connection of this player.
    ///
    /// Fails if another open connection is already bound.
    pub fn attach(&self, outbox: &Arc<Outbox>) -> bool {
        let mut binding = lock(&self.binding);
        if let Some(current) = &binding.connection {
            if current.is_open() && !Arc::ptr_eq(current, outbox) {
                return false;
            }
        }
        binding.connection = Some(outbox.clone());
        binding.disconnected_since = None;
        true
    }

    /// Unbinds the connection, if `connection` is still the one bound.
    pub fn detach(&self, connection: ConnectionId) -> bool {
        let mut binding = lock(&self.binding);
        match &binding.connection {
            Some(current) if current.id() == connection => {
                binding.connection = None;
                binding.disconnected_since = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// True if an open connection is bound.
    pub fn is_connected(&self) -> bool {
        lock(&self.binding)
            .connection
            .as_ref()
            .is_some_and(|c| c.is_open())
    }

    /// Sends `message` through the current connection. Returns false if disconnected.
    pub fn post(&self, message: Message) -> bool {
        match &lock(&self.binding).connection {
            Some(outbox) => outbox.post(message),
            None => false,
        }
    }

    /// Assigns `game` to this player unless it is already in a match.
    pub fn try_claim(&self, game: &Arc<Match>) -> bool {
        let mut binding = lock(&self.binding);
        if binding.current_match.is_some() {
            return false;
        }
        binding.current_match = Some(game.clone());
        true
    }

    /// Frees the player, if it is still assigned to `game`.
    pub fn release(&self, game: &Arc<Match>) {
        let mut binding = lock(&self.binding);
        if binding
            .current_match
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, game))
        {
            binding.current_match = None;
        }
    }

    /// Match the player is currently assigned to.
    pub fn current_match(&self) -> Option<Arc<Match>> {
        lock(&self.binding).current_match.clone()
    }

    /// Tournament the player belongs to, if it still exists.
    pub fn tournament(&self) -> Option<Arc<RRTournament>> {
        lock(&self.binding)
            .tournament
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn set_tournament(&self, tournament: &Arc<RRTournament>) {
        lock(&self.binding).tournament = Some(Arc::downgrade(tournament));
    }

    /// True if the player has been disconnected for at least `ttl` and has nothing left to do.
    pub(crate) fn is_stale(&self, ttl: Duration, now: Instant) -> bool {
        let binding = lock(&self.binding);
        let disconnected_long_enough = binding
            .disconnected_since
            .is_some_and(|since| now.saturating_duration_since(since) >= ttl);
        let in_live_tournament = binding
            .tournament
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|t| !t.is_terminated());
        disconnected_long_enough && binding.current_match.is_none() && !in_live_tournament
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player").field("id", &self.id).finish()
    }
}
