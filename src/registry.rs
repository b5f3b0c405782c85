//! Players and tournaments known to the server, shared by every connection.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, info};

use crate::configuration::Configuration;
use crate::error::ProtocolError;
use crate::game_interface::GameCatalog;
use crate::lock;
use crate::player::{Player, PlayerId};
use crate::tournament::{RRTournament, TournamentId};

/// Shared registry with its own id generators. Ids start at 1 and are never reused.
pub struct Registry {
    config: Configuration,
    catalog: GameCatalog,
    players: Mutex<HashMap<PlayerId, Arc<Player>>>,
    tournaments: Mutex<BTreeMap<TournamentId, Arc<RRTournament>>>,
    next_player: AtomicU32,
    next_tournament: AtomicU32,
}

impl Registry {
    /// An empty registry creating games from `catalog`.
    pub fn new(catalog: GameCatalog, config: Configuration) -> Arc<Self> {
        Arc::new(Registry {
            config,
            catalog,
            players: Mutex::new(HashMap::new()),
            tournaments: Mutex::new(BTreeMap::new()),
            next_player: AtomicU32::new(1),
            next_tournament: AtomicU32::new(1),
        })
    }

    /// Allocates a new player.
    pub fn register_player(&self) -> Arc<Player> {
        let id = self.next_player.fetch_add(1, Ordering::Relaxed);
        let player = Player::new(id);
        lock(&self.players).insert(id, player.clone());
        info!(player = id, "player registered");
        player
    }

    /// Player with the given id.
    pub fn player(&self, id: PlayerId) -> Option<Arc<Player>> {
        lock(&self.players).get(&id).cloned()
    }

    /// Tournament with the given id.
    pub fn tournament(&self, id: TournamentId) -> Option<Arc<RRTournament>> {
        lock(&self.tournaments).get(&id).cloned()
    }

    /// Game types tournaments can be created for.
    pub fn game_names(&self) -> Vec<&str> {
        self.catalog.names()
    }

    /// Number of registered players.
    pub fn player_count(&self) -> usize {
        lock(&self.players).len()
    }

    /// Number of registered tournaments.
    pub fn tournament_count(&self) -> usize {
        lock(&self.tournaments).len()
    }

    /// Creates a paused tournament of `kind` owned by `owner` and starts its scheduler.
    ///
    /// Returns `None` when no game of that type is known.
    pub fn create_tournament(&self, kind: &str, owner: &Arc<Player>) -> Option<Arc<RRTournament>> {
        let factory = self.catalog.get(kind)?;
        let id = self.next_tournament.fetch_add(1, Ordering::Relaxed);
        let tournament = RRTournament::new(id, owner, kind, factory, self.config);
        lock(&self.tournaments).insert(id, tournament.clone());
        info!(tournament = id, kind, owner = owner.id(), "tournament created");
        tournament.spawn();
        Some(tournament)
    }

    /// Adds `player` to tournament `id`.
    ///
    /// Without an id, the player's own tournament is used, or else the lowest-id tournament that
    /// has not ended.
    pub fn join_tournament(
        &self,
        player: &Arc<Player>,
        id: Option<TournamentId>,
    ) -> Result<Arc<RRTournament>, ProtocolError> {
        let current = player.tournament().filter(|t| !t.is_terminated());
        let target = match (id, &current) {
            (Some(id), _) => self.tournament(id),
            (None, Some(current)) => Some(current.clone()),
            (None, None) => lock(&self.tournaments)
                .values()
                .find(|t| !t.is_terminated())
                .cloned(),
        }
        .filter(|t| !t.is_terminated())
        .ok_or_else(|| ProtocolError::refused("Failed to join a tournament."))?;

        if current.is_some_and(|c| c.id() != target.id()) || !target.add_player(player) {
            return Err(ProtocolError::refused(
                "Player already assigned to a tournament.",
            ));
        }
        Ok(target)
    }

    /// Forgets ended tournaments with nothing in progress, and players disconnected for longer
    /// than the configured time to live that have nothing left to play.
    ///
    /// Returns the number of players and tournaments evicted.
    pub fn sweep(&self, now: Instant) -> (usize, usize) {
        let tournaments = {
            let mut tournaments = lock(&self.tournaments);
            let before = tournaments.len();
            tournaments.retain(|_, t| !t.is_terminated() || t.has_match_in_progress());
            before - tournaments.len()
        };
        let players = {
            let mut players = lock(&self.players);
            let before = players.len();
            players.retain(|_, p| !p.is_stale(self.config.player_ttl, now));
            before - players.len()
        };
        if players + tournaments > 0 {
            debug!(players, tournaments, "registry swept");
        }
        (players, tournaments)
    }

    /// Ends every tournament.
    pub fn shutdown(&self) {
        let tournaments: Vec<_> = lock(&self.tournaments).values().cloned().collect();
        for tournament in tournaments {
            tournament.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn registry() -> Arc<Registry> {
        Registry::new(
            GameCatalog::builtin(),
            Configuration::new()
                .with_scheduler_tick(Duration::from_millis(5))
                .with_player_ttl(Duration::from_secs(60)),
        )
    }

    #[test]
    fn ids_are_sequential_from_one() {
        let registry = registry();
        assert_eq!(registry.register_player().id(), 1);
        assert_eq!(registry.register_player().id(), 2);
        assert!(registry.player(2).is_some());
        assert!(registry.player(3).is_none());
        assert_eq!(registry.player_count(), 2);
    }

    #[test]
    fn unknown_game_type_is_refused() {
        let registry = registry();
        let owner = registry.register_player();
        assert!(registry.create_tournament("chess", &owner).is_none());
        assert_eq!(registry.tournament_count(), 0);
    }

    #[test]
    fn owner_and_guest_are_paired_both_ways() {
        let registry = registry();
        let owner = registry.register_player();
        let guest = registry.register_player();
        let tour = registry.create_tournament("nim", &owner).unwrap();
        assert_eq!(tour.id(), 1);

        assert_eq!(registry.join_tournament(&owner, None).unwrap().id(), 1);
        assert_eq!(registry.join_tournament(&guest, Some(1)).unwrap().id(), 1);
        assert_eq!(tour.report(), "1/2/N,2/1/N");

        assert_eq!(
            registry.join_tournament(&guest, None).unwrap_err(),
            ProtocolError::refused("Player already assigned to a tournament.")
        );
        registry.shutdown();
    }

    #[test]
    fn join_without_id_picks_the_oldest_running_tournament() {
        let registry = registry();
        let first_owner = registry.register_player();
        let second_owner = registry.register_player();
        let first = registry.create_tournament("nim", &first_owner).unwrap();
        registry.create_tournament("ttt", &second_owner).unwrap();
        first.terminate();

        let guest = registry.register_player();
        assert_eq!(registry.join_tournament(&guest, None).unwrap().id(), 2);
        assert_eq!(
            registry.join_tournament(&registry.register_player(), Some(1)).unwrap_err(),
            ProtocolError::refused("Failed to join a tournament.")
        );
        assert_eq!(
            registry.join_tournament(&first_owner, Some(9)).unwrap_err(),
            ProtocolError::refused("Failed to join a tournament.")
        );
        registry.shutdown();
    }

    #[test]
    fn sweep_evicts_finished_tournaments_and_stale_players() {
        let registry = registry();
        let owner = registry.register_player();
        let tour = registry.create_tournament("nim", &owner).unwrap();
        registry.join_tournament(&owner, None).unwrap();

        let much_later = Instant::now() + Duration::from_secs(120);
        assert_eq!(registry.sweep(much_later), (0, 0));

        tour.terminate();
        assert_eq!(registry.sweep(much_later), (1, 1));
        assert!(registry.player(owner.id()).is_none());
        assert_eq!(registry.player_count(), 0);
        assert_eq!(registry.tournament_count(), 0);
        assert_eq!(registry.sweep(much_later), (0, 0));
    }
}
