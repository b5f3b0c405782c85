//! Round-robin tournaments.
//!
//! Every roster member meets every other member twice, once at home and once away. Matches are
//! not grouped into rounds: the scheduler starts any match whose two players are both free.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, instrument, Span};

use crate::configuration::Configuration;
use crate::game_interface::GameFactory;
use crate::lock;
use crate::match_runner::{Match, MatchState};
use crate::player::{Player, PlayerId};
use crate::protocol::Message;

/// Tournament identity.
pub type TournamentId = u32;

#[derive(Default)]
struct Roster {
    players: Vec<Arc<Player>>,
    matches: Vec<Arc<Match>>,
}

/// A round-robin tournament and its scheduler.
pub struct RRTournament {
    id: TournamentId,
    owner: PlayerId,
    kind: String,
    factory: Arc<dyn GameFactory>,
    config: Configuration,
    roster: Mutex<Roster>,
    active: AtomicBool,
    terminated: AtomicBool,
}

impl RRTournament {
    /// A paused tournament of `kind` games owned by `owner`. The owner is bound to it but is not
    /// part of the roster until it joins.
    pub fn new(
        id: TournamentId,
        owner: &Arc<Player>,
        kind: &str,
        factory: Arc<dyn GameFactory>,
        config: Configuration,
    ) -> Arc<Self> {
        let tournament = Arc::new(RRTournament {
            id,
            owner: owner.id(),
            kind: kind.trim().to_ascii_uppercase(),
            factory,
            config,
            roster: Mutex::new(Roster::default()),
            active: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        });
        owner.set_tournament(&tournament);
        tournament
    }

    /// Identity of the tournament.
    pub fn id(&self) -> TournamentId {
        self.id
    }

    /// Game type played.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// True if `player` created the tournament.
    pub fn is_owner(&self, player: &Player) -> bool {
        player.id() == self.owner
    }

    /// True while the scheduler may start matches.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// True once ended.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Adds `player` and pairs it with every current member, both ways.
    ///
    /// Returns false if the player is already on the roster.
    pub fn add_player(self: &Arc<Self>, player: &Arc<Player>) -> bool {
        player.set_tournament(self);
        let mut roster = lock(&self.roster);
        if roster.players.iter().any(|p| p.id() == player.id()) {
            return false;
        }
        let others = roster.players.clone();
        for other in others {
            for (home, away) in [(&other, player), (player, &other)] {
                let id = roster.matches.len() + 1;
                roster.matches.push(Match::new(
                    id,
                    home.clone(),
                    away.clone(),
                    self.factory.new_game(),
                    &self.config,
                ));
            }
        }
        roster.players.push(player.clone());
        info!(
            tournament = self.id,
            player = player.id(),
            matches = roster.matches.len(),
            "player joined"
        );
        true
    }

    /// Resumes or pauses scheduling. Running matches are not affected.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
        info!(tournament = self.id, active, "tournament activity changed");
    }

    /// Stops the scheduler and tells every roster member.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(tournament = self.id, "tournament ended");
        for player in self.players() {
            player.post(Message::TourEnd);
        }
    }

    /// `home/away/state` of every match, comma-separated, in creation order.
    pub fn report(&self) -> String {
        self.matches()
            .iter()
            .map(|m| m.report_entry())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Number of matches without a result.
    pub fn matches_left(&self) -> usize {
        self.matches()
            .iter()
            .filter(|m| !m.state().is_terminal())
            .count()
    }

    /// True if some match is being played.
    pub fn has_match_in_progress(&self) -> bool {
        self.matches()
            .iter()
            .any(|m| m.state() == MatchState::InProgress)
    }

    /// Roster, in joining order.
    pub fn players(&self) -> Vec<Arc<Player>> {
        lock(&self.roster).players.clone()
    }

    /// Every match, in creation order.
    pub fn matches(&self) -> Vec<Arc<Match>> {
        lock(&self.roster).matches.clone()
    }

    /// Starts the scheduler on a new thread.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let tournament = self.clone();
        thread::spawn(move || tournament.run())
    }

    /// Scans for startable matches until the tournament ends.
    #[instrument(name = "tournament", skip_all, fields(id = self.id, kind = %self.kind))]
    pub fn run(self: Arc<Self>) {
        debug!("scheduler running");
        while !self.is_terminated() {
            if self.is_active() {
                for started in self.start_available_matches() {
                    let span = Span::current();
                    thread::spawn(move || {
                        let _entered = span.enter();
                        started.run()
                    });
                }
            }
            thread::sleep(self.config.scheduler_tick);
        }
        debug!("scheduler stopped");
    }

    /// Claims both players of every match that can start now and marks those matches started.
    ///
    /// A home claim is rolled back when the away player is busy.
    pub(crate) fn start_available_matches(&self) -> Vec<Arc<Match>> {
        let mut started = vec![];
        for candidate in self.matches() {
            if candidate.state() != MatchState::NotStarted {
                continue;
            }
            let (home, away) = (candidate.home(), candidate.away());
            if !home.try_claim(&candidate) {
                continue;
            }
            if !away.try_claim(&candidate) {
                home.release(&candidate);
                continue;
            }
            if candidate.mark_started() {
                info!(home = home.id(), away = away.id(), "starting match");
                started.push(candidate);
            } else {
                home.release(&candidate);
                away.release(&candidate);
            }
        }
        started
    }
}

impl std::fmt::Debug for RRTournament {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RRTournament")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("active", &self.is_active())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::connection::Outbox;
    use crate::games::NimFactory;

    fn tournament(owner: &Arc<Player>) -> Arc<RRTournament> {
        RRTournament::new(
            1,
            owner,
            "nim",
            Arc::new(NimFactory::with_rows(vec![1])),
            Configuration::new().with_scheduler_tick(Duration::from_millis(5)),
        )
    }

    #[test]
    fn every_ordered_pair_is_scheduled_once() {
        for n in 2..=6u32 {
            let players: Vec<_> = (1..=n).map(Player::new).collect();
            let tour = tournament(&players[0]);
            for p in &players {
                assert!(tour.add_player(p));
            }
            let matches = tour.matches();
            assert_eq!(matches.len() as u32, n * (n - 1));

            let pairs: HashSet<(PlayerId, PlayerId)> = matches
                .iter()
                .map(|m| (m.home().id(), m.away().id()))
                .collect();
            assert_eq!(pairs.len(), matches.len());
            assert!(pairs.iter().all(|(h, a)| h != a));
            let ids: Vec<usize> = matches.iter().map(|m| m.id()).collect();
            assert_eq!(ids, (1..=matches.len()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn joining_twice_is_refused() {
        let owner = Player::new(1);
        let tour = tournament(&owner);
        assert!(tour.add_player(&owner));
        assert!(!tour.add_player(&owner));
        assert!(Arc::ptr_eq(&owner.tournament().unwrap(), &tour));
    }

    #[test]
    fn report_lists_matches_in_creation_order() {
        let players: Vec<_> = (1..=3).map(Player::new).collect();
        let tour = tournament(&players[0]);
        for p in &players {
            tour.add_player(p);
        }
        assert_eq!(tour.report(), "1/2/N,2/1/N,1/3/N,3/1/N,2/3/N,3/2/N");
        assert_eq!(tour.matches_left(), 6);
    }

    #[test]
    fn scheduler_never_claims_a_busy_player() {
        let players: Vec<_> = (1..=4).map(Player::new).collect();
        let tour = tournament(&players[0]);
        for p in &players {
            tour.add_player(p);
        }

        let started = tour.start_available_matches();
        assert_eq!(started.len(), 2);
        let mut busy = HashSet::new();
        for m in &started {
            assert!(busy.insert(m.home().id()));
            assert!(busy.insert(m.away().id()));
            assert_eq!(m.state(), MatchState::InProgress);
        }
        for p in &players {
            assert!(p.current_match().is_some());
        }
        assert!(tour.start_available_matches().is_empty());
        assert!(tour.has_match_in_progress());

        started[0].finish();
        let next = tour.start_available_matches();
        assert_eq!(next.len(), 1);
        assert_eq!(tour.matches_left(), 11);
    }

    #[test]
    fn paused_tournament_starts_nothing() {
        let players: Vec<_> = (1..=2).map(Player::new).collect();
        let tour = tournament(&players[0]);
        for p in &players {
            tour.add_player(p);
        }
        let handle = tour.spawn();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(tour.matches_left(), 2);
        assert!(players[0].current_match().is_none());

        tour.terminate();
        handle.join().unwrap();
    }

    #[test]
    fn active_tournament_plays_its_matches() {
        let players: Vec<_> = (1..=2).map(Player::new).collect();
        let tour = tournament(&players[0]);
        for p in &players {
            tour.add_player(p);
        }
        tour.set_active(true);
        let handle = tour.spawn();

        for _ in 0..400 {
            for p in &players {
                match p.current_match() {
                    Some(m) if m.home().id() == p.id() => m.post_move(p, "0,1"),
                    _ => {}
                }
            }
            if tour.matches_left() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(tour.report(), "1/2/H,2/1/H");
        tour.terminate();
        handle.join().unwrap();
    }

    #[test]
    fn terminate_notifies_the_roster_once() {
        let players: Vec<_> = (1..=2).map(Player::new).collect();
        let outboxes: Vec<_> = (1..=2).map(Outbox::new).collect();
        for (p, o) in players.iter().zip(&outboxes) {
            p.attach(o);
        }
        let tour = tournament(&players[0]);
        for p in &players {
            tour.add_player(p);
        }
        tour.terminate();
        tour.terminate();
        assert!(tour.is_terminated());
        for o in &outboxes {
            assert_eq!(o.drain(), vec!["@TOUR:END"]);
        }
    }
}
