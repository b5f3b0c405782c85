//! One game between two players.
//!
//! A [`Match`] is created `NotStarted` by its tournament. Once the scheduler has claimed both
//! players it is marked `InProgress` and [`Match::run`] relays moves until the game ends. The
//! result is then frozen and both players are released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::configuration::Configuration;
use crate::game_interface::{Game, Outcome, Side};
use crate::lock;
use crate::player::Player;
use crate::protocol::Message;

/// Lifecycle of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    /// Waiting for both players to be free.
    NotStarted,
    /// Relaying moves.
    InProgress,
    /// Finished without a winner.
    Tie,
    /// Finished, home won.
    HomeWin,
    /// Finished, away won.
    AwayWin,
}

impl MatchState {
    /// Letter used in tournament reports.
    pub fn letter(self) -> char {
        match self {
            MatchState::NotStarted => 'N',
            MatchState::InProgress => 'I',
            MatchState::Tie => 'T',
            MatchState::HomeWin => 'H',
            MatchState::AwayWin => 'A',
        }
    }

    /// True once a result is recorded.
    pub fn is_terminal(self) -> bool {
        !matches!(self, MatchState::NotStarted | MatchState::InProgress)
    }
}

impl From<Outcome> for MatchState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::HomeWin => MatchState::HomeWin,
            Outcome::AwayWin => MatchState::AwayWin,
            Outcome::Tie => MatchState::Tie,
        }
    }
}

/// A game instance between a home and an away player.
pub struct Match {
    id: usize,
    home: Arc<Player>,
    away: Arc<Player>,
    game: Mutex<Box<dyn Game>>,
    state: Mutex<MatchState>,
    inbox: Mutex<VecDeque<(Arc<Player>, String)>>,
    errors: AtomicU32,
    forfeit_threshold: u32,
    tick: Duration,
}

impl Match {
    /// A match waiting to be started.
    pub fn new(
        id: usize,
        home: Arc<Player>,
        away: Arc<Player>,
        game: Box<dyn Game>,
        config: &Configuration,
    ) -> Arc<Self> {
        Arc::new(Match {
            id,
            home,
            away,
            game: Mutex::new(game),
            state: Mutex::new(MatchState::NotStarted),
            inbox: Mutex::new(VecDeque::new()),
            errors: AtomicU32::new(0),
            forfeit_threshold: config.forfeit_threshold,
            tick: config.match_tick,
        })
    }

    /// Position of the match in its tournament, starting at 1.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Player moving first.
    pub fn home(&self) -> &Arc<Player> {
        &self.home
    }

    /// Player moving second.
    pub fn away(&self) -> &Arc<Player> {
        &self.away
    }

    /// Current state.
    pub fn state(&self) -> MatchState {
        *lock(&self.state)
    }

    /// `home/away/letter` entry of a tournament report.
    pub fn report_entry(&self) -> String {
        format!(
            "{}/{}/{}",
            self.home.id(),
            self.away.id(),
            self.state().letter()
        )
    }

    /// Queues a move sent by `sender`.
    pub fn post_move(&self, sender: &Arc<Player>, action: &str) {
        lock(&self.inbox).push_back((sender.clone(), action.to_string()));
    }

    /// Moves `NotStarted` to `InProgress`. False if the match was already started.
    pub(crate) fn mark_started(&self) -> bool {
        let mut state = lock(&self.state);
        if *state != MatchState::NotStarted {
            return false;
        }
        *state = MatchState::InProgress;
        true
    }

    /// Plays the match to its end on the current thread.
    #[instrument(name = "match", skip_all, fields(home = self.home.id(), away = self.away.id()))]
    pub fn run(self: Arc<Self>) {
        self.begin();
        while !lock(&self.game).is_done() {
            self.step();
            thread::sleep(self.tick);
        }
        self.finish();
    }

    pub(crate) fn begin(&self) {
        info!("match started");
        self.home.post(Message::GameStart {
            side: Side::Home,
            opponent: self.away.name(),
        });
        self.away.post(Message::GameStart {
            side: Side::Away,
            opponent: self.home.name(),
        });
    }

    /// Pushes a changed state, then applies every queued move in arrival order.
    pub(crate) fn step(&self) {
        let mut game = lock(&self.game);
        self.broadcast_changes(game.as_mut());
        while !game.is_done() {
            let Some((sender, action)) = lock(&self.inbox).pop_front() else {
                break;
            };
            self.apply(game.as_mut(), &sender, &action);
            self.broadcast_changes(game.as_mut());
        }
    }

    /// Replays the start line and the current state to `player`, after a reconnection.
    pub(crate) fn remind(&self, player: &Player) {
        let Some(side) = self.side_of(player) else {
            return;
        };
        if self.state() != MatchState::InProgress {
            return;
        }
        let opponent = match side {
            Side::Home => self.away.name(),
            Side::Away => self.home.name(),
        };
        player.post(Message::GameStart { side, opponent });
        let mut game = lock(&self.game);
        self.broadcast_changes(game.as_mut());
        if let Some(state) = game.state(true) {
            player.post(Message::GameState(state));
        }
    }

    fn broadcast_changes(&self, game: &mut dyn Game) {
        if let Some(state) = game.state(false) {
            self.home.post(Message::GameState(state.clone()));
            self.away.post(Message::GameState(state));
        }
    }

    fn side_of(&self, player: &Player) -> Option<Side> {
        if player.id() == self.home.id() {
            Some(Side::Home)
        } else if player.id() == self.away.id() {
            Some(Side::Away)
        } else {
            None
        }
    }

    fn apply(&self, game: &mut dyn Game, sender: &Player, action: &str) {
        let Some(side) = self.side_of(sender) else {
            warn!(player = sender.id(), "move from a player outside the match");
            sender.post(Message::GameError(
                "[Programming error] This player is not part of this game.".to_string(),
            ));
            return;
        };

        match game.process_move(side, action) {
            Ok(reply) => {
                self.errors.store(0, Ordering::Relaxed);
                sender.post(Message::GameMessage(reply));
            }
            Err(rejected) => {
                let errors = self.errors.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(player = sender.id(), errors, %rejected, "move rejected");
                sender.post(Message::GameError(rejected.0));
                if errors > self.forfeit_threshold {
                    warn!(player = sender.id(), errors, "too many invalid moves, forfeiting");
                    game.resign(side);
                } else if let Some(state) = game.state(true) {
                    sender.post(Message::GameState(state));
                }
            }
        }
    }

    /// Records the result, notifies both players and releases them.
    pub(crate) fn finish(self: &Arc<Self>) {
        let winner = {
            let mut game = lock(&self.game);
            self.broadcast_changes(game.as_mut());
            game.winner()
        };
        let outcome = Outcome::from_winner(winner).unwrap_or_else(|| {
            warn!(?winner, "game went awry, recording it as a tie");
            Outcome::Tie
        });
        // results are queued before the match is reported over
        self.home.post(Message::GameResult(outcome));
        self.away.post(Message::GameResult(outcome));
        *lock(&self.state) = outcome.into();
        info!(%outcome, "match finished");

        self.home.release(self);
        self.away.release(self);
    }
}

impl std::fmt::Debug for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Match")
            .field("id", &self.id)
            .field("home", &self.home.id())
            .field("away", &self.away.id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbox;
    use crate::games::NimGame;

    struct Table {
        home: Arc<Player>,
        away: Arc<Player>,
        home_out: Arc<Outbox>,
        away_out: Arc<Outbox>,
        game: Arc<Match>,
    }

    fn table(rows: Vec<u32>) -> Table {
        let home = Player::new(1);
        let away = Player::new(2);
        home.set_name("ann");
        away.set_name("bob");
        let home_out = Outbox::new(1);
        let away_out = Outbox::new(2);
        home.attach(&home_out);
        away.attach(&away_out);
        let config = Configuration::new().with_match_tick(Duration::from_millis(1));
        let game = Match::new(
            1,
            home.clone(),
            away.clone(),
            Box::new(NimGame::with_rows(rows)),
            &config,
        );
        assert!(home.try_claim(&game));
        assert!(away.try_claim(&game));
        Table {
            home,
            away,
            home_out,
            away_out,
            game,
        }
    }

    #[test]
    fn start_and_state_are_pushed_to_both_sides() {
        let t = table(vec![2, 3]);
        assert!(t.game.mark_started());
        assert!(!t.game.mark_started());
        t.game.begin();
        t.game.step();
        t.game.step();

        assert_eq!(
            t.home_out.drain(),
            vec!["@GAME:START:H:bob", "@GAME:STATE:0,2,2,3"]
        );
        assert_eq!(
            t.away_out.drain(),
            vec!["@GAME:START:A:ann", "@GAME:STATE:0,2,2,3"]
        );
    }

    #[test]
    fn moves_are_answered_and_relayed() {
        let t = table(vec![2, 3]);
        t.game.step();
        t.home_out.drain();
        t.away_out.drain();

        t.game.post_move(&t.away, "0,1");
        t.game.post_move(&t.home, "1,3");
        t.game.step();

        assert_eq!(
            t.away_out.drain(),
            vec![
                "@GAME:ERROR:It is not your turn.",
                "@GAME:STATE:0,2,2,3",
                "@GAME:STATE:1,2,2,0",
            ]
        );
        assert_eq!(
            t.home_out.drain(),
            vec![
                "@GAME:MESSAGE:Took 3 sticks from row 1.",
                "@GAME:STATE:1,2,2,0",
            ]
        );
    }

    #[test]
    fn sixth_consecutive_invalid_move_forfeits() {
        let t = table(vec![5, 5]);
        t.game.step();

        for _ in 0..5 {
            t.game.post_move(&t.home, "7,1");
        }
        t.game.post_move(&t.home, "0,1");
        for _ in 0..5 {
            t.game.post_move(&t.away, "9,9");
        }
        t.game.step();
        assert!(!lock(&t.game.game).is_done());

        t.game.post_move(&t.away, "9,9");
        t.game.step();
        assert!(lock(&t.game.game).is_done());

        t.game.finish();
        assert_eq!(t.game.state(), MatchState::HomeWin);
        assert_eq!(t.home_out.drain().last().unwrap(), "@GAME:RESULT:H");
        assert_eq!(t.away_out.drain().last().unwrap(), "@GAME:RESULT:H");
    }

    #[test]
    fn finish_releases_both_players() {
        let t = table(vec![1]);
        t.game.post_move(&t.home, "0,1");
        t.game.step();
        t.game.finish();

        assert_eq!(t.game.state(), MatchState::HomeWin);
        assert_eq!(t.game.report_entry(), "1/2/H");
        assert!(t.home.current_match().is_none());
        assert!(t.away.current_match().is_none());
    }

    #[test]
    fn outsider_moves_are_refused() {
        let t = table(vec![1]);
        let outsider = Player::new(9);
        let outsider_out = Outbox::new(9);
        outsider.attach(&outsider_out);

        t.game.post_move(&outsider, "0,1");
        t.game.step();
        assert_eq!(
            outsider_out.drain(),
            vec!["@GAME:ERROR:[Programming error] This player is not part of this game."]
        );
        assert!(!lock(&t.game.game).is_done());
    }

    #[test]
    fn reconnected_player_gets_the_current_state() {
        let t = table(vec![4]);
        t.game.remind(&t.away);
        assert!(t.away_out.drain().is_empty());

        assert!(t.game.mark_started());
        t.game.begin();
        t.game.step();
        t.away_out.drain();

        let fresh = Outbox::new(3);
        t.away.detach(2);
        t.away.attach(&fresh);
        t.game.remind(&t.away);
        assert_eq!(
            fresh.drain(),
            vec!["@GAME:START:A:ann", "@GAME:STATE:0,1,4"]
        );
    }

    #[test]
    fn run_plays_to_the_end() {
        let t = table(vec![2]);
        t.game.post_move(&t.home, "0,1");
        t.game.post_move(&t.away, "0,1");
        assert!(t.game.mark_started());
        let game = t.game.clone();
        thread::spawn(move || game.run()).join().unwrap();

        assert_eq!(t.game.state(), MatchState::AwayWin);
        let home_lines = t.home_out.drain();
        assert_eq!(home_lines.first().unwrap(), "@GAME:START:H:bob");
        assert_eq!(home_lines.last().unwrap(), "@GAME:RESULT:A");
    }
}
