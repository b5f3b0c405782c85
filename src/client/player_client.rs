use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};

use crate::client::{client_outbox, ClientSettings};
use crate::connection::{Outbox, Protocol};
use crate::error::ProtocolError;
use crate::game_interface::{Ai, Game, GameFactory, Outcome, Side};
use crate::player::PlayerId;
use crate::protocol::{CommandTable, Frame, Message};
use crate::tournament::TournamentId;

/// Results of the matches played so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    /// Matches won.
    pub wins: u32,
    /// Matches lost.
    pub losses: u32,
    /// Matches tied.
    pub ties: u32,
}

impl Tally {
    fn record(&mut self, outcome: Outcome, side: Side) {
        match outcome {
            Outcome::Tie => self.ties += 1,
            o if o.is_win_for(side) => self.wins += 1,
            _ => self.losses += 1,
        }
    }
}

/// A competitor playing every match of its tournament with an AI.
///
/// The client keeps a mirror of the current game, rebuilt from each `@GAME:STATE`, and moves
/// at most once per distinct state while it is its turn.
pub struct PlayerClient {
    outbox: Arc<Outbox>,
    factory: Arc<dyn GameFactory>,
    ai: Box<dyn Ai>,
    pid: Option<PlayerId>,
    tid: Option<TournamentId>,
    game: Option<(Side, Box<dyn Game>)>,
    last_answered: Option<String>,
    tally: Tally,
    finished: bool,
}

impl PlayerClient {
    /// A competitor for games built by `factory`. Queues the handshake described by `settings`.
    pub fn new(settings: &ClientSettings, factory: Arc<dyn GameFactory>) -> Self {
        let outbox = client_outbox();
        outbox.post(match settings.pid {
            Some(pid) => Message::Player(pid),
            None => Message::NewPlayer,
        });
        if let Some(name) = &settings.name {
            outbox.post(Message::SetName(name.clone()));
        }
        outbox.post(Message::TourJoin(settings.tid));

        PlayerClient {
            outbox,
            ai: factory.new_ai(),
            factory,
            pid: settings.pid,
            tid: settings.tid,
            game: None,
            last_answered: None,
            tally: Tally::default(),
            finished: false,
        }
    }

    /// Player id assigned by the server.
    pub fn pid(&self) -> Option<PlayerId> {
        self.pid
    }

    /// Tournament id announced by the server.
    pub fn tid(&self) -> Option<TournamentId> {
        self.tid
    }

    /// Results so far.
    pub fn tally(&self) -> Tally {
        self.tally
    }

    /// True once the tournament has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn commands() -> &'static CommandTable<Self> {
        static COMMANDS: OnceLock<CommandTable<PlayerClient>> = OnceLock::new();
        COMMANDS.get_or_init(|| {
            CommandTable::new()
                .on("@PID", Self::on_pid)
                .on("@TID", Self::on_tid)
                .on("@GAME", Self::on_game)
                .on("@TOUR", Self::on_tour)
                .on("@ERROR", Self::on_server_error)
                .on("@MESSAGE", Self::on_message)
                .on("@REPORT", Self::ignore)
                .on("@NAME", Self::ignore)
                .on("@PING", Self::on_ping)
                .on("@PONG", Self::ignore)
        })
    }

    fn game_commands() -> &'static CommandTable<Self> {
        static COMMANDS: OnceLock<CommandTable<PlayerClient>> = OnceLock::new();
        COMMANDS.get_or_init(|| {
            CommandTable::namespace("GAME", "A subcommand is required for GAME.")
                .on("START", Self::on_start)
                .on("STATE", Self::on_state)
                .on("RESULT", Self::on_result)
                .on("MESSAGE", Self::on_game_message)
                .on("ERROR", Self::on_game_error)
        })
    }

    fn ignore(&mut self, _: &Frame) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn on_ping(&mut self, _: &Frame) -> Result<(), ProtocolError> {
        self.outbox.post(Message::Pong);
        Ok(())
    }

    fn on_pid(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let pid = frame.integer(1, "PID without an id.", "PID")?;
        info!(pid, "registered, keep this id to reconnect");
        self.pid = Some(pid);
        Ok(())
    }

    fn on_tid(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let tid = frame.integer(1, "TID without an id.", "TID")?;
        info!(tid, "tournament announced");
        self.tid = Some(tid);
        Ok(())
    }

    fn on_server_error(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        warn!(reason = frame.field(1).unwrap_or_default(), "server refused a command");
        Ok(())
    }

    fn on_message(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        info!(text = frame.field(1).unwrap_or_default(), "server message");
        Ok(())
    }

    fn on_tour(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        if frame.key(1).as_deref() == Some("END") {
            info!(tally = ?self.tally, "tournament ended");
            self.finished = true;
            self.ai.end();
            self.outbox.close();
        }
        Ok(())
    }

    fn on_game(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        Self::game_commands().dispatch(self, frame)
    }

    fn on_start(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let side = frame
            .field(2)
            .and_then(Side::from_letter)
            .ok_or(ProtocolError::MissingField {
                what: "START without a side.",
            })?;
        let opponent = frame.field(3).unwrap_or_default();
        info!(?side, opponent, "match starting");
        self.game = Some((side, self.factory.new_mirror()));
        self.last_answered = None;
        Ok(())
    }

    fn on_state(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let payload = frame.require(2, "STATE without a payload.")?;
        let Some((side, game)) = self.game.as_mut() else {
            debug!(payload, "state received outside of a match");
            return Ok(());
        };
        if let Err(e) = game.update_state(payload) {
            warn!("could not read game state '{payload}': {e:#}");
            return Ok(());
        }
        if game.is_done() || game.turn() != Some(*side) {
            return Ok(());
        }
        if self.last_answered.as_deref() == Some(payload) {
            return Ok(());
        }
        match self.ai.compute_move(game.as_ref(), *side) {
            Ok(action) => {
                debug!(payload, %action, "moving");
                self.outbox.post(Message::GameMove(action));
                self.last_answered = Some(payload.to_string());
            }
            Err(e) => warn!("AI could not pick a move: {e:#}"),
        }
        Ok(())
    }

    fn on_game_message(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        debug!(text = frame.field(2).unwrap_or_default(), "move accepted");
        Ok(())
    }

    fn on_game_error(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        warn!(reason = frame.field(2).unwrap_or_default(), "move rejected");
        // the reminder that follows carries the same state: answer it again
        self.last_answered = None;
        Ok(())
    }

    fn on_result(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let raw = frame.require(2, "RESULT without an outcome.")?;
        let outcome: Outcome = raw.trim().parse().map_err(|_| ProtocolError::InvalidInteger {
            field: "RESULT",
            value: raw.to_string(),
        })?;
        if let Some((side, _)) = self.game.take() {
            self.tally.record(outcome, side);
            info!(%outcome, ?side, tally = ?self.tally, "match over");
        }
        self.ai.post_winner(outcome);
        self.last_answered = None;
        Ok(())
    }
}

impl Protocol for PlayerClient {
    fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    fn dispatch(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        Self::commands().dispatch(self, frame)
    }

    fn on_error(&mut self, error: ProtocolError) {
        warn!(%error, "unexpected line from server");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::NimFactory;

    fn client(settings: &ClientSettings) -> PlayerClient {
        PlayerClient::new(settings, Arc::new(NimFactory::with_rows(vec![2, 3])))
    }

    fn feed(client: &mut PlayerClient, line: &str) {
        if let Err(error) = client.dispatch(&Frame::parse(line)) {
            client.on_error(error);
        }
    }

    #[test]
    fn handshake_registers_names_and_joins() {
        let fresh = client(&ClientSettings::default().with_name("bot"));
        assert_eq!(
            fresh.outbox.drain(),
            vec!["@NEW PLAYER", "@NAME:bot", "@TOUR:JOIN"]
        );

        let returning = client(&ClientSettings::default().with_pid(4).with_tid(2));
        assert_eq!(returning.outbox.drain(), vec!["@PLAYER:4", "@TOUR:JOIN:2"]);
    }

    #[test]
    fn moves_once_per_state_on_its_turn() {
        let mut bot = client(&ClientSettings::default());
        bot.outbox.drain();
        feed(&mut bot, "@PID:3");
        assert_eq!(bot.pid(), Some(3));

        feed(&mut bot, "@GAME:START:H:ann");
        feed(&mut bot, "@GAME:STATE:0,2,2,3");
        let sent = bot.outbox.drain();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("@GAME:MOVE:"));

        // a repeated state is not answered twice
        feed(&mut bot, "@GAME:STATE:0,2,2,3");
        assert!(bot.outbox.drain().is_empty());

        // unless the last move was rejected
        feed(&mut bot, "@GAME:ERROR:Invalid move.");
        feed(&mut bot, "@GAME:STATE:0,2,2,3");
        assert_eq!(bot.outbox.drain().len(), 1);

        // opponent's turn
        feed(&mut bot, "@GAME:STATE:1,2,1,3");
        assert!(bot.outbox.drain().is_empty());
    }

    #[test]
    fn results_are_tallied_from_the_client_side() {
        let mut bot = client(&ClientSettings::default());
        bot.outbox.drain();

        feed(&mut bot, "@GAME:START:A:ann");
        feed(&mut bot, "@GAME:RESULT:A");
        feed(&mut bot, "@GAME:START:H:ann");
        feed(&mut bot, "@GAME:RESULT:A");
        feed(&mut bot, "@GAME:START:H:bob");
        feed(&mut bot, "@GAME:RESULT:T");
        assert_eq!(
            bot.tally(),
            Tally {
                wins: 1,
                losses: 1,
                ties: 1
            }
        );
    }

    #[test]
    fn answers_pings_and_stops_at_tour_end() {
        let mut bot = client(&ClientSettings::default());
        bot.outbox.drain();
        feed(&mut bot, "@PING");
        assert_eq!(bot.outbox.drain(), vec!["@PONG"]);

        feed(&mut bot, "@WHATEVER");
        assert!(bot.outbox.drain().is_empty());

        feed(&mut bot, "@TOUR:END");
        assert!(bot.is_finished());
        assert!(!bot.outbox.is_open());
    }
}
