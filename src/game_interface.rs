//! Module defining traits that need to be implemented to plug a game into the server

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

/// One of the two roles in a match. Home moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Moves first.
    Home,
    /// Moves second.
    Away,
}

impl Side {
    /// Numeric slot used in game state payloads (`0` home, `1` away).
    pub fn index(self) -> usize {
        match self {
            Side::Home => 0,
            Side::Away => 1,
        }
    }

    /// Inverse of [`Side::index`].
    pub fn from_index(index: i64) -> Option<Side> {
        match index {
            0 => Some(Side::Home),
            1 => Some(Side::Away),
            _ => None,
        }
    }

    /// Wire letter: `H` or `A`.
    pub fn letter(self) -> char {
        match self {
            Side::Home => 'H',
            Side::Away => 'A',
        }
    }

    /// Parses a wire letter.
    pub fn from_letter(letter: &str) -> Option<Side> {
        match letter.trim() {
            "H" | "h" => Some(Side::Home),
            "A" | "a" => Some(Side::Away),
            _ => None,
        }
    }

    /// The other side.
    pub fn opponent(self) -> Side {
        match self {
            Side::Home => Side::Away,
            Side::Away => Side::Home,
        }
    }
}

/// Who won, as reported by a [`Game`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// Home won.
    Home,
    /// Away won.
    Away,
    /// Nobody won.
    Tie,
    /// The game stopped without a result.
    Aborted,
    /// The game is still running.
    Unfinished,
}

impl From<Side> for Winner {
    fn from(side: Side) -> Self {
        match side {
            Side::Home => Winner::Home,
            Side::Away => Winner::Away,
        }
    }
}

/// Final result character sent to both players: `H`, `A` or `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `H`
    HomeWin,
    /// `A`
    AwayWin,
    /// `T`
    Tie,
}

impl Outcome {
    /// Maps a game verdict onto a result. `None` for a game that has not produced a result.
    pub fn from_winner(winner: Winner) -> Option<Outcome> {
        match winner {
            Winner::Home => Some(Outcome::HomeWin),
            Winner::Away => Some(Outcome::AwayWin),
            Winner::Tie => Some(Outcome::Tie),
            Winner::Aborted | Winner::Unfinished => None,
        }
    }

    /// True if `side` won.
    pub fn is_win_for(self, side: Side) -> bool {
        matches!(
            (self, side),
            (Outcome::HomeWin, Side::Home) | (Outcome::AwayWin, Side::Away)
        )
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Outcome::HomeWin => 'H',
            Outcome::AwayWin => 'A',
            Outcome::Tie => 'T',
        };
        write!(f, "{c}")
    }
}

impl FromStr for Outcome {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "H" => Ok(Outcome::HomeWin),
            "A" => Ok(Outcome::AwayWin),
            "T" => Ok(Outcome::Tie),
            other => Err(anyhow::anyhow!("unrecognized result '{other}'")),
        }
    }
}

/// A move the game refused. The text is relayed to the mover as `@GAME:ERROR:<text>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MoveRejected(pub String);

impl MoveRejected {
    /// Refusal sent when a side moves out of turn.
    pub fn not_your_turn() -> Self {
        MoveRejected("It is not your turn.".to_string())
    }
}

/// What the game should implement.
///
/// The server holds one instance per match. Clients hold a mirror instance that is kept in sync
/// with [`Game::update_state`].
pub trait Game: Send + Any {
    /// True once the game reached a terminal state.
    fn is_done(&self) -> bool;

    /// Serialized state. When `force` is false, `None` is returned if nothing changed since the
    /// last call. The first comma-separated field is whose turn it is.
    fn state(&mut self, force: bool) -> Option<String>;

    /// Overwrites the local state from a payload produced by [`Game::state`].
    fn update_state(&mut self, state: &str) -> anyhow::Result<()>;

    /// Applies `action` on behalf of `side`.
    ///
    /// # Error
    /// Returned when it is not `side`'s turn or `action` is not a legal move.
    fn process_move(&mut self, side: Side, action: &str) -> Result<String, MoveRejected>;

    /// `side` gives up. The game ends with the opponent winning.
    fn resign(&mut self, side: Side);

    /// Verdict of the game, [`Winner::Unfinished`] while it is running.
    fn winner(&self) -> Winner;

    /// Side expected to move next, `None` if unknown or finished.
    fn turn(&self) -> Option<Side>;

    /// Used by AIs to reach the concrete game.
    fn as_any(&self) -> &dyn Any;
}

/// What a move-selection engine should implement.
pub trait Ai: Send {
    /// Picks a move for `side`. Called only when it is `side`'s turn.
    fn compute_move(&mut self, game: &dyn Game, side: Side) -> anyhow::Result<String>;

    /// Notification of a finished game.
    fn post_winner(&mut self, _outcome: Outcome) {}

    /// Called once when the client stops.
    fn end(&mut self) {}
}

/// What will be given to the server to allow it to create games.
pub trait GameFactory: Send + Sync {
    /// Returns an initialized game, ready for the home side to move.
    fn new_game(&self) -> Box<dyn Game>;

    /// Returns an empty client-side copy, filled by [`Game::update_state`].
    fn new_mirror(&self) -> Box<dyn Game>;

    /// Returns an AI able to play games of this factory.
    fn new_ai(&self) -> Box<dyn Ai>;
}

/// Game factories keyed by type name, case-insensitive.
#[derive(Clone, Default)]
pub struct GameCatalog {
    factories: HashMap<String, Arc<dyn GameFactory>>,
}

impl GameCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`, replacing a previous entry.
    pub fn with(mut self, name: &str, factory: impl GameFactory + 'static) -> Self {
        self.register(name, Arc::new(factory));
        self
    }

    /// Registers `factory` under `name`, replacing a previous entry.
    pub fn register(&mut self, name: &str, factory: Arc<dyn GameFactory>) {
        self.factories.insert(name.trim().to_ascii_uppercase(), factory);
    }

    /// Factory registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn GameFactory>> {
        self.factories
            .get(&name.trim().to_ascii_uppercase())
            .cloned()
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for GameCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameCatalog")
            .field("games", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod interface_tests {
    use super::*;

    struct DummyGame {
        done: bool,
    }

    impl Game for DummyGame {
        fn is_done(&self) -> bool {
            self.done
        }

        fn state(&mut self, _force: bool) -> Option<String> {
            Some("0".to_owned())
        }

        fn update_state(&mut self, _state: &str) -> anyhow::Result<()> {
            Ok(())
        }

        fn process_move(&mut self, _side: Side, _action: &str) -> Result<String, MoveRejected> {
            self.done = true;
            Ok("done".to_owned())
        }

        fn resign(&mut self, _side: Side) {
            self.done = true;
        }

        fn winner(&self) -> Winner {
            if self.done {
                Winner::Tie
            } else {
                Winner::Unfinished
            }
        }

        fn turn(&self) -> Option<Side> {
            (!self.done).then_some(Side::Home)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct DummyAi;

    impl Ai for DummyAi {
        fn compute_move(&mut self, game: &dyn Game, _side: Side) -> anyhow::Result<String> {
            let dummy = game
                .as_any()
                .downcast_ref::<DummyGame>()
                .ok_or_else(|| anyhow::anyhow!("wrong game"))?;
            Ok(dummy.done.to_string())
        }
    }

    struct DummyFactory;

    impl GameFactory for DummyFactory {
        fn new_game(&self) -> Box<dyn Game> {
            Box::new(DummyGame { done: false })
        }

        fn new_mirror(&self) -> Box<dyn Game> {
            self.new_game()
        }

        fn new_ai(&self) -> Box<dyn Ai> {
            Box::new(DummyAi)
        }
    }

    #[test]
    fn test_dyn_game_and_ai() {
        let catalog = GameCatalog::new().with("dummy", DummyFactory);
        let factory = catalog.get("DUMMY").unwrap();
        let mut game = factory.new_game();
        let mut ai = factory.new_ai();

        assert_eq!(ai.compute_move(game.as_ref(), Side::Home).unwrap(), "false");
        assert_eq!(game.process_move(Side::Home, "x").unwrap(), "done");
        assert!(game.is_done());
        assert_eq!(Outcome::from_winner(game.winner()), Some(Outcome::Tie));
    }

    #[test]
    fn test_catalog_is_case_insensitive() {
        let catalog = GameCatalog::new().with("Dummy", DummyFactory);
        assert!(catalog.get("dUmMy").is_some());
        assert!(catalog.get("other").is_none());
        assert_eq!(catalog.names(), vec!["DUMMY"]);
    }

    #[test]
    fn test_outcome_letters() {
        assert_eq!("H".parse::<Outcome>().unwrap(), Outcome::HomeWin);
        assert_eq!(Outcome::AwayWin.to_string(), "A");
        assert!("X".parse::<Outcome>().is_err());
        assert!(Outcome::AwayWin.is_win_for(Side::Away));
        assert!(!Outcome::Tie.is_win_for(Side::Home));
        assert_eq!(Outcome::from_winner(Winner::Aborted), None);
        assert_eq!(Side::Home.opponent(), Side::Away);
        assert_eq!(Side::from_letter("A"), Some(Side::Away));
    }
}
