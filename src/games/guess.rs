//! Guess a number between 1 and 100. Players alternate guesses and are told high, low or correct.
//! The first to guess wins; both guessing right in the same round is a tie.

use std::any::Any;

use anyhow::{bail, Context};

use crate::game_interface::{Ai, Game, GameFactory, MoveRejected, Side, Winner};

const LOWEST: u32 = 1;
const HIGHEST: u32 = 100;

/// Last feedback received by one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    /// No guess yet.
    NotGuessed,
    /// The guess was above the answer.
    High,
    /// The guess was below the answer.
    Low,
    /// The guess was the answer.
    Correct,
}

impl Hint {
    fn letter(self) -> char {
        match self {
            Hint::NotGuessed => '-',
            Hint::High => 'H',
            Hint::Low => 'L',
            Hint::Correct => 'C',
        }
    }

    fn from_letter(letter: &str) -> anyhow::Result<Hint> {
        Ok(match letter.trim() {
            "-" => Hint::NotGuessed,
            "H" => Hint::High,
            "L" => Hint::Low,
            "C" => Hint::Correct,
            other => bail!("unknown hint '{other}'"),
        })
    }
}

/// A guessing round.
///
/// State payload: `turn,h,a` where `h` and `a` are the last hints (`-`, `H`, `L`, `C`).
/// Move payload: the guessed integer.
#[derive(Debug, Clone)]
pub struct GuessGame {
    answer: u32,
    hints: [Hint; 2],
    turn: Side,
    changed: bool,
    resigned: Option<Side>,
}

impl GuessGame {
    /// A game with a random answer.
    pub fn random() -> Self {
        use rand::Rng;
        Self::with_answer(rand::rng().random_range(LOWEST..=HIGHEST))
    }

    /// A game with a fixed answer.
    pub fn with_answer(answer: u32) -> Self {
        GuessGame {
            answer,
            hints: [Hint::NotGuessed; 2],
            turn: Side::Home,
            changed: true,
            resigned: None,
        }
    }

    /// A game with an unknown answer, waiting for [`Game::update_state`].
    pub fn mirror() -> Self {
        Self::with_answer(0)
    }

    /// Last hint received by `side`.
    pub fn hint(&self, side: Side) -> Hint {
        self.hints[side.index()]
    }
}

impl Game for GuessGame {
    fn is_done(&self) -> bool {
        self.resigned.is_some() || (self.turn == Side::Home && self.hints.contains(&Hint::Correct))
    }

    fn state(&mut self, force: bool) -> Option<String> {
        if !force && !self.changed {
            return None;
        }
        self.changed = false;
        Some(format!(
            "{},{},{}",
            self.turn.index(),
            self.hints[0].letter(),
            self.hints[1].letter()
        ))
    }

    fn update_state(&mut self, state: &str) -> anyhow::Result<()> {
        let pieces: Vec<&str> = state.split(',').collect();
        if pieces.len() != 3 {
            bail!("guess state needs 3 fields: '{state}'");
        }
        let turn: i64 = pieces[0].trim().parse().context("invalid turn")?;
        self.turn = Side::from_index(turn).context("turn out of range")?;
        self.hints = [Hint::from_letter(pieces[1])?, Hint::from_letter(pieces[2])?];
        Ok(())
    }

    fn process_move(&mut self, side: Side, action: &str) -> Result<String, MoveRejected> {
        if self.is_done() || side != self.turn {
            return Err(MoveRejected::not_your_turn());
        }
        let Ok(guess) = action.trim().parse::<i64>() else {
            return Err(MoveRejected(
                "Could not understand your move.  Please use an integer.".to_string(),
            ));
        };
        self.turn = side.opponent();
        self.changed = true;
        let (hint, reply) = match guess.cmp(&(self.answer as i64)) {
            std::cmp::Ordering::Less => (Hint::Low, "You guessed low."),
            std::cmp::Ordering::Greater => (Hint::High, "You guessed high."),
            std::cmp::Ordering::Equal => (Hint::Correct, "Bingo!"),
        };
        self.hints[side.index()] = hint;
        Ok(reply.to_string())
    }

    fn resign(&mut self, side: Side) {
        self.resigned = Some(side);
        self.changed = true;
    }

    fn winner(&self) -> Winner {
        if let Some(side) = self.resigned {
            return side.opponent().into();
        }
        if !self.is_done() {
            return Winner::Unfinished;
        }
        match (self.hints[0], self.hints[1]) {
            (Hint::Correct, Hint::Correct) => Winner::Tie,
            (Hint::Correct, _) => Winner::Home,
            _ => Winner::Away,
        }
    }

    fn turn(&self) -> Option<Side> {
        (!self.is_done()).then_some(self.turn)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Bisects the 1 to 100 range using its own hints.
#[derive(Debug, Clone)]
pub struct GuessAi {
    low: u32,
    high: u32,
    last: Option<u32>,
}

impl GuessAi {
    /// Fresh bisection over the full range.
    pub fn new() -> Self {
        GuessAi {
            low: LOWEST,
            high: HIGHEST,
            last: None,
        }
    }
}

impl Default for GuessAi {
    fn default() -> Self {
        Self::new()
    }
}

impl Ai for GuessAi {
    fn compute_move(&mut self, game: &dyn Game, side: Side) -> anyhow::Result<String> {
        let guess_game = game
            .as_any()
            .downcast_ref::<GuessGame>()
            .context("GuessAi attached to a game that is not a guessing game")?;
        match (guess_game.hint(side), self.last) {
            (Hint::NotGuessed, _) | (_, None) => *self = Self::new(),
            (Hint::High, Some(last)) => self.high = last.saturating_sub(1).max(self.low),
            (Hint::Low, Some(last)) => self.low = (last + 1).min(self.high),
            (Hint::Correct, Some(last)) => return Ok(last.to_string()),
        }
        let guess = self.low + (self.high - self.low) / 2;
        self.last = Some(guess);
        Ok(guess.to_string())
    }

    fn post_winner(&mut self, _outcome: crate::game_interface::Outcome) {
        *self = Self::new();
    }
}

/// Factory for the guessing game.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuessFactory;

impl GameFactory for GuessFactory {
    fn new_game(&self) -> Box<dyn Game> {
        Box::new(GuessGame::random())
    }

    fn new_mirror(&self) -> Box<dyn Game> {
        Box::new(GuessGame::mirror())
    }

    fn new_ai(&self) -> Box<dyn Ai> {
        Box::new(GuessAi::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_wins_when_away_misses_the_round() {
        let mut game = GuessGame::with_answer(42);
        assert_eq!(game.process_move(Side::Home, "42").unwrap(), "Bingo!");
        assert!(!game.is_done());
        assert_eq!(game.process_move(Side::Away, "10").unwrap(), "You guessed low.");
        assert!(game.is_done());
        assert_eq!(game.winner(), Winner::Home);
        assert_eq!(game.state(true).as_deref(), Some("0,C,L"));
    }

    #[test]
    fn both_correct_in_one_round_ties() {
        let mut game = GuessGame::with_answer(7);
        game.process_move(Side::Home, "7").unwrap();
        game.process_move(Side::Away, "7").unwrap();
        assert_eq!(game.winner(), Winner::Tie);
    }

    #[test]
    fn out_of_turn_guess_is_rejected() {
        let mut game = GuessGame::with_answer(7);
        assert!(game.process_move(Side::Away, "7").is_err());
        assert!(game.process_move(Side::Home, "seven").is_err());
        assert_eq!(game.turn(), Some(Side::Home));
    }

    #[test]
    fn bisection_finds_the_answer() {
        let mut server = GuessGame::with_answer(73);
        let mut mirror = GuessGame::mirror();
        let mut home = GuessAi::new();
        let mut away = GuessAi::new();
        while !server.is_done() {
            mirror.update_state(&server.state(true).unwrap()).unwrap();
            let side = mirror.turn().unwrap();
            let ai = if side == Side::Home { &mut home } else { &mut away };
            let action = ai.compute_move(&mirror, side).unwrap();
            server.process_move(side, &action).unwrap();
        }
        assert_eq!(server.winner(), Winner::Tie);
    }
}
