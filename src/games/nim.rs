//! Nim: players take turns removing any number of sticks from one row. Taking the last stick wins.

use std::any::Any;

use anyhow::{bail, Context};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::game_interface::{Ai, Game, GameFactory, MoveRejected, Side, Winner};

const MIN_ROWS: usize = 3;
const MAX_ROWS: usize = 10;
const MIN_STICKS: u32 = 5;
const MAX_STICKS: u32 = 100;

/// A Nim board.
///
/// State payload: `turn,rows,s0,s1,...` where `turn` is `0` (home), `1` (away) or `-1` (unknown).
/// Move payload: `row,take`.
#[derive(Debug, Clone)]
pub struct NimGame {
    sticks: Vec<u32>,
    turn: Option<Side>,
    changed: bool,
    done: bool,
    winner: Winner,
}

impl NimGame {
    /// A board of 3 to 10 rows holding 5 to 100 sticks each.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let rows = rng.random_range(MIN_ROWS..=MAX_ROWS);
        let sticks = (0..rows)
            .map(|_| rng.random_range(MIN_STICKS..=MAX_STICKS))
            .collect();
        Self::with_rows(sticks)
    }

    /// A board with the given rows, home to move.
    pub fn with_rows(sticks: Vec<u32>) -> Self {
        let done = sticks.iter().all(|&s| s == 0);
        NimGame {
            sticks,
            turn: Some(Side::Home),
            changed: true,
            done,
            winner: Winner::Unfinished,
        }
    }

    /// An empty board waiting for [`Game::update_state`].
    pub fn mirror() -> Self {
        NimGame {
            sticks: vec![],
            turn: None,
            changed: false,
            done: false,
            winner: Winner::Unfinished,
        }
    }

    /// Sticks left per row.
    pub fn sticks(&self) -> &[u32] {
        &self.sticks
    }

    fn parse_move(action: &str) -> Option<(usize, u32)> {
        let (row, take) = action.split_once(',')?;
        Some((row.trim().parse().ok()?, take.trim().parse().ok()?))
    }
}

impl Game for NimGame {
    fn is_done(&self) -> bool {
        self.done
    }

    fn state(&mut self, force: bool) -> Option<String> {
        if !force && !self.changed {
            return None;
        }
        self.changed = false;
        let turn = self.turn.map_or(-1, |side| side.index() as i64);
        let mut payload = format!("{turn},{}", self.sticks.len());
        for s in &self.sticks {
            payload.push_str(&format!(",{s}"));
        }
        Some(payload)
    }

    fn update_state(&mut self, state: &str) -> anyhow::Result<()> {
        let pieces: Vec<&str> = state.split(',').map(str::trim).collect();
        if pieces.len() < 2 {
            bail!("nim state too short: '{state}'");
        }
        let turn: i64 = pieces[0].parse().context("invalid turn")?;
        let rows: usize = pieces[1].parse().context("invalid row count")?;
        if pieces.len() != rows + 2 {
            bail!("nim state announces {rows} rows but carries {}", pieces.len() - 2);
        }
        if !self.sticks.is_empty() && self.sticks.len() != rows {
            bail!("number of rows does not match: {} != {rows}", self.sticks.len());
        }
        self.sticks = pieces[2..]
            .iter()
            .map(|p| p.parse::<u32>().context("invalid stick count"))
            .collect::<anyhow::Result<_>>()?;
        self.turn = Side::from_index(turn);
        self.done = self.sticks.iter().all(|&s| s == 0);
        Ok(())
    }

    fn process_move(&mut self, side: Side, action: &str) -> Result<String, MoveRejected> {
        if self.done || self.turn != Some(side) {
            return Err(MoveRejected::not_your_turn());
        }
        let Some((row, take)) = Self::parse_move(action) else {
            return Err(MoveRejected(
                "Could not understand your move.  Please use Row,Take as integral values."
                    .to_string(),
            ));
        };
        if row >= self.sticks.len() {
            return Err(MoveRejected("Row is out of range.".to_string()));
        }
        if take == 0 {
            return Err(MoveRejected(
                "You must take a positive number of sticks.".to_string(),
            ));
        }
        if self.sticks[row] < take {
            return Err(MoveRejected(
                "That row does not have that many sticks.".to_string(),
            ));
        }

        self.sticks[row] -= take;
        self.turn = Some(side.opponent());
        self.changed = true;
        if self.sticks.iter().all(|&s| s == 0) {
            self.done = true;
            self.winner = side.into();
            return Ok(format!(
                "{} won!",
                if side == Side::Home { "Home" } else { "Away" }
            ));
        }
        Ok(format!("Took {take} sticks from row {row}."))
    }

    fn resign(&mut self, side: Side) {
        self.winner = side.opponent().into();
        self.done = true;
        self.changed = true;
        self.sticks.iter_mut().for_each(|s| *s = 0);
    }

    fn winner(&self) -> Winner {
        self.winner
    }

    fn turn(&self) -> Option<Side> {
        if self.done {
            None
        } else {
            self.turn
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Takes a random number of sticks from a random non-empty row.
pub struct NimAi {
    rng: SmallRng,
}

impl NimAi {
    /// AI seeded from the thread generator.
    pub fn new() -> Self {
        NimAi {
            rng: SmallRng::from_rng(&mut rand::rng()),
        }
    }

    /// Reproducible AI.
    pub fn with_seed(seed: u64) -> Self {
        NimAi {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Default for NimAi {
    fn default() -> Self {
        Self::new()
    }
}

impl Ai for NimAi {
    fn compute_move(&mut self, game: &dyn Game, _side: Side) -> anyhow::Result<String> {
        let nim = game
            .as_any()
            .downcast_ref::<NimGame>()
            .context("NimAi attached to a game that is not Nim")?;
        let rows: Vec<(usize, u32)> = nim
            .sticks()
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, s)| s > 0)
            .collect();
        if rows.is_empty() {
            bail!("no sticks left to take");
        }
        let (row, sticks) = rows[self.rng.random_range(0..rows.len())];
        let take = self.rng.random_range(1..=sticks);
        Ok(format!("{row},{take}"))
    }
}

/// Factory for random Nim boards, or fixed ones with [`NimFactory::with_rows`].
#[derive(Debug, Clone, Default)]
pub struct NimFactory {
    rows: Option<Vec<u32>>,
}

impl NimFactory {
    /// Random boards.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every game starts from `rows`.
    pub fn with_rows(rows: Vec<u32>) -> Self {
        NimFactory { rows: Some(rows) }
    }
}

impl GameFactory for NimFactory {
    fn new_game(&self) -> Box<dyn Game> {
        match &self.rows {
            Some(rows) => Box::new(NimGame::with_rows(rows.clone())),
            None => Box::new(NimGame::random()),
        }
    }

    fn new_mirror(&self) -> Box<dyn Game> {
        Box::new(NimGame::mirror())
    }

    fn new_ai(&self) -> Box<dyn Ai> {
        Box::new(NimAi::new())
    }
}
