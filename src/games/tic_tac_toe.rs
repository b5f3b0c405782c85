//! Tic-tac-toe on a 3x3 board. Home plays `X` and moves first.

use std::any::Any;

use anyhow::{bail, Context};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::game_interface::{Ai, Game, GameFactory, MoveRejected, Side, Winner};

const EMPTY: char = ' ';

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

/// A tic-tac-toe board.
///
/// State payload: `turn,c0,...,c8` with each cell `X`, `O` or a space. Move payload: the slot
/// number, 0 to 8 across the rows from the top-left.
#[derive(Debug, Clone)]
pub struct TicTacToeGame {
    board: [char; 9],
    turn: Option<Side>,
    changed: bool,
    done: bool,
    winner: Winner,
}

fn mark(side: Side) -> char {
    match side {
        Side::Home => 'X',
        Side::Away => 'O',
    }
}

impl TicTacToeGame {
    /// An empty board, home to move.
    pub fn new() -> Self {
        TicTacToeGame {
            board: [EMPTY; 9],
            turn: Some(Side::Home),
            changed: true,
            done: false,
            winner: Winner::Unfinished,
        }
    }

    /// An empty board waiting for [`Game::update_state`].
    pub fn mirror() -> Self {
        TicTacToeGame {
            turn: None,
            changed: false,
            ..Self::new()
        }
    }

    /// Cells, row by row.
    pub fn board(&self) -> &[char; 9] {
        &self.board
    }

    fn compute_winner(&mut self) {
        for line in LINES {
            let m = self.board[line[0]];
            if m != EMPTY && line.iter().all(|&i| self.board[i] == m) {
                self.done = true;
                self.winner = if m == 'X' { Winner::Home } else { Winner::Away };
                return;
            }
        }
        if self.board.iter().all(|&c| c != EMPTY) {
            self.done = true;
            self.winner = Winner::Tie;
        }
    }
}

impl Default for TicTacToeGame {
    fn default() -> Self {
        Self::new()
    }
}

impl Game for TicTacToeGame {
    fn is_done(&self) -> bool {
        self.done
    }

    fn state(&mut self, force: bool) -> Option<String> {
        if !force && !self.changed {
            return None;
        }
        self.changed = false;
        let turn = self.turn.map_or(-1, |side| side.index() as i64);
        let mut payload = turn.to_string();
        for c in self.board {
            payload.push(',');
            payload.push(c);
        }
        Some(payload)
    }

    fn update_state(&mut self, state: &str) -> anyhow::Result<()> {
        let pieces: Vec<&str> = state.split(',').collect();
        if pieces.len() != 10 {
            bail!("tic-tac-toe state needs 10 fields: '{state}'");
        }
        let turn: i64 = pieces[0].trim().parse().context("invalid turn")?;
        for (cell, piece) in self.board.iter_mut().zip(&pieces[1..]) {
            *cell = piece.chars().next().unwrap_or(EMPTY);
        }
        self.turn = Side::from_index(turn);
        self.done = false;
        self.compute_winner();
        Ok(())
    }

    fn process_move(&mut self, side: Side, action: &str) -> Result<String, MoveRejected> {
        if self.done || self.turn != Some(side) {
            return Err(MoveRejected::not_your_turn());
        }
        let Ok(slot) = action.trim().parse::<i64>() else {
            return Err(MoveRejected(
                "Could not understand your move.  Please make sure you just pass an integer string (0-8)."
                    .to_string(),
            ));
        };
        if !(0..9).contains(&slot) {
            return Err(MoveRejected(format!("Selection ({slot}) is out of range.")));
        }
        let slot = slot as usize;
        if self.board[slot] != EMPTY {
            return Err(MoveRejected("This slot is already taken!".to_string()));
        }

        let symbol = mark(side);
        self.board[slot] = symbol;
        self.turn = Some(side.opponent());
        self.changed = true;
        self.compute_winner();
        match self.winner {
            Winner::Home => Ok("Home won!".to_string()),
            Winner::Away => Ok("Away won!".to_string()),
            Winner::Tie => Ok("It is a tie!".to_string()),
            _ => Ok(format!("Placed an {symbol} in slot {slot}.")),
        }
    }

    fn resign(&mut self, side: Side) {
        self.winner = side.opponent().into();
        self.done = true;
        self.changed = true;
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

/// Picks a random free slot.
pub struct TicTacToeAi {
    rng: SmallRng,
}

impl TicTacToeAi {
    /// AI seeded from the thread generator.
    pub fn new() -> Self {
        TicTacToeAi {
            rng: SmallRng::from_rng(&mut rand::rng()),
        }
    }
}

impl Default for TicTacToeAi {
    fn default() -> Self {
        Self::new()
    }
}

impl Ai for TicTacToeAi {
    fn compute_move(&mut self, game: &dyn Game, _side: Side) -> anyhow::Result<String> {
        let ttt = game
            .as_any()
            .downcast_ref::<TicTacToeGame>()
            .context("TicTacToeAi attached to a game that is not tic-tac-toe")?;
        let free: Vec<usize> = (0..9).filter(|&i| ttt.board()[i] == EMPTY).collect();
        if free.is_empty() {
            bail!("board is full");
        }
        Ok(free[self.rng.random_range(0..free.len())].to_string())
    }
}

/// Factory for tic-tac-toe.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicTacToeFactory;

impl GameFactory for TicTacToeFactory {
    fn new_game(&self) -> Box<dyn Game> {
        Box::new(TicTacToeGame::new())
    }

    fn new_mirror(&self) -> Box<dyn Game> {
        Box::new(TicTacToeGame::mirror())
    }

    fn new_ai(&self) -> Box<dyn Ai> {
        Box::new(TicTacToeAi::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_wins() {
        let mut game = TicTacToeGame::new();
        for (side, slot) in [
            (Side::Home, "0"),
            (Side::Away, "3"),
            (Side::Home, "1"),
            (Side::Away, "4"),
        ] {
            game.process_move(side, slot).unwrap();
        }
        assert_eq!(game.process_move(Side::Home, "2").unwrap(), "Home won!");
        assert_eq!(game.winner(), Winner::Home);
    }

    #[test]
    fn full_board_ties() {
        let mut game = TicTacToeGame::new();
        let mut side = Side::Home;
        for slot in ["0", "1", "2", "4", "3", "5", "7", "6", "8"] {
            game.process_move(side, slot).unwrap();
            side = side.opponent();
        }
        assert!(game.is_done());
        assert_eq!(game.winner(), Winner::Tie);
    }

    #[test]
    fn taken_and_out_of_range_slots_are_rejected() {
        let mut game = TicTacToeGame::new();
        game.process_move(Side::Home, "4").unwrap();
        assert_eq!(
            game.process_move(Side::Away, "4"),
            Err(MoveRejected("This slot is already taken!".to_string()))
        );
        assert!(game.process_move(Side::Away, "9").is_err());
        assert!(game.process_move(Side::Home, "0").is_err());
    }

    #[test]
    fn mirror_reads_server_state() {
        let mut server = TicTacToeGame::new();
        server.process_move(Side::Home, "8").unwrap();
        let payload = server.state(false).unwrap();
        assert_eq!(payload, "1, , , , , , , , ,X");

        let mut mirror = TicTacToeGame::mirror();
        mirror.update_state(&payload).unwrap();
        assert_eq!(mirror.turn(), Some(Side::Away));
        assert_eq!(mirror.board()[8], 'X');
    }

    #[test]
    fn ai_picks_free_slots() {
        let mut game = TicTacToeGame::new();
        let mut ai = TicTacToeAi::new();
        let mut side = Side::Home;
        while !game.is_done() {
            let action = ai.compute_move(&game, side).unwrap();
            game.process_move(side, &action).unwrap();
            side = side.opponent();
        }
    }
}
