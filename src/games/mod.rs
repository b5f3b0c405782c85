//! Built-in games and their AIs.

pub mod guess;
pub mod nim;
pub mod tic_tac_toe;

use std::sync::Arc;

use crate::game_interface::GameCatalog;

pub use guess::{GuessAi, GuessFactory, GuessGame};
pub use nim::{NimAi, NimFactory, NimGame};
pub use tic_tac_toe::{TicTacToeAi, TicTacToeFactory, TicTacToeGame};

impl GameCatalog {
    /// Catalog with `NIM`, `TICTACTOE` (alias `TTT`) and `SIMPLE`.
    pub fn builtin() -> Self {
        let mut catalog = GameCatalog::new()
            .with("NIM", NimFactory::new())
            .with("SIMPLE", GuessFactory);
        let ttt = Arc::new(TicTacToeFactory);
        catalog.register("TICTACTOE", ttt.clone());
        catalog.register("TTT", ttt);
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_knows_every_game() {
        let catalog = GameCatalog::builtin();
        assert_eq!(catalog.names(), vec!["NIM", "SIMPLE", "TICTACTOE", "TTT"]);
        for name in catalog.names() {
            let factory = catalog.get(name).unwrap();
            assert!(!factory.new_game().is_done());
            assert!(!factory.new_mirror().is_done());
        }
    }
}
