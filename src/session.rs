//! Server side of a client connection.
//!
//! A [`ClientSession`] starts anonymous. `@NEW PLAYER` or `@PLAYER:<id>` binds it to a
//! [`Player`]; tournament and game commands then act on behalf of that player.

use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::connection::{Outbox, Protocol};
use crate::error::ProtocolError;
use crate::player::{Player, PlayerId};
use crate::protocol::{CommandTable, Frame, Message};
use crate::registry::Registry;
use crate::tournament::{RRTournament, TournamentId};

const NO_OWNER: &str = "No player set yet (to own the command).";

/// Commands of one connection, bound to at most one player.
pub struct ClientSession {
    registry: Arc<Registry>,
    outbox: Arc<Outbox>,
    player: Option<Arc<Player>>,
}

impl ClientSession {
    /// An anonymous session writing to `outbox`.
    pub fn new(registry: Arc<Registry>, outbox: Arc<Outbox>) -> Self {
        ClientSession {
            registry,
            outbox,
            player: None,
        }
    }

    /// Player bound to this session.
    pub fn player(&self) -> Option<&Arc<Player>> {
        self.player.as_ref()
    }

    fn commands() -> &'static CommandTable<Self> {
        static COMMANDS: OnceLock<CommandTable<ClientSession>> = OnceLock::new();
        COMMANDS.get_or_init(|| {
            CommandTable::new()
                .on("@NEW PLAYER", Self::new_player)
                .on("@PLAYER", Self::resume_player)
                .on("@NAME", Self::set_name)
                .on("@GET NAME", Self::get_name)
                .on("@TOUR", Self::tour)
                .on("@GAME", Self::game)
                .on("@PING", Self::ping)
                .on("@PONG", Self::pong)
        })
    }

    fn tour_commands() -> &'static CommandTable<Self> {
        static COMMANDS: OnceLock<CommandTable<ClientSession>> = OnceLock::new();
        COMMANDS.get_or_init(|| {
            CommandTable::namespace("TOUR", "A subcommand is required for TOUR.")
                .on("CREATE", Self::tour_create)
                .on("JOIN", Self::tour_join)
                .on("START", Self::tour_start)
                .on("PAUSE", Self::tour_pause)
                .on("END", Self::tour_end)
                .on("REPORT", Self::tour_report)
                .on("MATCHES LEFT", Self::tour_matches_left)
        })
    }

    fn game_commands() -> &'static CommandTable<Self> {
        static COMMANDS: OnceLock<CommandTable<ClientSession>> = OnceLock::new();
        COMMANDS.get_or_init(|| {
            CommandTable::namespace("GAME", "A subcommand is required for GAME.")
                .on("MOVE", Self::game_move)
        })
    }

    fn registered(&self) -> Result<&Arc<Player>, ProtocolError> {
        self.player.as_ref().ok_or(ProtocolError::NotRegistered)
    }

    fn owner(&self) -> Result<&Arc<Player>, ProtocolError> {
        self.player
            .as_ref()
            .ok_or_else(|| ProtocolError::refused(NO_OWNER))
    }

    /// Tournament of the bound player, if that player owns it.
    fn owned_tournament(&self) -> Result<Arc<RRTournament>, ProtocolError> {
        let player = self.owner()?;
        let tournament = player
            .tournament()
            .ok_or_else(|| ProtocolError::refused("Player is not attached to a tournament."))?;
        if !tournament.is_owner(player) {
            return Err(ProtocolError::refused(
                "Player is not the owner of the tournament.",
            ));
        }
        Ok(tournament)
    }

    fn new_player(&mut self, _: &Frame) -> Result<(), ProtocolError> {
        if self.player.is_some() {
            return Err(ProtocolError::refused(
                "Player already registered for this account.",
            ));
        }
        let player = self.registry.register_player();
        player.attach(&self.outbox);
        self.outbox.post(Message::Pid(player.id()));
        self.player = Some(player);
        Ok(())
    }

    fn resume_player(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let id: PlayerId = frame.integer(1, "ID.  An ID is required for PLAYER.", "ID")?;
        if let Some(bound) = &self.player {
            if bound.id() != id {
                return Err(ProtocolError::refused(
                    "Player already registered for this account.",
                ));
            }
            // bound already, nothing to replay
            self.outbox.post(Message::Pid(id));
            return Ok(());
        }
        let player = self
            .registry
            .player(id)
            .ok_or_else(|| ProtocolError::refused("ID was not recognized."))?;
        if !player.attach(&self.outbox) {
            return Err(ProtocolError::refused(
                "Player already connected to another client.",
            ));
        }
        info!(player = id, connection = self.outbox.id(), "player resumed");
        self.outbox.post(Message::Pid(id));
        if let Some(current) = player.current_match() {
            current.remind(&player);
        }
        self.player = Some(player);
        Ok(())
    }

    fn set_name(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let player = self.registered()?;
        let name = frame.require(1, "A NAME is required.")?;
        player.set_name(name);
        Ok(())
    }

    fn get_name(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let id: PlayerId = frame.integer(1, "An ID is required.", "ID")?;
        let player = self
            .registry
            .player(id)
            .ok_or_else(|| ProtocolError::refused("ID was not recognized."))?;
        self.outbox.post(Message::Name {
            name: player.name(),
            id,
        });
        Ok(())
    }

    fn ping(&mut self, _: &Frame) -> Result<(), ProtocolError> {
        self.outbox.post(Message::Pong);
        Ok(())
    }

    fn pong(&mut self, _: &Frame) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn tour(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        Self::tour_commands().dispatch(self, frame)
    }

    fn tour_create(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let kind = frame.require(2, "A TYPE must be specified.")?;
        let owner = self.owner()?;
        let tournament = self
            .registry
            .create_tournament(kind, owner)
            .ok_or_else(|| ProtocolError::refused("Type not recognized."))?;
        self.outbox.post(Message::Tid(tournament.id()));
        Ok(())
    }

    fn tour_join(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let player = self.owner()?;
        let id: Option<TournamentId> = match frame.field(2) {
            Some(raw) if !raw.trim().is_empty() => Some(frame.integer(2, "", "ID")?),
            _ => None,
        };
        let tournament = self.registry.join_tournament(player, id)?;
        self.outbox.post(Message::Info(format!(
            "Tournament {} successfully joined.",
            tournament.id()
        )));
        Ok(())
    }

    fn tour_start(&mut self, _: &Frame) -> Result<(), ProtocolError> {
        let tournament = self.owned_tournament()?;
        tournament.set_active(true);
        self.outbox.post(Message::Info(format!(
            "Tournament {} started.",
            tournament.id()
        )));
        Ok(())
    }

    fn tour_pause(&mut self, _: &Frame) -> Result<(), ProtocolError> {
        let tournament = self.owned_tournament()?;
        tournament.set_active(false);
        self.outbox.post(Message::Info(format!(
            "Tournament {} paused.",
            tournament.id()
        )));
        Ok(())
    }

    fn tour_end(&mut self, _: &Frame) -> Result<(), ProtocolError> {
        let tournament = self.owned_tournament()?;
        tournament.terminate();
        self.outbox.post(Message::Info(format!(
            "Tournament {} ended.",
            tournament.id()
        )));
        Ok(())
    }

    fn tour_report(&mut self, _: &Frame) -> Result<(), ProtocolError> {
        let tournament = self.owned_tournament()?;
        self.outbox.post(Message::Report(tournament.report()));
        Ok(())
    }

    fn tour_matches_left(&mut self, _: &Frame) -> Result<(), ProtocolError> {
        let tournament = self.owned_tournament()?;
        self.outbox.post(Message::Info(format!(
            "There are {} matches left to complete.",
            tournament.matches_left()
        )));
        Ok(())
    }

    fn game(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        Self::game_commands().dispatch(self, frame)
    }

    fn game_move(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        let player = self.registered()?;
        let current = player.current_match().ok_or_else(|| {
            ProtocolError::refused("Player is not playing in a match currently.")
        })?;
        let action = frame.require(2, "A MOVE is required.")?;
        current.post_move(player, action);
        Ok(())
    }
}

impl Protocol for ClientSession {
    fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    fn dispatch(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        Self::commands().dispatch(self, frame)
    }

    fn on_close(&mut self) {
        if let Some(player) = &self.player {
            if player.detach(self.outbox.id()) {
                info!(player = player.id(), "player disconnected");
            }
        }
    }
}
