//! Line-oriented wire protocol.
//!
//! Every message is one UTF-8 line terminated by `\n`. A line is split on `:` into at most
//! [`MAX_FIELDS`] fields; field 0 is the command, compared case-insensitively. Commands with a
//! namespace (`@TOUR`, `@GAME`) carry their sub-command in field 1.
//!
//! Inbound lines are framed into a [`Frame`] and routed through a [`CommandTable`], a flat map
//! from command name to handler. Outbound lines are built from [`Message`].

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::game_interface::{Outcome, Side};
use crate::player::PlayerId;
use crate::tournament::TournamentId;

/// Field separator.
pub const DELIMITER: char = ':';

/// Maximum number of fields in a line. The last field keeps any further delimiter.
pub const MAX_FIELDS: usize = 5;

/// One inbound line split into fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    fields: Vec<String>,
}

impl Frame {
    /// Splits `line` into at most [`MAX_FIELDS`] fields, ignoring the line terminator.
    pub fn parse(line: &str) -> Frame {
        let line = line.trim_end_matches(['\r', '\n']);
        Frame {
            fields: line
                .splitn(MAX_FIELDS, DELIMITER)
                .map(str::to_string)
                .collect(),
        }
    }

    /// Number of fields, including the command.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the line was empty.
    pub fn is_empty(&self) -> bool {
        self.fields.len() == 1 && self.fields[0].is_empty()
    }

    /// Field `index`, as received.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Field `index` upper-cased, used as a lookup key.
    pub fn key(&self, index: usize) -> Option<String> {
        self.field(index).map(|f| f.trim().to_ascii_uppercase())
    }

    /// Field `index`, or a [`ProtocolError::MissingField`] explaining what was expected.
    pub fn require(&self, index: usize, what: &'static str) -> Result<&str, ProtocolError> {
        self.field(index)
            .ok_or(ProtocolError::MissingField { what })
    }

    /// Field `index` parsed as an integer.
    pub fn integer<T: FromStr>(
        &self,
        index: usize,
        what: &'static str,
        field: &'static str,
    ) -> Result<T, ProtocolError> {
        let raw = self.require(index, what)?;
        raw.trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidInteger {
                field,
                value: raw.to_string(),
            })
    }
}

/// A command handler. Receives the session state and the frame that selected it.
pub type Handler<S> = fn(&mut S, &Frame) -> Result<(), ProtocolError>;

/// Flat dispatch table from command name to [`Handler`].
///
/// A top-level table is keyed on field 0. A namespace table (see [`CommandTable::namespace`]) is
/// keyed on field 1 and is itself registered as the handler of its namespace command.
pub struct CommandTable<S> {
    key_field: usize,
    namespace: Option<(&'static str, &'static str)>,
    entries: Vec<(&'static str, Handler<S>)>,
}

impl<S> CommandTable<S> {
    /// A table keyed on the command field.
    pub fn new() -> Self {
        CommandTable {
            key_field: 0,
            namespace: None,
            entries: vec![],
        }
    }

    /// A table keyed on the sub-command field of `name` (e.g. `TOUR`). `missing` is the error
    /// text replied when the sub-command field is absent.
    pub fn namespace(name: &'static str, missing: &'static str) -> Self {
        CommandTable {
            key_field: 1,
            namespace: Some((name, missing)),
            entries: vec![],
        }
    }

    /// Registers `handler` under `name`. Names are matched case-insensitively.
    pub fn on(mut self, name: &'static str, handler: Handler<S>) -> Self {
        debug_assert_eq!(name, name.to_ascii_uppercase(), "table keys are upper-case");
        self.entries.push((name, handler));
        self
    }

    /// Looks up the handler selected by `frame` and runs it.
    pub fn dispatch(&self, state: &mut S, frame: &Frame) -> Result<(), ProtocolError> {
        let Some(key) = frame.key(self.key_field) else {
            return Err(match self.namespace {
                Some((_, missing)) => ProtocolError::MissingField { what: missing },
                None => ProtocolError::UnknownCommand,
            });
        };
        match self.entries.iter().find(|(name, _)| *name == key) {
            Some((_, handler)) => handler(state, frame),
            None => Err(match self.namespace {
                Some((namespace, _)) => ProtocolError::UnknownSubCommand { namespace },
                None => ProtocolError::UnknownCommand,
            }),
        }
    }
}

impl<S> Default for CommandTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Every line either side may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    // client -> server
    /// Registers a new player.
    NewPlayer,
    /// Resumes an existing player.
    Player(PlayerId),
    /// Sets the display name.
    SetName(String),
    /// Joins a tournament, or the first one available.
    TourJoin(Option<TournamentId>),
    /// Creates a tournament of a game type.
    TourCreate(String),
    /// Lets the scheduler start matches.
    TourStart,
    /// Stops starting matches.
    TourPause,
    /// Asks for the match report.
    TourReport,
    /// Asks how many matches are left.
    TourMatchesLeft,
    /// A move in the current match.
    GameMove(String),
    /// Asks for the name of a player.
    GetName(PlayerId),

    // server -> client
    /// Player id assigned to the connection.
    Pid(PlayerId),
    /// Id of a created tournament.
    Tid(TournamentId),
    /// A match begins.
    GameStart {
        /// Side played by the receiver.
        side: Side,
        /// Name of the opponent.
        opponent: String,
    },
    /// Current state of the match.
    GameState(String),
    /// Final result of the match.
    GameResult(Outcome),
    /// A move was accepted.
    GameMessage(String),
    /// A move was rejected.
    GameError(String),
    /// `home/away/state` of every match.
    Report(String),
    /// Name of a player.
    Name {
        /// Display name.
        name: String,
        /// Player id.
        id: PlayerId,
    },
    /// Informational reply.
    Info(String),
    /// A command was refused.
    Error(String),

    // both ways
    /// The tournament ends, or must end.
    TourEnd,
    /// Liveness probe.
    Ping,
    /// Answer to a probe.
    Pong,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::NewPlayer => write!(f, "@NEW PLAYER"),
            Message::Player(id) => write!(f, "@PLAYER:{id}"),
            Message::SetName(name) => write!(f, "@NAME:{name}"),
            Message::TourJoin(None) => write!(f, "@TOUR:JOIN"),
            Message::TourJoin(Some(id)) => write!(f, "@TOUR:JOIN:{id}"),
            Message::TourCreate(kind) => write!(f, "@TOUR:CREATE:{kind}"),
            Message::TourStart => write!(f, "@TOUR:START"),
            Message::TourPause => write!(f, "@TOUR:PAUSE"),
            Message::TourReport => write!(f, "@TOUR:REPORT"),
            Message::TourMatchesLeft => write!(f, "@TOUR:MATCHES LEFT"),
            Message::GameMove(payload) => write!(f, "@GAME:MOVE:{payload}"),
            Message::GetName(id) => write!(f, "@GET NAME:{id}"),
            Message::Pid(id) => write!(f, "@PID:{id}"),
            Message::Tid(id) => write!(f, "@TID:{id}"),
            Message::GameStart { side, opponent } => {
                write!(f, "@GAME:START:{}:{opponent}", side.letter())
            }
            Message::GameState(payload) => write!(f, "@GAME:STATE:{payload}"),
            Message::GameResult(outcome) => write!(f, "@GAME:RESULT:{outcome}"),
            Message::GameMessage(text) => write!(f, "@GAME:MESSAGE:{text}"),
            Message::GameError(text) => write!(f, "@GAME:ERROR:{text}"),
            Message::Report(csv) => write!(f, "@REPORT:{csv}"),
            Message::Name { name, id } => write!(f, "@NAME:{name}:{id}"),
            Message::Info(text) => write!(f, "@MESSAGE:{text}"),
            Message::Error(text) => write!(f, "@ERROR:{text}"),
            Message::TourEnd => write!(f, "@TOUR:END"),
            Message::Ping => write!(f, "@PING"),
            Message::Pong => write!(f, "@PONG"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_splits_into_at_most_five_fields() {
        let frame = Frame::parse("@GAME:MOVE:a:b:c:d\n");
        assert_eq!(frame.len(), 5);
        assert_eq!(frame.field(0), Some("@GAME"));
        assert_eq!(frame.field(4), Some("c:d"));
        assert_eq!(frame.field(5), None);
    }

    #[test]
    fn command_key_is_case_folded() {
        let frame = Frame::parse("@tour:matches left\r\n");
        assert_eq!(frame.key(0).as_deref(), Some("@TOUR"));
        assert_eq!(frame.key(1).as_deref(), Some("MATCHES LEFT"));
    }

    #[test]
    fn integer_field_errors_are_descriptive() {
        let frame = Frame::parse("@PLAYER:x1");
        assert_eq!(
            frame.integer::<u32>(1, "An ID is required.", "ID"),
            Err(ProtocolError::InvalidInteger {
                field: "ID",
                value: "x1".to_string()
            })
        );
        let frame = Frame::parse("@PLAYER");
        assert_eq!(
            frame.integer::<u32>(1, "An ID is required.", "ID"),
            Err(ProtocolError::MissingField {
                what: "An ID is required."
            })
        );
    }

    #[derive(Default)]
    struct Calls(Vec<&'static str>);

    fn on_ping(calls: &mut Calls, _: &Frame) -> Result<(), ProtocolError> {
        calls.0.push("ping");
        Ok(())
    }

    fn on_start(calls: &mut Calls, _: &Frame) -> Result<(), ProtocolError> {
        calls.0.push("start");
        Ok(())
    }

    fn on_tour(calls: &mut Calls, frame: &Frame) -> Result<(), ProtocolError> {
        CommandTable::namespace("TOUR", "A subcommand is required for TOUR.")
            .on("START", on_start)
            .dispatch(calls, frame)
    }

    #[test]
    fn table_dispatches_flat_and_namespaced_commands() {
        let table = CommandTable::new()
            .on("@PING", on_ping)
            .on("@TOUR", on_tour);
        let mut calls = Calls::default();

        table.dispatch(&mut calls, &Frame::parse("@ping")).unwrap();
        table.dispatch(&mut calls, &Frame::parse("@TOUR:start")).unwrap();
        assert_eq!(calls.0, vec!["ping", "start"]);

        assert_eq!(
            table.dispatch(&mut calls, &Frame::parse("@NOPE")),
            Err(ProtocolError::UnknownCommand)
        );
        assert_eq!(
            table.dispatch(&mut calls, &Frame::parse("@TOUR:FLY")),
            Err(ProtocolError::UnknownSubCommand { namespace: "TOUR" })
        );
        assert_eq!(
            table.dispatch(&mut calls, &Frame::parse("@TOUR")),
            Err(ProtocolError::MissingField {
                what: "A subcommand is required for TOUR."
            })
        );
    }

    #[test]
    fn messages_render_wire_lines() {
        assert_eq!(Message::NewPlayer.to_string(), "@NEW PLAYER");
        assert_eq!(Message::TourJoin(Some(3)).to_string(), "@TOUR:JOIN:3");
        assert_eq!(
            Message::GameStart {
                side: Side::Away,
                opponent: "bob".to_string()
            }
            .to_string(),
            "@GAME:START:A:bob"
        );
        assert_eq!(Message::GameResult(Outcome::Tie).to_string(), "@GAME:RESULT:T");
        assert_eq!(
            Message::Name {
                name: "ann".to_string(),
                id: 4
            }
            .to_string(),
            "@NAME:ann:4"
        );
    }
}
