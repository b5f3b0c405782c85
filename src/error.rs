//! Errors reported back to a peer on the wire.

use thiserror::Error;

/// A fault in an inbound line that is answered to the sender without closing the connection.
///
/// The `Display` form is the exact text placed after `@ERROR:` in the reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Field 0 names no known command.
    #[error("Unrecognized command.")]
    UnknownCommand,

    /// Field 1 names no known sub-command of `namespace`.
    #[error("Unrecognized {namespace} sub-command.")]
    UnknownSubCommand {
        /// Command owning the sub-command.
        namespace: &'static str,
    },

    /// A required field is absent. `what` is the whole reply text.
    #[error("{what}")]
    MissingField {
        /// Reply text.
        what: &'static str,
    },

    /// A numeric field does not parse.
    #[error("Error parsing {field}: {value}")]
    InvalidInteger {
        /// Name of the field.
        field: &'static str,
        /// Text received.
        value: String,
    },

    /// The connection is not bound to a player.
    #[error("No player set yet.")]
    NotRegistered,

    /// The command is understood but not allowed now.
    #[error("{0}")]
    Refused(String),
}

impl ProtocolError {
    /// Shorthand for a refusal carrying a free-form reason.
    pub fn refused(reason: impl Into<String>) -> Self {
        ProtocolError::Refused(reason.into())
    }
}
