//! Error taxonomy for the store.
//!
//! Every fallible operation below the dispatcher returns one of these
//! variants. The dispatcher (see `dispatch.rs`) is the single place a typed
//! error is turned into RESP error bytes; nothing else writes `-ERR` text
//! directly.

use std::fmt;

/// Errors produced while framing or parsing inbound RESP bytes.
#[derive(Debug)]
pub enum ProtocolError {
    /// The frame is structurally malformed (bad length header, missing
    /// terminator, negative array length, etc).
    Malformed,
    /// The connection buffer grew past its hard ceiling.
    CommandTooLarge,
}

impl ProtocolError {
    /// The exact RESP error message (without the `-` sigil or trailing CRLF).
    pub fn wire_message(&self) -> &'static str {
        match self {
            ProtocolError::Malformed => "ERR Invalid command format",
            ProtocolError::CommandTooLarge => "ERR Command too large",
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_message())
    }
}

impl std::error::Error for ProtocolError {}

/// Errors produced by a keyspace operation (C2).
#[derive(Debug, PartialEq, Eq)]
pub enum KeyspaceError {
    /// The key exists but holds a value of the wrong kind for this op.
    WrongType,
    /// An INCR/DECR target isn't a valid signed integer, or overflowed.
    NotAnInteger,
    /// EXPIRE was asked to set a negative TTL.
    InvalidExpire,
}

impl KeyspaceError {
    /// The exact RESP error message (without the `-` sigil or trailing CRLF).
    pub fn wire_message(&self) -> &'static str {
        match self {
            KeyspaceError::WrongType => {
                "WRONGTYPE Operation against a key holding the wrong kind of value"
            }
            KeyspaceError::NotAnInteger => "ERR value is not an integer or out of range",
            KeyspaceError::InvalidExpire => "ERR invalid expire time",
        }
    }
}

impl fmt::Display for KeyspaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_message())
    }
}

impl std::error::Error for KeyspaceError {}

/// Errors produced while saving or loading a snapshot (C7).
#[derive(Debug)]
pub enum PersistenceError {
    Io(std::io::Error),
    /// The file signature, version, or framing didn't parse.
    CorruptSnapshot(&'static str),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Io(e) => write!(f, "{e}"),
            PersistenceError::CorruptSnapshot(why) => write!(f, "corrupt snapshot: {why}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::Io(e)
    }
}

/// Top-level error produced while executing one command. This is the type
/// the dispatcher matches on to build the wire reply.
#[derive(Debug)]
pub enum CommandError {
    Arity { command: String },
    Unknown { command: String },
    WrongType,
    NotAnInteger,
    InvalidExpire,
    Persistence(PersistenceError),
    /// Allocation/buffer failure that doesn't warrant closing the connection.
    Resource,
}

impl CommandError {
    /// The exact RESP error message (without the `-` sigil or trailing CRLF).
    pub fn wire_message(&self) -> String {
        match self {
            CommandError::Arity { command } => {
                format!("ERR wrong number of arguments for '{command}' command")
            }
            CommandError::Unknown { command } => format!("ERR unknown command '{command}'"),
            CommandError::WrongType => KeyspaceError::WrongType.wire_message().to_owned(),
            CommandError::NotAnInteger => KeyspaceError::NotAnInteger.wire_message().to_owned(),
            CommandError::InvalidExpire => KeyspaceError::InvalidExpire.wire_message().to_owned(),
            CommandError::Persistence(_) => "ERR Failed to save/load database".to_owned(),
            CommandError::Resource => "ERR Out of memory".to_owned(),
        }
    }
}

impl From<KeyspaceError> for CommandError {
    fn from(e: KeyspaceError) -> Self {
        match e {
            KeyspaceError::WrongType => CommandError::WrongType,
            KeyspaceError::NotAnInteger => CommandError::NotAnInteger,
            KeyspaceError::InvalidExpire => CommandError::InvalidExpire,
        }
    }
}

impl From<PersistenceError> for CommandError {
    fn from(e: PersistenceError) -> Self {
        CommandError::Persistence(e)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_message())
    }
}

impl std::error::Error for CommandError {}
