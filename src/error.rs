//! Error types for Cinnabar
//!
//! This module defines all error types used throughout the Cinnabar server.
//! We follow Redis's error conventions where applicable.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Main error type for Cinnabar operations
#[derive(Debug)]
pub enum CinnabarError {
    /// Protocol-related errors (RESP parsing, serialization)
    Protocol(String),

    /// The peer closed the connection cleanly between frames
    Eof,

    /// Command execution errors
    Command(CommandError),

    /// Network/IO errors
    Io(String),

    /// Configuration errors
    Config(String),

    /// Client connection errors
    Connection(String),
}

/// Command-specific errors that map to Redis error responses
#[derive(Debug, Clone)]
pub enum CommandError {
    /// Unknown command
    UnknownCommand(String),

    /// Wrong number of arguments for command
    WrongNumberOfArgs(String),

    /// Operation against wrong type
    WrongType,

    /// Value is not an integer or out of range
    NotInteger,

    /// Generic command error with message
    Generic(String),
}

/// Type alias for Results throughout Cinnabar
pub type Result<T> = std::result::Result<T, CinnabarError>;

impl CinnabarError {
    /// Whether this error is a clean end-of-stream
    pub fn is_eof(&self) -> bool {
        matches!(self, CinnabarError::Eof)
    }
}

impl fmt::Display for CinnabarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CinnabarError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            CinnabarError::Eof => write!(f, "Connection closed by peer"),
            CinnabarError::Command(err) => write!(f, "{}", err),
            CinnabarError::Io(msg) => write!(f, "I/O error: {}", msg),
            CinnabarError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CinnabarError::Connection(msg) => write!(f, "Connection error: {}", msg),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::UnknownCommand(cmd) => {
                write!(f, "ERR unknown command '{}'", cmd)
            }
            CommandError::WrongNumberOfArgs(cmd) => {
                write!(f, "ERR wrong number of arguments for '{}' command", cmd)
            }
            CommandError::WrongType => {
                write!(
                    f,
                    "WRONGTYPE Operation against a key holding the wrong kind of value"
                )
            }
            CommandError::NotInteger => {
                write!(f, "ERR value is not an integer or out of range")
            }
            CommandError::Generic(msg) => {
                write!(f, "ERR {}", msg)
            }
        }
    }
}

impl StdError for CinnabarError {}

impl StdError for CommandError {}

// Conversion implementations
impl From<io::Error> for CinnabarError {
    fn from(err: io::Error) -> Self {
        CinnabarError::Io(err.to_string())
    }
}

impl From<CommandError> for CinnabarError {
    fn from(err: CommandError) -> Self {
        CinnabarError::Command(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommandError::UnknownCommand("FOOBAR".to_string());
        assert_eq!(err.to_string(), "ERR unknown command 'FOOBAR'");

        let err = CommandError::WrongType;
        assert_eq!(
            err.to_string(),
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        );

        let err = CommandError::NotInteger;
        assert_eq!(err.to_string(), "ERR value is not an integer or out of range");
    }

    #[test]
    fn test_eof_detection() {
        assert!(CinnabarError::Eof.is_eof());
        assert!(!CinnabarError::Protocol("bad frame".into()).is_eof());
    }
}
