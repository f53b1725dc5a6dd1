use crate::signal::Fault;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid route pattern '{pattern}'")]
    Pattern {
        pattern: String,
        #[source]
        reason: PatternSyntax,
    },

    #[error("Invalid route regular expression")]
    Regex(#[from] regex::Error),

    #[error("An error handler failed: {0}")]
    Unrecovered(Fault),

    #[error("I/O operation failed")]
    Io(#[from] io::Error),

    #[error("The connection socket was closed unexpectedly")]
    UnexpectedSocketClose(#[source] io::Error),

    #[error("Unsupported FastCGI version: '{0}'")]
    UnsupportedVersion(u8),

    #[error("Multiplexing multiple requests unto a single connection is not supported")]
    MultiplexingUnsupported,

    #[error("Received malformed FastCGI record for type '{0}'")]
    MalformedRecordPayload(&'static str),

    #[error("Unsupported FastCGI role: '{0}'")]
    UnsupportedRole(u16),

    #[error("Unsupported FastCGI protocol status: '{0}'")]
    UnsupportedProtocolStatus(u8),

    #[error("Unknown FastCGI record type: '{0}'")]
    UnknownRecordType(u8),

    #[error("Detected invalid utf8 in a key-value pair")]
    InvalidUtf8KeyValuePair,

    #[error("Web server sent a malformed record stream")]
    MalformedRecordStream,
}

/// The ways a route pattern can be malformed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternSyntax {
    #[error("missing parameter name at position {0}")]
    EmptyName(usize),

    #[error("parameter '{0}' is declared more than once")]
    DuplicateName(String),

    #[error("'?' at position {0} has nothing to make optional")]
    DanglingOptional(usize),

    #[error("group opened at position {0} is never closed")]
    UnclosedGroup(usize),

    #[error("unexpected ')' at position {0}")]
    UnexpectedClose(usize),

    #[error("pattern ends with an escape character")]
    TrailingEscape,
}
