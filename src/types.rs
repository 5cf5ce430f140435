//! Core types for the pairchat wire protocol.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::crypto::CryptoError;

/// Default TCP port the relay listens on.
pub const DEFAULT_PORT: u16 = 3848;

/// Number of hex digits in the length head.
pub const HEAD_SIZE: usize = 3;
/// Number of letters in an identifier.
pub const IDEN_SIZE: usize = 4;
/// Number of letters in a result literal.
pub const RESL_SIZE: usize = 4;
/// Largest payload a single frame can declare (`FFF`).
pub const MAX_PAYLOAD: usize = 0xFFF;
/// Fixed size of a command signature.
pub const COMMAND_SIGN_SIZE: usize = HEAD_SIZE + IDEN_SIZE;
/// Fixed size of a response signature.
pub const RESPONSE_SIGN_SIZE: usize = HEAD_SIZE + IDEN_SIZE + RESL_SIZE;

/// Session identifier used in log lines.
pub type SessionId = u64;

/// Command identifiers understood by both ends of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// Connection result
    Conn,
    /// Disconnect / end of session
    Dscn,
    /// Chat message sent by a peer
    Send,
    /// Chat message delivered to a peer
    Mesg,
    /// Echo back to sender
    Echo,
    /// Companion started typing
    Tybe,
    /// Companion stopped typing
    Tyen,
    /// Symmetric key exchange
    Aesk,
    /// Unknown or malformed command
    Unkn,
}

impl Identifier {
    /// Every identifier, in wire order.
    pub const ALL: [Identifier; 9] = [
        Identifier::Conn,
        Identifier::Dscn,
        Identifier::Send,
        Identifier::Mesg,
        Identifier::Echo,
        Identifier::Tybe,
        Identifier::Tyen,
        Identifier::Aesk,
        Identifier::Unkn,
    ];

    /// The four-letter wire literal.
    pub fn as_bytes(self) -> &'static [u8; IDEN_SIZE] {
        match self {
            Identifier::Conn => b"CONN",
            Identifier::Dscn => b"DSCN",
            Identifier::Send => b"SEND",
            Identifier::Mesg => b"MESG",
            Identifier::Echo => b"ECHO",
            Identifier::Tybe => b"TYBE",
            Identifier::Tyen => b"TYEN",
            Identifier::Aesk => b"AESK",
            Identifier::Unkn => b"UNKN",
        }
    }

    /// Look up an identifier from its wire literal.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|iden| iden.as_bytes() == raw)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Wire literals are ASCII.
        f.write_str(std::str::from_utf8(self.as_bytes()).unwrap_or("????"))
    }
}

/// Result literal carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Okay,
    Fail,
}

impl Outcome {
    /// The four-letter wire literal.
    pub fn as_bytes(self) -> &'static [u8; RESL_SIZE] {
        match self {
            Outcome::Okay => b"OKAY",
            Outcome::Fail => b"FAIL",
        }
    }

    /// Look up an outcome from its wire literal.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        match raw {
            b"OKAY" => Some(Outcome::Okay),
            b"FAIL" => Some(Outcome::Fail),
            _ => None,
        }
    }

    /// Whether this is `OKAY`.
    pub fn is_okay(self) -> bool {
        self == Outcome::Okay
    }
}

/// A command frame.
///
/// When built locally `payload_len` always equals `payload.len()`. When a
/// signature is parsed off the wire `payload_len` is the declared length and
/// the payload is filled in afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub iden: Identifier,
    pub payload: Vec<u8>,
    pub payload_len: usize,
}

impl Command {
    /// Create a command with an empty payload.
    pub fn new(iden: Identifier) -> Self {
        Self {
            iden,
            payload: Vec::new(),
            payload_len: 0,
        }
    }

    /// Attach a payload, truncating it to [`MAX_PAYLOAD`] bytes.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        let mut payload = payload.into();
        payload.truncate(MAX_PAYLOAD);
        self.payload_len = payload.len();
        self.payload = payload;
        self
    }

    /// The command substituted for anything that fails to parse.
    pub fn unknown() -> Self {
        Self::new(Identifier::Unkn)
    }
}

/// A response frame: a command plus a result literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub iden: Identifier,
    pub outcome: Outcome,
    pub payload: Vec<u8>,
    pub payload_len: usize,
}

impl Response {
    /// Create a response with an empty payload.
    pub fn new(iden: Identifier, outcome: Outcome) -> Self {
        Self {
            iden,
            outcome,
            payload: Vec::new(),
            payload_len: 0,
        }
    }

    /// Create an `OKAY` response with an empty payload.
    pub fn okay(iden: Identifier) -> Self {
        Self::new(iden, Outcome::Okay)
    }

    /// Create a `FAIL` response with an empty payload.
    pub fn fail(iden: Identifier) -> Self {
        Self::new(iden, Outcome::Fail)
    }

    /// Attach a payload, truncating it to [`MAX_PAYLOAD`] bytes.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        let mut payload = payload.into();
        payload.truncate(MAX_PAYLOAD);
        self.payload_len = payload.len();
        self.payload = payload;
        self
    }

    /// The response substituted for anything that fails to parse.
    pub fn unknown() -> Self {
        Self::fail(Identifier::Unkn)
    }
}

/// Errors that can occur in pairchat operations.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(io::Error),

    #[error("peer disconnected")]
    Disconnected,

    #[error("invalid signature: {0}")]
    InvalidSignature(&'static str),

    #[error("payload too large: {0} bytes (max {})", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("server already running")]
    AlreadyRunning,

    #[error("server already stopped")]
    AlreadyStopped,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("invalid channel state: {0}")]
    ChannelState(&'static str),

    #[error("logging setup failed: {0}")]
    Logging(String),
}

impl RelayError {
    /// Whether this error means the remote end is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RelayError::Disconnected)
    }
}

impl From<io::Error> for RelayError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => RelayError::Disconnected,
            _ => RelayError::Io(err),
        }
    }
}

/// Fixed diagnostic payloads carried by relay responses.
pub mod diagnostics {
    pub const CHAT_STARTED: &[u8] = b"CHAT_SUCCESSFULLY_STARTED";
    pub const ACCEPT_TIME_EXPIRED: &[u8] = b"COMPANION_ACCEPT_TIME_EXPIRED";
    pub const CHAT_STOPPED: &[u8] = b"CHAT_STOPPED_BY_COMPANION";
    pub const SECURE_ALREADY_ENABLED: &[u8] = b"AES_SECURE_ALREADY_ENABLED";
    pub const SECURE_NOT_NEGOTIATED: &[u8] = b"AES_SECURE_NOT_NEGOTIATED";
    pub const INVALID_PUBLIC_KEY: &[u8] = b"ERROR_INVALID_PUBLIC_KEY";
    pub const MALFORMED_MESSAGE: &[u8] = b"ERROR_MALFORMED_MESSAGE";
    pub const MESSAGE_TOO_LONG: &[u8] = b"ERROR_MESSAGE_TOO_LONG";
    pub const UNKNOWN_COMMAND: &[u8] = b"ERROR_UNKNOWN_COMMAND";
}
