//! Application-level error types for the Reef server.

use thiserror::Error;

/// Top-level application error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("replication error: {0}")]
    Replication(#[from] ReplicationError),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("file error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Telemetry initialization errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("subscriber setup failed: {0}")]
    Subscriber(String),
}

/// Errors raised while decoding a snapshot file.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid snapshot: missing REDIS magic string")]
    BadMagic,

    #[error("unexpected end of snapshot data")]
    UnexpectedEof,

    #[error("LZF compressed strings are not supported")]
    CompressedString,

    #[error("unknown string encoding: {0}")]
    UnknownEncoding(u8),

    #[error("unsupported value type: {0:#04x}")]
    UnsupportedValueType(u8),
}

/// Errors on the follower side of replication.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("leader closed the connection during {0}")]
    ConnectionClosed(&'static str),

    #[error("malformed snapshot payload from leader")]
    MalformedSnapshot,
}

/// Errors reported to clients as a single `-ERR ...` reply.
///
/// The `Display` text is exactly what goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("ERR Protocol error: expected array of bulk strings")]
    InvalidFrame,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR value is out of range, must be positive")]
    NotPositive,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(String),

    #[error("ERR timeout is not a float or out of range")]
    InvalidTimeout,

    #[error("ERR timeout is negative")]
    NegativeTimeout,

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    StreamIdZero,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidStreamId,

    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error(
        "ERR Can't execute '{0}': only (P|S)SUBSCRIBE / (P|S)UNSUBSCRIBE / PING / QUIT / RESET \
         are allowed in this context"
    )]
    SubscribedContext(String),
}

impl CommandError {
    /// Label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::InvalidFrame => "invalid_frame",
            CommandError::UnknownCommand(_) => "unknown_command",
            CommandError::WrongArity(_) => "wrong_arity",
            CommandError::WrongType => "wrong_type",
            CommandError::SubscribedContext(_) => "subscribed_context",
            CommandError::NestedMulti
            | CommandError::ExecWithoutMulti
            | CommandError::DiscardWithoutMulti => "transaction",
            CommandError::StreamIdZero
            | CommandError::StreamIdTooSmall
            | CommandError::InvalidStreamId => "stream_id",
            _ => "invalid_argument",
        }
    }
}

impl From<crate::storage::StoreError> for CommandError {
    fn from(err: crate::storage::StoreError) -> Self {
        use crate::storage::StoreError;
        match err {
            StoreError::WrongType => CommandError::WrongType,
            StoreError::NotInteger => CommandError::NotInteger,
            StoreError::StreamIdZero => CommandError::StreamIdZero,
            StoreError::StreamIdTooSmall => CommandError::StreamIdTooSmall,
            StoreError::InvalidStreamId => CommandError::InvalidStreamId,
        }
    }
}

/// Errors from the RESP frame parser.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    /// The frame was fully delimited but its content is invalid. Its bytes
    /// have been consumed and the next frame can be parsed.
    #[error("{0}")]
    Invalid(String),

    /// The framing itself is broken; the buffer cannot be resynchronized.
    #[error("{0}")]
    Corrupt(String),
}
