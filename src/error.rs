//! Crate-wide error taxonomy.
use std::fmt;
use std::io;
use std::num::{ParseFloatError, ParseIntError};

/// Every fallible operation in this crate returns this error type.
///
/// Covers transport, HTTP, WebSocket, JSON/numeric parsing, model loading,
/// broker responses, the data feed, and day-level prechecks.
#[derive(Debug)]
pub enum EngineError {
    Io(io::Error),
    Tls(String),
    /// The peer half-closed the stream; distinguished from a transient
    /// "would block" so HTTP/WebSocket can retry or surface it.
    PeerClosed,
    MalformedHttp(String),
    TimedOut(String),
    ProtocolViolation(String),
    MalformedJson(String),
    NumberFormat(String),
    NumberOverflow(String),
    BadWeights(String),
    MissingFeature(String),
    BrokerRejected { code: u32, msg: String },
    FeedError { code: i64, msg: String },
    PrecheckFailure(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io(e) => write!(f, "io error: {e}"),
            EngineError::Tls(m) => write!(f, "tls error: {m}"),
            EngineError::PeerClosed => write!(f, "peer closed connection"),
            EngineError::MalformedHttp(m) => write!(f, "malformed http: {m}"),
            EngineError::TimedOut(m) => write!(f, "timed out: {m}"),
            EngineError::ProtocolViolation(m) => write!(f, "protocol violation: {m}"),
            EngineError::MalformedJson(m) => write!(f, "malformed json: {m}"),
            EngineError::NumberFormat(m) => write!(f, "number format: {m}"),
            EngineError::NumberOverflow(m) => write!(f, "number overflow: {m}"),
            EngineError::BadWeights(m) => write!(f, "bad weights: {m}"),
            EngineError::MissingFeature(m) => write!(f, "missing feature: {m}"),
            EngineError::BrokerRejected { code, msg } => {
                write!(f, "broker rejected ({code}): {msg}")
            }
            EngineError::FeedError { code, msg } => write!(f, "feed error ({code}): {msg}"),
            EngineError::PrecheckFailure(m) => write!(f, "precheck failure: {m}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::ConnectionReset
            || err.kind() == io::ErrorKind::UnexpectedEof
        {
            return EngineError::PeerClosed;
        }
        EngineError::Io(err)
    }
}

impl From<ParseIntError> for EngineError {
    fn from(err: ParseIntError) -> Self {
        EngineError::NumberFormat(err.to_string())
    }
}

impl From<ParseFloatError> for EngineError {
    fn from(err: ParseFloatError) -> Self {
        EngineError::NumberFormat(err.to_string())
    }
}

impl From<openssl::error::ErrorStack> for EngineError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        EngineError::Tls(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
