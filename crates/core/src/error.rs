use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoneError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Parameter out of range: {0}")]
    ParameterOutOfRange(String),

    #[error("Bad sequence of calls: {0}")]
    BadSequenceOfCalls(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Bad parameter type: {0}")]
    BadParameterType(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Inexistent file: {0}")]
    InexistentFile(String),

    #[error("Bad file format: {0}")]
    BadFileFormat(String),

    #[error("Incompatible image format: {0}")]
    IncompatibleImageFormat(String),

    #[error("Network protocol error: {0}")]
    NetworkProtocol(String),

    #[error("HTTP {status} while fetching {url}")]
    Http { status: u16, url: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

/// Error classification carried across the asynchronous boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InternalError,
    Config,
    ParameterOutOfRange,
    BadSequenceOfCalls,
    InvalidState,
    BadParameterType,
    NotImplemented,
    InexistentFile,
    BadFileFormat,
    IncompatibleImageFormat,
    NetworkProtocol,
    NetworkTimeout,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::InternalError => "internal error",
            ErrorCode::Config => "configuration error",
            ErrorCode::ParameterOutOfRange => "parameter out of range",
            ErrorCode::BadSequenceOfCalls => "bad sequence of calls",
            ErrorCode::InvalidState => "invalid state",
            ErrorCode::BadParameterType => "bad parameter type",
            ErrorCode::NotImplemented => "not implemented",
            ErrorCode::InexistentFile => "inexistent file",
            ErrorCode::BadFileFormat => "bad file format",
            ErrorCode::IncompatibleImageFormat => "incompatible image format",
            ErrorCode::NetworkProtocol => "network protocol error",
            ErrorCode::NetworkTimeout => "network timeout",
        };
        f.write_str(name)
    }
}

impl StoneError {
    /// Classify this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            StoneError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ErrorCode::InexistentFile
            }
            StoneError::Io(_) | StoneError::Internal(_) => ErrorCode::InternalError,
            StoneError::Config(_) | StoneError::ConfigParse(_) => ErrorCode::Config,
            StoneError::ParameterOutOfRange(_) => ErrorCode::ParameterOutOfRange,
            StoneError::BadSequenceOfCalls(_) => ErrorCode::BadSequenceOfCalls,
            StoneError::InvalidState(_) => ErrorCode::InvalidState,
            StoneError::BadParameterType(_) => ErrorCode::BadParameterType,
            StoneError::NotImplemented(_) => ErrorCode::NotImplemented,
            StoneError::InexistentFile(_) => ErrorCode::InexistentFile,
            StoneError::BadFileFormat(_) => ErrorCode::BadFileFormat,
            StoneError::IncompatibleImageFormat(_) => ErrorCode::IncompatibleImageFormat,
            StoneError::NetworkProtocol(_) | StoneError::Http { .. } => ErrorCode::NetworkProtocol,
            StoneError::Timeout(_) => ErrorCode::NetworkTimeout,
        }
    }
}

/// Clonable snapshot of a [`StoneError`], delivered to receivers when a
/// command fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleException {
    pub code: ErrorCode,
    pub details: String,
    /// Status code when the failure was a non-2xx HTTP answer.
    pub http_status: Option<u16>,
}

impl OracleException {
    pub fn new(code: ErrorCode, details: impl Into<String>) -> Self {
        Self {
            code,
            details: details.into(),
            http_status: None,
        }
    }
}

impl From<StoneError> for OracleException {
    fn from(err: StoneError) -> Self {
        Self::from(&err)
    }
}

impl From<&StoneError> for OracleException {
    fn from(err: &StoneError) -> Self {
        let http_status = match err {
            StoneError::Http { status, .. } => Some(*status),
            _ => None,
        };
        Self {
            code: err.code(),
            details: err.to_string(),
            http_status,
        }
    }
}

impl fmt::Display for OracleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.details)
    }
}
