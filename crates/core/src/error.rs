//! Error types for mpx-core
//!
//! Every failure the engine can surface is classified into one of five
//! [`ErrorKind`]s. Transport adapters translate provider failures into
//! [`Error::Client`] or [`Error::Server`] through [`Error::from_status`], so
//! the engine never sees vendor-specific exception types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Result type alias for mpx-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Flat classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed parameters, detected before any transfer attempt
    Validation,
    /// Non-retryable remote failure; aborts the whole transfer
    Client,
    /// Transient remote failure; the checkpoint is preserved
    Server,
    /// Length/range mismatch or finalize discrepancy
    Integrity,
    /// Local disk or filesystem failure
    LocalIo,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Client => "client",
            ErrorKind::Server => "server",
            ErrorKind::Integrity => "integrity",
            ErrorKind::LocalIo => "local_io",
        };
        f.write_str(name)
    }
}

/// Main error type for mpx-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Client error{}: {message}", describe_status(.status, .code))]
    Client {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    #[error("Server error{}: {message}", describe_status(.status, .code))]
    Server {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("I/O error: {0}")]
    LocalIo(#[from] std::io::Error),

    /// Every part arrived but the finished file could not be moved into place
    #[error(
        "Could not place download at {}: {source} (completed data kept in {})",
        destination.display(),
        temp_path.display()
    )]
    Placement {
        destination: PathBuf,
        temp_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Alias not found: {0}")]
    AliasNotFound(String),
}

fn describe_status(status: &Option<u16>, code: &Option<String>) -> String {
    match (status, code) {
        (Some(s), Some(c)) => format!(" ({s} {c})"),
        (Some(s), None) => format!(" ({s})"),
        (None, Some(c)) => format!(" ({c})"),
        (None, None) => String::new(),
    }
}

impl Error {
    /// Classify a remote failure by its HTTP status
    ///
    /// 408, 429 and every 5xx are transient. Any other 4xx is a client error.
    /// A missing status means the request never got a response (dispatch
    /// failure, timeout) and is treated as transient.
    pub fn from_status(
        status: Option<u16>,
        code: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        match status {
            Some(408) | Some(429) => Error::Server {
                status,
                code,
                message,
            },
            Some(s) if (400..500).contains(&s) => Error::Client {
                status,
                code,
                message,
            },
            _ => Error::Server {
                status,
                code,
                message,
            },
        }
    }

    /// Shorthand for a client error without status information
    pub fn client(message: impl Into<String>) -> Self {
        Error::Client {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Shorthand for a transient error without status information
    pub fn server(message: impl Into<String>) -> Self {
        Error::Server {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// The flat classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::Config(_) | Error::AliasNotFound(_) => {
                ErrorKind::Validation
            }
            Error::Client { .. } => ErrorKind::Client,
            Error::Server { .. } => ErrorKind::Server,
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::LocalIo(_) | Error::Placement { .. } | Error::CorruptCheckpoint(_) => {
                ErrorKind::LocalIo
            }
        }
    }

    /// HTTP status reported by the remote side, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Client { status, .. } | Error::Server { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether a later invocation with the same checkpoint may resume
    ///
    /// A placement failure is local I/O, but its checkpoint is already gone.
    pub fn is_resumable(&self) -> bool {
        match self {
            Error::Placement { .. } => false,
            _ => matches!(self.kind(), ErrorKind::Server | ErrorKind::LocalIo),
        }
    }

    /// Whether this failure must stop any further part dispatch
    pub fn aborts_transfer(&self) -> bool {
        matches!(self.kind(), ErrorKind::Client | ErrorKind::Integrity)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::CorruptCheckpoint(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}
