//! Process exit codes
//!
//! Scripts can tell a resumable failure (3) from one that needs attention
//! without parsing output.

use mpx_core::{Error, ErrorKind};

/// Exit codes returned by every command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed
    Success = 0,
    /// Unclassified failure (configuration, environment)
    GeneralError = 1,
    /// Invalid arguments or request parameters
    UsageError = 2,
    /// Network or server-side failure; re-running may resume
    NetworkError = 3,
    /// Request rejected by the server (auth, permissions, bad request)
    ClientError = 4,
    /// Alias, bucket or object does not exist
    NotFound = 5,
    /// Transferred data failed verification
    IntegrityError = 6,
    /// Local filesystem failure
    LocalIoError = 7,
}

impl ExitCode {
    /// Map a transfer error onto an exit code
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::AliasNotFound(_) => return ExitCode::NotFound,
            Error::Config(_) => return ExitCode::GeneralError,
            _ => {}
        }
        if error.status() == Some(404) {
            return ExitCode::NotFound;
        }
        match error.kind() {
            ErrorKind::Validation => ExitCode::UsageError,
            ErrorKind::Client => ExitCode::ClientError,
            ErrorKind::Server => ExitCode::NetworkError,
            ErrorKind::Integrity => ExitCode::IntegrityError,
            ErrorKind::LocalIo => ExitCode::LocalIoError,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
