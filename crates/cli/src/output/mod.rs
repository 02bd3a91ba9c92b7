//! Output formatting
//!
//! Human-readable output goes to stdout with optional colors; `--json`
//! switches every command to strict JSON. Progress bars and notes go to
//! stderr so they never mix with machine-readable output.

mod formatter;
mod progress;

pub use formatter::Formatter;
pub use progress::TransferProgress;

/// Output settings shared by all commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputConfig {
    /// Emit JSON instead of human-readable text
    pub json: bool,
    /// Disable colors
    pub no_color: bool,
    /// Suppress everything except errors
    pub quiet: bool,
}
