//! Process-wide fatal error channel.

use std::fmt::Display;

use tracing::error;

use crate::error::ErrorCode;

/// Reports an unrecoverable condition and terminates the process.
///
/// The log line carries the two-part error code so the failure can be traced
/// back to its subsystem. The process exits with
/// [`ErrorCode::exit_status`], which is never zero.
pub fn fatal(code: ErrorCode, message: impl Display) -> ! {
    error!(
        "{} FATAL ERROR: Code: {}: {}",
        code.module.tag(),
        code,
        message
    );
    std::process::exit(code.exit_status())
}
