//! Stable exit codes for taskloop CLI commands.

use crate::core::types::Outcome;

/// Command succeeded, or the loop completed.
pub const OK: i32 = 0;
/// Invalid document, config, or arguments, or any other fatal error.
pub const INVALID: i32 = 1;
/// The loop exhausted its iteration budget.
pub const FAILED: i32 = 2;
/// The document was marked BLOCKED.
pub const BLOCKED: i32 = 3;
/// The loop was paused and can be resumed.
pub const PAUSED: i32 = 4;
/// The loop was stopped.
pub const STOPPED: i32 = 5;

pub fn for_outcome(outcome: Outcome) -> i32 {
    match outcome {
        Outcome::Completed => OK,
        Outcome::Failed => FAILED,
        Outcome::Blocked => BLOCKED,
        Outcome::Paused => PAUSED,
        Outcome::Stopped => STOPPED,
    }
}
