//! Autonomous iteration loop over file-backed task documents.
//!
//! A task document is markdown with a frontmatter block and a checklist of
//! verifiable criteria. The loop hands the document to an external worker
//! round after round until every criterion passes, the document is marked
//! blocked, or the iteration budget runs out. With more than one worker the
//! failing criteria are split by domain and fanned out in parallel.
//!
//! - **[`core`]**: Pure, deterministic logic (parsing, partitioning, terminal
//!   conditions, report text). No I/O.
//! - **[`io`]**: Side-effecting operations (document store, process
//!   execution, snapshots, notifications, config).
//!
//! [`looping`] drives the rounds, [`dispatch`] runs one round's workers, and
//! [`control`] implements the out-of-band pause/stop/status commands.
//! [`interactive`] hands a document to a single session on the terminal.

pub mod control;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod exit_codes;
pub mod interactive;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
