//! I/O helpers for taskloop commands.

pub mod atomic;
pub mod config;
pub mod discovery;
pub mod document;
pub mod executor;
pub mod iteration_log;
pub mod notify;
pub mod process;
pub mod prompt;
pub mod scaffold;
pub mod snapshot;
