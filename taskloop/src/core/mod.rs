//! Deterministic, pure logic shared by the loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod criteria;
pub mod frontmatter;
pub mod partition;
pub mod report;
pub mod terminal;
pub mod types;
pub mod verdict;
