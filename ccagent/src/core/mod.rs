//! Deterministic, pure logic shared by the ccagent workflows.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod draft;
pub mod extract;
pub mod selector;
pub mod text;
pub mod types;
