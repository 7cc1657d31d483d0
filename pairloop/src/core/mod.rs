//! Deterministic, pure logic shared by the agents and the runtime.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod extract;
pub mod history;
pub mod termination;
pub mod types;
