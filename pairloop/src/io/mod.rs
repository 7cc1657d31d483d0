//! Side-effecting adapters: interpreters, the completion service, human input,
//! and configuration on disk.

pub mod completion;
pub mod config;
pub mod feedback;
pub mod process;
pub mod prompt;
pub mod runner;
pub mod session;
