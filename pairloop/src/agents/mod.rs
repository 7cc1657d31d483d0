//! The two agents of the loop, both driven by the runtime as
//! [`MessageHandler`](crate::runtime::MessageHandler)s.

pub mod executor;
pub mod generator;

pub use executor::{Executor, ExecutorSettings};
pub use generator::{CompletionFailedError, Generator, RetryPolicy};

/// Registration name of the generator agent.
pub const GENERATOR_ID: &str = "generator";
/// Registration name of the executor agent.
pub const EXECUTOR_ID: &str = "executor";
