//! Two-agent code generation loop.
//!
//! A generator agent asks a completion service for code, an executor agent
//! runs the fenced block it gets back and reports the classified result, and
//! the two talk over a single-threaded topic bus until a termination
//! condition fires or the human stops the session.
//!
//! - **[`core`]**: Pure, deterministic logic (extraction, classification,
//!   conversation history, termination). No I/O.
//! - **[`io`]**: Side-effecting collaborators (completion service,
//!   interpreters, config, terminal input). Behind traits so tests can swap
//!   them for scripted fakes.
//!
//! [`runtime`] delivers messages to the [`agents`]; [`controller`] drives
//! rounds and the idle/resume feedback cycle.

pub mod agents;
pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod runtime;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
