//! Recursive language model loop.
//!
//! Answers questions about a context too large for a single prompt by letting
//! a model write code that explores the context in a sandbox, optionally
//! delegating chunks to a sub-model, until it commits to a final answer.
//!
//! - **[`core`]**: Pure, deterministic logic (response parsing, denylist,
//!   context indexing, citations). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (model backend, sandbox process,
//!   config, prompts, trace persistence, corpus loading).
//!
//! Orchestration modules ([`session`], [`delegate`]) combine them into the
//! loop that the CLI, eval harness and web UI drive.

pub mod core;
pub mod delegate;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
