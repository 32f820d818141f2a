//! Side-effecting helpers: model backend, sandbox process, config, traces.

pub mod backend;
pub mod config;
pub mod corpus;
pub mod init;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod trace_log;
