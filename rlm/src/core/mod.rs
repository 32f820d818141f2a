//! Deterministic, pure logic shared by the session loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod citations;
pub mod context;
pub mod parser;
pub mod policy;
pub mod text;
pub mod types;
