//! Deterministic, pure logic shared by the loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (event records, response text, plan text) and return deterministic
//! outputs suitable for tests.

pub mod backlog;
pub mod classifier;
pub mod cues;
pub mod decision;
pub mod event;
pub mod extract;
pub mod ports;
pub mod rate_limit;
pub mod response;
pub mod run_summary;
