//! Side effects: files, child processes, OS inspection.

pub mod config;
pub mod executor;
pub mod init;
pub mod memory;
pub mod paths;
pub mod plan;
pub mod ports;
pub mod process;
pub mod prompt;
pub mod run_log;
