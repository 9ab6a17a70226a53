//! I/O adapters: processes, the history log, config files, and model backends.

pub mod anthropic;
pub mod backend;
pub mod bedrock;
pub mod config;
pub mod history;
pub mod inventory;
pub mod model;
pub mod process;
pub mod prompt;
