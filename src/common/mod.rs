//! Shared utilities: logging setup and clock abstraction.

pub mod logger;
pub mod time;
