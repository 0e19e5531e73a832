//! Generic utility primitives with zero domain knowledge.
//!
//! - `command` - Non-interactive command execution with timeout
//! - `io` - File I/O with consistent error handling
//! - `log` - Leveled progress output
//! - `shell` - Shell quoting
//! - `template` - String template rendering

pub mod command;
pub mod io;
pub mod log;
pub mod shell;
pub mod template;
