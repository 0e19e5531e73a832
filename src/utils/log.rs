//! Leveled progress output on stderr.
//!
//! Colour is decided per line from whether stderr is a terminal, so piping
//! the tool into a file yields plain text.

use std::io::{self, IsTerminal, Write};

use chrono::Local;

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";
const HEADER: &str = "\x1b[95m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warn,
    Error,
    Wait,
}

impl Level {
    fn icon(self) -> &'static str {
        match self {
            Level::Info => "ℹ️ ",
            Level::Success => "✅",
            Level::Warn => "⚠️ ",
            Level::Error => "❌",
            Level::Wait => "⏳",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Level::Info => "\x1b[94m",
            Level::Success => "\x1b[92m",
            Level::Warn => "\x1b[93m",
            Level::Error => "\x1b[91m",
            Level::Wait => "\x1b[96m",
        }
    }
}

/// Render one log line. Pure so the format can be tested.
pub fn format_line(level: Level, message: &str, timestamp: &str, colored: bool) -> String {
    if colored {
        format!(
            "{BOLD}[{timestamp}]{RESET} {}{} {message}{RESET}",
            level.color(),
            level.icon()
        )
    } else {
        format!("[{timestamp}] {} {message}", level.icon())
    }
}

pub fn emit(level: Level, message: &str) {
    let stderr = io::stderr();
    let colored = stderr.is_terminal();
    let timestamp = Local::now().format("%H:%M:%S").to_string();
    let line = format_line(level, message, &timestamp, colored);
    let mut handle = stderr.lock();
    // A closed stderr must not abort the run.
    let _ = writeln!(handle, "{}", line);
}

pub fn section(title: &str) {
    let stderr = io::stderr();
    let line = if stderr.is_terminal() {
        format!("\n{HEADER}=== {title} ==={RESET}")
    } else {
        format!("\n=== {title} ===")
    };
    let _ = writeln!(stderr.lock(), "{}", line);
}

/// Show at most a short prefix of a secret, e.g. `sbp_…`.
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "…".to_string()
    } else {
        format!("{}…", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_line_has_timestamp_and_icon() {
        let line = format_line(Level::Success, "OK: Git push", "12:00:01", false);
        assert_eq!(line, "[12:00:01] ✅ OK: Git push");
    }

    #[test]
    fn colored_line_wraps_message_in_escape_codes() {
        let line = format_line(Level::Error, "boom", "12:00:01", true);
        assert!(line.starts_with(BOLD));
        assert!(line.contains("\x1b[91m"));
        assert!(line.ends_with(RESET));
    }

    #[test]
    fn mask_secret_keeps_only_prefix() {
        assert_eq!(mask_secret("ghp_abcdef123456"), "ghp_…");
        assert_eq!(mask_secret("abc"), "…");
    }
}
