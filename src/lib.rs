/// Macro for prefixed status logging to stderr (only when stderr is a terminal).
///
/// Usage:
/// ```ignore
/// log_status!("runner", "Killing process group {}", pgid);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        if ::std::io::IsTerminal::is_terminal(&::std::io::stderr()) {
            eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

/// Leveled, timestamped progress lines on stderr.
///
/// ```ignore
/// log_wait!("Generating types");
/// log_success!("File updated: {}", path);
/// ```
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::utils::log::emit($crate::utils::log::Level::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::utils::log::emit($crate::utils::log::Level::Success, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::utils::log::emit($crate::utils::log::Level::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::utils::log::emit($crate::utils::log::Level::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_wait {
    ($($arg:tt)*) => {
        $crate::utils::log::emit($crate::utils::log::Level::Wait, &format!($($arg)*))
    };
}

/// Stage banner, e.g. `=== 2. GENERATE TYPES ===`.
#[macro_export]
macro_rules! log_section {
    ($($arg:tt)*) => {
        $crate::utils::log::section(&format!($($arg)*))
    };
}

pub mod core;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `relsync::lock` instead of `relsync::core::lock`
pub use self::core::*;
pub use self::utils::*;
