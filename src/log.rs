use std::sync::atomic::{AtomicU8, Ordering};

/// Log levels for scheduler output, ordered by verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn current_log_level() -> LogLevel {
    match LOG_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::Error,
        1 => LogLevel::Warn,
        2 => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}

/// Parse a log level string. Returns `Err` with a message for invalid input.
pub fn parse_log_level(s: &str) -> Result<LogLevel, String> {
    match s.trim().to_lowercase().as_str() {
        "error" => Ok(LogLevel::Error),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "info" => Ok(LogLevel::Info),
        "debug" => Ok(LogLevel::Debug),
        _ => Err(format!(
            "Invalid log level '{}': expected error, warn, info, or debug",
            s
        )),
    }
}

pub fn enabled(level: LogLevel) -> bool {
    current_log_level() >= level
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        eprintln!("[tag-loader] {}", format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::Warn) {
            eprintln!("[tag-loader] {}", format_args!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::Info) {
            eprintln!("[tag-loader] {}", format_args!($($arg)*))
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::Debug) {
            eprintln!("[tag-loader] {}", format_args!($($arg)*))
        }
    };
}

/// Log a line scoped to one asset or batch: `[tag-loader] [asset-7] ...`.
///
/// `log_for!(Debug, asset, "dispatching at priority {}", p)`
#[macro_export]
macro_rules! log_for {
    ($level:ident, $subject:expr, $($arg:tt)*) => {
        if $crate::log::enabled($crate::log::LogLevel::$level) {
            eprintln!("[tag-loader] [{}] {}", $subject, format_args!($($arg)*))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_log_level_accepts_known_names() {
        assert_eq!(parse_log_level("error").unwrap(), LogLevel::Error);
        assert_eq!(parse_log_level("warn").unwrap(), LogLevel::Warn);
        assert_eq!(parse_log_level("warning").unwrap(), LogLevel::Warn);
        assert_eq!(parse_log_level("info").unwrap(), LogLevel::Info);
        assert_eq!(parse_log_level(" DEBUG ").unwrap(), LogLevel::Debug);
        assert!(parse_log_level("trace").is_err());
    }

    #[test]
    fn set_and_get_log_level() {
        // Tests share the global, so only verify the round-trip and restore.
        set_log_level(LogLevel::Debug);
        assert_eq!(current_log_level(), LogLevel::Debug);
        set_log_level(LogLevel::Error);
        assert_eq!(current_log_level(), LogLevel::Error);
        set_log_level(LogLevel::Info);
    }

    #[test]
    fn error_is_always_enabled() {
        assert!(enabled(LogLevel::Error));
    }

    #[test]
    fn log_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
    }
}
