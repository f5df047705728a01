//! Structured logging utilities for memo components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use memo_config::{log_runcache_info, log_transfer_debug};
//!
//! log_runcache_info!("Entry saved", key = key.as_str());
//! log_transfer_debug!("Skipping bucket", bucket = tracing::field::display(path.display()));
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const RUNCACHE: &'static str = "RUNCACHE";
    pub const TRANSFER: &'static str = "TRANSFER";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Map a `-v` count onto a level, starting from `Warn`.
    pub fn from_verbosity(count: u8) -> Self {
        match count {
            0 => LogLevel::Warn,
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// === RUNCACHE logging macros ===

#[macro_export]
macro_rules! log_runcache_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "RUNCACHE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_runcache_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "RUNCACHE", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_runcache_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "RUNCACHE", $($key = $value,)* $msg)
    };
}

// === TRANSFER logging macros ===

#[macro_export]
macro_rules! log_transfer_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "TRANSFER", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_transfer_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "TRANSFER", $($key = $value,)* $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CLI", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CLI", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
///
/// `MEMO_LOG` takes precedence over `RUST_LOG`; both override `level`.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_env("MEMO_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
