/// Macro for prefixed status logging to stderr (only when stderr is a terminal).
///
/// Usage:
/// ```ignore
/// log_status!("install", "Running {} steps on {}", steps.len(), host);
/// log_status!("gateway", "Tunnel to {} closed", address);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        if ::std::io::IsTerminal::is_terminal(&::std::io::stderr()) {
            eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

/// Diagnostic logging to stderr, enabled by setting `ROLECALL_DEBUG`.
///
/// Used for per-command and per-chunk output that is too noisy for
/// `log_status!`.
#[macro_export]
macro_rules! log_debug {
    ($prefix:expr, $($arg:tt)*) => {
        if $crate::utils::color::debug_enabled() {
            eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

/// Error logging to stderr. Always printed.
#[macro_export]
macro_rules! log_error {
    ($prefix:expr, $($arg:tt)*) => {
        eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
    };
}

pub mod core;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `rolecall::sequencer` instead of `rolecall::core::sequencer`
pub use core::*;
pub use utils::*;
