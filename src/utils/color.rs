//! Terminal coloring for stderr diagnostics.
//!
//! Colors are dropped automatically when stderr is not a terminal or
//! `NO_COLOR` is set.

use owo_colors::{OwoColorize, Stream::Stderr};

/// Environment variable that turns on `log_debug!` output.
pub const DEBUG_ENV: &str = "ROLECALL_DEBUG";

pub fn debug_enabled() -> bool {
    std::env::var_os(DEBUG_ENV).is_some_and(|v| !v.is_empty() && v != "0")
}

pub fn red(text: &str) -> String {
    text.if_supports_color(Stderr, |t| t.red()).to_string()
}

pub fn yellow(text: &str) -> String {
    text.if_supports_color(Stderr, |t| t.yellow()).to_string()
}

pub fn green(text: &str) -> String {
    text.if_supports_color(Stderr, |t| t.green()).to_string()
}

pub fn blue(text: &str) -> String {
    text.if_supports_color(Stderr, |t| t.blue()).to_string()
}
