#![deny(missing_docs)]
//! Shared logging utilities for the zipq workspace.
//!
//! This crate provides the `engine_*` logging macros used across the codebase,
//! a per-thread dispatch tick for log correlation, a small rate limiter for
//! notices that would otherwise flood the log, and a minimal test initializer
//! for the global logger.

use std::cell::Cell;

thread_local! {
    /// Thread-local storage for the scheduler's current dispatch tick.
    static DISPATCH_TICK: Cell<u64> = const { Cell::new(0) };
}

/// Sets the dispatch tick for the current thread.
/// The scheduler actor calls this on every tick.
pub fn set_dispatch_tick(tick: u64) {
    DISPATCH_TICK.with(|v| v.set(tick));
}

/// Retrieves the dispatch tick for the current thread.
/// Returns 0 outside the scheduler thread.
pub fn get_dispatch_tick() -> u64 {
    DISPATCH_TICK.with(|v| v.get())
}

/// `"[tick N] "` on a thread with a dispatch tick, empty elsewhere.
/// Every `engine_*` macro starts its message with this.
pub fn tick_prefix() -> String {
    match get_dispatch_tick() {
        0 => String::new(),
        tick => format!("[tick {tick}] "),
    }
}

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! engine_trace {
    ($($arg:tt)*) => {{
        log::trace!("{}{}", $crate::tick_prefix(), format_args!($($arg)*));
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {{
        log::info!("{}{}", $crate::tick_prefix(), format_args!($($arg)*));
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! engine_debug {
    ($($arg:tt)*) => {{
        log::debug!("{}{}", $crate::tick_prefix(), format_args!($($arg)*));
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {{
        log::warn!("{}{}", $crate::tick_prefix(), format_args!($($arg)*));
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {{
        log::error!("{}{}", $crate::tick_prefix(), format_args!($($arg)*));
    }};
}

/// Lets one occurrence out of every `every` through.
///
/// The first occurrence always passes so a condition is never silently
/// swallowed; after that only every `every`-th one does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiter {
    every: u64,
    seen: u64,
}

impl RateLimiter {
    /// Creates a limiter that passes one in `every` occurrences (minimum 1).
    pub const fn new(every: u64) -> Self {
        Self {
            every: if every == 0 { 1 } else { every },
            seen: 0,
        }
    }

    /// Records an occurrence and reports whether it should be logged.
    pub fn hit(&mut self) -> bool {
        let pass = self.seen % self.every == 0;
        self.seen = self.seen.wrapping_add(1);
        pass
    }

    /// Total occurrences recorded so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Initializes a simple terminal logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    // Use debug level in debug builds, info in release builds.
    let level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}
