//! Logging macros.
//!
//! Every line goes to `tracing` under the `webpubsub` target. Applications can
//! additionally install a hook that receives each line, for example to forward
//! it into a logger of their own.

use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

type LogHook = Box<dyn Fn(Level, &str) + Send + Sync>;

static LOG_HOOK: RwLock<Option<LogHook>> = RwLock::new(None);

/// Installs a process-wide hook receiving every log line, replacing any previous hook.
pub fn set_log_hook(hook: impl Fn(Level, &str) + Send + Sync + 'static) {
    if let Ok(mut slot) = LOG_HOOK.write() {
        *slot = Some(Box::new(hook));
    }
}

pub fn clear_log_hook() {
    if let Ok(mut slot) = LOG_HOOK.write() {
        *slot = None;
    }
}

fn forward(level: Level, msg: &str) {
    if let Ok(slot) = LOG_HOOK.read() {
        if let Some(hook) = slot.as_ref() {
            hook(level, msg);
        }
    }
}

pub fn log_info_impl(msg: &str) {
    tracing::info!(target: "webpubsub", "{}", msg);
    forward(Level::Info, msg);
}

pub fn log_error_impl(msg: &str) {
    tracing::error!(target: "webpubsub", "{}", msg);
    forward(Level::Error, msg);
}

pub fn log_warn_impl(msg: &str) {
    tracing::warn!(target: "webpubsub", "{}", msg);
    forward(Level::Warn, msg);
}

pub fn log_debug_impl(msg: &str) {
    tracing::debug!(target: "webpubsub", "{}", msg);
    forward(Level::Debug, msg);
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}
