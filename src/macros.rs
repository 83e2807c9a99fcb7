//! Macros for printing status messages to the console.
//!
//! All output goes through one process-wide lock so messages from the
//! UI thread and the watcher thread never interleave within a line.
use owo_colors::{Color, OwoColorize};
use std::io::{self, Write};
use std::sync::Mutex;

static OUTPUT_LOCK: Mutex<()> = Mutex::new(());

#[macro_export]
macro_rules! ok {
    ($title:expr, $msg:expr) => {
        $crate::macros::print::<$crate::owo_colors::colors::Green>($title, $msg);
    };
    ($title:expr, $msg:expr, $($arg:tt)*) => {
        $crate::ok!($title, format!($msg, $($arg)*).as_str());
    };
}

#[macro_export]
macro_rules! info {
    ($title:expr, $msg:expr) => {
        $crate::macros::print::<$crate::owo_colors::colors::Cyan>($title, $msg);
    };
    ($title:expr, $msg:expr, $($arg:tt)*) => {
        $crate::info!($title, format!($msg, $($arg)*).as_str());
    };
}

#[macro_export]
macro_rules! warn {
    ($title:expr, $msg:expr) => {
        $crate::macros::print::<$crate::owo_colors::colors::Yellow>($title, $msg);
    };
    ($title:expr, $msg:expr, $($arg:tt)*) => {
        $crate::warn!($title, format!($msg, $($arg)*).as_str());
    };
}

#[macro_export]
macro_rules! error {
    ($title:expr, $msg:expr) => {
        $crate::macros::print::<$crate::owo_colors::colors::Red>($title, $msg);
    };
    ($title:expr, $msg:expr, $($arg:tt)*) => {
        $crate::error!($title, format!($msg, $($arg)*).as_str());
    };
}

/// Runs `f` while holding the output lock, for multi-line writes that
/// must not interleave with status messages. Returns whatever `f`
/// returns. Not reentrant.
pub fn locked<T, F: FnOnce() -> T>(f: F) -> T {
    let _guard = OUTPUT_LOCK.lock().unwrap_or_else(|err| err.into_inner());
    f()
}

pub fn print<C: Color>(title: &str, msg: &str) {
    let _guard = OUTPUT_LOCK.lock().unwrap_or_else(|err| err.into_inner());
    // \r\n keeps lines aligned while the terminal is in raw mode.
    print!("{:>12} {}\r\n", title.fg::<C>().bold(), msg);
    let _ = io::stdout().flush();
}
