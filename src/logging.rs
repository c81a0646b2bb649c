//! A small sink-based logger, in the shape of `ze-core`'s `logger` module.
//!
//! This crate is not a member of the workspace that crate lives in, so it
//! cannot path-depend on it; the macros here are prefixed `job_` to avoid
//! colliding with `ze-core`'s own `ze_info!`/`ze_warn!`/etc. if this crate
//! is ever vendored alongside it.

use crate::thread_registry::thread_name;
use chrono::Local;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt::{self, Arguments};
use std::io::Write;
use std::sync::{Arc, Weak};
use std::thread;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

#[derive(Copy, Clone, Debug)]
pub enum Severity {
    Verbose,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Verbose => write!(f, "verbose"),
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Clone)]
pub struct Message {
    pub severity: Severity,
    pub crate_name: String,
    pub message: String,
    pub time: chrono::DateTime<Local>,
    pub thread: thread::ThreadId,
}

/// Receives log messages from the global logger and processes them, e.g. printing to a file.
pub trait Sink: Send + Sync {
    fn log(&self, message: &Message);
}

enum SinkEntry {
    Arc(Arc<dyn Sink>),
    Weak(Weak<dyn Sink>),
}

impl SinkEntry {
    fn log(&self, message: &Message) {
        match self {
            SinkEntry::Arc(arc) => arc.log(message),
            SinkEntry::Weak(weak) => {
                if let Some(arc) = weak.upgrade() {
                    arc.log(message);
                }
            }
        }
    }
}

static SINKS: Lazy<RwLock<Vec<SinkEntry>>> = Lazy::new(RwLock::default);

#[doc(hidden)]
pub fn internal_log(severity: Severity, crate_name: &str, args: Arguments) {
    let message = Message {
        severity,
        crate_name: crate_name.to_string(),
        message: args.to_string(),
        time: Local::now(),
        thread: thread::current().id(),
    };

    for sink in SINKS.read().iter() {
        sink.log(&message);
    }

    if matches!(message.severity, Severity::Fatal) {
        panic!("{}", message.message);
    }
}

pub fn register_sink(sink: Arc<dyn Sink>) {
    SINKS.write().push(SinkEntry::Arc(sink));
}

pub fn register_sink_weak<T: Sink + 'static>(sink: Weak<T>) {
    SINKS.write().push(SinkEntry::Weak(sink));
}

#[macro_export]
macro_rules! job_verbose {
    ($($arg:tt)*) => ({
        $crate::logging::internal_log($crate::logging::Severity::Verbose, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

#[macro_export]
macro_rules! job_info {
    ($($arg:tt)*) => ({
        $crate::logging::internal_log($crate::logging::Severity::Info, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

#[macro_export]
macro_rules! job_warn {
    ($($arg:tt)*) => ({
        $crate::logging::internal_log($crate::logging::Severity::Warn, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

#[macro_export]
macro_rules! job_error {
    ($($arg:tt)*) => ({
        $crate::logging::internal_log($crate::logging::Severity::Error, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

/// Logs at `Fatal` severity, then panics (see `internal_log`).
#[macro_export]
macro_rules! job_fatal {
    ($($arg:tt)*) => ({
        $crate::logging::internal_log($crate::logging::Severity::Fatal, env!("CARGO_PKG_NAME"), format_args!($($arg)*));
    })
}

/// Default sink: colored, timestamped lines on stdout.
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {})
    }
}

impl Sink for StdoutSink {
    fn log(&self, message: &Message) {
        let mut stdout = StandardStream::stdout(ColorChoice::Auto);
        let thread_name = match thread_name(message.thread) {
            None => "unnamed".to_string(),
            Some(name) => name.as_ref().clone(),
        };

        let _ = stdout.set_color(ColorSpec::new().set_fg(Some(match message.severity {
            Severity::Verbose => Color::Cyan,
            Severity::Info => Color::White,
            Severity::Warn => Color::Yellow,
            Severity::Error => Color::Red,
            Severity::Fatal => Color::Rgb(255, 15, 15),
        })));

        let _ = writeln!(
            &mut stdout,
            "[{}] [{}/{}] ({}) {}",
            message.time.format("%H:%M:%S"),
            message.severity,
            thread_name,
            message.crate_name,
            message.message
        );
        let _ = stdout.flush();
    }
}
