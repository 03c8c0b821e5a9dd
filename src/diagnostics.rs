//! Pluggable sink for device diagnostics.
//!
//! The camera reports every failed device request and every failed
//! precondition to a sink chosen at construction. The default sink prints
//! to standard error; [`LogSink`] forwards to the `log` facade instead, and
//! any matching closure can be used directly.

use std::io;

/// Severity of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// A device request failed; the OS error is attached.
    Error,
    /// A named precondition did not hold.
    Failure,
    /// Informational.
    Info,
}

/// Receiver of diagnostic events.
pub trait DiagnosticSink {
    /// Handle one event. `os_error` is present for [`Severity::Error`].
    fn log(&self, severity: Severity, message: &'static str, os_error: Option<&io::Error>);
}

impl<F> DiagnosticSink for F
where
    F: Fn(Severity, &'static str, Option<&io::Error>),
{
    fn log(&self, severity: Severity, message: &'static str, os_error: Option<&io::Error>) {
        self(severity, message, os_error);
    }
}

/// Format an event as a single line.
#[must_use]
pub fn render(severity: Severity, message: &str, os_error: Option<&io::Error>) -> String {
    match (severity, os_error) {
        (Severity::Error, Some(err)) => {
            format!(
                "ERROR [{message}] {}: {err}",
                err.raw_os_error().unwrap_or_default()
            )
        }
        (Severity::Error, None) => format!("ERROR [{message}]"),
        (Severity::Failure, _) => format!("FAIL [{message}]"),
        (Severity::Info, _) => format!("INFO [{message}]"),
    }
}

/// Default sink: one line per event on standard error.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn log(&self, severity: Severity, message: &'static str, os_error: Option<&io::Error>) {
        eprintln!("{}", render(severity, message, os_error));
    }
}

/// Sink forwarding events to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn log(&self, severity: Severity, message: &'static str, os_error: Option<&io::Error>) {
        match (severity, os_error) {
            (Severity::Error, Some(err)) => log::error!("[{message}] {err}"),
            (Severity::Error, None) => log::error!("[{message}]"),
            (Severity::Failure, _) => log::warn!("[{message}]"),
            (Severity::Info, _) => log::info!("[{message}]"),
        }
    }
}
