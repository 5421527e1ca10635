//! Error reporting channel.
//!
//! Appenders never return errors to the code that logs through them. Every non-fatal
//! failure (missing configuration, bad addresses, failed delivery) is handed to an
//! [`ErrorHandler`] instead.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Classification attached to every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    GenericFailure,
    /// A required option (credentials, layout, evaluator, sink) is absent.
    MissingConfig,
    AddressParseFailure,
    /// Formatting, connecting or sending during a flush failed.
    FlushFailure,
    CloseFailure,
    /// The appender is not in a state that accepts the call.
    WriteFailure,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::GenericFailure => "generic_failure",
            ErrorCode::MissingConfig => "missing_config",
            ErrorCode::AddressParseFailure => "address_parse_failure",
            ErrorCode::FlushFailure => "flush_failure",
            ErrorCode::CloseFailure => "close_failure",
            ErrorCode::WriteFailure => "write_failure",
        };
        f.write_str(name)
    }
}

/// Receives non-fatal appender failures.
pub trait ErrorHandler: Send + Sync + fmt::Debug {
    fn report(&self, message: &str, cause: Option<&(dyn Error + 'static)>, code: ErrorCode);
}

/// Default handler: emits each report as a `tracing` error.
#[derive(Debug, Clone, Default)]
pub struct TracingErrorHandler;

impl ErrorHandler for TracingErrorHandler {
    fn report(&self, message: &str, cause: Option<&(dyn Error + 'static)>, code: ErrorCode) {
        match cause {
            Some(cause) => {
                tracing::error!(target: "logmail::report", code = %code, cause = %cause, "{}", message)
            }
            None => tracing::error!(target: "logmail::report", code = %code, "{}", message),
        }
    }
}

/// Forwards only the first report to the wrapped handler and swallows the rest.
#[derive(Debug)]
pub struct OnlyOnceErrorHandler<H> {
    inner: H,
    fired: AtomicBool,
}

impl<H: ErrorHandler> OnlyOnceErrorHandler<H> {
    pub fn new(inner: H) -> Self {
        Self { inner, fired: AtomicBool::new(false) }
    }
}

impl<H: ErrorHandler> ErrorHandler for OnlyOnceErrorHandler<H> {
    fn report(&self, message: &str, cause: Option<&(dyn Error + 'static)>, code: ErrorCode) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.inner.report(message, cause, code);
        }
    }
}

/// One recorded report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub message: String,
    pub cause: Option<String>,
    pub code: ErrorCode,
}

/// Handler that keeps every report in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryErrorHandler {
    reports: Arc<Mutex<Vec<Report>>>,
}

impl MemoryErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Reports carrying `code`.
    pub fn with_code(&self, code: ErrorCode) -> Vec<Report> {
        self.reports().into_iter().filter(|r| r.code == code).collect()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl ErrorHandler for MemoryErrorHandler {
    fn report(&self, message: &str, cause: Option<&(dyn Error + 'static)>, code: ErrorCode) {
        let report =
            Report { message: message.to_string(), cause: cause.map(|c| c.to_string()), code };
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).push(report);
    }
}

impl<H: ErrorHandler + ?Sized> ErrorHandler for Arc<H> {
    fn report(&self, message: &str, cause: Option<&(dyn Error + 'static)>, code: ErrorCode) {
        (**self).report(message, cause, code)
    }
}
