//! Log event model.
//!
//! Producers hand the appender an [`EventSource`]: a view whose context-dependent fields
//! (thread name, diagnostic context, call site) may only be cheap to compute while the
//! producing call is still on the stack. [`LogEvent::freeze`] realizes every field once,
//! at append time, into an immutable snapshot the buffer can hold for as long as needed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Severity of a log event, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    /// Upper-case name as rendered by layouts (`"ERROR"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }

    /// True when `self` is at least as severe as `other`.
    pub fn is_at_least(&self, other: Level) -> bool {
        *self >= other
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a level name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}'")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Level::Trace),
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            "FATAL" => Ok(Level::Fatal),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Call-site information for an event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let function = self.function.as_deref().unwrap_or("?");
        let file = self.file.as_deref().unwrap_or("?");
        match self.line {
            Some(line) => write!(f, "{}({}:{})", function, file, line),
            None => write!(f, "{}({}:?)", function, file),
        }
    }
}

/// Producer-side view of an event. Accessors may be expensive or only valid while the
/// producing call is in progress.
pub trait EventSource {
    fn level(&self) -> Level;
    fn timestamp(&self) -> SystemTime;
    fn logger_name(&self) -> String;
    fn rendered_message(&self) -> String;
    fn thread_name(&self) -> String;

    /// Mapped diagnostic context.
    fn context(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Nested diagnostic context.
    fn nested_context(&self) -> Option<String> {
        None
    }

    /// Only consulted when location capture is enabled.
    fn location(&self) -> Option<Location> {
        None
    }

    /// Rendered trace of an attached error, one entry per line.
    fn throwable(&self) -> Option<Vec<String>> {
        None
    }
}

/// Immutable snapshot of a log event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub level: Level,
    pub timestamp: SystemTime,
    pub logger_name: String,
    pub message: String,
    pub thread_name: String,
    pub context: BTreeMap<String, String>,
    pub nested_context: Option<String>,
    pub location: Option<Location>,
    pub throwable: Option<Vec<String>>,
}

impl LogEvent {
    /// Minimal event stamped with the current time and thread.
    pub fn new(level: Level, logger_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: SystemTime::now(),
            logger_name: logger_name.into(),
            message: message.into(),
            thread_name: current_thread_name(),
            context: BTreeMap::new(),
            nested_context: None,
            location: None,
            throwable: None,
        }
    }

    /// Attach trace lines.
    pub fn with_throwable<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.throwable = Some(lines.into_iter().map(Into::into).collect());
        self
    }

    /// Insert a mapped diagnostic context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_nested_context(mut self, ndc: impl Into<String>) -> Self {
        self.nested_context = Some(ndc.into());
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Realize every field of `source` into a snapshot. Call-site information is only
    /// captured when `with_location` is set, since it is usually the costly one.
    pub fn freeze<S: EventSource + ?Sized>(source: &S, with_location: bool) -> Self {
        Self {
            level: source.level(),
            timestamp: source.timestamp(),
            logger_name: source.logger_name(),
            message: source.rendered_message(),
            thread_name: source.thread_name(),
            context: source.context(),
            nested_context: source.nested_context(),
            location: if with_location { source.location() } else { None },
            throwable: source.throwable(),
        }
    }

    /// True when the event carries at least one trace line.
    pub fn has_throwable(&self) -> bool {
        self.throwable.as_ref().map_or(false, |lines| !lines.is_empty())
    }
}

impl EventSource for LogEvent {
    fn level(&self) -> Level {
        self.level
    }

    fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    fn logger_name(&self) -> String {
        self.logger_name.clone()
    }

    fn rendered_message(&self) -> String {
        self.message.clone()
    }

    fn thread_name(&self) -> String {
        self.thread_name.clone()
    }

    fn context(&self) -> BTreeMap<String, String> {
        self.context.clone()
    }

    fn nested_context(&self) -> Option<String> {
        self.nested_context.clone()
    }

    fn location(&self) -> Option<Location> {
        self.location.clone()
    }

    fn throwable(&self) -> Option<Vec<String>> {
        self.throwable.clone()
    }
}

/// Name of the calling thread, falling back to its id for unnamed threads.
pub fn current_thread_name() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}
