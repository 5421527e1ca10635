//! `tracing-subscriber` layer that feeds tracing events into an [`Appender`].
//!
//! Mapping from a tracing event to a [`LogEvent`]:
//! - the `message` field becomes the message, other fields go into the context map
//! - an error recorded through `record_error` (or a field named `error`) becomes the
//!   throwable, one line per error in its source chain
//! - the target is the logger name, and the names of the enclosing spans (outermost first)
//!   form the nested context
//! - file, line and module path become the location
//!
//! Events targeted at `logmail` itself are skipped, and so is anything emitted while the
//! layer is already dispatching on the same thread. A flush logs through `tracing`, and
//! those events must not loop back into the buffer.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::appender::Appender;
use crate::event::{current_thread_name, Level, Location, LogEvent};

const OWN_TARGET: &str = "logmail";

fn is_own_target(target: &str) -> bool {
    target
        .strip_prefix(OWN_TARGET)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

thread_local! {
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Forwards tracing events to an appender.
#[derive(Clone)]
pub struct DispatchLayer {
    appender: Arc<dyn Appender>,
    min_level: Level,
}

impl fmt::Debug for DispatchLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchLayer")
            .field("appender", &self.appender.name())
            .field("min_level", &self.min_level)
            .finish()
    }
}

impl DispatchLayer {
    pub fn new(appender: Arc<dyn Appender>) -> Self {
        Self { appender, min_level: Level::Trace }
    }

    /// Drop events below `level` before they reach the appender.
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    fn level_of(level: &tracing::Level) -> Level {
        match *level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::INFO => Level::Info,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::TRACE => Level::Trace,
        }
    }
}

/// Restores the dispatch flag when dropped, even if the appender panics.
struct DispatchGuard;

impl DispatchGuard {
    fn enter() -> Option<Self> {
        DISPATCHING.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(DispatchGuard)
            }
        })
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|flag| flag.set(false));
    }
}

#[derive(Default)]
struct EventVisitor {
    message: Option<String>,
    context: BTreeMap<String, String>,
    throwable: Option<Vec<String>>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.context.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let mut lines = vec![value.to_string()];
        let mut source = value.source();
        while let Some(cause) = source {
            lines.push(format!("Caused by: {}", cause));
            source = cause.source();
        }
        self.context.insert(field.name().to_string(), value.to_string());
        self.throwable.get_or_insert_with(Vec::new).extend(lines);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(rendered),
            "error" => {
                self.throwable.get_or_insert_with(Vec::new).push(rendered.clone());
                self.context.insert("error".into(), rendered);
            }
            name => {
                self.context.insert(name.to_string(), rendered);
            }
        }
    }
}

impl<S> Layer<S> for DispatchLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_own_target(metadata.target()) {
            return;
        }
        let level = Self::level_of(metadata.level());
        if !level.is_at_least(self.min_level) {
            return;
        }
        let Some(_guard) = DispatchGuard::enter() else {
            return;
        };

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let mut log_event =
            LogEvent::new(level, metadata.target(), visitor.message.unwrap_or_default())
                .with_thread_name(current_thread_name());
        log_event.context = visitor.context;
        log_event.throwable = visitor.throwable;

        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                log_event.nested_context = Some(spans.join(" "));
            }
        }

        if metadata.file().is_some() || metadata.line().is_some() {
            log_event.location = Some(Location {
                file: metadata.file().map(str::to_string),
                line: metadata.line(),
                function: metadata.module_path().map(str::to_string),
            });
        }

        self.appender.append(&log_event);
    }
}
