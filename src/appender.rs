//! The dispatching appender.
//!
//! Lifecycle: `Created -> Configured -> Activated -> Closed`.
//!
//! - Setters may be called any number of times before activation. Afterwards only the
//!   buffer size may change; other setters are reported and ignored.
//! - `activate` builds the sink session from the credentials, parses the address template
//!   and activates the evaluator. Address or sink failures are reported, not fatal.
//! - `append` freezes the event, buffers it and flushes when the evaluator triggers. It is a
//!   reported no-op unless every required option is present.
//! - `close` is terminal; with `send_on_close` it flushes whatever is still buffered.
//!
//! Invariants:
//! - `append`, `flush` and `close` run under one lock per appender, so concurrent producers
//!   never corrupt the buffer. A flush holds the lock while the sink does its I/O.
//! - Nothing here returns an error or panics on bad input; failures go to the
//!   [`ErrorHandler`].
//! - A flush drains the buffer before sending. Content that fails to send is not retried.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tracing::debug;

use crate::buffer::CyclicBuffer;
use crate::config::{AppenderConfig, Credentials, DEFAULT_BUFFER_SIZE};
use crate::evaluator::{
    EvaluatorRegistry, LevelThreshold, TriggeringEvaluator, DEFAULT_EVALUATOR,
};
use crate::event::{EventSource, LogEvent};
use crate::formatter::Formatter;
use crate::layout::Layout;
use crate::message::{parse_mailbox, parse_mailboxes, Envelope, OutboundMessage};
use crate::report::{ErrorCode, ErrorHandler, TracingErrorHandler};
use crate::sink::{Sink, SinkError, SinkFactory};

/// Lifecycle state of a [`DispatchAppender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppenderState {
    Created,
    Configured,
    Activated,
    /// Terminal.
    Closed,
}

/// Counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppenderStats {
    /// Events accepted into the buffer.
    pub appended: u64,
    /// Events dropped by buffer overflow or shrinking.
    pub evicted: u64,
    /// Successful deliveries.
    pub flushes: u64,
    /// Flushes that failed to build, connect or send.
    pub failed_flushes: u64,
    /// Appends refused because the appender was not usable.
    pub rejected: u64,
}

/// Capability the host logging pipeline drives.
pub trait Appender: Send + Sync {
    fn name(&self) -> String;
    fn activate(&self);
    fn append(&self, event: &dyn EventSource);
    fn close(&self);
}

struct Inner {
    state: AppenderState,
    name: String,
    buffer: CyclicBuffer<Arc<LogEvent>>,
    from: Option<String>,
    to: Option<String>,
    cc: Option<String>,
    bcc: Option<String>,
    reply_to: Option<String>,
    subject: Option<String>,
    location_info: bool,
    send_on_close: bool,
    evaluator: Option<Box<dyn TriggeringEvaluator>>,
    evaluator_name: Option<String>,
    layout: Option<Box<dyn Layout>>,
    credentials: Credentials,
    envelope: Option<Envelope>,
    sink: Option<Box<dyn Sink>>,
    formatter: Formatter,
    error_handler: Arc<dyn ErrorHandler>,
    stats: AppenderStats,
}

/// Buffers events and ships them through a [`Sink`] when a trigger fires.
pub struct DispatchAppender {
    inner: Mutex<Inner>,
    factory: Arc<dyn SinkFactory>,
}

impl fmt::Debug for DispatchAppender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("DispatchAppender")
            .field("name", &inner.name)
            .field("state", &inner.state)
            .field("buffered", &inner.buffer.len())
            .field("capacity", &inner.buffer.capacity())
            .field("evaluator", &inner.evaluator_name)
            .finish()
    }
}

impl DispatchAppender {
    /// Appender with the default `ERROR` threshold evaluator.
    pub fn new<F: SinkFactory + 'static>(factory: F) -> Self {
        Self::with_evaluator(factory, LevelThreshold::default())
    }

    pub fn with_evaluator<F, E>(factory: F, evaluator: E) -> Self
    where
        F: SinkFactory + 'static,
        E: TriggeringEvaluator + 'static,
    {
        let inner = Inner {
            state: AppenderState::Created,
            name: "logmail".into(),
            buffer: CyclicBuffer::new(DEFAULT_BUFFER_SIZE),
            from: None,
            to: None,
            cc: None,
            bcc: None,
            reply_to: None,
            subject: None,
            location_info: false,
            send_on_close: false,
            evaluator: Some(Box::new(evaluator)),
            evaluator_name: Some(DEFAULT_EVALUATOR.into()),
            layout: None,
            credentials: Credentials::default(),
            envelope: None,
            sink: None,
            formatter: Formatter::default(),
            error_handler: Arc::new(TracingErrorHandler),
            stats: AppenderStats::default(),
        };
        Self { inner: Mutex::new(inner), factory: Arc::new(factory) }
    }

    /// Build an appender from configuration, resolving the evaluator through `registry`.
    /// The result still needs [`activate`](Self::activate).
    pub fn from_config<F: SinkFactory + 'static>(
        config: &AppenderConfig,
        factory: F,
        registry: &EvaluatorRegistry,
    ) -> Self {
        let appender = Self::new(factory);
        appender.set_name(config.name.clone());
        appender.set_buffer_size(config.buffer_size);
        if let Some(from) = &config.from {
            appender.set_from(from.clone());
        }
        if let Some(to) = &config.to {
            appender.set_to(to.clone());
        }
        if let Some(cc) = &config.cc {
            appender.set_cc(cc.clone());
        }
        if let Some(bcc) = &config.bcc {
            appender.set_bcc(bcc.clone());
        }
        if let Some(reply_to) = &config.reply_to {
            appender.set_reply_to(reply_to.clone());
        }
        if let Some(subject) = &config.subject {
            appender.set_subject(subject.clone());
        }
        appender.set_location_info(config.location_info);
        appender.set_send_on_close(config.send_on_close);
        appender.set_evaluator_by_name(registry, &config.evaluator, &config.evaluator_options);
        if let Some(layout) = &config.layout {
            appender.set_boxed_layout(layout.build());
        }
        appender.set_credentials(config.credentials.clone());
        appender
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a configuration change unless the appender is already activated or closed.
    fn configure<F: FnOnce(&mut Inner)>(&self, option: &str, apply: F) {
        let mut inner = self.lock();
        match inner.state {
            AppenderState::Created | AppenderState::Configured => {
                apply(&mut inner);
                inner.state = AppenderState::Configured;
            }
            AppenderState::Activated | AppenderState::Closed => {
                let msg = format!(
                    "Option [{}] cannot change once appender [{}] is {:?}.",
                    option, inner.name, inner.state
                );
                inner.error_handler.report(&msg, None, ErrorCode::WriteFailure);
            }
        }
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        self.configure("name", |inner| inner.name = name);
    }

    /// Resize the buffer. Allowed in any state; shrinking keeps the newest events.
    pub fn set_buffer_size(&self, size: usize) {
        let mut inner = self.lock();
        if size == 0 {
            let msg = format!("Buffer size for appender [{}] must be > 0 (got 0).", inner.name);
            inner.error_handler.report(&msg, None, ErrorCode::GenericFailure);
            return;
        }
        inner.buffer.resize(size);
        if inner.state == AppenderState::Created {
            inner.state = AppenderState::Configured;
        }
    }

    pub fn set_from(&self, address: impl Into<String>) {
        let address = address.into();
        self.configure("from", |inner| inner.from = Some(address));
    }

    /// Comma-separated recipient list.
    pub fn set_to(&self, addresses: impl Into<String>) {
        let addresses = addresses.into();
        self.configure("to", |inner| inner.to = Some(addresses));
    }

    pub fn set_cc(&self, addresses: impl Into<String>) {
        let addresses = addresses.into();
        self.configure("cc", |inner| inner.cc = Some(addresses));
    }

    pub fn set_bcc(&self, addresses: impl Into<String>) {
        let addresses = addresses.into();
        self.configure("bcc", |inner| inner.bcc = Some(addresses));
    }

    pub fn set_reply_to(&self, addresses: impl Into<String>) {
        let addresses = addresses.into();
        self.configure("reply_to", |inner| inner.reply_to = Some(addresses));
    }

    /// Subject pattern, rendered against the triggering event.
    pub fn set_subject(&self, subject: impl Into<String>) {
        let subject = subject.into();
        self.configure("subject", |inner| inner.subject = Some(subject));
    }

    pub fn set_location_info(&self, enabled: bool) {
        self.configure("location_info", |inner| inner.location_info = enabled);
    }

    pub fn set_send_on_close(&self, enabled: bool) {
        self.configure("send_on_close", |inner| inner.send_on_close = enabled);
    }

    pub fn set_evaluator<E: TriggeringEvaluator + 'static>(&self, evaluator: E) {
        self.configure("evaluator", |inner| {
            inner.evaluator = Some(Box::new(evaluator));
            inner.evaluator_name = None;
        });
    }

    /// Resolve the evaluator registered as `name`. On failure the evaluator is left unset and
    /// the appender refuses events until a valid one is configured.
    pub fn set_evaluator_by_name(
        &self,
        registry: &EvaluatorRegistry,
        name: &str,
        options: &std::collections::BTreeMap<String, String>,
    ) {
        let created = registry.create(name, options);
        self.configure("evaluator", |inner| match created {
            Ok(evaluator) => {
                inner.evaluator = Some(evaluator);
                inner.evaluator_name = Some(name.to_string());
            }
            Err(err) => {
                inner.evaluator = None;
                inner.evaluator_name = None;
                let msg = format!(
                    "Could not instantiate evaluator [{}] for appender [{}].",
                    name, inner.name
                );
                inner.error_handler.report(&msg, Some(&err), ErrorCode::MissingConfig);
            }
        });
    }

    pub fn set_layout<L: Layout + 'static>(&self, layout: L) {
        self.set_boxed_layout(Box::new(layout));
    }

    pub fn set_boxed_layout(&self, layout: Box<dyn Layout>) {
        self.configure("layout", |inner| inner.layout = Some(layout));
    }

    pub fn set_credentials(&self, credentials: Credentials) {
        self.configure("credentials", |inner| inner.credentials = credentials);
    }

    pub fn set_formatter(&self, formatter: Formatter) {
        self.configure("formatter", |inner| inner.formatter = formatter);
    }

    /// Replace the error handler. Allowed in any state.
    pub fn set_error_handler<H: ErrorHandler + 'static>(&self, handler: H) {
        self.lock().error_handler = Arc::new(handler);
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn state(&self) -> AppenderState {
        self.lock().state
    }

    pub fn buffer_size(&self) -> usize {
        self.lock().buffer.capacity()
    }

    /// Events currently held.
    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn from(&self) -> Option<String> {
        self.lock().from.clone()
    }

    pub fn to(&self) -> Option<String> {
        self.lock().to.clone()
    }

    pub fn cc(&self) -> Option<String> {
        self.lock().cc.clone()
    }

    pub fn bcc(&self) -> Option<String> {
        self.lock().bcc.clone()
    }

    pub fn reply_to(&self) -> Option<String> {
        self.lock().reply_to.clone()
    }

    pub fn subject(&self) -> Option<String> {
        self.lock().subject.clone()
    }

    pub fn location_info(&self) -> bool {
        self.lock().location_info
    }

    pub fn send_on_close(&self) -> bool {
        self.lock().send_on_close
    }

    /// Registry name of the evaluator, if it came from a registry.
    pub fn evaluator_name(&self) -> Option<String> {
        self.lock().evaluator_name.clone()
    }

    /// Address template built at activation.
    pub fn envelope(&self) -> Option<Envelope> {
        self.lock().envelope.clone()
    }

    pub fn stats(&self) -> AppenderStats {
        let inner = self.lock();
        AppenderStats { evicted: inner.buffer.evicted(), ..inner.stats }
    }

    /// Build the sink session and address template and lock in the evaluator.
    pub fn activate(&self) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let handler = inner.error_handler.clone();
        match inner.state {
            AppenderState::Closed => {
                let msg = format!("Appender [{}] is closed and cannot be activated.", inner.name);
                handler.report(&msg, None, ErrorCode::WriteFailure);
                return;
            }
            AppenderState::Activated => {
                debug!(target: "logmail::appender", appender = %inner.name, "already activated");
                return;
            }
            AppenderState::Created | AppenderState::Configured => {}
        }

        match self.factory.create(&inner.credentials) {
            Ok(sink) => inner.sink = Some(sink),
            Err(err) => {
                let msg = format!("Could not create sink session for appender [{}].", inner.name);
                handler.report(&msg, Some(&err), ErrorCode::GenericFailure);
            }
        }

        inner.envelope = Some(build_envelope(inner, handler.as_ref()));

        if let Some(evaluator) = inner.evaluator.as_mut() {
            if let Err(err) = evaluator.activate() {
                let msg = format!("Could not activate evaluator for appender [{}].", inner.name);
                handler.report(&msg, Some(&err), ErrorCode::GenericFailure);
            }
        }

        inner.state = AppenderState::Activated;
        debug!(
            target: "logmail::appender",
            appender = %inner.name,
            capacity = inner.buffer.capacity(),
            sink = inner.sink.is_some(),
            "activated"
        );
    }

    /// Freeze `event` into the buffer and flush if it triggers.
    pub fn append<E: EventSource + ?Sized>(&self, event: &E) {
        self.push(|with_location| LogEvent::freeze(event, with_location));
    }

    /// Same as [`append`](Self::append) for an event that is already a snapshot. Location
    /// info is stripped when disabled.
    pub fn append_event(&self, event: LogEvent) {
        self.push(move |with_location| {
            if with_location {
                event
            } else {
                LogEvent { location: None, ..event }
            }
        });
    }

    fn push<F: FnOnce(bool) -> LogEvent>(&self, freeze: F) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if !check_entry_conditions(inner) {
            inner.stats.rejected += 1;
            return;
        }

        let event = Arc::new(freeze(inner.location_info));
        inner.buffer.add(Arc::clone(&event));
        inner.stats.appended += 1;

        let triggering = inner.evaluator.as_ref().is_some_and(|e| e.is_triggering(&event));
        if triggering {
            send_buffer(inner);
        }
    }

    /// Send whatever is buffered now.
    pub fn flush(&self) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.state != AppenderState::Activated {
            let msg = format!("Appender [{}] is {:?}; flush ignored.", inner.name, inner.state);
            inner.error_handler.report(&msg, None, ErrorCode::WriteFailure);
            return;
        }
        if inner.buffer.is_empty() {
            debug!(target: "logmail::appender", appender = %inner.name, "nothing to flush");
            return;
        }
        send_buffer(inner);
    }

    /// Close the appender, flushing once more if `send_on_close` is set.
    pub fn close(&self) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.state == AppenderState::Closed {
            return;
        }
        inner.state = AppenderState::Closed;
        if inner.send_on_close && !inner.buffer.is_empty() {
            send_buffer(inner);
        }
        debug!(target: "logmail::appender", appender = %inner.name, "closed");
    }
}

impl Appender for DispatchAppender {
    fn name(&self) -> String {
        DispatchAppender::name(self)
    }

    fn activate(&self) {
        DispatchAppender::activate(self)
    }

    fn append(&self, event: &dyn EventSource) {
        DispatchAppender::append(self, event)
    }

    fn close(&self) {
        DispatchAppender::close(self)
    }
}

fn build_envelope(inner: &Inner, handler: &dyn ErrorHandler) -> Envelope {
    let report = |raw: &str, err: &(dyn std::error::Error + 'static)| {
        let msg = format!("Could not parse address [{}].", raw);
        handler.report(&msg, Some(err), ErrorCode::AddressParseFailure);
    };
    let list = |raw: &Option<String>| {
        let raw = raw.as_deref().filter(|s| !s.trim().is_empty())?;
        parse_mailboxes(raw).map_err(|err| report(raw, &err)).ok()
    };
    let from = inner
        .from
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .and_then(|raw| parse_mailbox(raw).map_err(|err| report(raw, &err)).ok());

    Envelope {
        from,
        reply_to: list(&inner.reply_to),
        to: list(&inner.to),
        cc: list(&inner.cc),
        bcc: list(&inner.bcc),
    }
}

fn check_entry_conditions(inner: &Inner) -> bool {
    let missing = if inner.state == AppenderState::Closed {
        let msg = format!("Attempted to append to closed appender [{}].", inner.name);
        inner.error_handler.report(&msg, None, ErrorCode::WriteFailure);
        return false;
    } else if inner.credentials.access_key_id.is_none() {
        "No access key id is configured.".to_string()
    } else if inner.credentials.secret_key.is_none() {
        "No secret key is configured.".to_string()
    } else if inner.envelope.is_none() {
        format!("Message template for appender [{}] not configured; activate it first.", inner.name)
    } else if inner.sink.is_none() {
        format!("No sink session for appender [{}].", inner.name)
    } else if inner.evaluator.is_none() {
        format!("No triggering evaluator is set for appender [{}].", inner.name)
    } else if inner.layout.is_none() {
        format!("No layout set for appender named [{}].", inner.name)
    } else {
        return true;
    };
    inner.error_handler.report(&missing, None, ErrorCode::MissingConfig);
    false
}

/// Format and deliver the buffer. The buffer is drained whether or not delivery succeeds.
fn send_buffer(inner: &mut Inner) {
    let handler = inner.error_handler.clone();
    let Some(layout) = inner.layout.as_deref() else {
        let msg = format!("No layout set for appender named [{}].", inner.name);
        handler.report(&msg, None, ErrorCode::MissingConfig);
        inner.stats.failed_flushes += 1;
        return;
    };

    let count = inner.buffer.len();
    let rendered = inner.formatter.render(inner.buffer.drain(), layout, inner.subject.as_deref());
    let body = inner.formatter.encode_body(&rendered.body, layout.content_type());
    let message = OutboundMessage {
        envelope: inner.envelope.clone().unwrap_or_default(),
        subject: rendered.subject,
        body,
        sent_at: SystemTime::now(),
    };

    let Some(sink) = inner.sink.as_mut() else {
        let msg = format!("No sink session for appender [{}].", inner.name);
        handler.report(&msg, None, ErrorCode::MissingConfig);
        inner.stats.failed_flushes += 1;
        return;
    };

    match deliver(sink.as_mut(), &message) {
        Ok(()) => {
            inner.stats.flushes += 1;
            debug!(
                target: "logmail::appender",
                appender = %inner.name,
                events = count,
                subject = %message.subject,
                "flushed"
            );
            if let Err(err) = sink.close() {
                handler.report("Could not close sink after sending.", Some(&err), ErrorCode::CloseFailure);
            }
        }
        Err(err) => {
            let closed = if sink.is_connected() { sink.close() } else { Ok(()) };
            inner.stats.failed_flushes += 1;
            handler.report(
                "Error occurred while sending e-mail notification.",
                Some(&err),
                ErrorCode::FlushFailure,
            );
            if let Err(err) = closed {
                handler.report(
                    "Could not close sink after a failed send.",
                    Some(&err),
                    ErrorCode::CloseFailure,
                );
            }
        }
    }
}

fn deliver(sink: &mut dyn Sink, message: &OutboundMessage) -> Result<(), SinkError> {
    if !sink.is_connected() {
        sink.connect()?;
    }
    sink.send(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;
    use crate::layout::{PatternLayout, SimpleLayout};
    use crate::report::MemoryErrorHandler;
    use crate::sink::MemorySink;

    fn ready(sink: &MemorySink) -> (DispatchAppender, MemoryErrorHandler) {
        let errors = MemoryErrorHandler::new();
        let appender = DispatchAppender::new(sink.factory());
        appender.set_error_handler(errors.clone());
        appender.set_to("ops@example.com");
        appender.set_from("app@example.com");
        appender.set_subject("[%p] %m");
        appender.set_layout(SimpleLayout);
        appender.set_credentials(Credentials::new("id", "secret"));
        appender.activate();
        (appender, errors)
    }

    fn ev(level: Level, msg: &str) -> LogEvent {
        LogEvent::new(level, "app", msg)
    }

    #[test]
    fn walks_the_lifecycle() {
        let sink = MemorySink::new();
        let appender = DispatchAppender::new(sink.factory());
        assert_eq!(appender.state(), AppenderState::Created);
        appender.set_layout(SimpleLayout);
        assert_eq!(appender.state(), AppenderState::Configured);
        appender.set_credentials(Credentials::new("id", "secret"));
        appender.activate();
        assert_eq!(appender.state(), AppenderState::Activated);
        appender.close();
        assert_eq!(appender.state(), AppenderState::Closed);
        appender.activate();
        assert_eq!(appender.state(), AppenderState::Closed);
    }

    #[test]
    fn below_threshold_events_only_buffer() {
        let sink = MemorySink::new();
        let (appender, errors) = ready(&sink);
        for level in [Level::Debug, Level::Info, Level::Warn] {
            appender.append(&ev(level, "quiet"));
        }
        assert_eq!(appender.buffered(), 3);
        assert!(sink.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn error_event_flushes_once_and_drains() {
        let sink = MemorySink::new();
        let (appender, errors) = ready(&sink);
        appender.append(&ev(Level::Info, "warming up"));
        appender.append(&ev(Level::Error, "disk full"));

        assert_eq!(sink.len(), 1);
        assert_eq!(appender.buffered(), 0);
        let message = &sink.messages()[0];
        assert_eq!(message.subject, "[ERROR] disk full");
        assert!(message.body.content.contains("INFO - warming up"));
        assert!(message.body.content.contains("ERROR - disk full"));
        assert_eq!(message.envelope.to.as_ref().map(|m| m.iter().count()), Some(1));
        assert_eq!(sink.connects(), 1);
        assert_eq!(sink.closes(), 1);
        assert!(errors.is_empty());
        assert_eq!(appender.stats().flushes, 1);
    }

    #[test]
    fn fatal_triggers_too() {
        let sink = MemorySink::new();
        let (appender, _) = ready(&sink);
        appender.append(&ev(Level::Fatal, "abort"));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn append_before_activate_is_reported_noop() {
        let sink = MemorySink::new();
        let errors = MemoryErrorHandler::new();
        let appender = DispatchAppender::new(sink.factory());
        appender.set_error_handler(errors.clone());
        appender.set_layout(SimpleLayout);
        appender.set_credentials(Credentials::new("id", "secret"));

        appender.append(&ev(Level::Error, "too early"));

        assert_eq!(appender.buffered(), 0);
        assert!(sink.is_empty());
        let reports = errors.with_code(ErrorCode::MissingConfig);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].message.contains("activate"));
        assert_eq!(appender.stats().rejected, 1);
    }

    #[test]
    fn missing_credentials_and_layout_fail_closed() {
        let sink = MemorySink::new();
        let errors = MemoryErrorHandler::new();
        let appender = DispatchAppender::new(sink.factory());
        appender.set_error_handler(errors.clone());
        appender.activate();

        appender.append(&ev(Level::Error, "x"));
        assert!(errors.reports()[0].message.contains("access key"));

        let appender = DispatchAppender::new(sink.factory());
        appender.set_error_handler(errors.clone());
        appender.set_credentials(Credentials::new("id", "secret"));
        appender.activate();
        errors.clear();
        appender.append(&ev(Level::Error, "x"));
        assert!(errors.reports()[0].message.contains("No layout"));
        assert!(sink.is_empty());
    }

    #[test]
    fn bad_addresses_are_reported_but_activation_proceeds() {
        let sink = MemorySink::new();
        let errors = MemoryErrorHandler::new();
        let appender = DispatchAppender::new(sink.factory());
        appender.set_error_handler(errors.clone());
        appender.set_to("not an address");
        appender.set_cc("cc@example.com");
        appender.set_layout(SimpleLayout);
        appender.set_credentials(Credentials::new("id", "secret"));
        appender.activate();

        assert_eq!(appender.state(), AppenderState::Activated);
        let parse_errors = errors.with_code(ErrorCode::AddressParseFailure);
        assert_eq!(parse_errors.len(), 1);
        assert!(parse_errors[0].message.contains("not an address"));
        let envelope = appender.envelope().unwrap();
        assert!(envelope.to.is_none());
        assert!(envelope.cc.is_some());

        appender.append(&ev(Level::Error, "still delivered"));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn send_failure_is_reported_and_buffer_is_lost() {
        let sink = MemorySink::new();
        let (appender, errors) = ready(&sink);
        sink.fail_send(true);
        appender.append(&ev(Level::Error, "lost"));

        assert_eq!(appender.buffered(), 0);
        assert!(sink.is_empty());
        assert_eq!(errors.with_code(ErrorCode::FlushFailure).len(), 1);
        assert_eq!(appender.stats().failed_flushes, 1);

        sink.fail_send(false);
        appender.append(&ev(Level::Error, "next"));
        assert_eq!(sink.len(), 1);
        assert!(!sink.messages()[0].body.content.contains("lost"));
    }

    #[test]
    fn close_failure_after_failed_send_is_reported() {
        let sink = MemorySink::new();
        let (appender, errors) = ready(&sink);
        sink.fail_send(true);
        sink.fail_close(true);
        appender.append(&ev(Level::Error, "lost"));

        assert_eq!(errors.with_code(ErrorCode::FlushFailure).len(), 1);
        let closes = errors.with_code(ErrorCode::CloseFailure);
        assert_eq!(closes.len(), 1);
        assert!(closes[0].cause.as_deref().unwrap_or_default().contains("close"));
        assert_eq!(sink.closes(), 1);
        assert_eq!(appender.stats().failed_flushes, 1);
    }

    #[test]
    fn connect_failure_is_reported() {
        let sink = MemorySink::new();
        let (appender, errors) = ready(&sink);
        sink.fail_connect(true);
        appender.append(&ev(Level::Error, "boom"));
        let reports = errors.with_code(ErrorCode::FlushFailure);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].cause.as_deref().unwrap_or_default().contains("connect"));
    }

    #[test]
    fn sink_build_failure_blocks_appends() {
        let errors = MemoryErrorHandler::new();
        let appender = DispatchAppender::new(|_: &Credentials| -> Result<Box<dyn Sink>, SinkError> {
            Err(SinkError::Build("no region".into()))
        });
        appender.set_error_handler(errors.clone());
        appender.set_layout(SimpleLayout);
        appender.set_credentials(Credentials::new("id", "secret"));
        appender.activate();
        assert_eq!(errors.with_code(ErrorCode::GenericFailure).len(), 1);

        appender.append(&ev(Level::Error, "x"));
        assert!(errors.reports().last().unwrap().message.contains("No sink session"));
    }

    #[test]
    fn close_with_send_on_close_flushes_once() {
        let sink = MemorySink::new();
        let (appender, _) = ready(&sink);
        let appender2 = DispatchAppender::new(sink.factory());
        appender2.set_layout(SimpleLayout);
        appender2.set_send_on_close(true);
        appender2.set_credentials(Credentials::new("id", "secret"));
        appender2.activate();
        appender2.append(&ev(Level::Info, "pending"));
        appender2.close();
        appender2.close();
        assert_eq!(sink.len(), 1);
        assert!(sink.messages()[0].body.content.contains("pending"));

        appender.append(&ev(Level::Info, "dropped"));
        appender.close();
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn close_with_empty_buffer_sends_nothing() {
        let sink = MemorySink::new();
        let appender = DispatchAppender::new(sink.factory());
        appender.set_layout(SimpleLayout);
        appender.set_send_on_close(true);
        appender.set_credentials(Credentials::new("id", "secret"));
        appender.activate();
        appender.close();
        assert!(sink.is_empty());
    }

    #[test]
    fn append_after_close_is_rejected() {
        let sink = MemorySink::new();
        let (appender, errors) = ready(&sink);
        appender.close();
        appender.append(&ev(Level::Error, "late"));
        assert_eq!(errors.with_code(ErrorCode::WriteFailure).len(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn setters_after_activation_are_ignored_except_buffer_size() {
        let sink = MemorySink::new();
        let (appender, errors) = ready(&sink);
        appender.set_subject("changed");
        assert_eq!(appender.subject().as_deref(), Some("[%p] %m"));
        assert_eq!(errors.with_code(ErrorCode::WriteFailure).len(), 1);

        for i in 0..5 {
            appender.append(&ev(Level::Info, &format!("e{i}")));
        }
        appender.set_buffer_size(2);
        assert_eq!(appender.buffer_size(), 2);
        assert_eq!(appender.buffered(), 2);
        appender.flush();
        let body = &sink.messages()[0].body.content;
        assert!(body.contains("e3") && body.contains("e4"));
        assert!(!body.contains("e2"));
        assert_eq!(appender.stats().evicted, 3);
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let sink = MemorySink::new();
        let (appender, errors) = ready(&sink);
        appender.set_buffer_size(0);
        assert_eq!(appender.buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn flush_outside_activated_is_reported() {
        let sink = MemorySink::new();
        let errors = MemoryErrorHandler::new();
        let appender = DispatchAppender::new(sink.factory());
        appender.set_error_handler(errors.clone());
        appender.flush();
        assert_eq!(errors.with_code(ErrorCode::WriteFailure).len(), 1);
    }

    #[test]
    fn explicit_flush_of_empty_buffer_sends_nothing() {
        let sink = MemorySink::new();
        let (appender, errors) = ready(&sink);
        appender.flush();
        assert!(sink.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn location_info_is_captured_only_when_enabled() {
        use crate::event::Location;
        let sink = MemorySink::new();
        let located = || {
            ev(Level::Error, "here").with_location(Location {
                file: Some("main.rs".into()),
                line: Some(7),
                function: None,
            })
        };

        let (appender, _) = ready(&sink);
        appender.append(&located());
        assert!(sink.messages()[0].body.content.contains("ERROR - here"));

        let appender = DispatchAppender::new(sink.factory());
        appender.set_layout(PatternLayout::new("%F:%L %m%n"));
        appender.set_location_info(true);
        appender.set_credentials(Credentials::new("id", "secret"));
        appender.activate();
        appender.append(&located());
        assert!(sink.messages()[1].body.content.starts_with("main.rs:7 here"));

        let appender = DispatchAppender::new(sink.factory());
        appender.set_layout(PatternLayout::new("%F:%L %m%n"));
        appender.set_credentials(Credentials::new("id", "secret"));
        appender.activate();
        appender.append_event(located());
        assert!(sink.messages()[2].body.content.starts_with("?:? here"));
    }

    #[test]
    fn unknown_evaluator_name_fails_closed() {
        let sink = MemorySink::new();
        let errors = MemoryErrorHandler::new();
        let appender = DispatchAppender::new(sink.factory());
        appender.set_error_handler(errors.clone());
        appender.set_evaluator_by_name(&EvaluatorRegistry::new(), "nope", &Default::default());
        appender.set_layout(SimpleLayout);
        appender.set_credentials(Credentials::new("id", "secret"));
        appender.activate();
        assert!(appender.evaluator_name().is_none());

        appender.append(&ev(Level::Error, "x"));
        let missing = errors.with_code(ErrorCode::MissingConfig);
        assert_eq!(missing.len(), 2);
        assert!(missing[1].message.contains("evaluator"));
    }

    #[test]
    fn nested_evaluator_is_activated() {
        use crate::evaluator::EvaluatorError;

        struct Armed {
            armed: bool,
        }
        impl TriggeringEvaluator for Armed {
            fn is_triggering(&self, _event: &LogEvent) -> bool {
                self.armed
            }
            fn activate(&mut self) -> Result<(), EvaluatorError> {
                self.armed = true;
                Ok(())
            }
        }

        let sink = MemorySink::new();
        let appender = DispatchAppender::with_evaluator(sink.factory(), Armed { armed: false });
        appender.set_layout(SimpleLayout);
        appender.set_credentials(Credentials::new("id", "secret"));
        appender.activate();
        appender.append(&ev(Level::Trace, "anything"));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn non_ascii_body_goes_out_quoted_printable() {
        let sink = MemorySink::new();
        let (appender, _) = ready(&sink);
        appender.append(&ev(Level::Error, "café fermé"));
        let message = &sink.messages()[0];
        assert_eq!(message.body.content_type, "text/plain; charset=UTF-8");
        assert!(message.body.content.contains("caf=C3=A9"));
        assert!(message.subject.starts_with("=?UTF-8?B?"));
    }
}
