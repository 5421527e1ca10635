//! Delivery sinks.
//!
//! A [`Sink`] is the external transport that accepts a fully formatted message. The
//! appender opens it lazily per flush and closes it after each send. Sinks are built at
//! activation time by a [`SinkFactory`] from the configured credentials.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::Credentials;
use crate::message::OutboundMessage;

/// Errors surfaced by sinks.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The sink session could not be constructed.
    #[error("failed to build sink: {0}")]
    Build(String),
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("failed to send message: {0}")]
    Send(String),
    #[error("failed to close connection: {0}")]
    Close(String),
    /// The message could not be converted to the transport's representation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// External delivery mechanism.
pub trait Sink: Send {
    fn connect(&mut self) -> Result<(), SinkError>;
    fn is_connected(&self) -> bool;
    fn send(&mut self, message: &OutboundMessage) -> Result<(), SinkError>;
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Builds a sink session from credentials.
pub trait SinkFactory: Send + Sync {
    fn create(&self, credentials: &Credentials) -> Result<Box<dyn Sink>, SinkError>;
}

impl<F> SinkFactory for F
where
    F: Fn(&Credentials) -> Result<Box<dyn Sink>, SinkError> + Send + Sync,
{
    fn create(&self, credentials: &Credentials) -> Result<Box<dyn Sink>, SinkError> {
        self(credentials)
    }
}

/// A sink that discards every message.
#[derive(Clone, Debug, Default)]
pub struct NullSink {
    connected: bool,
}

impl Sink for NullSink {
    fn connect(&mut self) -> Result<(), SinkError> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, _message: &OutboundMessage) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.connected = false;
        Ok(())
    }
}

/// A sink that logs each message using the `tracing` crate.
#[derive(Clone, Debug, Default)]
pub struct LogSink {
    connected: bool,
}

impl Sink for LogSink {
    fn connect(&mut self) -> Result<(), SinkError> {
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, message: &OutboundMessage) -> Result<(), SinkError> {
        let to: Vec<String> = message.envelope.recipients().map(|m| m.to_string()).collect();
        tracing::info!(
            target: "logmail::sink",
            subject = %message.subject,
            to = ?to,
            content_type = %message.body.content_type,
            bytes = message.body.content.len(),
            "outbound_message"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.connected = false;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemorySinkState {
    messages: Mutex<Vec<OutboundMessage>>,
    connects: AtomicU64,
    closes: AtomicU64,
    fail_connect: AtomicBool,
    fail_send: AtomicBool,
    fail_close: AtomicBool,
}

/// A sink that stores messages in memory.
///
/// Clones share storage, so a test can keep one handle while the appender owns another.
/// Connect, send and close failures can be injected.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    state: Arc<MemorySinkState>,
    connected: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.state.messages.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.state.messages.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.state.messages.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Number of successful `connect` calls.
    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::Relaxed)
    }

    /// Number of `close` calls.
    pub fn closes(&self) -> u64 {
        self.state.closes.load(Ordering::Relaxed)
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::Relaxed);
    }

    pub fn fail_send(&self, fail: bool) {
        self.state.fail_send.store(fail, Ordering::Relaxed);
    }

    pub fn fail_close(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::Relaxed);
    }

    /// Factory handing out clones of this sink, for wiring into an appender.
    pub fn factory(&self) -> impl SinkFactory + 'static {
        let sink = self.clone();
        move |_: &Credentials| -> Result<Box<dyn Sink>, SinkError> { Ok(Box::new(sink.clone())) }
    }
}

impl Sink for MemorySink {
    fn connect(&mut self) -> Result<(), SinkError> {
        if self.state.fail_connect.load(Ordering::Relaxed) {
            return Err(SinkError::Connect("injected connect failure".into()));
        }
        self.state.connects.fetch_add(1, Ordering::Relaxed);
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, message: &OutboundMessage) -> Result<(), SinkError> {
        if !self.connected {
            return Err(SinkError::Send("not connected".into()));
        }
        if self.state.fail_send.load(Ordering::Relaxed) {
            return Err(SinkError::Send("injected send failure".into()));
        }
        self.state.messages.lock().unwrap_or_else(PoisonError::into_inner).push(message.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.state.closes.fetch_add(1, Ordering::Relaxed);
        self.connected = false;
        if self.state.fail_close.load(Ordering::Relaxed) {
            return Err(SinkError::Close("injected close failure".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for dyn Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<sink connected={}>", self.is_connected())
    }
}
