#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use logmail::{Credentials, DispatchAppender, MemoryErrorHandler, MemorySink, SimpleLayout};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

/// Appender wired to `sink`, configured and activated with a simple layout.
pub fn activated_appender(sink: &MemorySink) -> (DispatchAppender, MemoryErrorHandler) {
    let errors = MemoryErrorHandler::new();
    let appender = DispatchAppender::new(sink.factory());
    appender.set_error_handler(errors.clone());
    appender.set_from("App <app@example.com>");
    appender.set_to("ops@example.com");
    appender.set_subject("[%p] %m");
    appender.set_layout(SimpleLayout);
    appender.set_credentials(Credentials::new("key-id", "secret"));
    appender.activate();
    (appender, errors)
}

#[derive(Clone)]
pub struct SharedWriter(pub Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

pub struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a fmt subscriber capturing every log line, and return the captured text.
pub fn capture_logs<F: FnOnce()>(f: F) -> String {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
        .with_target(true)
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .without_time()
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}
