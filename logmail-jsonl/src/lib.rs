//! JSONL sink for `logmail`. Appends one notification per line.
//! Bring your own path; the file is opened on connect and released on close.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use logmail::message::OutboundMessage;
use logmail::sink::{Sink, SinkError, SinkFactory};
use logmail::Credentials;
use serde_json::json;

#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: Option<File>,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into(), file: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Factory that opens a fresh sink on `path` for every activated appender.
    pub fn factory<P: Into<PathBuf>>(path: P) -> impl SinkFactory + 'static {
        let path = path.into();
        move |_: &Credentials| -> Result<Box<dyn Sink>, SinkError> {
            Ok(Box::new(JsonlSink::new(path.clone())))
        }
    }
}

impl Sink for JsonlSink {
    fn connect(&mut self) -> Result<(), SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SinkError::Connect(format!("{}: {}", self.path.display(), e)))?;
        self.file = Some(file);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.file.is_some()
    }

    fn send(&mut self, message: &OutboundMessage) -> Result<(), SinkError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SinkError::Send("sink is not connected".into()))?;
        let line = message_to_json(message).to_string() + "\n";
        file.write_all(line.as_bytes())?;
        file.flush()?;
        tracing::debug!(target: "logmail::jsonl", path = %self.path.display(), bytes = line.len(), "wrote message");
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|e: io::Error| SinkError::Close(e.to_string()))?;
        }
        Ok(())
    }
}

fn message_to_json(message: &OutboundMessage) -> serde_json::Value {
    let list = |m: &Option<logmail::message::Mailboxes>| -> Vec<String> {
        m.iter().flat_map(|boxes| boxes.iter().map(|b| b.to_string())).collect()
    };
    let envelope = &message.envelope;
    let sent_at: DateTime<Utc> = message.sent_at.into();
    json!({
        "sent_at": sent_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        "from": envelope.from.as_ref().map(|m| m.to_string()),
        "reply_to": list(&envelope.reply_to),
        "to": list(&envelope.to),
        "cc": list(&envelope.cc),
        "bcc": list(&envelope.bcc),
        "subject": message.subject,
        "content_type": message.body.content_type,
        "transfer_encoding": message.body.transfer_encoding.map(|e| e.as_str()),
        "body": message.body.content,
    })
}
