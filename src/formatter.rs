//! Turns buffered events into a subject line and an encoded body.
//!
//! Semantics:
//! - The body is the layout header, each event's formatted line (plus its trace lines when the
//!   layout ignores throwables), then the layout footer.
//! - The subject is rendered from the first event that carries a trace, or from the last
//!   event if none does. Only the first qualifying event counts. With no events the subject
//!   template itself is used.
//! - Subjects with non-ASCII text become RFC 2047 encoded words; ASCII passes through.
//! - Bodies with non-ASCII text are quoted-printable encoded with a UTF-8 charset. If that
//!   fails, every non-ASCII byte becomes `?` and the body is sent as plain ASCII.
//!
//! Invariant: body encoding never fails; the worst case is a lossy but deliverable body.

use std::borrow::Borrow;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::event::LogEvent;
use crate::layout::{Layout, PatternLayout, LINE_SEP};
use crate::message::{BodyPart, TransferEncoding};

/// Subject pattern used when no template is configured.
pub const DEFAULT_SUBJECT_PATTERN: &str = "%m";

/// Longest run of source bytes packed into one encoded word (60 base64 characters, which
/// keeps each word within the 75 character limit).
const ENCODED_WORD_BYTES: usize = 45;

/// Subject and body produced by one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Body encoding failure.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("encoded body is not valid text: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("body encoding failed: {0}")]
    Other(String),
}

/// Transfer-encodes a non-ASCII body into ASCII.
pub trait BodyEncoder: Send + Sync {
    fn encoding(&self) -> TransferEncoding;
    fn encode(&self, body: &str) -> Result<String, EncodeError>;
}

/// Quoted-printable over UTF-8 bytes, with line breaks normalized to CRLF.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuotedPrintable;

impl BodyEncoder for QuotedPrintable {
    fn encoding(&self) -> TransferEncoding {
        TransferEncoding::QuotedPrintable
    }

    fn encode(&self, body: &str) -> Result<String, EncodeError> {
        let normalized = normalize_line_breaks(body);
        let encoded = quoted_printable::encode(normalized.as_bytes());
        Ok(String::from_utf8(encoded)?)
    }
}

/// Renders and encodes notification content.
pub struct Formatter {
    encoder: Box<dyn BodyEncoder>,
}

impl std::fmt::Debug for Formatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Formatter").field("encoding", &self.encoder.encoding()).finish()
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(QuotedPrintable)
    }
}

impl Formatter {
    pub fn new<E: BodyEncoder + 'static>(encoder: E) -> Self {
        Self { encoder: Box::new(encoder) }
    }

    /// Render `events` (oldest first) into a subject and body.
    pub fn render<I>(
        &self,
        events: I,
        layout: &dyn Layout,
        subject_template: Option<&str>,
    ) -> RenderedMessage
    where
        I: IntoIterator,
        I::Item: Borrow<LogEvent>,
    {
        let subject_layout =
            PatternLayout::new(subject_template.unwrap_or(DEFAULT_SUBJECT_PATTERN));
        let mut body = String::new();
        if let Some(header) = layout.header() {
            body.push_str(&header);
        }

        let mut subject: Option<String> = None;
        let mut events = events.into_iter().peekable();
        while let Some(item) = events.next() {
            let event = item.borrow();
            body.push_str(&layout.format(event));
            if layout.ignores_throwable() {
                if let Some(lines) = &event.throwable {
                    for line in lines {
                        body.push_str(line);
                        body.push_str(LINE_SEP);
                    }
                }
            }
            let is_last = events.peek().is_none();
            if subject.is_none() && (is_last || event.has_throwable()) {
                subject = Some(encode_subject(&subject_layout.format(event)));
            }
        }

        if let Some(footer) = layout.footer() {
            body.push_str(&footer);
        }

        let subject =
            subject.unwrap_or_else(|| encode_subject(subject_template.unwrap_or_default()));
        RenderedMessage { subject, body }
    }

    /// Choose the body representation for `body`.
    pub fn encode_body(&self, body: &str, content_type: &str) -> BodyPart {
        if body.is_ascii() {
            return BodyPart {
                content_type: content_type.to_string(),
                transfer_encoding: None,
                content: body.to_string(),
            };
        }
        match self.encoder.encode(body) {
            Ok(content) if content.is_ascii() => BodyPart {
                content_type: format!("{}; charset=UTF-8", content_type),
                transfer_encoding: Some(self.encoder.encoding()),
                content,
            },
            Ok(_) => {
                tracing::warn!(target: "logmail::formatter", "encoder produced non-ASCII output; substituting");
                lossy_part(body, content_type)
            }
            Err(err) => {
                tracing::warn!(target: "logmail::formatter", error = %err, "body encoding failed; substituting");
                lossy_part(body, content_type)
            }
        }
    }
}

fn lossy_part(body: &str, content_type: &str) -> BodyPart {
    BodyPart {
        content_type: content_type.to_string(),
        transfer_encoding: None,
        content: lossy_ascii(body),
    }
}

/// Replace every byte >= 0x80 with `?`.
pub fn lossy_ascii(body: &str) -> String {
    body.bytes().map(|b| if b >= 0x80 { '?' } else { b as char }).collect()
}

/// Make `text` safe for a mail header. ASCII passes through unchanged; anything else becomes
/// a sequence of `=?UTF-8?B?...?=` encoded words split on character boundaries.
pub fn encode_subject(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }
    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (idx, ch) in text.char_indices() {
        let next = idx + ch.len_utf8();
        if next - start > ENCODED_WORD_BYTES && end > start {
            words.push(encoded_word(&text[start..end]));
            start = end;
        }
        end = next;
    }
    if end > start {
        words.push(encoded_word(&text[start..end]));
    }
    words.join(" ")
}

fn encoded_word(chunk: &str) -> String {
    format!("=?UTF-8?B?{}?=", STANDARD.encode(chunk.as_bytes()))
}

fn normalize_line_breaks(body: &str) -> String {
    let mut out = String::with_capacity(body.len() + body.len() / 32);
    let mut prev_cr = false;
    for ch in body.chars() {
        if ch == '\n' && !prev_cr {
            out.push('\r');
        }
        out.push(ch);
        prev_cr = ch == '\r';
    }
    out
}
