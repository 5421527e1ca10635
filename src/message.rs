//! Outbound message payload handed to a [`Sink`](crate::sink::Sink).

use std::fmt;
use std::time::SystemTime;

use lettre::address::AddressError;
pub use lettre::message::{Mailbox, Mailboxes};

/// Content-transfer-encoding applied to a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    QuotedPrintable,
}

impl TransferEncoding {
    /// Header value (`quoted-printable`).
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferEncoding::QuotedPrintable => "quoted-printable",
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single body part, already encoded for a 7-bit channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPart {
    /// Full `Content-Type` value, including any charset parameter.
    pub content_type: String,
    pub transfer_encoding: Option<TransferEncoding>,
    /// Encoded content; always ASCII.
    pub content: String,
}

/// Address template built once at activation. Fields that failed to parse stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub from: Option<Mailbox>,
    pub reply_to: Option<Mailboxes>,
    pub to: Option<Mailboxes>,
    pub cc: Option<Mailboxes>,
    pub bcc: Option<Mailboxes>,
}

impl Envelope {
    /// All recipients across to/cc/bcc.
    pub fn recipients(&self) -> impl Iterator<Item = &Mailbox> {
        [&self.to, &self.cc, &self.bcc].into_iter().flatten().flat_map(|m| m.iter())
    }

    pub fn has_recipients(&self) -> bool {
        self.recipients().next().is_some()
    }
}

/// Parse a single address such as `Ops <ops@example.com>`.
pub fn parse_mailbox(raw: &str) -> Result<Mailbox, AddressError> {
    raw.trim().parse()
}

/// Parse a comma-separated address list.
pub fn parse_mailboxes(raw: &str) -> Result<Mailboxes, AddressError> {
    raw.trim().parse()
}

/// Fully formatted notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub envelope: Envelope,
    /// Header-safe subject.
    pub subject: String,
    pub body: BodyPart,
    pub sent_at: SystemTime,
}
