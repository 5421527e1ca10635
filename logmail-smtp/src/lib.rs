//! SMTP sink for `logmail`, built on `lettre`.
//!
//! Each flush checks that the relay answers, then opens an SMTP session, sends one message
//! and hangs up. The appender's
//! credentials are used as SMTP login (access key id as user name, secret key as password).
//!
//! ```rust
//! use logmail::DispatchAppender;
//! use logmail_smtp::SmtpSinkFactory;
//!
//! let appender = DispatchAppender::new(SmtpSinkFactory::ses("eu-west-1"));
//! appender.set_from("alerts@example.com");
//! appender.set_to("ops@example.com");
//! ```

use lettre::message::header::{ContentTransferEncoding, ContentType};
use lettre::message::{Body, Message, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{SmtpTransport, Transport};
use logmail::message::{OutboundMessage, TransferEncoding};
use logmail::sink::{Sink, SinkError, SinkFactory};
use logmail::Credentials;

/// Submission port with STARTTLS.
pub const SUBMISSION_PORT: u16 = 587;

/// How the session is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// Implicit TLS (SMTPS).
    Tls,
    /// Plain connection upgraded with STARTTLS.
    StartTls,
    /// No encryption. Only for local relays and tests.
    None,
}

/// Builds an [`SmtpSink`] per activated appender.
#[derive(Debug, Clone)]
pub struct SmtpSinkFactory {
    relay: String,
    port: Option<u16>,
    security: Security,
}

impl SmtpSinkFactory {
    pub fn new<S: Into<String>>(relay: S) -> Self {
        Self { relay: relay.into(), port: None, security: Security::StartTls }
    }

    /// SMTP endpoint of Amazon SES in `region`.
    pub fn ses(region: &str) -> Self {
        Self::new(format!("email-smtp.{}.amazonaws.com", region)).port(SUBMISSION_PORT)
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    pub fn relay(&self) -> &str {
        &self.relay
    }

    fn transport(&self, credentials: &Credentials) -> Result<SmtpTransport, SinkError> {
        let mut builder = match self.security {
            Security::Tls => SmtpTransport::relay(&self.relay),
            Security::StartTls => SmtpTransport::starttls_relay(&self.relay),
            Security::None => Ok(SmtpTransport::builder_dangerous(&self.relay)),
        }
        .map_err(|e| SinkError::Build(e.to_string()))?;

        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let (Some(user), Some(password)) = (&credentials.access_key_id, &credentials.secret_key)
        {
            builder = builder.credentials(SmtpCredentials::new(user.clone(), password.clone()));
        }
        Ok(builder.build())
    }
}

impl SinkFactory for SmtpSinkFactory {
    fn create(&self, credentials: &Credentials) -> Result<Box<dyn Sink>, SinkError> {
        let transport = self.transport(credentials)?;
        tracing::debug!(target: "logmail::smtp", relay = %self.relay, port = ?self.port, "built smtp transport");
        Ok(Box::new(SmtpSink { transport, relay: self.relay.clone(), connected: false }))
    }
}

/// Delivers messages over SMTP.
///
/// `connect` opens a throwaway session to check that the relay answers, so an unreachable
/// relay surfaces as [`SinkError::Connect`]. `send` then opens its own session for the
/// message itself.
pub struct SmtpSink {
    transport: SmtpTransport,
    relay: String,
    connected: bool,
}

impl std::fmt::Debug for SmtpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSink")
            .field("relay", &self.relay)
            .field("connected", &self.connected)
            .finish()
    }
}

impl Sink for SmtpSink {
    fn connect(&mut self) -> Result<(), SinkError> {
        match self.transport.test_connection() {
            Ok(true) => {
                self.connected = true;
                Ok(())
            }
            Ok(false) => Err(SinkError::Connect(format!("{} did not answer NOOP", self.relay))),
            Err(e) => Err(SinkError::Connect(e.to_string())),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, message: &OutboundMessage) -> Result<(), SinkError> {
        if !self.connected {
            return Err(SinkError::Send("sink is not connected".into()));
        }
        let email = to_lettre(message)?;
        let response =
            self.transport.send(&email).map_err(|e| SinkError::Send(e.to_string()))?;
        tracing::debug!(
            target: "logmail::smtp",
            relay = %self.relay,
            code = %response.code(),
            "message accepted"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.connected = false;
        Ok(())
    }
}

/// Convert an outbound message into a `lettre` message. The body is already transfer-encoded
/// and is passed through untouched.
pub fn to_lettre(message: &OutboundMessage) -> Result<Message, SinkError> {
    let envelope = &message.envelope;
    let from = envelope
        .from
        .clone()
        .ok_or_else(|| SinkError::InvalidMessage("no sender address".into()))?;
    if !envelope.has_recipients() {
        return Err(SinkError::InvalidMessage("no recipient addresses".into()));
    }

    let mut builder =
        Message::builder().from(from).subject(message.subject.clone()).date(message.sent_at);
    for mailbox in envelope.reply_to.iter().flat_map(|m| m.iter()) {
        builder = builder.reply_to(mailbox.clone());
    }
    for mailbox in envelope.to.iter().flat_map(|m| m.iter()) {
        builder = builder.to(mailbox.clone());
    }
    for mailbox in envelope.cc.iter().flat_map(|m| m.iter()) {
        builder = builder.cc(mailbox.clone());
    }
    for mailbox in envelope.bcc.iter().flat_map(|m| m.iter()) {
        builder = builder.bcc(mailbox.clone());
    }

    let content_type = ContentType::parse(&message.body.content_type)
        .map_err(|e| SinkError::InvalidMessage(format!("content type: {}", e)))?;
    let encoding = match message.body.transfer_encoding {
        Some(TransferEncoding::QuotedPrintable) => ContentTransferEncoding::QuotedPrintable,
        None => ContentTransferEncoding::SevenBit,
    };
    let body = Body::dangerous_pre_encoded(message.body.content.clone().into_bytes(), encoding);
    let part = SinglePart::builder().header(content_type).body(body);

    builder.singlepart(part).map_err(|e| SinkError::InvalidMessage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use logmail::message::{parse_mailbox, parse_mailboxes, BodyPart, Envelope};
    use std::time::SystemTime;

    fn outbound(transfer_encoding: Option<TransferEncoding>, content: &str) -> OutboundMessage {
        OutboundMessage {
            envelope: Envelope {
                from: Some(parse_mailbox("App <app@example.com>").unwrap()),
                to: Some(parse_mailboxes("ops@example.com, dev@example.com").unwrap()),
                bcc: Some(parse_mailboxes("audit@example.com").unwrap()),
                ..Envelope::default()
            },
            subject: "[ERROR] disk full".into(),
            body: BodyPart {
                content_type: "text/plain".into(),
                transfer_encoding,
                content: content.into(),
            },
            sent_at: SystemTime::now(),
        }
    }

    #[test]
    fn converts_headers_and_body() {
        let email = to_lettre(&outbound(None, "ERROR - disk full\r\n")).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject: [ERROR] disk full"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("Content-Transfer-Encoding: 7bit"));
        assert!(raw.contains("ERROR - disk full"));
        assert_eq!(email.envelope().to().len(), 3);
    }

    #[test]
    fn quoted_printable_body_passes_through() {
        let mut message = outbound(Some(TransferEncoding::QuotedPrintable), "caf=C3=A9\r\n");
        message.body.content_type = "text/plain; charset=UTF-8".into();
        let raw = String::from_utf8(to_lettre(&message).unwrap().formatted()).unwrap();
        assert!(raw.contains("Content-Transfer-Encoding: quoted-printable"));
        assert!(raw.contains("caf=C3=A9"));
    }

    #[test]
    fn missing_sender_or_recipients_is_invalid() {
        let mut message = outbound(None, "x");
        message.envelope.from = None;
        assert!(matches!(to_lettre(&message), Err(SinkError::InvalidMessage(_))));

        let mut message = outbound(None, "x");
        message.envelope.to = None;
        message.envelope.bcc = None;
        assert!(matches!(to_lettre(&message), Err(SinkError::InvalidMessage(_))));
    }

    #[test]
    fn ses_factory_points_at_regional_endpoint() {
        let factory = SmtpSinkFactory::ses("us-east-1");
        assert_eq!(factory.relay(), "email-smtp.us-east-1.amazonaws.com");
        assert_eq!(factory.port, Some(SUBMISSION_PORT));
    }

    #[test]
    fn plain_factory_builds_without_network() {
        let factory = SmtpSinkFactory::new("localhost").port(2525).security(Security::None);
        let mut sink = factory.create(&Credentials::new("user", "pass")).unwrap();
        assert!(!sink.is_connected());
        sink.close().unwrap();
        assert!(!sink.is_connected());
    }

    #[test]
    fn send_requires_a_connection() {
        let factory = SmtpSinkFactory::new("localhost").security(Security::None);
        let mut sink = factory.create(&Credentials::default()).unwrap();
        assert!(matches!(sink.send(&outbound(None, "x")), Err(SinkError::Send(_))));
    }
}
