#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # logmail
//!
//! A buffering log appender that turns bursts of log events into e-mail notifications.
//!
//! Events are kept in a bounded cyclic buffer. When a triggering evaluator fires (by
//! default on `ERROR` and above) the whole buffer is rendered through a layout into one
//! message and handed to a delivery [`Sink`]. The message subject comes from the most
//! interesting event in the burst.
//!
//! ## Features
//!
//! - **Bounded buffering** that keeps the newest events and counts evictions
//! - **Pluggable triggers** through [`TriggeringEvaluator`] and a named [`EvaluatorRegistry`]
//! - **Pattern layouts** with log4j-style conversions
//! - **Header-safe subjects** (RFC 2047) and quoted-printable bodies with a lossy fallback
//! - **Non-throwing reporting**: every failure is routed to an [`ErrorHandler`]
//! - **`tracing` integration** via [`DispatchLayer`] (feature `tracing-layer`)
//! - **`tower` integration** via [`AppenderService`]
//!
//! ## Quick Start
//!
//! ```rust
//! use logmail::{Credentials, DispatchAppender, Level, LogEvent, MemorySink, PatternLayout};
//!
//! let sink = MemorySink::new();
//! let appender = DispatchAppender::new(sink.factory());
//! appender.set_to("ops@example.com");
//! appender.set_subject("[%p] %m");
//! appender.set_layout(PatternLayout::new("%-5p %c - %m%n"));
//! appender.set_credentials(Credentials::new("key-id", "secret"));
//! appender.activate();
//!
//! appender.append(&LogEvent::new(Level::Info, "app", "starting"));
//! appender.append(&LogEvent::new(Level::Error, "app", "disk full"));
//!
//! assert_eq!(sink.len(), 1);
//! assert_eq!(sink.messages()[0].subject, "[ERROR] disk full");
//! ```

pub mod appender;
pub mod buffer;
pub mod config;
pub mod evaluator;
pub mod event;
pub mod formatter;
#[cfg(feature = "tracing-layer")]
pub mod layer;
pub mod layout;
pub mod message;
pub mod prelude;
pub mod report;
pub mod service;
pub mod sink;

// Re-exports
pub use appender::{Appender, AppenderState, AppenderStats, DispatchAppender};
pub use buffer::CyclicBuffer;
pub use config::{AppenderConfig, ConfigError, Credentials, LayoutConfig};
pub use evaluator::{EvaluatorError, EvaluatorRegistry, LevelThreshold, TriggeringEvaluator};
pub use event::{EventSource, Level, Location, LogEvent};
pub use formatter::{BodyEncoder, EncodeError, Formatter, QuotedPrintable, RenderedMessage};
#[cfg(feature = "tracing-layer")]
pub use layer::DispatchLayer;
pub use layout::{Layout, PatternLayout, SimpleLayout};
pub use message::{BodyPart, Envelope, OutboundMessage, TransferEncoding};
pub use report::{
    ErrorCode, ErrorHandler, MemoryErrorHandler, OnlyOnceErrorHandler, TracingErrorHandler,
};
pub use service::AppenderService;
pub use sink::{LogSink, MemorySink, NullSink, Sink, SinkError, SinkFactory};
