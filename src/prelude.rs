//! Convenient re-exports for wiring up an appender.
pub use crate::{
    appender::{Appender, DispatchAppender},
    config::{AppenderConfig, Credentials},
    evaluator::{EvaluatorRegistry, LevelThreshold, TriggeringEvaluator},
    event::{EventSource, Level, LogEvent},
    layout::{Layout, PatternLayout, SimpleLayout},
    report::{ErrorCode, ErrorHandler},
    sink::{Sink, SinkError, SinkFactory},
};

#[cfg(feature = "tracing-layer")]
pub use crate::layer::DispatchLayer;
