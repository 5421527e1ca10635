//! `tower` adapter so an appender can sit behind any `Service<LogEvent>` pipeline.
//!
//! The call completes synchronously: the event is appended (and possibly flushed) before
//! the returned future resolves. Delivery problems go to the appender's error handler, so
//! the service itself never fails.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{ready, Ready};
use tower_service::Service;

use crate::appender::DispatchAppender;
use crate::event::LogEvent;

/// Shares one [`DispatchAppender`] across cloned service handles.
#[derive(Clone, Debug)]
pub struct AppenderService {
    appender: Arc<DispatchAppender>,
}

impl AppenderService {
    pub fn new(appender: Arc<DispatchAppender>) -> Self {
        Self { appender }
    }

    pub fn appender(&self) -> &Arc<DispatchAppender> {
        &self.appender
    }
}

impl From<DispatchAppender> for AppenderService {
    fn from(appender: DispatchAppender) -> Self {
        Self::new(Arc::new(appender))
    }
}

impl Service<LogEvent> for AppenderService {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: LogEvent) -> Self::Future {
        self.appender.append_event(event);
        ready(Ok(()))
    }
}
