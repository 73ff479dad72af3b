//! Server-sent-event stream for the live log view.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use futures::{Stream, StreamExt};

use crate::deploy::{DeployContext, LogRecord};

/// Comment text sent when no record arrived within the poll interval.
pub const HEARTBEAT: &str = "heartbeat";

/// One item of the live log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFrame {
    Record(LogRecord),
    Heartbeat,
}

impl LogFrame {
    /// `data: <json>` for a record, `: heartbeat` otherwise.
    pub fn into_event(self) -> Event {
        match self {
            LogFrame::Record(record) => Event::default().json_data(&record).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "dropping unserializable log record");
                heartbeat()
            }),
            LogFrame::Heartbeat => heartbeat(),
        }
    }
}

fn heartbeat() -> Event {
    Event::default().comment(HEARTBEAT)
}

/// Endless stream drained from the context's log bus, one heartbeat per idle
/// poll interval.
pub fn log_frames(
    ctx: Arc<DeployContext>,
    poll_interval: Duration,
) -> impl Stream<Item = LogFrame> + Send + 'static {
    futures::stream::unfold(ctx, move |ctx| async move {
        let frame = match ctx.bus.consume(poll_interval).await {
            Some(record) => LogFrame::Record(record),
            None => LogFrame::Heartbeat,
        };
        Some((frame, ctx))
    })
}

/// [`log_frames`] as events ready for [`axum::response::sse::Sse`].
pub fn log_events(
    ctx: Arc<DeployContext>,
    poll_interval: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    log_frames(ctx, poll_interval).map(|frame| Ok(frame.into_event()))
}
