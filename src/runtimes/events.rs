//! Step events: the engine's per-session progress stream.
//!
//! `execute` and `resume` hand the caller an [`ExecutionStream`] while a
//! background task drives the graph; every node boundary, pause, and
//! terminal outcome is reported as a [`StepEvent`]. Events flow through a
//! bounded flume channel: the driver awaits capacity for step boundaries
//! (a slow consumer applies backpressure) while in-node progress messages
//! are best-effort, and a dropped consumer never errors the engine.

use flume::r#async::RecvStream;
use flume::{Receiver, Sender};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::ledger::BudgetPeriod;
use crate::state::ErrorInfo;

/// Default bound for a session's event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// One observable step in a workflow session's execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    /// The driver picked up the session and is about to run a node.
    Started { session_id: String, node: String },
    /// A node finished and its output was recorded.
    NodeCompleted {
        session_id: String,
        node: String,
        step: u64,
        /// Cost in USD billed for this node's invocations.
        cost: f64,
    },
    /// Free-form progress message emitted from inside a node.
    NodeMessage {
        node: String,
        step: u64,
        scope: String,
        message: String,
    },
    /// A budget period crossed its throttle threshold; execution continues.
    BudgetThrottled {
        session_id: String,
        period: BudgetPeriod,
        usage_ratio: f64,
    },
    /// Execution paused before an interrupt node; `resume` continues it.
    WaitingApproval { session_id: String, node: String },
    /// The graph is exhausted and the session is complete.
    Completed { session_id: String, step: u64 },
    /// The session failed; the structured error is also on the state.
    Failed {
        session_id: String,
        node: Option<String>,
        error: ErrorInfo,
    },
    /// The session was cancelled by the caller.
    Cancelled { session_id: String },
}

impl StepEvent {
    /// Whether this event ends the stream (the driver emits nothing
    /// after a terminal or pause event).
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            StepEvent::WaitingApproval { .. }
                | StepEvent::Completed { .. }
                | StepEvent::Failed { .. }
                | StepEvent::Cancelled { .. }
        )
    }
}

/// Cloneable sending half of a session's event channel.
///
/// A dropped [`ExecutionStream`] never propagates an error into the
/// engine; `emit` additionally tolerates a full buffer.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    sender: Sender<StepEvent>,
}

impl EventEmitter {
    /// Create a bounded channel and the emitter/stream pair over it.
    #[must_use]
    pub fn channel(buffer: usize) -> (EventEmitter, ExecutionStream) {
        let (sender, receiver) = flume::bounded(buffer);
        (EventEmitter { sender }, ExecutionStream::new(receiver))
    }

    /// Emit an event, dropping it if the consumer is full or gone.
    pub fn emit(&self, event: StepEvent) {
        if let Err(err) = self.sender.try_send(event) {
            tracing::trace!(?err, "step event dropped");
        }
    }

    /// Emit an event, awaiting channel capacity. Used by the driver task
    /// so a slow consumer applies backpressure instead of losing step
    /// boundaries; a dropped consumer is still not an error.
    pub async fn send(&self, event: StepEvent) {
        if self.sender.send_async(event).await.is_err() {
            tracing::trace!("step event consumer gone");
        }
    }

    /// Emit a node-scoped progress message.
    pub fn node_message(
        &self,
        node: &str,
        step: u64,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.emit(StepEvent::NodeMessage {
            node: node.to_string(),
            step,
            scope: scope.into(),
            message: message.into(),
        });
    }
}

/// Receiving half of a session's event channel.
///
/// Implements [`Stream`]; ends when the driver task drops its emitter.
pub struct ExecutionStream {
    inner: RecvStream<'static, StepEvent>,
}

impl fmt::Debug for ExecutionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionStream").finish_non_exhaustive()
    }
}

impl ExecutionStream {
    fn new(receiver: Receiver<StepEvent>) -> Self {
        Self {
            inner: receiver.into_stream(),
        }
    }

    /// Await the next event, or `None` once the driver is done.
    pub async fn next_event(&mut self) -> Option<StepEvent> {
        use futures_util::StreamExt;
        self.inner.next().await
    }

    /// Drain the stream to completion, collecting every event.
    pub async fn collect_events(mut self) -> Vec<StepEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }
}

impl Stream for ExecutionStream {
    type Item = StepEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_flow_in_order() {
        let (emitter, mut stream) = EventEmitter::channel(8);
        emitter.emit(StepEvent::Started {
            session_id: "s1".into(),
            node: "gather".into(),
        });
        emitter.node_message("gather", 1, "progress", "fetching");
        drop(emitter);

        assert!(matches!(
            stream.next_event().await,
            Some(StepEvent::Started { .. })
        ));
        assert!(matches!(
            stream.next_event().await,
            Some(StepEvent::NodeMessage { ref scope, .. }) if scope == "progress"
        ));
        assert_eq!(stream.next_event().await, None);
    }

    #[test]
    fn stream_formats_for_diagnostics() {
        let (_emitter, stream) = EventEmitter::channel(1);
        assert!(format!("{stream:?}").contains("ExecutionStream"));
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        let (emitter, stream) = EventEmitter::channel(1);
        emitter.node_message("a", 1, "x", "first");
        emitter.node_message("a", 1, "x", "dropped");
        drop(emitter);
        let events = stream.collect_events().await;
        assert_eq!(events.len(), 1);
    }
}
