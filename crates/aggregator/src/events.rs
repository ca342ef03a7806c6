//! Structured event stream. The aggregator stays decoupled from any UI:
//! events go into an unbounded channel the caller may render as progress
//! bars or discard entirely; a dropped receiver never blocks aggregation.

use serde::Serialize;

use git::{GitOp, ProgressReporter};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregateEvent {
    GitOperationStarted {
        url: String,
        op: String,
    },
    GitOperationProgress {
        url: String,
        op: String,
        percent: u8,
    },
    GitOperationCompleted {
        url: String,
        op: String,
        success: bool,
    },
    /// A source's patterns selected no refs; informational, not an error.
    NoRefsMatched {
        url: String,
        branches: Vec<String>,
        tags: Vec<String>,
    },
    /// A source's start-path patterns matched nothing at this ref.
    NoStartPathsFound {
        url: String,
        refname: String,
        patterns: Vec<String>,
    },
}

pub type EventSink = tokio::sync::mpsc::UnboundedSender<AggregateEvent>;

pub(crate) fn emit(sink: Option<&EventSink>, event: AggregateEvent) {
    if let Some(sink) = sink {
        let _ = sink.send(event);
    }
}

/// Bridges the git crate's progress callbacks onto the event stream.
pub(crate) struct SinkReporter {
    sink: EventSink,
}

impl SinkReporter {
    pub(crate) fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

impl ProgressReporter for SinkReporter {
    fn started(&self, url: &str, op: GitOp) {
        let _ = self.sink.send(AggregateEvent::GitOperationStarted {
            url: url.to_string(),
            op: op.to_string(),
        });
    }

    fn progress(&self, url: &str, op: GitOp, percent: u8) {
        let _ = self.sink.send(AggregateEvent::GitOperationProgress {
            url: url.to_string(),
            op: op.to_string(),
            percent,
        });
    }

    fn completed(&self, url: &str, op: GitOp, success: bool) {
        let _ = self.sink.send(AggregateEvent::GitOperationCompleted {
            url: url.to_string(),
            op: op.to_string(),
            success,
        });
    }
}
