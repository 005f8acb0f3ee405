//! Events that can occur during a query session

use crate::client::wire::{ProgressStage, ResultPayload, StreamEvent};

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // User events
    Submitted {
        question: String,
    },

    // Stream channel events
    Chunk {
        content: String,
    },
    Progress {
        stage: ProgressStage,
        message: String,
    },
    StreamComplete {
        result: ResultPayload,
    },
    StreamError {
        message: String,
    },

    // Fallback events
    FallbackSucceeded {
        result: ResultPayload,
    },
    FallbackFailed {
        message: String,
    },

    /// The assistant message was appended to the transcript
    Committed,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Submitted { .. } => "submitted",
            Event::Chunk { .. } => "chunk",
            Event::Progress { .. } => "progress",
            Event::StreamComplete { .. } => "stream_complete",
            Event::StreamError { .. } => "stream_error",
            Event::FallbackSucceeded { .. } => "fallback_succeeded",
            Event::FallbackFailed { .. } => "fallback_failed",
            Event::Committed => "committed",
        }
    }
}

impl From<StreamEvent> for Event {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Chunk { content } => Event::Chunk { content },
            StreamEvent::Complete { result } => Event::StreamComplete { result },
            StreamEvent::Error { message } => Event::StreamError { message },
            StreamEvent::Progress { stage, message } => Event::Progress { stage, message },
        }
    }
}
