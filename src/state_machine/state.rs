//! Query session state types

use crate::accumulator::ChunkAccumulator;
use serde::{Deserialize, Serialize};

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Stream completed normally
    Answered,
    /// Stream failed before any chunk; the fallback request answered
    Recovered,
    /// Stream failed after partial text was shown
    Interrupted,
    /// Stream and fallback both failed
    Unavailable,
}

/// Lifecycle of one user question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing submitted yet for this generation
    #[default]
    Idle,

    /// Stream channel open, chunks accumulating
    Streaming { received: ChunkAccumulator },

    /// Final assistant message is being committed
    Completing { outcome: Outcome },

    /// Stream failed with zero chunks; single-shot request in flight
    FallingBack,

    /// Final message committed
    Terminal { outcome: Outcome },
}

impl SessionState {
    /// Stream or fallback still in flight
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Streaming { .. } | SessionState::FallingBack
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminal { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Streaming { .. } => "streaming",
            SessionState::Completing { .. } => "completing",
            SessionState::FallingBack => "falling_back",
            SessionState::Terminal { .. } => "terminal",
        }
    }
}
