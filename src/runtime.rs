//! Session host runtime
//!
//! One host per user. It owns the generation counter, the transcript, the
//! shared typewriter and the voice controller, and runs exactly one query
//! session at a time. Every asynchronous event is tagged with the generation
//! it was produced for; a mismatch means the event is discarded.

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::{HostOptions, SessionHost};

use crate::state_machine::SessionState;
use crate::typewriter::Reveal;
use crate::voice::VoiceStart;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry; immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only, in-memory conversation history
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, role: Role, text: impl Into<String>) -> Message {
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            created_at: Utc::now(),
        };
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        message
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Updates broadcast to observers (the terminal renderer, tests)
#[derive(Debug, Clone)]
pub enum HostUpdate {
    Message(Message),
    StateChange {
        generation: u64,
        state: SessionState,
    },
    Progress {
        generation: u64,
        message: String,
    },
    Notice {
        text: String,
    },
    /// An event for a superseded session was dropped
    StaleDiscarded {
        generation: u64,
    },
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("session host has stopped")]
    Stopped,
}

/// Requests from the handle to the host loop
#[derive(Debug)]
pub(crate) enum Command {
    Submit { text: String },
    SubmitVoiceInput,
    StartVoice { reply: oneshot::Sender<VoiceStart> },
    StopVoice { reply: oneshot::Sender<bool> },
    Shutdown,
}

/// Handle to interact with a running session host
pub struct HostHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    broadcast_tx: broadcast::Sender<HostUpdate>,
    reveal_rx: watch::Receiver<Reveal>,
    voice_input_rx: watch::Receiver<String>,
    transcript: Transcript,
    task: tokio::task::JoinHandle<()>,
}

impl HostHandle {
    /// Ask a question; empty or whitespace-only text is ignored by the host
    pub fn submit(&self, text: impl Into<String>) -> Result<(), HostError> {
        self.send(Command::Submit { text: text.into() })
    }

    /// Submit whatever the voice capture has written to the input buffer
    pub fn submit_voice_input(&self) -> Result<(), HostError> {
        self.send(Command::SubmitVoiceInput)
    }

    pub async fn start_voice(&self) -> Result<VoiceStart, HostError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StartVoice { reply })?;
        rx.await.map_err(|_| HostError::Stopped)
    }

    pub async fn stop_voice(&self) -> Result<bool, HostError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StopVoice { reply })?;
        rx.await.map_err(|_| HostError::Stopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostUpdate> {
        self.broadcast_tx.subscribe()
    }

    /// Typewriter display
    pub fn reveal(&self) -> watch::Receiver<Reveal> {
        self.reveal_rx.clone()
    }

    /// Voice capture input buffer
    pub fn voice_input(&self) -> watch::Receiver<String> {
        self.voice_input_rx.clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.transcript.snapshot()
    }

    /// Stop the host and wait for its loop to exit
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Session host task failed");
        }
    }

    fn send(&self, command: Command) -> Result<(), HostError> {
        self.command_tx
            .send(command)
            .map_err(|_| HostError::Stopped)
    }
}
