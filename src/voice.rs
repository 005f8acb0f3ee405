//! Voice capture
//!
//! Wraps an external speech-to-text capability into single-shot capture
//! sessions that write transcripts into the input buffer.

use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const UNSUPPORTED_NOTICE: &str = "当前环境不支持语音输入";

/// Event emitted by a speech capability during one capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    Transcript { text: String, is_final: bool },
    Failed { message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VoiceError {
    #[error("speech capture not supported")]
    Unsupported,
    #[error("speech capture failed: {0}")]
    Capture(String),
}

/// External speech-to-text capability
pub trait SpeechCapability: Send + Sync {
    /// Begin one recognition attempt in `locale`; events arrive on the receiver
    fn start(&self, locale: &str) -> Result<mpsc::Receiver<SpeechEvent>, VoiceError>;

    fn stop(&self);
}

/// Result of asking for a capture to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStart {
    Started,
    AlreadyActive,
    Unsupported,
    Failed,
}

/// Receives user-visible notices
pub type NoticeSink = Arc<dyn Fn(String) + Send + Sync>;

struct Capture {
    id: Uuid,
    cancel: CancellationToken,
}

/// At most one capture at a time; transcripts overwrite the input buffer
pub struct VoiceCaptureController {
    capability: Option<Arc<dyn SpeechCapability>>,
    locale: String,
    active: Arc<Mutex<Option<Capture>>>,
    input: Arc<watch::Sender<String>>,
    notices: NoticeSink,
}

impl VoiceCaptureController {
    pub fn new(
        capability: Option<Arc<dyn SpeechCapability>>,
        locale: impl Into<String>,
        notices: NoticeSink,
    ) -> Self {
        let (input, _) = watch::channel(String::new());
        Self {
            capability,
            locale: locale.into(),
            active: Arc::new(Mutex::new(None)),
            input: Arc::new(input),
            notices,
        }
    }

    pub fn input(&self) -> watch::Receiver<String> {
        self.input.subscribe()
    }

    /// Take the buffered transcript, leaving the buffer empty
    pub fn take_input(&self) -> String {
        self.input.send_replace(String::new())
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn start(&self) -> VoiceStart {
        let Some(capability) = &self.capability else {
            tracing::info!("Voice capture requested without a speech capability");
            (self.notices)(UNSUPPORTED_NOTICE.to_string());
            return VoiceStart::Unsupported;
        };

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return VoiceStart::AlreadyActive;
        }

        let events = match capability.start(&self.locale) {
            Ok(events) => events,
            Err(VoiceError::Unsupported) => {
                (self.notices)(UNSUPPORTED_NOTICE.to_string());
                return VoiceStart::Unsupported;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Speech capture failed to start");
                (self.notices)(format!("语音识别启动失败：{e}"));
                return VoiceStart::Failed;
            }
        };

        let capture = Capture {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        };
        tracing::info!(capture_id = %capture.id, locale = %self.locale, "Voice capture started");

        tokio::spawn(pump_transcripts(
            capture.id,
            events,
            capture.cancel.clone(),
            Arc::clone(capability),
            self.active.clone(),
            self.input.clone(),
            self.notices.clone(),
        ));
        *active = Some(capture);
        VoiceStart::Started
    }

    /// Stop the active capture; returns whether one was running
    pub fn stop(&self) -> bool {
        let capture = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(capture) = capture else {
            return false;
        };
        capture.cancel.cancel();
        if let Some(capability) = &self.capability {
            capability.stop();
        }
        tracing::info!(capture_id = %capture.id, "Voice capture stopped");
        true
    }
}

impl Drop for VoiceCaptureController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Forward one capture's transcripts until it ends, fails or is stopped
async fn pump_transcripts(
    id: Uuid,
    mut events: mpsc::Receiver<SpeechEvent>,
    cancel: CancellationToken,
    capability: Arc<dyn SpeechCapability>,
    active: Arc<Mutex<Option<Capture>>>,
    input: Arc<watch::Sender<String>>,
    notices: NoticeSink,
) {
    loop {
        let event = tokio::select! {
            biased;

            () = cancel.cancelled() => return,

            event = events.recv() => event,
        };

        let mut guard = active.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().map(|c| c.id) != Some(id) {
            tracing::debug!(capture_id = %id, "Dropping event from stopped capture");
            return;
        }

        match event {
            Some(SpeechEvent::Transcript { text, is_final }) => {
                input.send_replace(text);
                if is_final {
                    guard.take();
                    capability.stop();
                    tracing::info!(capture_id = %id, "Voice capture finished");
                    return;
                }
            }
            Some(SpeechEvent::Failed { message }) => {
                guard.take();
                capability.stop();
                tracing::warn!(capture_id = %id, error = %message, "Voice capture failed");
                notices(format!("语音识别失败：{message}"));
                return;
            }
            None => {
                guard.take();
                tracing::info!(capture_id = %id, "Speech capability closed the capture");
                return;
            }
        }
    }
}
