//! Backend client
//!
//! Two ways of asking the policy backend a question: a streaming channel that
//! delivers partial answer text as it is produced, and a single-shot fallback
//! request used when the channel dies before producing anything.

mod decoder;
mod error;
mod fallback;
mod stream;
pub mod wire;


pub use error::ClientError;
pub use fallback::HttpFallbackRequester;
pub use stream::HttpStreamChannel;
pub use wire::{Location, QueryContext, ResultPayload, StreamEvent};

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The single listener a channel delivers its events to, in transport order
pub type StreamListener = Box<dyn Fn(StreamEvent) + Send + Sync>;

/// Opens real-time answer channels
pub trait StreamTransport: Send + Sync {
    /// Open a channel for one query. Events go to `listener` until the
    /// returned handle is closed or the transport ends.
    fn open(&self, context: &QueryContext, listener: StreamListener) -> ChannelHandle;
}

/// Single-shot request/response fallback
#[async_trait]
pub trait FallbackRequester: Send + Sync {
    /// One attempt, no retry
    async fn request(&self, context: &QueryContext) -> Result<ResultPayload, ClientError>;
}

/// Owner's handle on an open channel
#[derive(Debug)]
pub struct ChannelHandle {
    cancel: CancellationToken,
}

impl ChannelHandle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Stop delivering events. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

impl<T: StreamTransport + ?Sized> StreamTransport for Arc<T> {
    fn open(&self, context: &QueryContext, listener: StreamListener) -> ChannelHandle {
        (**self).open(context, listener)
    }
}

#[async_trait]
impl<T: FallbackRequester + ?Sized> FallbackRequester for Arc<T> {
    async fn request(&self, context: &QueryContext) -> Result<ResultPayload, ClientError> {
        (**self).request(context).await
    }
}

/// Logging wrapper for fallback requesters
pub struct LoggingRequester<F> {
    inner: F,
}

impl<F: FallbackRequester> LoggingRequester<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<F: FallbackRequester> FallbackRequester for LoggingRequester<F> {
    async fn request(&self, context: &QueryContext) -> Result<ResultPayload, ClientError> {
        let start = std::time::Instant::now();
        let result = self.inner.request(context).await;
        let duration = start.elapsed();

        match &result {
            Ok(payload) => {
                tracing::info!(
                    duration_ms = %duration.as_millis(),
                    confidence = payload.confidence,
                    sources = payload.sources.len(),
                    intent = ?payload.intent_type,
                    "Fallback request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = e.kind.label(),
                    "Fallback request failed"
                );
            }
        }

        result
    }
}
