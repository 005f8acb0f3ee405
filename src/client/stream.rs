//! HTTP streaming channel

use super::decoder::FrameDecoder;
use super::wire::{QueryContext, StreamEvent};
use super::{ChannelHandle, ClientError, StreamListener, StreamTransport};
use crate::config::ClientConfig;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STREAM_PATH: &str = "/api/stream_query";

/// Opens `GET /api/stream_query` and forwards its frames as events
pub struct HttpStreamChannel {
    client: Client,
    base_url: String,
    idle_timeout: Duration,
}

impl HttpStreamChannel {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        // No total timeout: the answer may legitimately stream for a long time.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            idle_timeout: config.stream_idle_timeout,
        })
    }

    /// Full channel URL with the question and location encoded as parameters
    pub fn stream_url(&self, context: &QueryContext) -> Result<Url, ClientError> {
        Url::parse_with_params(
            &format!("{}{STREAM_PATH}", self.base_url),
            context.stream_params(),
        )
        .map_err(|e| ClientError::malformed(format!("invalid stream URL: {e}")))
    }
}

impl StreamTransport for HttpStreamChannel {
    fn open(&self, context: &QueryContext, listener: StreamListener) -> ChannelHandle {
        let cancel = CancellationToken::new();
        let handle = ChannelHandle::new(cancel.clone());

        let url = match self.stream_url(context) {
            Ok(url) => url,
            Err(e) => {
                listener(StreamEvent::Error { message: e.message });
                return handle;
            }
        };

        let request = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream");
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            let response = tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::debug!("Stream channel closed before connecting");
                    return;
                }

                response = tokio::time::timeout(idle_timeout, request.send()) => response,
            };

            let response = match response {
                Err(_) => {
                    tracing::warn!(timeout = ?idle_timeout, "Stream endpoint sent no response");
                    fail(&listener, &cancel, idle_message(idle_timeout), PumpEnd::Idle);
                    return;
                }
                Ok(Err(e)) => {
                    let e = ClientError::from(e);
                    tracing::warn!(
                        error = %e.message,
                        kind = e.kind.label(),
                        "Stream connection failed"
                    );
                    fail(&listener, &cancel, e.message, PumpEnd::Disconnected);
                    return;
                }
                Ok(Ok(response)) => response,
            };

            if !response.status().is_success() {
                let status = response.status().as_u16();
                // The body only adds detail, so a stalled body still ends in an error
                let body = tokio::time::timeout(idle_timeout, response.text())
                    .await
                    .ok()
                    .and_then(Result::ok)
                    .unwrap_or_default();
                let e = ClientError::status(status, &body);
                tracing::warn!(status, "Stream endpoint rejected request");
                fail(&listener, &cancel, e.message, PumpEnd::Disconnected);
                return;
            }

            let end = pump(response.bytes_stream(), &listener, &cancel, idle_timeout).await;
            tracing::debug!(end = ?end, "Stream channel finished");
        });

        handle
    }
}

/// Why a channel stopped delivering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpEnd {
    Terminal,
    Closed,
    Disconnected,
    Idle,
}

/// Decode `body` and deliver events in order until a terminal frame, close,
/// or transport end. Transport failures become exactly one `Error` event.
pub(crate) async fn pump<S, B, E>(
    body: S,
    listener: &StreamListener,
    cancel: &CancellationToken,
    idle_timeout: Duration,
) -> PumpEnd
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = FrameDecoder::new();

    loop {
        let next = tokio::select! {
            biased;

            () = cancel.cancelled() => return PumpEnd::Closed,

            next = tokio::time::timeout(idle_timeout, body.next()) => next,
        };

        match next {
            Err(_) => {
                tracing::warn!(timeout = ?idle_timeout, "Stream idle timeout");
                return fail(listener, cancel, idle_message(idle_timeout), PumpEnd::Idle);
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(error = %e, "Stream transport error");
                return fail(listener, cancel, e.to_string(), PumpEnd::Disconnected);
            }
            Ok(Some(Ok(bytes))) => {
                for event in decoder.push(bytes.as_ref()) {
                    if deliver(event, listener, cancel) {
                        return if cancel.is_cancelled() {
                            PumpEnd::Closed
                        } else {
                            PumpEnd::Terminal
                        };
                    }
                }
            }
            Ok(None) => {
                if let Some(event) = decoder.finish() {
                    if deliver(event, listener, cancel) {
                        return if cancel.is_cancelled() {
                            PumpEnd::Closed
                        } else {
                            PumpEnd::Terminal
                        };
                    }
                }
                return fail(
                    listener,
                    cancel,
                    "stream ended before a terminal event".to_string(),
                    PumpEnd::Disconnected,
                );
            }
        }
    }
}

fn idle_message(idle_timeout: Duration) -> String {
    format!("no data received for {idle_timeout:?}")
}

/// Deliver the channel's single `Error` unless it has been closed
fn fail(
    listener: &StreamListener,
    cancel: &CancellationToken,
    message: String,
    end: PumpEnd,
) -> PumpEnd {
    if cancel.is_cancelled() {
        return PumpEnd::Closed;
    }
    listener(StreamEvent::Error { message });
    end
}

/// Returns true when delivery must stop
fn deliver(event: StreamEvent, listener: &StreamListener, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    let terminal = event.is_terminal();
    listener(event);
    terminal
}
