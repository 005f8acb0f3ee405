//! Mock implementations for testing
//!
//! These mocks drive the session host without real I/O.

use super::{HostHandle, HostOptions, HostUpdate, Message, SessionHost};
use crate::client::{
    ChannelHandle, ClientError, FallbackRequester, Location, QueryContext, ResultPayload,
    StreamEvent, StreamListener, StreamTransport,
};
use crate::state_machine::SessionState;
use crate::voice::SpeechCapability;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Stream Transport
// ============================================================================

struct OpenedChannel {
    listener: StreamListener,
    cancel: CancellationToken,
}

/// Stream transport that replays scripted events, or holds the listener so a
/// test can emit events by hand
#[derive(Default)]
pub struct MockStreamTransport {
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    channels: Mutex<Vec<OpenedChannel>>,
    /// Record of every query a channel was opened for
    pub opened: Mutex<Vec<QueryContext>>,
    /// Notified each time a channel opens
    pub channel_opened: Arc<Notify>,
}

#[allow(dead_code)]
impl MockStreamTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the events delivered to the next opened channel
    pub fn queue_script(&self, events: Vec<StreamEvent>) {
        self.scripts.lock().unwrap().push_back(events);
    }

    /// Deliver an event on channel `index`, closed or not. A real transport
    /// may still be draining after close.
    pub fn emit(&self, index: usize, event: StreamEvent) {
        let channels = self.channels.lock().unwrap();
        (channels[index].listener)(event);
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.channels.lock().unwrap()[index].cancel.is_cancelled()
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    pub fn recorded_contexts(&self) -> Vec<QueryContext> {
        self.opened.lock().unwrap().clone()
    }
}

impl StreamTransport for MockStreamTransport {
    fn open(&self, context: &QueryContext, listener: StreamListener) -> ChannelHandle {
        self.opened.lock().unwrap().push(context.clone());

        if let Some(script) = self.scripts.lock().unwrap().pop_front() {
            for event in script {
                listener(event);
            }
        }

        let cancel = CancellationToken::new();
        self.channels.lock().unwrap().push(OpenedChannel {
            listener,
            cancel: cancel.clone(),
        });
        self.channel_opened.notify_one();
        ChannelHandle::new(cancel)
    }
}

// ============================================================================
// Mock Fallback Requester
// ============================================================================

/// Fallback requester that returns queued results
#[derive(Default)]
pub struct MockFallback {
    responses: Mutex<VecDeque<Result<ResultPayload, ClientError>>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<QueryContext>>,
}

#[allow(dead_code)]
impl MockFallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_response(&self, payload: ResultPayload) {
        self.responses.lock().unwrap().push_back(Ok(payload));
    }

    pub fn queue_error(&self, error: ClientError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next(&self) -> Result<ResultPayload, ClientError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::network("No mock response queued")))
    }
}

#[async_trait]
impl FallbackRequester for MockFallback {
    async fn request(&self, context: &QueryContext) -> Result<ResultPayload, ClientError> {
        self.requests.lock().unwrap().push(context.clone());
        self.next()
    }
}

/// Fallback requester that holds each request until the test opens the gate
pub struct GatedFallback {
    inner: MockFallback,
    /// Notified when a request starts
    pub request_started: Arc<Notify>,
    /// Each `notify_one` releases one pending request
    pub gate: Arc<Notify>,
}

impl GatedFallback {
    pub fn new() -> Self {
        Self {
            inner: MockFallback::new(),
            request_started: Arc::new(Notify::new()),
            gate: Arc::new(Notify::new()),
        }
    }

    pub fn queue_response(&self, payload: ResultPayload) {
        self.inner.queue_response(payload);
    }

    pub fn request_count(&self) -> usize {
        self.inner.request_count()
    }
}

#[async_trait]
impl FallbackRequester for GatedFallback {
    async fn request(&self, context: &QueryContext) -> Result<ResultPayload, ClientError> {
        self.inner.requests.lock().unwrap().push(context.clone());
        self.request_started.notify_one();
        self.gate.notified().await;
        self.inner.next()
    }
}

// ============================================================================
// Test Host
// ============================================================================

/// Session host wired to mocks, with an update subscription
pub struct TestHost<F: FallbackRequester + 'static> {
    pub handle: HostHandle,
    pub updates: broadcast::Receiver<HostUpdate>,
    pub transport: Arc<MockStreamTransport>,
    pub fallback: Arc<F>,
}

pub struct TestHostBuilder<F> {
    transport: Arc<MockStreamTransport>,
    fallback: Arc<F>,
    location: Option<Location>,
    speech: Option<Arc<dyn SpeechCapability>>,
}

impl TestHost<MockFallback> {
    pub fn builder() -> TestHostBuilder<MockFallback> {
        TestHostBuilder {
            transport: Arc::new(MockStreamTransport::new()),
            fallback: Arc::new(MockFallback::new()),
            location: Some(Location::new("山东省", "济南市", None)),
            speech: None,
        }
    }
}

#[allow(dead_code)]
impl<F: FallbackRequester + 'static> TestHostBuilder<F> {
    pub fn transport(mut self, transport: Arc<MockStreamTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn fallback<G: FallbackRequester + 'static>(self, fallback: Arc<G>) -> TestHostBuilder<G> {
        TestHostBuilder {
            transport: self.transport,
            fallback,
            location: self.location,
            speech: self.speech,
        }
    }

    pub fn location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    pub fn speech(mut self, speech: Arc<dyn SpeechCapability>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn build(self) -> TestHost<F> {
        let options = HostOptions {
            location: self.location,
            typewriter_interval: Duration::from_millis(1),
            speech: self.speech,
            voice_locale: "zh-CN".to_string(),
        };
        let handle = SessionHost::spawn(self.transport.clone(), self.fallback.clone(), options);
        let updates = handle.subscribe();
        TestHost {
            handle,
            updates,
            transport: self.transport,
            fallback: self.fallback,
        }
    }
}

#[allow(dead_code)]
impl<F: FallbackRequester + 'static> TestHost<F> {
    pub fn submit(&self, text: &str) {
        self.handle.submit(text).expect("host stopped");
    }

    /// Wait until a session of `generation` reaches a terminal state
    pub async fn wait_for_terminal(
        &mut self,
        generation: u64,
        timeout: Duration,
    ) -> Option<SessionState> {
        self.wait_for_state(generation, SessionState::is_terminal, timeout)
            .await
    }

    pub async fn wait_for_state(
        &mut self,
        generation: u64,
        matches: impl Fn(&SessionState) -> bool,
        timeout: Duration,
    ) -> Option<SessionState> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.updates.recv()).await {
                Ok(Ok(HostUpdate::StateChange {
                    generation: g,
                    state,
                })) if g == generation && matches(&state) => return Some(state),
                _ => continue,
            }
        }
        None
    }

    /// Wait until an event for `generation` has been discarded as stale
    pub async fn wait_for_stale(&mut self, generation: u64, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.updates.recv()).await {
                Ok(Ok(HostUpdate::StaleDiscarded { generation: g })) if g == generation => {
                    return true;
                }
                _ => continue,
            }
        }
        false
    }

    pub async fn wait_for_notice(&mut self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.updates.recv()).await {
                Ok(Ok(HostUpdate::Notice { text })) => return Some(text),
                _ => continue,
            }
        }
        None
    }

    pub fn messages(&self) -> Vec<Message> {
        self.handle.messages()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::wire::SourceRef;
    use crate::runtime::Role;
    use crate::state_machine::transition::{FAILURE_NOTICE, UNAVAILABLE_NOTICE};
    use crate::state_machine::Outcome;
    use crate::voice::{SpeechEvent, VoiceError, VoiceStart, UNSUPPORTED_NOTICE};
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(2);

    fn chunk(content: &str) -> StreamEvent {
        StreamEvent::Chunk {
            content: content.to_string(),
        }
    }

    fn stream_error(message: &str) -> StreamEvent {
        StreamEvent::Error {
            message: message.to_string(),
        }
    }

    fn scenario_a_payload() -> ResultPayload {
        ResultPayload::new(
            "根据政策，补贴比例为10%。",
            0.92,
            vec![SourceRef {
                source: "细则.pdf".to_string(),
                similarity: 0.95,
            }],
        )
    }

    fn assistant_messages(messages: &[Message]) -> Vec<&Message> {
        messages.iter().filter(|m| m.role == Role::Assistant).collect()
    }

    #[tokio::test]
    async fn test_mock_fallback_queue() {
        let fallback = MockFallback::new();
        fallback.queue_response(ResultPayload::new("a", 1.0, vec![]));
        let ctx = QueryContext::new("q", None).unwrap();

        assert_eq!(fallback.request(&ctx).await.unwrap().answer, "a");
        assert!(fallback.request(&ctx).await.is_err());
        assert_eq!(fallback.request_count(), 2);
    }

    /// Scenario A: two chunks then complete
    #[tokio::test]
    async fn test_stream_answer_with_sources() {
        let mut host = TestHost::builder().build();
        host.transport.queue_script(vec![
            chunk("根据政策，"),
            chunk("补贴比例为10%。"),
            StreamEvent::Complete {
                result: scenario_a_payload(),
            },
        ]);

        host.submit("济南市家电以旧换新补贴标准是多少？");
        let state = host.wait_for_terminal(1, WAIT).await;
        assert_eq!(
            state,
            Some(SessionState::Terminal {
                outcome: Outcome::Answered
            })
        );

        let messages = host.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text, "济南市家电以旧换新补贴标准是多少？");

        let answer = &messages[1].text;
        assert!(answer.contains("根据政策，补贴比例为10%。"));
        assert!(answer.contains("92%"));
        assert!(answer.contains("细则.pdf"));
        assert!(answer.contains("95%"));

        assert_eq!(host.fallback.request_count(), 0);
        assert!(host.transport.is_closed(0));

        let contexts = host.transport.recorded_contexts();
        assert_eq!(
            contexts[0].location().and_then(|l| l.city.as_deref()),
            Some("济南市")
        );
    }

    /// Scenario B: immediate error, fallback answers
    #[tokio::test]
    async fn test_error_before_chunks_uses_fallback() {
        let mut host = TestHost::builder().build();
        host.transport
            .queue_script(vec![stream_error("connection refused")]);
        host.fallback
            .queue_response(ResultPayload::new("购买¥3000冰箱补贴¥300", 1.0, vec![]));

        host.submit("冰箱补贴多少？");
        let state = host.wait_for_terminal(1, WAIT).await;
        assert_eq!(
            state,
            Some(SessionState::Terminal {
                outcome: Outcome::Recovered
            })
        );

        let messages = host.messages();
        let answers = assistant_messages(&messages);
        assert_eq!(answers.len(), 1);
        assert!(answers[0].text.contains("购买¥3000冰箱补贴¥300"));
        assert!(answers[0].text.contains("100%"));
        assert!(!answers[0].text.contains("【参考来源】"));

        let requests = host.fallback.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].question(), "冰箱补贴多少？");
    }

    /// Scenario C: one chunk then error, no fallback
    #[tokio::test]
    async fn test_error_after_chunk_is_terminal() {
        let mut host = TestHost::builder().build();
        host.transport.queue_script(vec![
            chunk("根据"),
            stream_error("stream ended before a terminal event"),
        ]);

        host.submit("补贴标准？");
        let state = host.wait_for_terminal(1, WAIT).await;
        assert_eq!(
            state,
            Some(SessionState::Terminal {
                outcome: Outcome::Interrupted
            })
        );

        let messages = host.messages();
        let answers = assistant_messages(&messages);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].text, FAILURE_NOTICE);
        assert_eq!(host.fallback.request_count(), 0);
        assert_eq!(host.transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_fallback_failure_reports_unavailable() {
        let mut host = TestHost::builder().build();
        host.transport.queue_script(vec![stream_error("502")]);
        host.fallback
            .queue_error(ClientError::timeout("request timed out"));

        host.submit("问题");
        host.wait_for_terminal(1, WAIT).await.unwrap();

        let messages = host.messages();
        assert_eq!(assistant_messages(&messages)[0].text, UNAVAILABLE_NOTICE);
    }

    #[tokio::test]
    async fn test_empty_submission_is_ignored() {
        let mut host = TestHost::builder().build();
        host.submit("");
        host.submit("   \n\t");

        assert!(host.wait_for_state(1, |_| true, Duration::from_millis(200)).await.is_none());
        assert!(host.messages().is_empty());
        assert_eq!(host.transport.open_count(), 0);
        assert_eq!(host.fallback.request_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_stream_error_single_fallback() {
        let mut host = TestHost::builder().build();
        host.transport
            .queue_script(vec![stream_error("first"), stream_error("second")]);
        host.fallback
            .queue_response(ResultPayload::new("答", 0.5, vec![]));

        host.submit("问题");
        host.wait_for_terminal(1, WAIT).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(host.fallback.request_count(), 1);
        assert_eq!(assistant_messages(&host.messages()).len(), 1);
    }

    /// Events for query A arriving after B started never touch the transcript
    /// or the typewriter display
    #[tokio::test]
    async fn test_superseded_stream_events_are_discarded() {
        let mut host = TestHost::builder().build();
        let opened = host.transport.channel_opened.clone();

        host.submit("问题A");
        opened.notified().await;
        host.transport.emit(0, chunk("A的部分"));

        host.submit("问题B");
        opened.notified().await;
        assert!(host.transport.is_closed(0));
        let reveal = host.handle.reveal();
        let cleared = reveal.borrow().clone();
        assert_eq!(cleared.text, "");

        host.transport.emit(0, chunk("A的迟到内容"));
        host.transport.emit(
            0,
            StreamEvent::Complete {
                result: ResultPayload::new("A的答案", 0.9, vec![]),
            },
        );
        assert!(host.wait_for_stale(1, WAIT).await);
        assert!(host.wait_for_stale(1, WAIT).await);
        // Longer than many ticks of the 1 ms test typewriter
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*reveal.borrow(), cleared);

        host.transport.emit(1, chunk("B的回答"));
        host.transport.emit(
            1,
            StreamEvent::Complete {
                result: ResultPayload::new("B的回答", 0.8, vec![]),
            },
        );
        host.wait_for_terminal(2, WAIT).await.unwrap();

        let messages = host.messages();
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[0], "问题A");
        assert_eq!(texts[1], "问题B");
        assert!(texts[2].starts_with("B的回答"));
        assert!(!texts.iter().any(|t| t.contains("A的")));
    }

    /// A fallback still racing when a new query starts is discarded on arrival
    #[tokio::test]
    async fn test_stale_fallback_result_is_discarded() {
        let fallback = Arc::new(GatedFallback::new());
        fallback.queue_response(ResultPayload::new("过期的回答", 1.0, vec![]));
        let mut host = TestHost::builder().fallback(fallback.clone()).build();
        let opened = host.transport.channel_opened.clone();

        host.submit("问题A");
        opened.notified().await;
        host.transport.emit(0, stream_error("reset"));
        fallback.request_started.notified().await;

        host.submit("问题B");
        opened.notified().await;

        fallback.gate.notify_one();
        assert!(host.wait_for_stale(1, WAIT).await);

        host.transport.emit(
            1,
            StreamEvent::Complete {
                result: ResultPayload::new("新的回答", 0.9, vec![]),
            },
        );
        host.wait_for_terminal(2, WAIT).await.unwrap();

        let messages = host.messages();
        let answers = assistant_messages(&messages);
        assert_eq!(answers.len(), 1);
        assert!(answers[0].text.starts_with("新的回答"));
        assert_eq!(fallback.request_count(), 1);
    }

    #[tokio::test]
    async fn test_chunks_drive_typewriter() {
        let host = TestHost::builder().build();
        let opened = host.transport.channel_opened.clone();
        let mut reveal = host.handle.reveal();

        host.submit("问题");
        opened.notified().await;
        host.transport.emit(0, chunk("根据政策，"));
        host.transport.emit(0, chunk("补贴10%"));

        let target = "根据政策，补贴10%";
        tokio::time::timeout(WAIT, async {
            loop {
                reveal.changed().await.unwrap();
                let current = reveal.borrow_and_update().clone();
                assert!(target.starts_with(&current.text));
                if current.done && current.text == target {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_progress_is_published() {
        let mut host = TestHost::builder().build();
        host.transport.queue_script(vec![StreamEvent::Progress {
            stage: crate::client::wire::ProgressStage::Retrieval,
            message: "正在检索政策文件".to_string(),
        }]);

        host.submit("问题");
        let progress = tokio::time::timeout(WAIT, async {
            loop {
                if let Ok(HostUpdate::Progress {
                    generation,
                    message,
                }) = host.updates.recv().await
                {
                    return (generation, message);
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(progress, (1, "正在检索政策文件".to_string()));
    }

    #[tokio::test]
    async fn test_query_without_location() {
        let mut host = TestHost::builder().location(None).build();
        host.transport.queue_script(vec![StreamEvent::Complete {
            result: ResultPayload::new("答", 0.5, vec![]),
        }]);

        host.submit("问题");
        host.wait_for_terminal(1, WAIT).await.unwrap();
        assert!(host.transport.recorded_contexts()[0].location().is_none());
    }

    // ------------------------------------------------------------------------
    // Voice
    // ------------------------------------------------------------------------

    #[derive(Default)]
    struct ScriptedSpeech {
        transcripts: Mutex<Vec<SpeechEvent>>,
    }

    impl SpeechCapability for ScriptedSpeech {
        fn start(&self, _locale: &str) -> Result<mpsc::Receiver<SpeechEvent>, VoiceError> {
            let (tx, rx) = mpsc::channel(8);
            for event in self.transcripts.lock().unwrap().drain(..) {
                tx.try_send(event).unwrap();
            }
            Ok(rx)
        }

        fn stop(&self) {}
    }

    #[tokio::test]
    async fn test_voice_unsupported_notice() {
        let mut host = TestHost::builder().build();
        let outcome = host.handle.start_voice().await.unwrap();
        assert_eq!(outcome, VoiceStart::Unsupported);
        assert_eq!(host.wait_for_notice(WAIT).await.as_deref(), Some(UNSUPPORTED_NOTICE));
    }

    #[tokio::test]
    async fn test_voice_transcript_submission() {
        let speech = Arc::new(ScriptedSpeech::default());
        speech.transcripts.lock().unwrap().push(SpeechEvent::Transcript {
            text: "冰箱补贴多少".to_string(),
            is_final: true,
        });
        let mut host = TestHost::builder().speech(speech).build();
        host.transport.queue_script(vec![StreamEvent::Complete {
            result: ResultPayload::new("补贴300元", 0.9, vec![]),
        }]);

        let mut input = host.handle.voice_input();
        assert_eq!(host.handle.start_voice().await.unwrap(), VoiceStart::Started);
        tokio::time::timeout(WAIT, input.wait_for(|text| text == "冰箱补贴多少"))
            .await
            .unwrap()
            .unwrap();

        host.handle.submit_voice_input().unwrap();
        host.wait_for_terminal(1, WAIT).await.unwrap();
        assert_eq!(host.messages()[0].text, "冰箱补贴多少");
        assert_eq!(*host.handle.voice_input().borrow(), "");
    }

    #[tokio::test]
    async fn test_shutdown_stops_host() {
        let host = TestHost::builder().build();
        let transport = host.transport.clone();
        host.handle.shutdown().await;
        assert_eq!(transport.open_count(), 0);
    }
}
