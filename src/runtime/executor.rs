//! Session host executor

use super::{Command, HostHandle, HostUpdate, Role, Transcript};
use crate::client::{
    ChannelHandle, FallbackRequester, Location, QueryContext, StreamEvent, StreamTransport,
};
use crate::config::ClientConfig;
use crate::state_machine::{transition, Effect, Event, SessionState};
use crate::typewriter::TypewriterScheduler;
use crate::voice::{NoticeSink, SpeechCapability, VoiceCaptureController};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// An event together with the generation it belongs to
#[derive(Debug)]
struct Tagged {
    generation: u64,
    event: Event,
}

/// Host settings that are not collaborators
pub struct HostOptions {
    /// Resolved once at startup and attached to every query
    pub location: Option<Location>,
    pub typewriter_interval: Duration,
    pub speech: Option<Arc<dyn SpeechCapability>>,
    pub voice_locale: String,
}

impl HostOptions {
    pub fn from_config(config: &ClientConfig, location: Location) -> Self {
        Self {
            location: Some(location),
            typewriter_interval: config.typewriter_interval,
            speech: None,
            voice_locale: config.voice_locale.clone(),
        }
    }
}

/// Runs one query session at a time for a single user
pub struct SessionHost<T, F>
where
    T: StreamTransport + 'static,
    F: FallbackRequester + 'static,
{
    transport: T,
    fallback: Arc<F>,
    location: Option<Location>,
    /// Bumped by every accepted submission
    generation: u64,
    state: SessionState,
    context: Option<QueryContext>,
    channel: Option<ChannelHandle>,
    transcript: Transcript,
    typewriter: TypewriterScheduler,
    voice: VoiceCaptureController,
    event_tx: mpsc::UnboundedSender<Tagged>,
    event_rx: mpsc::UnboundedReceiver<Tagged>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    broadcast_tx: broadcast::Sender<HostUpdate>,
}

impl<T, F> SessionHost<T, F>
where
    T: StreamTransport + 'static,
    F: FallbackRequester + 'static,
{
    /// Start the host loop on the current runtime
    pub fn spawn(transport: T, fallback: F, options: HostOptions) -> HostHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, _) = broadcast::channel(256);

        let notice_tx = broadcast_tx.clone();
        let notices: NoticeSink = Arc::new(move |text| {
            let _ = notice_tx.send(HostUpdate::Notice { text });
        });
        let voice = VoiceCaptureController::new(options.speech, options.voice_locale, notices);
        let typewriter = TypewriterScheduler::new(options.typewriter_interval);
        let transcript = Transcript::new();

        let reveal_rx = typewriter.subscribe();
        let voice_input_rx = voice.input();

        let host = Self {
            transport,
            fallback: Arc::new(fallback),
            location: options.location,
            generation: 0,
            state: SessionState::Idle,
            context: None,
            channel: None,
            transcript: transcript.clone(),
            typewriter,
            voice,
            event_tx,
            event_rx,
            command_rx,
            broadcast_tx: broadcast_tx.clone(),
        };
        let task = tokio::spawn(host.run());

        HostHandle {
            command_tx,
            broadcast_tx,
            reveal_rx,
            voice_input_rx,
            transcript,
            task,
        }
    }

    async fn run(mut self) {
        tracing::info!(
            location = %self.location.as_ref().map(Location::label).unwrap_or_default(),
            "Starting session host"
        );

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(tagged) = self.event_rx.recv() => {
                    self.process_event(tagged.generation, tagged.event);
                }
            }
        }

        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.typewriter.cancel();
        self.voice.stop();
        tracing::info!(generation = self.generation, "Session host stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { text } => self.submit(&text),
            Command::SubmitVoiceInput => {
                self.voice.stop();
                let text = self.voice.take_input();
                self.submit(&text);
            }
            Command::StartVoice { reply } => {
                let _ = reply.send(self.voice.start());
            }
            Command::StopVoice { reply } => {
                let _ = reply.send(self.voice.stop());
            }
            Command::Shutdown => {}
        }
    }

    /// Start a new session, invalidating any previous one
    fn submit(&mut self, text: &str) {
        let Some(context) = QueryContext::new(text, self.location.clone()) else {
            tracing::debug!("Ignoring empty submission");
            return;
        };

        self.generation += 1;
        if self.state.is_active() {
            tracing::info!(
                generation = self.generation,
                previous_state = self.state.name(),
                "Superseding in-flight session"
            );
        }

        let question = context.question().to_string();
        self.context = Some(context);
        self.process_event(self.generation, Event::Submitted { question });
    }

    fn process_event(&mut self, generation: u64, event: Event) {
        if generation != self.generation {
            tracing::debug!(
                generation,
                current = self.generation,
                event = event.name(),
                "Discarding stale event"
            );
            let _ = self
                .broadcast_tx
                .send(HostUpdate::StaleDiscarded { generation });
            return;
        }

        // Chained events (commit → committed) are processed in the same pass
        let mut pending = vec![event];
        while let Some(event) = pending.pop() {
            let from = self.state.name();
            let result = match transition(std::mem::take(&mut self.state), event) {
                Ok(result) => result,
                Err(rejected) => {
                    tracing::debug!(generation, error = %rejected, "Dropping event");
                    self.state = rejected.state;
                    continue;
                }
            };

            if result.new_state.name() != from {
                tracing::info!(
                    generation,
                    from,
                    to = result.new_state.name(),
                    "Session state changed"
                );
            }
            if result.new_state.is_terminal() {
                tracing::info!(generation, state = ?result.new_state, "Session finished");
            }
            self.state = result.new_state;

            for effect in result.effects {
                if let Some(next) = self.execute_effect(effect) {
                    pending.push(next);
                }
            }
        }
    }

    /// Execute an effect and optionally return a generated event
    fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::AppendUserMessage { text } => {
                let message = self.transcript.append(Role::User, text);
                let _ = self.broadcast_tx.send(HostUpdate::Message(message));
                None
            }

            Effect::OpenChannel => {
                let context = self.context.as_ref()?;
                let generation = self.generation;
                let tx = self.event_tx.clone();
                let listener = Box::new(move |event: StreamEvent| {
                    let _ = tx.send(Tagged {
                        generation,
                        event: Event::from(event),
                    });
                });
                tracing::debug!(
                    generation,
                    question = %context.question(),
                    "Opening stream channel"
                );
                self.channel = Some(self.transport.open(context, listener));
                None
            }

            Effect::CloseChannel => {
                if let Some(channel) = self.channel.take() {
                    channel.close();
                }
                None
            }

            Effect::Reveal { text } => {
                self.typewriter.start(&text);
                None
            }

            Effect::CancelReveal => {
                self.typewriter.cancel();
                None
            }

            Effect::RequestFallback => {
                let context = self.context.clone()?;
                let generation = self.generation;
                let fallback = self.fallback.clone();
                let tx = self.event_tx.clone();
                tracing::info!(generation, "Stream failed before any chunk, requesting fallback");

                tokio::spawn(async move {
                    let event = match fallback.request(&context).await {
                        Ok(result) => Event::FallbackSucceeded { result },
                        Err(e) => Event::FallbackFailed { message: e.message },
                    };
                    let _ = tx.send(Tagged { generation, event });
                });
                None
            }

            Effect::Commit { text } => {
                let message = self.transcript.append(Role::Assistant, text);
                let _ = self.broadcast_tx.send(HostUpdate::Message(message));
                Some(Event::Committed)
            }

            Effect::PublishState => {
                let _ = self.broadcast_tx.send(HostUpdate::StateChange {
                    generation: self.generation,
                    state: self.state.clone(),
                });
                None
            }

            Effect::PublishProgress { message } => {
                let _ = self.broadcast_tx.send(HostUpdate::Progress {
                    generation: self.generation,
                    message,
                });
                None
            }
        }
    }
}
