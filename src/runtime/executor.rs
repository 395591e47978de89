//! Conductor executor

use super::traits::{AudioSink, ProfileStore, TransportSink};
use super::{Event, PlaybackOutcome};
use crate::bridge::{default_strategies, AvatarChannel, ChannelTimings, ForeignContext, ProbeOutcome};
use crate::config::ConductorConfig;
use crate::effect::{Effect, Effects, Timer};
use crate::error::ConductorError;
use crate::ids::{self, ConversationId};
use crate::introduction::{IntroContext, IntroductionOrchestrator, IntroductionPayload};
use crate::lifecycle::ConversationLifecycle;
use crate::memory::{ConversationMemory, Role};
use crate::protocol::{
    AssistantResponse, AudioClip, ChannelReport, ConnectionStatus, Diagnostics, Emotion, Greeting,
    IntroductionReport, MemoryReport, OutboundAudio, OutboundEvent, OutboundMessage,
    RuntimeNotification, TransportEvent, UiEvent, UserAction,
};
use crate::readiness::ReadinessGate;
use crate::relationship::{calculate_level, RelationshipTracker};
use crate::signal::{EmotionSignaler, SignalReason};
use crate::visitor::VisitorProfile;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const DEFAULT_LANGUAGE: &str = "ja";

/// Front-end bookkeeping not owned by any component
#[derive(Debug)]
struct FrontState {
    language: String,
    waiting_response: bool,
    interaction_count: u32,
    /// Assistant turns shown this session
    conversation_count: u32,
    status: ConnectionStatus,
    /// Identity of the latest reply spoken without audio
    speech_token: u64,
    /// Identity of the latest suggestion set
    suggestion_token: u64,
    full_init_armed: bool,
}

/// Owns one instance of every component and drives them from a single
/// event loop
pub struct Conductor<A, T, S>
where
    A: AudioSink + 'static,
    T: TransportSink + 'static,
    S: ProfileStore + 'static,
{
    config: ConductorConfig,
    gate: ReadinessGate,
    signaler: EmotionSignaler,
    lifecycle: ConversationLifecycle,
    introduction: IntroductionOrchestrator,
    memory: ConversationMemory,
    relationship: RelationshipTracker,
    profile: VisitorProfile,
    store: S,
    audio: A,
    transport: T,
    front: FrontState,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    ui_tx: broadcast::Sender<UiEvent>,
    /// Cancels the loop and every pending timer
    shutdown: CancellationToken,
}

impl<A, T, S> Conductor<A, T, S>
where
    A: AudioSink + 'static,
    T: TransportSink + 'static,
    S: ProfileStore + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConductorConfig,
        context: Arc<dyn ForeignContext>,
        profile: VisitorProfile,
        store: S,
        audio: A,
        transport: T,
        event_rx: mpsc::Receiver<Event>,
        event_tx: mpsc::Sender<Event>,
        ui_tx: broadcast::Sender<UiEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let timings = &config.timings;
        let channel = AvatarChannel::new(
            context,
            default_strategies(),
            ChannelTimings::from(timings),
            config.limits.max_discovery_attempts,
        );
        let signaler = EmotionSignaler::new(
            channel,
            ids::session_id(chrono::Utc::now()),
            timings.debounce(),
        );
        let lifecycle = ConversationLifecycle::new(timings.speech_fallback());
        let introduction =
            IntroductionOrchestrator::new(timings.intro_throttle(), timings.intro_horizon());
        let memory = ConversationMemory::new(config.limits.memory_turns, config.limits.previous_topics);
        let mut relationship = RelationshipTracker::new(timings.level_up_cue());
        let level = relationship.restore(profile.total_conversations);
        tracing::info!(
            level = level.level,
            conversations = profile.total_conversations,
            "Relationship level restored"
        );
        let front = FrontState {
            language: config
                .language
                .clone()
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            waiting_response: false,
            interaction_count: 0,
            conversation_count: 0,
            status: ConnectionStatus::Disconnected,
            speech_token: 0,
            suggestion_token: 0,
            full_init_armed: false,
        };

        Self {
            config,
            gate: ReadinessGate::new(),
            signaler,
            lifecycle,
            introduction,
            memory,
            relationship,
            profile,
            store,
            audio,
            transport,
            front,
            event_rx,
            event_tx,
            ui_tx,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            session_id = %self.signaler.session_id(),
            visitor_id = %self.profile.visitor_id,
            "Starting conductor"
        );

        self.startup().await;

        // Process events in a loop - no recursion
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                Some(event) = self.event_rx.recv() => {
                    if let Err(e) = self.process_event(event).await {
                        tracing::error!(error = %e, "Error handling event");
                        let _ = self.ui_tx.send(UiEvent::Error {
                            message: e.to_string(),
                        });
                    }
                }
                else => break,
            }
        }

        self.audio.stop_all();
        tracing::info!(
            pending = self.signaler.channel().pending_len(),
            "Conductor stopped"
        );
    }

    async fn startup(&mut self) {
        let now = Instant::now();
        let mut fx = Effects::new();
        self.set_status(ConnectionStatus::Connecting, &mut fx);
        RelationshipTracker::publish(self.profile.total_conversations, &mut fx);
        fx.schedule(self.config.timings.connectivity_probe(), Timer::ConnectivityProbe);

        if self.signaler.channel_mut().discover(now, &mut fx) {
            self.signaler.signal(
                &Emotion::neutral(),
                false,
                SignalReason::Initialization,
                None,
                now,
                &mut fx,
            );
        }
        self.execute_effects(fx).await;
    }

    /// Handle one event and execute the effects it produced.
    ///
    /// Effects queued before a failure still run.
    pub async fn process_event(&mut self, event: Event) -> Result<(), ConductorError> {
        let now = Instant::now();
        let mut fx = Effects::new();

        let result = match event {
            Event::Transport(event) => self.handle_transport(event, now, &mut fx).await,
            Event::Runtime(notification) => {
                self.handle_runtime(notification, now, &mut fx);
                Ok(())
            }
            Event::User(action) => self.handle_user(action, now, &mut fx).await,
            Event::Timer(timer) => {
                self.handle_timer(timer, now, &mut fx);
                Ok(())
            }
            Event::Playback {
                conversation_id,
                outcome,
            } => {
                self.handle_playback(&conversation_id, &outcome, now, &mut fx);
                Ok(())
            }
        };

        self.execute_effects(fx).await;
        result
    }

    // ==================== Transport ====================

    async fn handle_transport(
        &mut self,
        event: TransportEvent,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<(), ConductorError> {
        match event {
            TransportEvent::Connect => self.on_connect(now, fx),
            TransportEvent::Disconnect => {
                tracing::warn!("Transport disconnected");
                self.gate.set_transport_connected(false);
                self.front.waiting_response = false;
                self.set_status(ConnectionStatus::Disconnected, fx);
            }
            TransportEvent::CurrentLanguage { language }
            | TransportEvent::LanguageChanged { language } => {
                tracing::info!(language = %language, "Language updated by server");
                self.front.language.clone_from(&language);
                fx.notify(UiEvent::LanguageChanged { language });
            }
            TransportEvent::Greeting(greeting) => self.on_greeting(greeting, now, fx),
            TransportEvent::Response(response) | TransportEvent::ContextAwareResponse(response) => {
                return self.on_response(response, now, fx).await;
            }
            TransportEvent::Transcription { text } => return self.on_transcription(text, fx).await,
            TransportEvent::Error { message } => {
                tracing::error!(message = %message, "Server reported an error");
                self.front.waiting_response = false;
                fx.notify(UiEvent::Error { message });
                self.set_status(ConnectionStatus::Error, fx);
                self.signal_neutral(SignalReason::Emergency, now, fx);
            }
        }
        Ok(())
    }

    fn on_connect(&mut self, now: Instant, fx: &mut Effects) {
        tracing::info!("Transport connected");
        self.gate.set_transport_connected(true);
        self.set_status(ConnectionStatus::Connected, fx);

        if let Some(language) = self.config.language.clone() {
            self.front.language.clone_from(&language);
            fx.emit(OutboundEvent::SetLanguage { language });
        }
        fx.emit(OutboundEvent::VisitorInfo {
            visitor_id: self.profile.visitor_id.clone(),
            visit_data: self.profile.clone(),
        });

        self.resume_introduction_if_ready(now, fx);
    }

    fn on_greeting(&mut self, greeting: Greeting, now: Instant, fx: &mut Effects) {
        self.front.waiting_response = false;
        let emotion = greeting.emotion.clone().unwrap_or_else(Emotion::happy);

        fx.notify(UiEvent::AssistantMessage {
            text: greeting.message.clone(),
            greeting: true,
        });
        self.memory
            .add_message(Role::Assistant, greeting.message, greeting.emotion, None);
        self.front.conversation_count += 1;
        fx.notify(UiEvent::Suggestions { suggestions: None });

        match greeting.audio {
            Some(audio) => {
                let payload = Some(IntroductionPayload {
                    emotion: Some(emotion),
                    audio: Some(audio),
                });
                let accepted = if self.gate.is_fully_ready() {
                    self.request_introduction("greeting_with_audio", payload, now, fx)
                } else {
                    // buffered by the orchestrator until the runtime is fully ready
                    self.start_introduction("greeting_with_audio", payload, now, fx)
                };
                if !accepted {
                    tracing::info!("Greeting audio dropped, introduction not eligible");
                }
            }
            None => {
                self.signaler
                    .signal(&emotion, false, SignalReason::GreetingNoAudio, None, now, fx);
            }
        }

        self.set_status(ConnectionStatus::Connected, fx);
    }

    async fn on_response(
        &mut self,
        response: AssistantResponse,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<(), ConductorError> {
        let result = self.apply_response(response, now, fx).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Response processing failed, resetting avatar");
            self.signal_neutral(SignalReason::Emergency, now, fx);
        }
        result
    }

    async fn apply_response(
        &mut self,
        response: AssistantResponse,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<(), ConductorError> {
        self.front.waiting_response = false;
        self.set_status(ConnectionStatus::Connected, fx);

        fx.notify(UiEvent::AssistantMessage {
            text: response.message.clone(),
            greeting: false,
        });
        self.memory.add_message(
            Role::Assistant,
            response.message.clone(),
            response.emotion.clone(),
            None,
        );
        self.front.conversation_count += 1;

        let count = self.profile.increment_conversations();
        tracing::debug!(
            session_turns = self.front.conversation_count,
            total = count,
            "Assistant turn recorded"
        );
        let update = self.relationship.observe(count, fx);
        self.profile.set_relationship_level(update.level.level);
        if let Some(topic) = &response.current_topic {
            self.memory.update_current_topic(topic.clone());
            self.profile.add_topic(topic);
        }
        self.persist_profile().await?;

        let emotion = response.emotion.unwrap_or_else(Emotion::neutral);
        match response.audio {
            Some(audio) => {
                self.supersede_simple_speech();
                self.lifecycle
                    .start(emotion, Some(audio), &mut self.signaler, now, fx);
            }
            None => self.speak_without_audio(emotion, &response.message, now, fx),
        }

        if !response.suggestions.is_empty() {
            self.front.suggestion_token += 1;
            let delay = self
                .config
                .timings
                .suggestions_delay(self.lifecycle.is_active());
            fx.schedule(
                delay,
                Timer::ShowSuggestions {
                    token: self.front.suggestion_token,
                    suggestions: response.suggestions,
                },
            );
        }
        Ok(())
    }

    /// Invalidate any pending simulated-speech end; a real turn owns the
    /// avatar from here
    fn supersede_simple_speech(&mut self) {
        self.front.speech_token += 1;
    }

    /// Talk for an estimated duration when a reply came without audio
    fn speak_without_audio(&mut self, emotion: Emotion, message: &str, now: Instant, fx: &mut Effects) {
        let duration = simple_speech_duration(message);
        self.front.speech_token += 1;
        tracing::debug!(?duration, "Reply without audio, simulating speech");
        self.signaler.signal(
            &emotion,
            true,
            SignalReason::SimpleConversationStart,
            None,
            now,
            fx,
        );
        fx.schedule(
            duration,
            Timer::SimpleSpeechEnd {
                token: self.front.speech_token,
                emotion,
            },
        );
    }

    async fn on_transcription(&mut self, text: String, fx: &mut Effects) -> Result<(), ConductorError> {
        fx.notify(UiEvent::UserMessage { text: text.clone() });
        self.front.interaction_count += 1;
        let count = self.profile.increment_question_count(&text);
        tracing::debug!(count, "Transcribed question recorded");
        self.memory.add_message(Role::User, text, None, None);
        self.persist_profile().await
    }

    // ==================== User actions ====================

    async fn handle_user(
        &mut self,
        action: UserAction,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<(), ConductorError> {
        match action {
            UserAction::SendText { text } => return self.send_text(&text, fx).await,
            UserAction::SendAudio { audio } => self.send_audio(audio, fx),
            UserAction::RecordingStarted => {
                self.lifecycle.stop_all_audio(fx);
                if self.lifecycle.is_active() {
                    self.lifecycle.end(&mut self.signaler, now, fx);
                }
                self.set_status(ConnectionStatus::Recording, fx);
            }
            UserAction::SelectSuggestion { text } => {
                let cap = self.config.limits.selected_suggestions;
                if self.profile.add_selected_suggestion(&text, cap) {
                    tracing::debug!(suggestion = %text, "Suggestion recorded");
                }
                return self.send_text(&text, fx).await;
            }
            UserAction::SetLanguage { language } => {
                self.front.language.clone_from(&language);
                fx.emit(OutboundEvent::SetLanguage {
                    language: language.clone(),
                });
                fx.notify(UiEvent::LanguageChanged { language });
            }
            UserAction::AudioReady => {
                tracing::info!("Audio subsystem initialized");
                self.gate.set_audio_initialized(true);
                self.resume_introduction_if_ready(now, fx);
            }
            UserAction::RequestDiagnostics => {
                fx.notify(UiEvent::Diagnostics(Box::new(self.diagnostics(now))));
            }
            UserAction::TestIntroduction => {
                let accepted = self.request_introduction("manual_test", None, now, fx);
                tracing::info!(
                    accepted,
                    status = ?self.introduction.status(),
                    "Manual introduction requested"
                );
            }
        }
        Ok(())
    }

    async fn send_text(&mut self, text: &str, fx: &mut Effects) -> Result<(), ConductorError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if !self.gate.transport_connected() || self.front.waiting_response {
            tracing::debug!(
                connected = self.gate.transport_connected(),
                waiting = self.front.waiting_response,
                "Message not sent"
            );
            return Ok(());
        }

        self.front.waiting_response = true;
        self.front.interaction_count += 1;
        self.set_status(ConnectionStatus::Processing, fx);

        self.memory.add_message(Role::User, text, None, None);
        let question_count = self.profile.increment_question_count(text);
        fx.notify(UiEvent::UserMessage {
            text: text.to_string(),
        });
        fx.emit(OutboundEvent::Message(OutboundMessage {
            message: text.to_string(),
            language: self.front.language.clone(),
            visitor_id: self.profile.visitor_id.clone(),
            conversation_history: self.memory.recent_context(self.config.limits.context_turns),
            question_count,
            interaction_count: self.front.interaction_count,
            relationship_level: self.relationship_style(),
            selected_suggestions: self.profile.selected_suggestions.clone(),
        }));

        self.persist_profile().await
    }

    fn send_audio(&mut self, audio: AudioClip, fx: &mut Effects) {
        if audio.is_empty() || !self.gate.transport_connected() {
            tracing::debug!("Recording not sent");
            return;
        }
        self.front.waiting_response = true;
        self.set_status(ConnectionStatus::Processing, fx);
        fx.emit(OutboundEvent::AudioMessage(OutboundAudio {
            audio,
            language: self.front.language.clone(),
            visitor_id: self.profile.visitor_id.clone(),
            conversation_history: self.memory.recent_context(self.config.limits.context_turns),
            interaction_count: self.front.interaction_count,
            relationship_level: self.relationship_style(),
            selected_suggestions: self.profile.selected_suggestions.clone(),
        }));
    }

    fn relationship_style(&self) -> String {
        calculate_level(self.profile.total_conversations).style.to_string()
    }

    // ==================== Avatar runtime ====================

    fn handle_runtime(&mut self, notification: RuntimeNotification, now: Instant, fx: &mut Effects) {
        match notification {
            RuntimeNotification::UnityReady => {
                tracing::info!("Avatar runtime announced readiness");
                if self.signaler.channel_mut().resume_probing(now, fx) {
                    self.signal_neutral(SignalReason::UnityReady, now, fx);
                    self.set_status(ConnectionStatus::Connected, fx);
                } else {
                    tracing::warn!("Avatar runtime announced readiness but could not be located");
                }
            }
            RuntimeNotification::UnityFullyInitialized => {
                if self.gate.mark_fully_initialized() {
                    tracing::info!("Avatar runtime fully initialized");
                    self.resume_introduction_if_ready(now, fx);
                }
            }
            RuntimeNotification::UnityError { message } => {
                tracing::error!(
                    message = %message,
                    was_ready = self.gate.avatar_runtime_ready(),
                    "Avatar runtime error"
                );
                self.gate.set_avatar_runtime_ready(false);
                self.signaler.channel_mut().invalidate();
                self.set_status(ConnectionStatus::UnityError, fx);
            }
            RuntimeNotification::AudioComplete => {
                tracing::debug!("Avatar runtime finished audio");
            }
            RuntimeNotification::StateUpdate { state } => {
                tracing::debug!(?state, "Avatar runtime state update");
            }
        }
    }

    fn on_runtime_located(&mut self, strategy: &'static str, now: Instant, fx: &mut Effects) {
        tracing::info!(strategy, "Avatar runtime ready");
        self.gate.set_avatar_runtime_ready(true);
        if matches!(
            self.front.status,
            ConnectionStatus::UnityDisconnected
                | ConnectionStatus::UnityFailed
                | ConnectionStatus::UnityError
        ) {
            self.set_status(ConnectionStatus::Connected, fx);
        }
        if !self.gate.avatar_runtime_fully_initialized() && !self.front.full_init_armed {
            self.front.full_init_armed = true;
            fx.schedule(self.config.timings.full_init_timeout(), Timer::FullInitTimeout);
        }
        self.resume_introduction_if_ready(now, fx);
    }

    fn on_probe(&mut self, now: Instant, fx: &mut Effects) {
        fx.schedule(self.config.timings.connectivity_probe(), Timer::ConnectivityProbe);

        match self.signaler.channel_mut().probe(now, fx) {
            ProbeOutcome::Located => {
                self.signal_neutral(SignalReason::Initialization, now, fx);
            }
            ProbeOutcome::Retrying { attempt, max } => {
                tracing::warn!(attempt, max, "Avatar runtime not found, retrying");
                self.set_status(ConnectionStatus::UnityDisconnected, fx);
            }
            ProbeOutcome::Exhausted => {
                self.gate.set_avatar_runtime_ready(false);
                self.set_status(ConnectionStatus::UnityFailed, fx);
            }
            ProbeOutcome::Parked => {}
            ProbeOutcome::Healthy { idle } => {
                if idle > self.config.timings.idle_probe_after() {
                    tracing::info!(?idle, "No recent avatar traffic, sending connection test");
                    self.signal_neutral(SignalReason::ConnectionTest, now, fx);
                }
            }
        }
    }

    // ==================== Introduction ====================

    fn start_introduction(
        &mut self,
        requester: &str,
        payload: Option<IntroductionPayload>,
        now: Instant,
        fx: &mut Effects,
    ) -> bool {
        let mut ctx = IntroContext {
            gate: &self.gate,
            lifecycle: &mut self.lifecycle,
            signaler: &mut self.signaler,
            fx: &mut *fx,
            now,
        };
        let accepted = self.introduction.start(requester, payload, &mut ctx);
        if accepted {
            self.supersede_simple_speech();
        }
        accepted
    }

    /// Start the introduction only when ordinary signaling is possible
    fn request_introduction(
        &mut self,
        requester: &str,
        payload: Option<IntroductionPayload>,
        now: Instant,
        fx: &mut Effects,
    ) -> bool {
        if !self.gate.is_minimally_ready() {
            tracing::debug!(requester, "Introduction deferred, system not ready");
            return false;
        }
        self.start_introduction(requester, payload, now, fx)
    }

    /// Readiness listener: resumes a buffered introduction once every
    /// subsystem is ready
    fn resume_introduction_if_ready(&mut self, now: Instant, fx: &mut Effects) {
        if !self.gate.is_fully_ready() {
            return;
        }
        let mut ctx = IntroContext {
            gate: &self.gate,
            lifecycle: &mut self.lifecycle,
            signaler: &mut self.signaler,
            fx: &mut *fx,
            now,
        };
        if self.introduction.on_runtime_ready(&mut ctx) {
            self.supersede_simple_speech();
        }
    }

    // ==================== Timers and playback ====================

    fn handle_timer(&mut self, timer: Timer, now: Instant, fx: &mut Effects) {
        match timer {
            Timer::Flush { generation } => {
                self.signaler.channel_mut().on_flush_timer(generation, now, fx);
            }
            Timer::SpeechFallback { conversation_id } => {
                self.lifecycle
                    .on_fallback_elapsed(&conversation_id, &mut self.signaler, now, fx);
            }
            Timer::IntroductionComplete => self.introduction.complete(),
            Timer::FullInitTimeout => {
                if self.gate.mark_fully_initialized() {
                    tracing::info!("Avatar runtime never confirmed initialization, assuming ready");
                    self.resume_introduction_if_ready(now, fx);
                }
            }
            Timer::LevelUpCueEnd => self.relationship.on_cue_finished(),
            Timer::SimpleSpeechEnd { token, emotion } => {
                if token == self.front.speech_token && !self.lifecycle.is_active() {
                    self.signaler.signal(
                        &emotion,
                        false,
                        SignalReason::SimpleConversationEnd,
                        None,
                        now,
                        fx,
                    );
                } else {
                    tracing::trace!(token, "Stale simple speech end");
                }
            }
            Timer::ShowSuggestions { token, suggestions } => {
                if token == self.front.suggestion_token {
                    fx.notify(UiEvent::Suggestions {
                        suggestions: Some(suggestions),
                    });
                }
            }
            Timer::ConnectivityProbe => self.on_probe(now, fx),
        }
    }

    fn handle_playback(
        &mut self,
        conversation_id: &ConversationId,
        outcome: &PlaybackOutcome,
        now: Instant,
        fx: &mut Effects,
    ) {
        if let PlaybackOutcome::Failed(reason) = outcome {
            tracing::warn!(conversation_id = %conversation_id, reason = %reason, "Playback failed, ending turn");
        }
        self.lifecycle
            .on_playback_finished(conversation_id, &mut self.signaler, now, fx);
    }

    // ==================== Effects ====================

    async fn execute_effects(&mut self, fx: Effects) {
        let mut pending: VecDeque<Effect> = fx.into_iter().collect();

        while let Some(effect) = pending.pop_front() {
            let mut follow_up = Effects::new();
            match effect {
                Effect::Schedule { delay, timer } => self.schedule_timer(delay, timer),
                Effect::StopAllAudio => self.audio.stop_all(),
                Effect::PlayAudio {
                    clip,
                    conversation_id,
                } => {
                    if let Err(e) = self.audio.play(&clip, &conversation_id) {
                        tracing::warn!(
                            error = %e,
                            conversation_id = %conversation_id,
                            "Playback could not start, ending turn"
                        );
                        self.lifecycle.on_playback_finished(
                            &conversation_id,
                            &mut self.signaler,
                            Instant::now(),
                            &mut follow_up,
                        );
                    }
                }
                Effect::Emit(event) => {
                    if let Err(e) = self.transport.emit(&event).await {
                        tracing::warn!(error = %e, event = event.name(), "Failed to emit transport event");
                    }
                }
                Effect::Notify(event) => {
                    let _ = self.ui_tx.send(event);
                }
                Effect::RuntimeLocated { strategy } => {
                    self.on_runtime_located(strategy, Instant::now(), &mut follow_up);
                }
            }
            pending.extend(follow_up);
        }
    }

    fn schedule_timer(&self, delay: Duration, timer: Timer) {
        let event_tx = self.event_tx.clone();
        let cancel = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = event_tx.send(Event::Timer(timer)).await;
                }
            }
        });
    }

    // ==================== Helpers ====================

    fn set_status(&mut self, status: ConnectionStatus, fx: &mut Effects) {
        if self.front.status == status {
            return;
        }
        tracing::debug!(from = ?self.front.status, to = ?status, "Connection status changed");
        self.front.status = status;
        fx.notify(UiEvent::StatusChanged { status });
    }

    fn signal_neutral(&mut self, reason: SignalReason, now: Instant, fx: &mut Effects) {
        self.signaler
            .signal(&Emotion::neutral(), false, reason, None, now, fx);
    }

    async fn persist_profile(&self) -> Result<(), ConductorError> {
        self.store
            .save(&self.profile)
            .await
            .map_err(ConductorError::Store)
    }

    /// Snapshot of readiness, introduction, memory, visitor and channel state
    pub fn diagnostics(&self, now: Instant) -> Diagnostics {
        let channel = self.signaler.channel();
        Diagnostics {
            readiness: self.gate,
            introduction: IntroductionReport {
                status: self.introduction.status(),
                last_execution_ms_ago: self.introduction.last_execution().map(|at| {
                    u64::try_from(now.saturating_duration_since(at).as_millis()).unwrap_or(u64::MAX)
                }),
                requests: self.introduction.requester_log().to_vec(),
            },
            memory: MemoryReport {
                summary: self.memory.summary(),
                history: self.memory.full_history().cloned().collect(),
            },
            visitor: self.profile.clone(),
            channel: ChannelReport {
                reachability: channel.reachability(),
                located: channel.has_handle(),
                pending: channel.pending_len(),
                discovery_attempts: channel.probe_attempts(),
            },
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.front.status
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn profile(&self) -> &VisitorProfile {
        &self.profile
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn introduction(&self) -> &IntroductionOrchestrator {
        &self.introduction
    }
}

/// Estimated speaking time of a reply without audio: 0.12 s per character,
/// between 3 and 15 seconds. An empty reply counts as 20 characters.
fn simple_speech_duration(message: &str) -> Duration {
    let chars = match message.chars().count() {
        0 => 20,
        n => u32::try_from(n).unwrap_or(u32::MAX),
    };
    Duration::from_secs_f64((f64::from(chars) * 0.12).clamp(3.0, 15.0))
}
