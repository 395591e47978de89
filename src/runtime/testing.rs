//! Mock implementations for testing
//!
//! These mocks enable integration testing without a real avatar runtime,
//! audio device, server, or database.

use super::traits::*;
use super::{Conductor, Event};
use crate::bridge::{AvatarRuntime, ForeignValue, SharedContext};
use crate::config::ConductorConfig;
use crate::error::{BridgeError, PlaybackError, TransportError};
use crate::ids::ConversationId;
use crate::protocol::{AudioClip, OutboundEvent, UiEvent};
use crate::visitor::VisitorProfile;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Recording avatar runtime
// ============================================================================

/// One successful `SendMessage` call
#[derive(Debug, Clone)]
pub struct Delivery {
    pub object: String,
    pub method: String,
    pub payload: Value,
    pub at: Instant,
}

/// Avatar runtime that records every delivered message
#[derive(Default)]
pub struct RecordingRuntime {
    deliveries: Mutex<Vec<Delivery>>,
    failures: AtomicUsize,
}

impl RecordingRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` deliveries fail (adds to any pending failures)
    pub fn fail_next(&self, n: usize) {
        self.failures.fetch_add(n, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.deliveries().into_iter().map(|d| d.payload).collect()
    }

    /// Delivered emotion labels, in delivery order
    pub fn emotions(&self) -> Vec<String> {
        self.field("emotion")
    }

    /// Delivered signal reasons, in delivery order
    pub fn reasons(&self) -> Vec<String> {
        self.field("reason")
    }

    fn field(&self, name: &str) -> Vec<String> {
        self.payloads()
            .iter()
            .map(|p| p[name].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

impl AvatarRuntime for RecordingRuntime {
    fn send_message(&self, object: &str, method: &str, payload: &str) -> Result<(), BridgeError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BridgeError::delivery(object, method, "injected failure"));
        }
        let payload = serde_json::from_str(payload)?;
        self.deliveries.lock().unwrap().push(Delivery {
            object: object.to_string(),
            method: method.to_string(),
            payload,
            at: Instant::now(),
        });
        Ok(())
    }
}

// ============================================================================
// Mock audio sink
// ============================================================================

/// Audio sink that records playback requests
#[derive(Default)]
pub struct RecordingAudioSink {
    plays: Mutex<Vec<(AudioClip, ConversationId)>>,
    stops: AtomicUsize,
    reject: AtomicBool,
}

impl RecordingAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every subsequent playback
    pub fn reject_playback(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn plays(&self) -> Vec<(AudioClip, ConversationId)> {
        self.plays.lock().unwrap().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl AudioSink for RecordingAudioSink {
    fn play(&self, clip: &AudioClip, conversation_id: &ConversationId) -> Result<(), PlaybackError> {
        if clip.is_empty() {
            return Err(PlaybackError::EmptyClip);
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(PlaybackError::Rejected("autoplay blocked".to_string()));
        }
        self.plays
            .lock()
            .unwrap()
            .push((clip.clone(), conversation_id.clone()));
        Ok(())
    }

    fn stop_all(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock transport
// ============================================================================

/// Transport that keeps every emitted event as JSON
#[derive(Default)]
pub struct RecordingTransport {
    events: Mutex<Vec<Value>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Value> {
        self.events.lock().unwrap().clone()
    }

    /// Emitted events with the given name
    pub fn named(&self, name: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|e| e["event"] == name)
            .collect()
    }
}

#[async_trait]
impl TransportSink for RecordingTransport {
    async fn emit(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        let value = serde_json::to_value(event)?;
        self.events.lock().unwrap().push(value);
        Ok(())
    }
}

// ============================================================================
// In-memory profile store
// ============================================================================

/// Profile store backed by memory
#[derive(Default)]
pub struct MemoryProfileStore {
    profile: Mutex<Option<VisitorProfile>>,
    saves: AtomicUsize,
    fail: AtomicBool,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail
    pub fn fail_saves(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Option<VisitorProfile> {
        self.profile.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load_current(&self) -> Result<Option<VisitorProfile>, String> {
        Ok(self.profile.lock().unwrap().clone())
    }

    async fn save(&self, profile: &VisitorProfile) -> Result<(), String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("disk full".to_string());
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.profile.lock().unwrap() = Some(profile.clone());
        Ok(())
    }
}

// ============================================================================
// Test Conductor Builder
// ============================================================================

/// Running conductor wired to recording mocks
pub struct TestConductor {
    pub context: SharedContext,
    pub runtime: Arc<RecordingRuntime>,
    pub audio: Arc<RecordingAudioSink>,
    pub transport: Arc<RecordingTransport>,
    pub store: Arc<MemoryProfileStore>,
    pub event_tx: mpsc::Sender<Event>,
    pub ui_rx: broadcast::Receiver<UiEvent>,
    pub shutdown: CancellationToken,
    conductor_handle: tokio::task::JoinHandle<()>,
}

impl TestConductor {
    pub fn builder() -> TestConductorBuilder {
        TestConductorBuilder::new()
    }
}

pub struct TestConductorBuilder {
    config: ConductorConfig,
    profile: Option<VisitorProfile>,
    runtime_present: bool,
}

impl TestConductorBuilder {
    pub fn new() -> Self {
        Self {
            config: ConductorConfig::default(),
            profile: None,
            runtime_present: true,
        }
    }

    pub fn config(mut self, config: ConductorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn profile(mut self, profile: VisitorProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Start without an avatar runtime bound in the context
    pub fn without_runtime(mut self) -> Self {
        self.runtime_present = false;
        self
    }

    pub fn build(self) -> TestConductor {
        let context = SharedContext::new();
        let runtime = RecordingRuntime::new();
        if self.runtime_present {
            context.register("unityInstance", ForeignValue::Runtime(runtime.clone()));
        }
        let audio = Arc::new(RecordingAudioSink::new());
        let transport = Arc::new(RecordingTransport::new());
        let store = Arc::new(MemoryProfileStore::new());
        let profile = self
            .profile
            .unwrap_or_else(|| VisitorProfile::new(chrono::Utc::now()));

        let (event_tx, event_rx) = mpsc::channel(64);
        let (ui_tx, ui_rx) = broadcast::channel(256);
        let shutdown = CancellationToken::new();

        let conductor = Conductor::new(
            self.config,
            Arc::new(context.clone()),
            profile,
            store.clone(),
            audio.clone(),
            transport.clone(),
            event_rx,
            event_tx.clone(),
            ui_tx,
            shutdown.clone(),
        );

        let handle = tokio::spawn(async move {
            conductor.run().await;
        });

        TestConductor {
            context,
            runtime,
            audio,
            transport,
            store,
            event_tx,
            ui_rx,
            shutdown,
            conductor_handle: handle,
        }
    }
}

impl Default for TestConductorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConductor {
    pub async fn send(&self, event: Event) {
        self.event_tx
            .send(event)
            .await
            .expect("Failed to send event");
    }

    /// Deliver a transport event given in its wire form
    pub async fn transport_event(&self, wire: Value) {
        let event = serde_json::from_value(wire).expect("invalid transport event");
        self.send(Event::Transport(event)).await;
    }

    /// Deliver an avatar runtime notification given in its wire form
    pub async fn runtime_notification(&self, wire: Value) {
        let notification = serde_json::from_value(wire).expect("invalid notification");
        self.send(Event::Runtime(notification)).await;
    }

    pub async fn user_action(&self, wire: Value) {
        let action = serde_json::from_value(wire).expect("invalid user action");
        self.send(Event::User(action)).await;
    }

    /// Bind the recording runtime so discovery can find it
    pub fn publish_runtime(&self) {
        self.context
            .register("unityInstance", ForeignValue::Runtime(self.runtime.clone()));
    }

    /// Connect the transport and finish every readiness step
    pub async fn bring_up(&self) {
        self.transport_event(serde_json::json!({"event": "connect"})).await;
        self.user_action(serde_json::json!({"action": "audio_ready"})).await;
        self.runtime_notification(serde_json::json!({"type": "unity-fully-initialized"}))
            .await;
        self.settle(Duration::from_millis(10)).await;
    }

    /// Let the conductor and its timers run for `duration` of (paused) time
    pub async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// UI events published since the last call
    pub fn ui_events(&mut self) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.ui_rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.conductor_handle.await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ConnectionStatus;
    use crate::runtime::PlaybackOutcome;
    use crate::visitor::normalize_question;
    use serde_json::json;

    fn statuses(events: &[UiEvent]) -> Vec<ConnectionStatus> {
        events
            .iter()
            .filter_map(|e| match e {
                UiEvent::StatusChanged { status } => Some(*status),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_signals_initialization() {
        let mut rt = TestConductor::builder().build();
        rt.settle(Duration::from_millis(100)).await;

        assert_eq!(rt.runtime.reasons(), vec!["initialization"]);
        let delivery = &rt.runtime.deliveries()[0];
        assert_eq!(delivery.object, "WebGLBridge");
        assert_eq!(delivery.method, "OnMessage");
        assert_eq!(delivery.payload["type"], "emotion");
        assert_eq!(delivery.payload["sequence"], 0);

        let events = rt.ui_events();
        assert_eq!(statuses(&events), vec![ConnectionStatus::Connecting]);
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::RelationshipUpdated { conversations: 0, .. })));
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_announces_visitor() {
        let config = ConductorConfig {
            language: Some("en".to_string()),
            ..ConductorConfig::default()
        };
        let rt = TestConductor::builder().config(config).build();
        rt.transport_event(json!({"event": "connect"})).await;
        rt.settle(Duration::from_millis(10)).await;

        let names: Vec<Value> = rt.transport.events().iter().map(|e| e["event"].clone()).collect();
        assert_eq!(names, vec![json!("set_language"), json!("visitor_info")]);
        let info = &rt.transport.named("visitor_info")[0];
        assert_eq!(info["data"]["visitorId"], info["data"]["visitData"]["visitorId"]);
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_queued_before_runtime_arrive_in_order() {
        let rt = TestConductor::builder().without_runtime().build();
        rt.transport_event(json!({"event": "connect"})).await;
        rt.transport_event(json!({"event": "greeting", "data": {"message": "hi", "emotion": "happy"}}))
            .await;
        rt.transport_event(json!({"event": "error", "data": {"message": "boom"}}))
            .await;
        rt.settle(Duration::from_millis(100)).await;
        assert!(rt.runtime.deliveries().is_empty());

        rt.publish_runtime();
        rt.settle(Duration::from_secs(1)).await;

        assert_eq!(rt.runtime.reasons(), vec!["greeting_no_audio", "emergency"]);
        assert_eq!(rt.runtime.emotions(), vec!["happy", "neutral"]);
        let deliveries = rt.runtime.deliveries();
        assert!(deliveries[1].at - deliveries[0].at >= Duration::from_millis(30));
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_greeting_with_audio_plays_once_ready() {
        let rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.transport_event(json!({
            "event": "greeting",
            "data": {"message": "Welcome", "emotion": "happy", "audio": "data:audio/mp3;base64,AAA"}
        }))
        .await;
        rt.settle(Duration::from_millis(100)).await;

        let plays = rt.audio.plays();
        assert_eq!(plays.len(), 1);
        let conversation_id = plays[0].1.clone();

        rt.send(Event::Playback {
            conversation_id,
            outcome: PlaybackOutcome::Finished,
        })
        .await;
        rt.settle(Duration::from_millis(100)).await;

        assert_eq!(
            rt.runtime.reasons(),
            vec!["initialization", "conversation_start", "conversation_end"]
        );
        let payloads = rt.runtime.payloads();
        assert_eq!(payloads[1]["talking"], true);
        assert_eq!(payloads[2]["emotion"], "neutral");
        assert_eq!(payloads[1]["conversationId"], payloads[2]["conversationId"]);
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_greeting_audio_buffered_until_runtime_initializes() {
        let rt = TestConductor::builder().without_runtime().build();
        rt.transport_event(json!({"event": "connect"})).await;
        rt.user_action(json!({"action": "audio_ready"})).await;
        rt.transport_event(json!({
            "event": "greeting",
            "data": {"message": "Welcome", "audio": "clip"}
        }))
        .await;
        rt.settle(Duration::from_millis(100)).await;
        assert!(rt.audio.plays().is_empty());

        rt.publish_runtime();
        rt.runtime_notification(json!({"type": "unity-ready"})).await;
        rt.runtime_notification(json!({"type": "unity-fully-initialized"}))
            .await;
        rt.settle(Duration::from_millis(500)).await;

        assert_eq!(rt.audio.plays().len(), 1);
        assert!(rt.runtime.reasons().contains(&"conversation_start".to_string()));
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_initialization_assumed_after_timeout() {
        let rt = TestConductor::builder().build();
        rt.transport_event(json!({"event": "connect"})).await;
        rt.user_action(json!({"action": "audio_ready"})).await;
        rt.transport_event(json!({
            "event": "greeting",
            "data": {"message": "Welcome", "audio": "clip"}
        }))
        .await;
        rt.settle(Duration::from_secs(1)).await;
        assert!(rt.audio.plays().is_empty());

        rt.settle(Duration::from_secs(3)).await;
        assert_eq!(rt.audio.plays().len(), 1);
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_playback_ends_turn_immediately() {
        let rt = TestConductor::builder().build();
        rt.audio.reject_playback();
        rt.bring_up().await;
        rt.transport_event(json!({
            "event": "response",
            "data": {"message": "Look!", "emotion": "surprised", "audio": "clip"}
        }))
        .await;
        rt.settle(Duration::from_millis(200)).await;

        assert_eq!(
            rt.runtime.reasons(),
            vec!["initialization", "conversation_start", "conversation_end"]
        );
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_without_audio_simulates_speech() {
        let mut rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.transport_event(json!({
            "event": "response",
            "data": {"message": "Hello there", "emotion": "happy", "suggestions": ["More?"]}
        }))
        .await;
        rt.settle(Duration::from_millis(100)).await;
        assert_eq!(rt.runtime.reasons(), vec!["initialization", "simple_conversation_start"]);

        rt.settle(Duration::from_secs(3)).await;
        assert_eq!(
            rt.runtime.reasons(),
            vec!["initialization", "simple_conversation_start", "simple_conversation_end"]
        );
        let end = &rt.runtime.payloads()[2];
        assert_eq!(end["emotion"], "happy");
        assert_eq!(end["talking"], false);

        let suggestions: Vec<UiEvent> = rt
            .ui_events()
            .into_iter()
            .filter(|e| matches!(e, UiEvent::Suggestions { suggestions: Some(_) }))
            .collect();
        assert_eq!(suggestions.len(), 1);
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_advances_relationship() {
        let mut rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.ui_events();
        rt.transport_event(json!({
            "event": "response",
            "data": {"message": "ok", "currentTopic": "kimono"}
        }))
        .await;
        rt.settle(Duration::from_millis(100)).await;

        let saved = rt.store.saved().expect("profile saved");
        assert_eq!(saved.total_conversations, 1);
        assert_eq!(saved.relationship_level, 1);
        assert_eq!(saved.topics_discussed, vec!["kimono"]);

        let events = rt.ui_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::RelationshipUpdated { conversations: 1, .. })));
        assert!(events.iter().any(|e| matches!(e, UiEvent::LevelUp { .. })));
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_resets_avatar() {
        let mut rt = TestConductor::builder().build();
        rt.bring_up().await;
        // outside the debounce window of the initialization signal
        rt.settle(Duration::from_millis(100)).await;
        rt.store.fail_saves();
        rt.transport_event(json!({"event": "response", "data": {"message": "ok"}}))
            .await;
        rt.settle(Duration::from_millis(100)).await;

        assert_eq!(rt.runtime.reasons(), vec!["initialization", "emergency"]);
        assert!(rt
            .ui_events()
            .iter()
            .any(|e| matches!(e, UiEvent::Error { .. })));
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_text_emits_context() {
        let rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.user_action(json!({"action": "send_text", "text": "  What is this?  "}))
            .await;
        rt.user_action(json!({"action": "send_text", "text": "ignored while waiting"}))
            .await;
        rt.settle(Duration::from_millis(10)).await;

        let messages = rt.transport.named("message");
        assert_eq!(messages.len(), 1);
        let data = &messages[0]["data"];
        assert_eq!(data["message"], "What is this?");
        assert_eq!(data["questionCount"], 1);
        assert_eq!(data["interactionCount"], 1);
        assert_eq!(data["relationshipLevel"], "formal");
        assert_eq!(data["conversationHistory"][0]["content"], "What is this?");
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_text_requires_transport() {
        let rt = TestConductor::builder().build();
        rt.user_action(json!({"action": "send_text", "text": "hello"}))
            .await;
        rt.settle(Duration::from_millis(10)).await;
        assert!(rt.transport.named("message").is_empty());
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_interrupts_turn() {
        let rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.transport_event(json!({
            "event": "response",
            "data": {"message": "Long story", "audio": "clip"}
        }))
        .await;
        rt.settle(Duration::from_millis(100)).await;
        let stops_before = rt.audio.stop_count();

        rt.user_action(json!({"action": "recording_started"})).await;
        rt.settle(Duration::from_millis(100)).await;

        assert!(rt.audio.stop_count() > stops_before);
        assert_eq!(rt.runtime.reasons().last().map(String::as_str), Some("conversation_end"));
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_exhaustion_and_recovery() {
        let mut rt = TestConductor::builder().without_runtime().build();
        rt.settle(Duration::from_secs(25)).await;

        let events = rt.ui_events();
        let seen = statuses(&events);
        assert!(seen.contains(&ConnectionStatus::UnityDisconnected));
        assert_eq!(seen.last(), Some(&ConnectionStatus::UnityFailed));

        rt.publish_runtime();
        rt.runtime_notification(json!({"type": "unity-ready"})).await;
        rt.settle(Duration::from_millis(100)).await;

        assert_eq!(rt.runtime.reasons(), vec!["unity_ready"]);
        assert_eq!(
            statuses(&rt.ui_events()).last(),
            Some(&ConnectionStatus::Connected)
        );
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_is_tested() {
        let rt = TestConductor::builder().build();
        rt.settle(Duration::from_secs(305)).await;
        assert!(rt.runtime.reasons().contains(&"connection_test".to_string()));
        rt.shutdown().await;
    }

    fn diagnostics(events: &[UiEvent]) -> Value {
        events
            .iter()
            .find_map(|e| match e {
                UiEvent::Diagnostics(d) => Some(serde_json::to_value(d).unwrap()),
                _ => None,
            })
            .expect("diagnostics published")
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_turn_cancels_pending_speech_end() {
        let rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.settle(Duration::from_millis(100)).await;

        // 50 characters, six seconds of simulated speech
        rt.transport_event(json!({
            "event": "response",
            "data": {"message": "a".repeat(50), "emotion": "happy"}
        }))
        .await;
        rt.settle(Duration::from_secs(1)).await;
        rt.transport_event(json!({
            "event": "response",
            "data": {"message": "Listen", "emotion": "sad", "audio": "clip"}
        }))
        .await;
        rt.settle(Duration::from_secs(6)).await;

        assert_eq!(
            rt.runtime.reasons(),
            vec!["initialization", "simple_conversation_start", "conversation_start"]
        );
        let last = rt.runtime.payloads().pop().unwrap();
        assert_eq!(last["emotion"], "sad");
        assert_eq!(last["talking"], true);

        let conversation_id = rt.audio.plays()[0].1.clone();
        rt.send(Event::Playback {
            conversation_id,
            outcome: PlaybackOutcome::Finished,
        })
        .await;
        rt.settle(Duration::from_millis(100)).await;
        assert_eq!(rt.runtime.reasons().last().map(String::as_str), Some("conversation_end"));
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_still_settles_simulated_speech() {
        let rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.settle(Duration::from_millis(100)).await;
        rt.transport_event(json!({
            "event": "response",
            "data": {"message": "Hello there", "emotion": "happy"}
        }))
        .await;
        rt.settle(Duration::from_millis(100)).await;
        rt.user_action(json!({"action": "recording_started"})).await;
        rt.settle(Duration::from_secs(5)).await;

        assert_eq!(
            rt.runtime.reasons(),
            vec!["initialization", "simple_conversation_start", "simple_conversation_end"]
        );
        assert_eq!(rt.runtime.payloads()[2]["talking"], false);
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagnostics_snapshot() {
        let mut rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.user_action(json!({"action": "send_text", "text": "What is kimono?"}))
            .await;
        rt.transport_event(json!({
            "event": "response",
            "data": {"message": "A garment", "currentTopic": "kimono"}
        }))
        .await;
        rt.settle(Duration::from_millis(100)).await;
        rt.ui_events();

        rt.user_action(json!({"action": "request_diagnostics"})).await;
        rt.settle(Duration::from_millis(10)).await;
        let report = diagnostics(&rt.ui_events());

        assert_eq!(report["readiness"]["transport_connected"], true);
        assert_eq!(report["readiness"]["avatar_runtime_ready"], true);
        assert_eq!(report["introduction"]["status"], "pending");
        assert!(report["introduction"]["lastExecutionMsAgo"].is_null());

        let history = report["memory"]["history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["role"], "user");
        assert_eq!(history[1]["content"], "A garment");
        assert_eq!(report["memory"]["summary"]["turnCount"], 2);
        assert_eq!(report["memory"]["summary"]["currentTopic"], "kimono");
        assert_eq!(report["memory"]["summary"]["userQuestions"], json!(["What is kimono?"]));

        assert_eq!(report["visitor"]["totalConversations"], 1);
        assert_eq!(report["channel"]["reachability"], "located");
        assert_eq!(report["channel"]["located"], true);
        assert_eq!(report["channel"]["discoveryAttempts"], 0);
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_introduction_request_is_logged() {
        let mut rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.user_action(json!({"action": "test_introduction"})).await;
        rt.settle(Duration::from_millis(500)).await;
        // Inside the throttle window
        rt.user_action(json!({"action": "test_introduction"})).await;
        rt.user_action(json!({"action": "request_diagnostics"})).await;
        rt.settle(Duration::from_millis(10)).await;

        let report = diagnostics(&rt.ui_events());
        let requests = report["introduction"]["requests"].as_array().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r["requester"] == "manual_test"));
        // Nothing to play yet, so the introduction stays available
        assert_eq!(report["introduction"]["status"], "pending");
        let ago = report["introduction"]["lastExecutionMsAgo"].as_u64().unwrap();
        assert!((500..600).contains(&ago));
        assert!(rt.audio.plays().is_empty());
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_introduction_needs_readiness() {
        let mut rt = TestConductor::builder().build();
        rt.user_action(json!({"action": "test_introduction"})).await;
        rt.user_action(json!({"action": "request_diagnostics"})).await;
        rt.settle(Duration::from_millis(10)).await;

        let report = diagnostics(&rt.ui_events());
        assert_eq!(report["introduction"]["requests"], json!([]));
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_selected_suggestion_is_sent_and_remembered() {
        let rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.user_action(json!({"action": "select_suggestion", "text": "Tell me about kimono"}))
            .await;
        rt.settle(Duration::from_millis(10)).await;

        let messages = rt.transport.named("message");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["data"]["message"], "Tell me about kimono");
        assert_eq!(
            messages[0]["data"]["selectedSuggestions"],
            json!(["Tell me about kimono"])
        );
        let saved = rt.store.saved().expect("profile saved");
        assert_eq!(saved.selected_suggestions, vec!["Tell me about kimono"]);
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_audio_emits_recording() {
        let mut rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.ui_events();
        rt.user_action(json!({"action": "send_audio", "audio": "data:audio/webm;base64,AAA"}))
            .await;
        rt.settle(Duration::from_millis(10)).await;

        let sent = rt.transport.named("audio_message");
        assert_eq!(sent.len(), 1);
        let data = &sent[0]["data"];
        assert_eq!(data["audio"], "data:audio/webm;base64,AAA");
        assert_eq!(data["language"], "ja");
        assert_eq!(data["relationshipLevel"], "formal");
        assert_eq!(data["visitorId"], rt.transport.named("visitor_info")[0]["data"]["visitorId"]);
        assert!(data["conversationHistory"].is_array());
        assert_eq!(statuses(&rt.ui_events()), vec![ConnectionStatus::Processing]);
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_audio_requires_transport_and_content() {
        let rt = TestConductor::builder().build();
        rt.user_action(json!({"action": "send_audio", "audio": "clip"})).await;
        rt.transport_event(json!({"event": "connect"})).await;
        rt.user_action(json!({"action": "send_audio", "audio": ""})).await;
        rt.settle(Duration::from_millis(10)).await;
        assert!(rt.transport.named("audio_message").is_empty());
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_transcription_is_counted_and_remembered() {
        let mut rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.ui_events();
        rt.transport_event(json!({
            "event": "transcription",
            "data": {"text": "Where is the museum?"}
        }))
        .await;
        rt.user_action(json!({"action": "request_diagnostics"})).await;
        rt.settle(Duration::from_millis(10)).await;

        let events = rt.ui_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::UserMessage { text } if text == "Where is the museum?")));
        let saved = rt.store.saved().expect("profile saved");
        assert_eq!(
            saved.question_counts.get(&normalize_question("Where is the museum?")),
            Some(&1)
        );
        let report = diagnostics(&events);
        assert_eq!(
            report["memory"]["summary"]["userQuestions"],
            json!(["Where is the museum?"])
        );
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_error_clears_readiness_until_ready_again() {
        let mut rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.ui_events();

        rt.context.remove("unityInstance");
        rt.runtime_notification(json!({"type": "unity-error", "message": "context lost"}))
            .await;
        rt.user_action(json!({"action": "request_diagnostics"})).await;
        rt.settle(Duration::from_millis(10)).await;

        let events = rt.ui_events();
        assert_eq!(statuses(&events), vec![ConnectionStatus::UnityError]);
        let report = diagnostics(&events);
        assert_eq!(report["readiness"]["avatar_runtime_ready"], false);
        assert_eq!(report["channel"]["located"], false);
        assert_eq!(report["channel"]["reachability"], "probing");

        rt.publish_runtime();
        rt.runtime_notification(json!({"type": "unity-ready"})).await;
        rt.user_action(json!({"action": "request_diagnostics"})).await;
        rt.settle(Duration::from_millis(100)).await;

        let events = rt.ui_events();
        assert_eq!(statuses(&events).last(), Some(&ConnectionStatus::Connected));
        let report = diagnostics(&events);
        assert_eq!(report["readiness"]["avatar_runtime_ready"], true);
        assert_eq!(report["channel"]["located"], true);
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_releases_pending_reply() {
        let mut rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.user_action(json!({"action": "send_text", "text": "first"})).await;
        rt.transport_event(json!({"event": "disconnect"})).await;
        rt.user_action(json!({"action": "send_text", "text": "offline"})).await;
        rt.settle(Duration::from_millis(10)).await;
        assert_eq!(
            statuses(&rt.ui_events()).last(),
            Some(&ConnectionStatus::Disconnected)
        );

        rt.transport_event(json!({"event": "connect"})).await;
        rt.user_action(json!({"action": "send_text", "text": "second"})).await;
        rt.settle(Duration::from_millis(10)).await;

        let sent: Vec<Value> = rt
            .transport
            .named("message")
            .iter()
            .map(|m| m["data"]["message"].clone())
            .collect();
        assert_eq!(sent, vec![json!("first"), json!("second")]);
        rt.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_language_applies_to_next_message() {
        let mut rt = TestConductor::builder().build();
        rt.bring_up().await;
        rt.ui_events();
        rt.transport_event(json!({"event": "current_language", "data": {"language": "en"}}))
            .await;
        rt.transport_event(json!({"event": "language_changed", "data": {"language": "fr"}}))
            .await;
        rt.user_action(json!({"action": "send_text", "text": "Bonjour"})).await;
        rt.settle(Duration::from_millis(10)).await;

        let languages: Vec<String> = rt
            .ui_events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::LanguageChanged { language } => Some(language),
                _ => None,
            })
            .collect();
        assert_eq!(languages, vec!["en", "fr"]);
        assert_eq!(rt.transport.named("message")[0]["data"]["language"], "fr");
        // Server-driven changes are not echoed back
        assert!(rt.transport.named("set_language").is_empty());
        rt.shutdown().await;
    }

    #[tokio::test]
    async fn test_recording_runtime_failures() {
        let runtime = RecordingRuntime::new();
        runtime.fail_next(1);
        assert!(runtime.send_message("WebGLBridge", "OnMessage", "{}").is_err());
        assert!(runtime
            .send_message("WebGLBridge", "OnMessage", r#"{"emotion":"happy"}"#)
            .is_ok());
        assert_eq!(runtime.emotions(), vec!["happy"]);
    }

    #[tokio::test]
    async fn test_memory_profile_store() {
        let store = MemoryProfileStore::new();
        assert!(store.load_current().await.unwrap().is_none());
        let profile = VisitorProfile::new(chrono::Utc::now());
        store.save(&profile).await.unwrap();
        assert_eq!(store.load_current().await.unwrap(), Some(profile));

        store.fail_saves();
        assert!(store.save(&VisitorProfile::new(chrono::Utc::now())).await.is_err());
        assert_eq!(store.save_count(), 1);
    }
}
