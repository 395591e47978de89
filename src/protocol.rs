//! Wire types exchanged with the transport, the avatar runtime, and the UI

use crate::bridge::Reachability;
use crate::introduction::{IntroStatus, RequestRecord};
use crate::memory::{ConversationTurn, MemorySummary};
use crate::readiness::ReadinessGate;
use crate::relationship::RelationshipLevel;
use crate::visitor::VisitorProfile;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Emotion label understood by the avatar runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Emotion(String);

impl Emotion {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn neutral() -> Self {
        Self::new("neutral")
    }

    pub fn happy() -> Self {
        Self::new("happy")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encoded audio (data URL or base64) handed to the audio collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioClip(String);

impl AudioClip {
    pub fn new(data: impl Into<String>) -> Self {
        Self(data.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Passive connectivity indicator shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    UnityDisconnected,
    UnityFailed,
    UnityError,
    Processing,
    Recording,
    Error,
}

// ============================================================================
// Transport
// ============================================================================

/// Greeting pushed by the server when a session starts
#[derive(Debug, Clone, Deserialize)]
pub struct Greeting {
    pub message: String,
    #[serde(default)]
    pub emotion: Option<Emotion>,
    #[serde(default)]
    pub audio: Option<AudioClip>,
}

/// Assistant reply
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponse {
    pub message: String,
    #[serde(default)]
    pub emotion: Option<Emotion>,
    #[serde(default)]
    pub audio: Option<AudioClip>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub current_topic: Option<String>,
}

/// Events consumed from the transport
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TransportEvent {
    Connect,
    Disconnect,
    CurrentLanguage { language: String },
    LanguageChanged { language: String },
    Greeting(Greeting),
    Response(AssistantResponse),
    ContextAwareResponse(AssistantResponse),
    Transcription { text: String },
    Error { message: String },
}

/// Text message sent to the server
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub message: String,
    pub language: String,
    pub visitor_id: String,
    pub conversation_history: Vec<ConversationTurn>,
    pub question_count: u32,
    pub interaction_count: u32,
    pub relationship_level: String,
    pub selected_suggestions: Vec<String>,
}

/// Recorded audio sent to the server for transcription
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundAudio {
    pub audio: AudioClip,
    pub language: String,
    pub visitor_id: String,
    pub conversation_history: Vec<ConversationTurn>,
    pub interaction_count: u32,
    pub relationship_level: String,
    pub selected_suggestions: Vec<String>,
}

/// Events produced for the transport
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    Message(OutboundMessage),
    AudioMessage(OutboundAudio),
    SetLanguage {
        language: String,
    },
    #[serde(rename_all = "camelCase")]
    VisitorInfo {
        visitor_id: String,
        visit_data: VisitorProfile,
    },
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::AudioMessage(_) => "audio_message",
            Self::SetLanguage { .. } => "set_language",
            Self::VisitorInfo { .. } => "visitor_info",
        }
    }
}

// ============================================================================
// Avatar runtime notifications
// ============================================================================

/// Notifications posted by the avatar runtime's host frame
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuntimeNotification {
    UnityReady,
    UnityFullyInitialized,
    UnityError {
        #[serde(default)]
        message: String,
    },
    AudioComplete,
    StateUpdate {
        #[serde(flatten)]
        state: Map<String, Value>,
    },
}

// ============================================================================
// Local user actions
// ============================================================================

/// Actions taken by the local user
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UserAction {
    SendText { text: String },
    SendAudio { audio: AudioClip },
    RecordingStarted,
    SelectSuggestion { text: String },
    SetLanguage { language: String },
    /// The audio subsystem finished its lazy initialization
    AudioReady,
    /// Ask for a [`UiEvent::Diagnostics`] snapshot
    RequestDiagnostics,
    /// Request the introduction by hand, as `manual_test`
    TestIntroduction,
}

// ============================================================================
// UI notifications
// ============================================================================

/// Presentation events published to whatever renders the front-end
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    StatusChanged {
        status: ConnectionStatus,
    },
    AssistantMessage {
        text: String,
        greeting: bool,
    },
    UserMessage {
        text: String,
    },
    /// `None` asks the renderer for its default suggestion set
    Suggestions {
        suggestions: Option<Vec<String>>,
    },
    RelationshipUpdated {
        level: &'static RelationshipLevel,
        conversations: u32,
        progress: f64,
        next_threshold: Option<u32>,
    },
    LevelUp {
        level: &'static RelationshipLevel,
    },
    LanguageChanged {
        language: String,
    },
    Error {
        message: String,
    },
    Diagnostics(Box<Diagnostics>),
}

/// Point-in-time view of the conductor's internal state
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub readiness: ReadinessGate,
    pub introduction: IntroductionReport,
    pub memory: MemoryReport,
    pub visitor: VisitorProfile,
    pub channel: ChannelReport,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntroductionReport {
    pub status: IntroStatus,
    pub last_execution_ms_ago: Option<u64>,
    pub requests: Vec<RequestRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub summary: MemorySummary,
    pub history: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelReport {
    pub reachability: Reachability,
    /// Whether a runtime handle is cached
    pub located: bool,
    pub pending: usize,
    /// Failed connectivity checks since the runtime was last located
    pub discovery_attempts: u32,
}
