//! Wire message consumed by the avatar runtime

use crate::ids::ConversationId;
use crate::protocol::Emotion;
use crate::signal::SignalReason;
use serde::{Deserialize, Serialize};

/// Target object inside the runtime
pub const BRIDGE_OBJECT: &str = "WebGLBridge";
/// Method invoked on [`BRIDGE_OBJECT`] with the serialized message
pub const BRIDGE_METHOD: &str = "OnMessage";

/// One emotion/state update for the avatar.
///
/// `sequence` is overwritten by the channel at enqueue time with the queue
/// length before the push, so it restarts at zero whenever the queue drains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvatarMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub emotion: Emotion,
    pub talking: bool,
    pub sequence: usize,
    pub session_id: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub reason: SignalReason,
    pub conversation_id: Option<ConversationId>,
}

impl AvatarMessage {
    pub fn emotion(
        emotion: Emotion,
        talking: bool,
        reason: SignalReason,
        session_id: &str,
        timestamp: i64,
        conversation_id: Option<ConversationId>,
    ) -> Self {
        Self {
            kind: "emotion".to_string(),
            emotion,
            talking,
            sequence: 0,
            session_id: session_id.to_string(),
            timestamp,
            reason,
            conversation_id,
        }
    }
}
