//! Debounced emotion signaling

use crate::bridge::{AvatarChannel, AvatarMessage};
use crate::effect::Effects;
use crate::ids::ConversationId;
use crate::protocol::Emotion;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Why a signal was sent; carried on the wire as `reason`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalReason {
    ConversationStart,
    ConversationEnd,
    Manual,
    Initialization,
    UnityReady,
    ConnectionTest,
    GreetingNoAudio,
    SimpleConversationStart,
    SimpleConversationEnd,
    Emergency,
}

impl SignalReason {
    /// Turn boundaries are never debounced
    pub fn bypasses_debounce(self) -> bool {
        matches!(self, Self::ConversationStart | Self::ConversationEnd)
    }
}

#[derive(Debug, Clone)]
struct Baseline {
    emotion: Emotion,
    talking: bool,
    at: Instant,
}

/// Translates conversation events into avatar channel messages, suppressing
/// repeats of the same `(emotion, talking)` state inside the debounce window.
pub struct EmotionSignaler {
    channel: AvatarChannel,
    session_id: String,
    debounce: Duration,
    last: Option<Baseline>,
}

impl EmotionSignaler {
    pub fn new(channel: AvatarChannel, session_id: String, debounce: Duration) -> Self {
        Self {
            channel,
            session_id,
            debounce,
            last: None,
        }
    }

    /// Returns whether the signal was handed to the channel and accepted
    pub fn signal(
        &mut self,
        emotion: &Emotion,
        talking: bool,
        reason: SignalReason,
        conversation_id: Option<&ConversationId>,
        now: Instant,
        fx: &mut Effects,
    ) -> bool {
        if !reason.bypasses_debounce() && self.is_repeat(emotion, talking, now) {
            tracing::trace!(emotion = %emotion, talking, ?reason, "Signal debounced");
            return false;
        }

        let message = AvatarMessage::emotion(
            emotion.clone(),
            talking,
            reason,
            &self.session_id,
            chrono::Utc::now().timestamp_millis(),
            conversation_id.cloned(),
        );
        if let Err(e) = self.channel.enqueue(message, now, fx) {
            tracing::debug!(error = %e, emotion = %emotion, ?reason, "Emotion signal not queued");
            return false;
        }

        tracing::debug!(
            emotion = %emotion,
            talking,
            ?reason,
            conversation_id = conversation_id.map(ConversationId::as_str),
            "Emotion signal queued"
        );
        self.last = Some(Baseline {
            emotion: emotion.clone(),
            talking,
            at: now,
        });
        true
    }

    fn is_repeat(&self, emotion: &Emotion, talking: bool, now: Instant) -> bool {
        self.last.as_ref().is_some_and(|last| {
            last.emotion == *emotion
                && last.talking == talking
                && now.saturating_duration_since(last.at) < self.debounce
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn channel(&self) -> &AvatarChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut AvatarChannel {
        &mut self.channel
    }
}
