//! Conversation turn lifecycle bound to audio playback
//!
//! A turn is `idle -> active -> idle`. Starting a turn halts whatever audio
//! is playing, signals the turn's emotion, and then either plays the turn's
//! audio or arms a fixed fallback timer. Both completion paths carry the
//! conversation id they were started for, so a completion arriving after a
//! newer turn began is ignored.

use crate::effect::{Effect, Effects, Timer};
use crate::ids::ConversationId;
use crate::protocol::{AudioClip, Emotion};
use crate::signal::{EmotionSignaler, SignalReason};
use std::time::Duration;
use tokio::time::Instant;

/// The single active turn
#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub conversation_id: ConversationId,
    pub started_at: Instant,
    pub emotion: Emotion,
    pub audio: Option<AudioClip>,
}

pub struct ConversationLifecycle {
    session: Option<ConversationSession>,
    /// Turn whose audio is currently playing
    playing: Option<ConversationId>,
    speech_fallback: Duration,
}

impl ConversationLifecycle {
    pub fn new(speech_fallback: Duration) -> Self {
        Self {
            session: None,
            playing: None,
            speech_fallback,
        }
    }

    pub fn start(
        &mut self,
        emotion: Emotion,
        audio: Option<AudioClip>,
        signaler: &mut EmotionSignaler,
        now: Instant,
        fx: &mut Effects,
    ) -> ConversationId {
        self.stop_all_audio(fx);

        let conversation_id = ConversationId::generate(chrono::Utc::now());
        tracing::info!(
            conversation_id = %conversation_id,
            emotion = %emotion,
            has_audio = audio.is_some(),
            "Conversation turn started"
        );

        signaler.signal(
            &emotion,
            true,
            SignalReason::ConversationStart,
            Some(&conversation_id),
            now,
            fx,
        );

        match &audio {
            Some(clip) if self.playing.is_none() => {
                self.playing = Some(conversation_id.clone());
                fx.push(Effect::PlayAudio {
                    clip: clip.clone(),
                    conversation_id: conversation_id.clone(),
                });
            }
            Some(_) => {}
            None => fx.schedule(
                self.speech_fallback,
                Timer::SpeechFallback {
                    conversation_id: conversation_id.clone(),
                },
            ),
        }

        self.session = Some(ConversationSession {
            conversation_id: conversation_id.clone(),
            started_at: now,
            emotion,
            audio,
        });
        conversation_id
    }

    /// End the current turn, always returning the avatar to neutral
    pub fn end(&mut self, signaler: &mut EmotionSignaler, now: Instant, fx: &mut Effects) {
        let session = self.session.take();
        let conversation_id = session.as_ref().map(|s| s.conversation_id.clone());
        if let Some(s) = &session {
            tracing::info!(
                conversation_id = %s.conversation_id,
                elapsed = ?now.saturating_duration_since(s.started_at),
                "Conversation turn ended"
            );
        }
        self.playing = None;
        signaler.signal(
            &Emotion::neutral(),
            false,
            SignalReason::ConversationEnd,
            conversation_id.as_ref(),
            now,
            fx,
        );
    }

    /// Halt playback; pending completions for it become stale
    pub fn stop_all_audio(&mut self, fx: &mut Effects) {
        self.playing = None;
        fx.push(Effect::StopAllAudio);
    }

    /// Audio for `conversation_id` finished or failed
    pub fn on_playback_finished(
        &mut self,
        conversation_id: &ConversationId,
        signaler: &mut EmotionSignaler,
        now: Instant,
        fx: &mut Effects,
    ) -> bool {
        if self.playing.as_ref() != Some(conversation_id) || !self.is_current(conversation_id) {
            tracing::debug!(conversation_id = %conversation_id, "Ignoring stale playback completion");
            return false;
        }
        self.end(signaler, now, fx);
        true
    }

    /// The no-audio fallback timer for `conversation_id` elapsed
    pub fn on_fallback_elapsed(
        &mut self,
        conversation_id: &ConversationId,
        signaler: &mut EmotionSignaler,
        now: Instant,
        fx: &mut Effects,
    ) -> bool {
        if !self.is_current(conversation_id) {
            tracing::debug!(conversation_id = %conversation_id, "Ignoring stale speech fallback");
            return false;
        }
        self.end(signaler, now, fx);
        true
    }

    fn is_current(&self, conversation_id: &ConversationId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| &s.conversation_id == conversation_id)
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.is_some()
    }

    pub fn session(&self) -> Option<&ConversationSession> {
        self.session.as_ref()
    }
}
