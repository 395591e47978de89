//! Effects produced by component operations
//!
//! Components never sleep, play audio, or talk to the transport themselves.
//! They push effects into an [`Effects`] buffer that the runtime executes
//! after the operation returns.

use crate::ids::ConversationId;
use crate::protocol::{AudioClip, Emotion, OutboundEvent, UiEvent};
use std::time::Duration;

/// Deferred continuations. Each one carries the identity it targets and is
/// ignored on arrival when that identity has moved on.
#[derive(Debug, Clone, PartialEq)]
pub enum Timer {
    /// Next step of the avatar channel's flush loop
    Flush { generation: u64 },
    /// End a turn that was started without audio
    SpeechFallback { conversation_id: ConversationId },
    /// Mark the introduction as completed
    IntroductionComplete,
    /// Assume full initialization if the runtime never announced it
    FullInitTimeout,
    /// Release the level-up cue's in-flight guard
    LevelUpCueEnd,
    /// Stop the talking animation of a response that had no audio
    SimpleSpeechEnd { token: u64, emotion: Emotion },
    /// Publish response suggestions
    ShowSuggestions { token: u64, suggestions: Vec<String> },
    /// Periodic avatar runtime connectivity check
    ConnectivityProbe,
}

/// Effects to be executed after a component operation
#[derive(Debug, Clone)]
pub enum Effect {
    /// Post `timer` back to the event loop after `delay`
    Schedule { delay: Duration, timer: Timer },

    /// Halt every playing audio source
    StopAllAudio,

    /// Start playback bound to a conversation turn
    PlayAudio {
        clip: AudioClip,
        conversation_id: ConversationId,
    },

    /// Send an event over the transport
    Emit(OutboundEvent),

    /// Publish a presentation event
    Notify(UiEvent),

    /// The avatar channel located the runtime
    RuntimeLocated { strategy: &'static str },
}

/// Ordered effect buffer
#[derive(Debug, Default)]
pub struct Effects {
    items: Vec<Effect>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Effect) {
        self.items.push(effect);
    }

    pub fn schedule(&mut self, delay: Duration, timer: Timer) {
        self.items.push(Effect::Schedule { delay, timer });
    }

    pub fn notify(&mut self, event: UiEvent) {
        self.items.push(Effect::Notify(event));
    }

    pub fn emit(&mut self, event: OutboundEvent) {
        self.items.push(Effect::Emit(event));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Effect> {
        self.items.iter()
    }

    /// Timers scheduled so far, in order
    pub fn scheduled(&self) -> impl Iterator<Item = (Duration, &Timer)> {
        self.items.iter().filter_map(|e| match e {
            Effect::Schedule { delay, timer } => Some((*delay, timer)),
            _ => None,
        })
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Effect> {
        self.items.drain(..)
    }
}

impl IntoIterator for Effects {
    type Item = Effect;
    type IntoIter = std::vec::IntoIter<Effect>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
