//! Runtime for driving the conductor
//!
//! A single task owns every component and processes [`Event`]s one at a
//! time. Timers are spawned sleeps that post [`Event::Timer`] back onto the
//! same channel.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::Conductor;
pub use traits::*;

use crate::effect::Timer;
use crate::ids::ConversationId;
use crate::protocol::{RuntimeNotification, TransportEvent, UserAction};

/// How a playback ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Failed(String),
}

/// Everything the conductor reacts to
#[derive(Debug, Clone)]
pub enum Event {
    Transport(TransportEvent),
    Runtime(RuntimeNotification),
    User(UserAction),
    Timer(Timer),
    Playback {
        conversation_id: ConversationId,
        outcome: PlaybackOutcome,
    },
}
