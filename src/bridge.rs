//! Ordered, retrying delivery channel to the avatar runtime
//!
//! The runtime lives in a foreign execution context that initializes on its
//! own schedule. Messages are queued here and flushed one at a time through
//! the runtime's `SendMessage` capability once a discovery strategy locates
//! it.

mod channel;
pub mod discovery;
mod message;

pub use channel::{AvatarChannel, ChannelTimings, ProbeOutcome, Reachability};
pub use discovery::{
    default_strategies, locate, AvatarRuntime, DiscoveryStrategy, ForeignContext, ForeignValue,
    SharedContext,
};
pub use message::{AvatarMessage, BRIDGE_METHOD, BRIDGE_OBJECT};
