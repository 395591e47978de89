//! Trait abstractions for conductor I/O
//!
//! These traits enable testing the conductor with mock implementations.

use crate::db::Database;
use crate::error::{PlaybackError, TransportError};
use crate::ids::ConversationId;
use crate::protocol::{AudioClip, OutboundEvent};
use crate::visitor::VisitorProfile;
use async_trait::async_trait;
use std::sync::Arc;

/// Audio output. Playback completion is reported back as an
/// [`Event::Playback`](crate::runtime::Event::Playback).
pub trait AudioSink: Send + Sync {
    /// Start playing `clip` for the given turn
    fn play(&self, clip: &AudioClip, conversation_id: &ConversationId) -> Result<(), PlaybackError>;

    /// Halt every playing source
    fn stop_all(&self);
}

/// Outbound side of the server transport
#[async_trait]
pub trait TransportSink: Send + Sync {
    async fn emit(&self, event: &OutboundEvent) -> Result<(), TransportError>;
}

/// Storage for the visitor profile
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Profile of the visitor owning this installation
    async fn load_current(&self) -> Result<Option<VisitorProfile>, String>;

    /// Persist the profile and make it current
    async fn save(&self, profile: &VisitorProfile) -> Result<(), String>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

impl<T: AudioSink + ?Sized> AudioSink for Arc<T> {
    fn play(&self, clip: &AudioClip, conversation_id: &ConversationId) -> Result<(), PlaybackError> {
        (**self).play(clip, conversation_id)
    }

    fn stop_all(&self) {
        (**self).stop_all();
    }
}

#[async_trait]
impl<T: TransportSink + ?Sized> TransportSink for Arc<T> {
    async fn emit(&self, event: &OutboundEvent) -> Result<(), TransportError> {
        (**self).emit(event).await
    }
}

#[async_trait]
impl<T: ProfileStore + ?Sized> ProfileStore for Arc<T> {
    async fn load_current(&self) -> Result<Option<VisitorProfile>, String> {
        (**self).load_current().await
    }

    async fn save(&self, profile: &VisitorProfile) -> Result<(), String> {
        (**self).save(profile).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as `ProfileStore`
#[derive(Clone)]
pub struct DatabaseProfileStore {
    db: Database,
}

impl DatabaseProfileStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProfileStore for DatabaseProfileStore {
    async fn load_current(&self) -> Result<Option<VisitorProfile>, String> {
        self.db.load_current_profile().map_err(|e| e.to_string())
    }

    async fn save(&self, profile: &VisitorProfile) -> Result<(), String> {
        self.db.save_profile(profile).map_err(|e| e.to_string())
    }
}
