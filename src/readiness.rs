//! Aggregate readiness of the transport, avatar runtime, and audio subsystems

use serde::Serialize;

/// Readiness flags for the three subsystems.
///
/// The runtime contributes two flags: `ready` once its handle has been
/// located, `fully_initialized` once it announced (or was assumed to have
/// finished) its own startup.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReadinessGate {
    transport_connected: bool,
    avatar_runtime_ready: bool,
    avatar_runtime_fully_initialized: bool,
    audio_initialized: bool,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stricter gate used by the introduction workflow
    pub fn is_fully_ready(&self) -> bool {
        self.avatar_runtime_ready
            && self.avatar_runtime_fully_initialized
            && self.transport_connected
            && self.audio_initialized
    }

    /// Gate for ordinary signaling
    pub fn is_minimally_ready(&self) -> bool {
        self.avatar_runtime_ready && self.transport_connected && self.audio_initialized
    }

    pub fn set_transport_connected(&mut self, connected: bool) {
        self.transport_connected = connected;
    }

    pub fn set_avatar_runtime_ready(&mut self, ready: bool) {
        self.avatar_runtime_ready = ready;
    }

    pub fn set_audio_initialized(&mut self, initialized: bool) {
        self.audio_initialized = initialized;
    }

    /// Record full initialization of the runtime.
    ///
    /// Returns true only on the false→true edge; the caller must then notify
    /// the single readiness listener (the introduction orchestrator).
    pub fn mark_fully_initialized(&mut self) -> bool {
        let edge = !self.avatar_runtime_fully_initialized;
        self.avatar_runtime_fully_initialized = true;
        edge
    }

    pub fn transport_connected(&self) -> bool {
        self.transport_connected
    }

    pub fn avatar_runtime_ready(&self) -> bool {
        self.avatar_runtime_ready
    }

    pub fn avatar_runtime_fully_initialized(&self) -> bool {
        self.avatar_runtime_fully_initialized
    }

    pub fn audio_initialized(&self) -> bool {
        self.audio_initialized
    }
}
