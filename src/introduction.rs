//! One-shot, readiness-gated introduction workflow
//!
//! Several event sources (greeting arrival, runtime readiness, audio
//! initialization) may each try to start the introduction. The orchestrator
//! admits at most one of them, buffers the content while the avatar runtime
//! is not fully ready, and never runs again once completed.

use crate::effect::{Effects, Timer};
use crate::lifecycle::ConversationLifecycle;
use crate::protocol::{AudioClip, Emotion};
use crate::readiness::ReadinessGate;
use crate::signal::EmotionSignaler;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntroStatus {
    Pending,
    Running,
    WaitingExternal,
    /// Terminal for the process lifetime
    Completed,
}

/// Content of the introduction
#[derive(Debug, Clone, PartialEq)]
pub struct IntroductionPayload {
    pub emotion: Option<Emotion>,
    pub audio: Option<AudioClip>,
}

/// One start attempt, admitted or not
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub requester: String,
    pub at: DateTime<Utc>,
    /// Status at the time of the request
    pub status: IntroStatus,
}

/// Why a start attempt was refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("introduction already completed")]
    AlreadyCompleted,
    #[error("introduction already in flight")]
    InFlight,
    #[error("throttled, last attempt {elapsed:?} ago")]
    Throttled { elapsed: Duration },
}

/// Collaborators the orchestrator drives while executing
pub struct IntroContext<'a> {
    pub gate: &'a ReadinessGate,
    pub lifecycle: &'a mut ConversationLifecycle,
    pub signaler: &'a mut EmotionSignaler,
    pub fx: &'a mut Effects,
    pub now: Instant,
}

pub struct IntroductionOrchestrator {
    status: IntroStatus,
    last_execution: Option<Instant>,
    pending: Option<IntroductionPayload>,
    requester_log: Vec<RequestRecord>,
    throttle: Duration,
    horizon: Duration,
}

impl IntroductionOrchestrator {
    pub fn new(throttle: Duration, horizon: Duration) -> Self {
        Self {
            status: IntroStatus::Pending,
            last_execution: None,
            pending: None,
            requester_log: Vec::new(),
            throttle,
            horizon,
        }
    }

    /// Try to start the introduction on behalf of `requester`
    pub fn start(
        &mut self,
        requester: &str,
        payload: Option<IntroductionPayload>,
        ctx: &mut IntroContext<'_>,
    ) -> bool {
        self.requester_log.push(RequestRecord {
            requester: requester.to_string(),
            at: Utc::now(),
            status: self.status,
        });

        if let Err(rejection) = self.admit(ctx.now) {
            tracing::debug!(requester, %rejection, "Introduction request rejected");
            return false;
        }
        self.last_execution = Some(ctx.now);

        if !ctx.gate.is_fully_ready() {
            tracing::info!(requester, "Introduction waiting for avatar runtime");
            self.status = IntroStatus::WaitingExternal;
            self.pending = payload;
            return true;
        }

        tracing::info!(requester, "Introduction started");
        self.status = IntroStatus::Running;
        self.execute(payload, ctx);
        true
    }

    fn admit(&self, now: Instant) -> Result<(), Rejection> {
        match self.status {
            IntroStatus::Completed => return Err(Rejection::AlreadyCompleted),
            IntroStatus::Running | IntroStatus::WaitingExternal => return Err(Rejection::InFlight),
            IntroStatus::Pending => {}
        }
        if let Some(last) = self.last_execution {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.throttle {
                return Err(Rejection::Throttled { elapsed });
            }
        }
        Ok(())
    }

    fn execute(&mut self, payload: Option<IntroductionPayload>, ctx: &mut IntroContext<'_>) {
        match payload {
            Some(IntroductionPayload {
                emotion,
                audio: Some(audio),
            }) => {
                let emotion = emotion.unwrap_or_else(Emotion::happy);
                ctx.lifecycle
                    .start(emotion, Some(audio), ctx.signaler, ctx.now, ctx.fx);
                ctx.fx.schedule(self.horizon, Timer::IntroductionComplete);
            }
            _ => {
                tracing::debug!("Introduction has no audio yet, waiting for content");
                self.status = IntroStatus::Pending;
            }
        }
    }

    /// Readiness listener: resume a buffered introduction exactly once
    pub fn on_runtime_ready(&mut self, ctx: &mut IntroContext<'_>) -> bool {
        if self.status != IntroStatus::WaitingExternal {
            return false;
        }
        tracing::info!("Avatar runtime ready, resuming introduction");
        self.status = IntroStatus::Running;
        let payload = self.pending.take();
        self.execute(payload, ctx);
        true
    }

    pub fn complete(&mut self) {
        if self.status == IntroStatus::Completed {
            return;
        }
        self.status = IntroStatus::Completed;
        self.pending = None;
        tracing::info!(requests = self.requester_log.len(), "Introduction completed");
    }

    pub fn status(&self) -> IntroStatus {
        self.status
    }

    /// When the last admitted request was executed or buffered
    pub fn last_execution(&self) -> Option<Instant> {
        self.last_execution
    }

    pub fn requester_log(&self) -> &[RequestRecord] {
        &self.requester_log
    }

    pub fn pending_payload(&self) -> Option<&IntroductionPayload> {
        self.pending.as_ref()
    }
}
