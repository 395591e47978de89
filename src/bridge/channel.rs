//! Ordered delivery queue with discovery, throttling, and head reinsertion

use super::discovery::{locate, AvatarRuntime, DiscoveryStrategy, ForeignContext};
use super::message::{AvatarMessage, BRIDGE_METHOD, BRIDGE_OBJECT};
use crate::config::Timings;
use crate::effect::{Effect, Effects, Timer};
use crate::error::BridgeError;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Flush loop delays
#[derive(Debug, Clone, Copy)]
pub struct ChannelTimings {
    /// After a successful delivery
    pub throttle: Duration,
    /// While the runtime cannot be located
    pub discovery_backoff: Duration,
    /// After a failed foreign call
    pub delivery_retry: Duration,
}

impl From<&Timings> for ChannelTimings {
    fn from(t: &Timings) -> Self {
        Self {
            throttle: t.flush_throttle(),
            discovery_backoff: t.discovery_backoff(),
            delivery_retry: t.delivery_retry(),
        }
    }
}

/// Whether the runtime is believed to be reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    /// Not located yet, discovery keeps retrying
    Probing,
    /// A handle is cached
    Located,
    /// Probing exhausted its attempts; parked until `resume_probing`
    Failed,
}

/// Result of one periodic connectivity probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Discovery succeeded on this probe
    Located,
    /// Still not found
    Retrying { attempt: u32, max: u32 },
    /// Attempts used up on this probe; the channel is now `Failed`
    Exhausted,
    /// Already failed, nothing was attempted
    Parked,
    /// Handle cached; `idle` is the time since the last delivery or discovery
    Healthy { idle: Duration },
}

struct RuntimeHandle {
    runtime: Arc<dyn AvatarRuntime>,
    strategy: &'static str,
}

/// Exclusive owner of the pending-message queue.
///
/// The flush loop is a chain of [`Timer::Flush`] continuations. `flushing` is
/// true while a continuation is outstanding, so re-entrant flush requests are
/// no-ops. Each continuation carries the loop generation it belongs to and is
/// ignored once the loop has been restarted.
pub struct AvatarChannel {
    context: Arc<dyn ForeignContext>,
    strategies: Vec<Box<dyn DiscoveryStrategy>>,
    handle: Option<RuntimeHandle>,
    queue: VecDeque<AvatarMessage>,
    flushing: bool,
    generation: u64,
    probe_attempts: u32,
    max_probe_attempts: u32,
    reachability: Reachability,
    last_activity: Option<Instant>,
    timings: ChannelTimings,
}

impl AvatarChannel {
    pub fn new(
        context: Arc<dyn ForeignContext>,
        strategies: Vec<Box<dyn DiscoveryStrategy>>,
        timings: ChannelTimings,
        max_probe_attempts: u32,
    ) -> Self {
        Self {
            context,
            strategies,
            handle: None,
            queue: VecDeque::new(),
            flushing: false,
            generation: 0,
            probe_attempts: 0,
            max_probe_attempts,
            reachability: Reachability::Probing,
            last_activity: None,
            timings,
        }
    }

    /// Queue `message` for delivery.
    ///
    /// Fails with [`BridgeError::RuntimeUnreachable`], dropping the message,
    /// only when connectivity has been declared failed and one more discovery
    /// attempt also fails.
    pub fn enqueue(
        &mut self,
        mut message: AvatarMessage,
        now: Instant,
        fx: &mut Effects,
    ) -> Result<(), BridgeError> {
        let parked = self.handle.is_none() && self.reachability == Reachability::Failed;
        if parked && !self.discover(now, fx) {
            tracing::warn!(
                emotion = %message.emotion,
                reason = ?message.reason,
                "Avatar runtime unreachable, dropping message"
            );
            return Err(BridgeError::RuntimeUnreachable);
        }

        message.sequence = self.queue.len();
        self.queue.push_back(message);

        if !self.flushing {
            self.flush(now, fx);
        }
        Ok(())
    }

    /// Continuation of the flush loop
    pub fn on_flush_timer(&mut self, generation: u64, now: Instant, fx: &mut Effects) {
        if generation != self.generation {
            tracing::trace!(generation, current = self.generation, "Stale flush timer");
            return;
        }
        self.flushing = false;
        self.flush(now, fx);
    }

    fn flush(&mut self, now: Instant, fx: &mut Effects) {
        if self.queue.is_empty() {
            self.flushing = false;
            return;
        }
        self.flushing = true;

        if self.handle.is_none() && !self.discover(now, fx) {
            if self.reachability == Reachability::Failed {
                tracing::debug!(pending = self.queue.len(), "Flush parked until runtime resumes");
                self.flushing = false;
            } else {
                self.reschedule(self.timings.discovery_backoff, fx);
            }
            return;
        }

        let Some(handle) = &self.handle else {
            self.flushing = false;
            return;
        };
        let Some(message) = self.queue.pop_front() else {
            self.flushing = false;
            return;
        };

        let payload = match serde_json::to_string(&message) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Dropping unserializable avatar message");
                self.reschedule(self.timings.throttle, fx);
                return;
            }
        };

        match handle.runtime.send_message(BRIDGE_OBJECT, BRIDGE_METHOD, &payload) {
            Ok(()) => {
                tracing::debug!(
                    emotion = %message.emotion,
                    talking = message.talking,
                    sequence = message.sequence,
                    pending = self.queue.len(),
                    "Delivered avatar message"
                );
                self.last_activity = Some(now);
                self.reschedule(self.timings.throttle, fx);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    strategy = handle.strategy,
                    "Avatar delivery failed, requeueing at head"
                );
                self.queue.push_front(message);
                self.reschedule(self.timings.delivery_retry, fx);
            }
        }
    }

    fn reschedule(&mut self, delay: Duration, fx: &mut Effects) {
        self.flushing = true;
        fx.schedule(
            delay,
            Timer::Flush {
                generation: self.generation,
            },
        );
    }

    /// Abandon any outstanding flush continuation
    fn restart_loop(&mut self) {
        self.generation += 1;
        self.flushing = false;
    }

    /// Run the discovery strategies once, caching the handle on success
    pub fn discover(&mut self, now: Instant, fx: &mut Effects) -> bool {
        if self.handle.is_some() {
            return true;
        }
        let Some((strategy, runtime)) = locate(&self.strategies, self.context.as_ref()) else {
            return false;
        };
        tracing::info!(strategy, "Avatar runtime located");
        self.handle = Some(RuntimeHandle { runtime, strategy });
        self.reachability = Reachability::Located;
        self.probe_attempts = 0;
        self.last_activity = Some(now);
        fx.push(Effect::RuntimeLocated { strategy });
        true
    }

    /// One tick of the periodic connectivity check
    pub fn probe(&mut self, now: Instant, fx: &mut Effects) -> ProbeOutcome {
        if self.handle.is_some() {
            let idle = self
                .last_activity
                .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
            return ProbeOutcome::Healthy { idle };
        }
        if self.reachability == Reachability::Failed {
            return ProbeOutcome::Parked;
        }
        if self.discover(now, fx) {
            if !self.flushing {
                self.flush(now, fx);
            }
            return ProbeOutcome::Located;
        }

        self.probe_attempts += 1;
        if self.probe_attempts >= self.max_probe_attempts {
            tracing::error!(
                attempts = self.probe_attempts,
                pending = self.queue.len(),
                "Avatar runtime unreachable, giving up until it reports ready"
            );
            self.reachability = Reachability::Failed;
            self.restart_loop();
            return ProbeOutcome::Exhausted;
        }
        tracing::debug!(attempt = self.probe_attempts, max = self.max_probe_attempts, "Avatar runtime not found");
        ProbeOutcome::Retrying {
            attempt: self.probe_attempts,
            max: self.max_probe_attempts,
        }
    }

    /// Re-arm discovery after the runtime announced itself.
    ///
    /// Drops any cached handle so the freshly published runtime is used, then
    /// restarts the flush loop. Returns whether the runtime was located.
    pub fn resume_probing(&mut self, now: Instant, fx: &mut Effects) -> bool {
        self.handle = None;
        self.reachability = Reachability::Probing;
        self.probe_attempts = 0;
        self.restart_loop();
        let located = self.discover(now, fx);
        self.flush(now, fx);
        located
    }

    /// Forget the cached handle; the next flush rediscovers
    pub fn invalidate(&mut self) {
        if self.handle.take().is_some() {
            tracing::info!("Avatar runtime handle invalidated");
        }
        if self.reachability == Reachability::Located {
            self.reachability = Reachability::Probing;
        }
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn reachability(&self) -> Reachability {
        self.reachability
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    pub fn probe_attempts(&self) -> u32 {
        self.probe_attempts
    }
}
