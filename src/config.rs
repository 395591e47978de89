//! Conductor configuration
//!
//! Every timing constant and capacity used by the components lives here so a
//! deployment can tune them through the environment without code changes.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Timer durations, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Pause between two successful deliveries to the avatar runtime
    pub flush_throttle_ms: u64,
    /// Retry delay while the avatar runtime cannot be discovered
    pub discovery_backoff_ms: u64,
    /// Retry delay after a failed foreign call
    pub delivery_retry_ms: u64,
    /// Interval of the periodic connectivity probe
    pub connectivity_probe_ms: u64,
    /// Idle time after which a connection test signal is sent
    pub idle_probe_after_ms: u64,
    /// Time after which the runtime is assumed fully initialized
    pub full_init_timeout_ms: u64,
    /// Window in which identical emotion signals are suppressed
    pub debounce_ms: u64,
    /// Speaking time of a turn started without audio
    pub speech_fallback_ms: u64,
    /// Minimum spacing between introduction attempts
    pub intro_throttle_ms: u64,
    /// Upper bound on the introduction's duration
    pub intro_horizon_ms: u64,
    /// How long a level-up cue is considered in flight
    pub level_up_cue_ms: u64,
    /// Suggestion display delay while a turn is speaking
    pub suggestions_active_delay_ms: u64,
    /// Suggestion display delay while idle
    pub suggestions_idle_delay_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            flush_throttle_ms: 30,
            discovery_backoff_ms: 500,
            delivery_retry_ms: 1000,
            connectivity_probe_ms: 2000,
            idle_probe_after_ms: 5 * 60 * 1000,
            full_init_timeout_ms: 3000,
            debounce_ms: 50,
            speech_fallback_ms: 2000,
            intro_throttle_ms: 3000,
            intro_horizon_ms: 5000,
            level_up_cue_ms: 3000,
            suggestions_active_delay_ms: 3000,
            suggestions_idle_delay_ms: 500,
        }
    }
}

impl Timings {
    pub fn flush_throttle(&self) -> Duration {
        Duration::from_millis(self.flush_throttle_ms)
    }

    pub fn discovery_backoff(&self) -> Duration {
        Duration::from_millis(self.discovery_backoff_ms)
    }

    pub fn delivery_retry(&self) -> Duration {
        Duration::from_millis(self.delivery_retry_ms)
    }

    pub fn connectivity_probe(&self) -> Duration {
        Duration::from_millis(self.connectivity_probe_ms)
    }

    pub fn idle_probe_after(&self) -> Duration {
        Duration::from_millis(self.idle_probe_after_ms)
    }

    pub fn full_init_timeout(&self) -> Duration {
        Duration::from_millis(self.full_init_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn speech_fallback(&self) -> Duration {
        Duration::from_millis(self.speech_fallback_ms)
    }

    pub fn intro_throttle(&self) -> Duration {
        Duration::from_millis(self.intro_throttle_ms)
    }

    pub fn intro_horizon(&self) -> Duration {
        Duration::from_millis(self.intro_horizon_ms)
    }

    pub fn level_up_cue(&self) -> Duration {
        Duration::from_millis(self.level_up_cue_ms)
    }

    pub fn suggestions_delay(&self, turn_active: bool) -> Duration {
        if turn_active {
            Duration::from_millis(self.suggestions_active_delay_ms)
        } else {
            Duration::from_millis(self.suggestions_idle_delay_ms)
        }
    }
}

/// Capacities of the bounded collections
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Failed connectivity probes before the runtime is declared unreachable
    pub max_discovery_attempts: u32,
    /// Turns retained in conversation memory
    pub memory_turns: usize,
    /// Previous topics retained in conversation memory
    pub previous_topics: usize,
    /// Selected suggestions retained in the visitor profile
    pub selected_suggestions: usize,
    /// Turns sent along with each outbound message
    pub context_turns: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_discovery_attempts: 10,
            memory_turns: 20,
            previous_topics: 5,
            selected_suggestions: 100,
            context_turns: 5,
        }
    }
}

/// Conductor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// SQLite file holding the visitor profile
    pub db_path: Option<PathBuf>,
    /// Preferred language announced to the transport on connect
    pub language: Option<String>,
    pub timings: Timings,
    pub limits: Limits,
}

impl ConductorConfig {
    /// Build configuration from `AVATAR_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Timings::default();
        let limits = Limits::default();
        Self {
            db_path: std::env::var("AVATAR_DB_PATH").ok().map(PathBuf::from),
            language: std::env::var("AVATAR_LANGUAGE").ok(),
            timings: Timings {
                flush_throttle_ms: env_or("AVATAR_FLUSH_THROTTLE_MS", defaults.flush_throttle_ms),
                discovery_backoff_ms: env_or(
                    "AVATAR_DISCOVERY_BACKOFF_MS",
                    defaults.discovery_backoff_ms,
                ),
                delivery_retry_ms: env_or("AVATAR_DELIVERY_RETRY_MS", defaults.delivery_retry_ms),
                connectivity_probe_ms: env_or(
                    "AVATAR_CONNECTIVITY_PROBE_MS",
                    defaults.connectivity_probe_ms,
                ),
                full_init_timeout_ms: env_or(
                    "AVATAR_FULL_INIT_TIMEOUT_MS",
                    defaults.full_init_timeout_ms,
                ),
                debounce_ms: env_or("AVATAR_DEBOUNCE_MS", defaults.debounce_ms),
                speech_fallback_ms: env_or("AVATAR_SPEECH_FALLBACK_MS", defaults.speech_fallback_ms),
                ..defaults
            },
            limits: Limits {
                max_discovery_attempts: env_or(
                    "AVATAR_MAX_DISCOVERY_ATTEMPTS",
                    limits.max_discovery_attempts,
                ),
                ..limits
            },
        }
    }

    /// Reject values that would stall or disable a component
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timings.flush_throttle_ms == 0 {
            return Err(ConfigError("flush throttle must be at least 1 ms".to_string()));
        }
        if self.timings.connectivity_probe_ms == 0 {
            return Err(ConfigError("connectivity probe interval must be at least 1 ms".to_string()));
        }
        if self.limits.memory_turns == 0 {
            return Err(ConfigError("memory must retain at least one turn".to_string()));
        }
        if self.limits.context_turns > self.limits.memory_turns {
            return Err(ConfigError(format!(
                "context turns ({}) cannot exceed memory turns ({})",
                self.limits.context_turns, self.limits.memory_turns
            )));
        }
        if let Some(language) = &self.language {
            if language.is_empty() || language.len() > 16 {
                return Err(ConfigError(format!("unsupported language tag {language:?}")));
            }
        }
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
