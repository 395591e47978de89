//! Relationship level derived from the lifetime conversation count
//!
//! [`calculate_level`] and [`calculate_progress`] are pure. The
//! [`RelationshipTracker`] layers the level-up cue on top of them.

use crate::effect::{Effects, Timer};
use crate::protocol::UiEvent;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipLevel {
    pub level: u8,
    pub min_conversations: u32,
    pub max_conversations: u32,
    pub name: &'static str,
    pub name_en: &'static str,
    /// Conversation register requested from the server
    pub style: &'static str,
    pub description: &'static str,
}

pub static LEVELS: [RelationshipLevel; 6] = [
    RelationshipLevel {
        level: 0,
        min_conversations: 0,
        max_conversations: 0,
        name: "初対面",
        name_en: "First Meeting",
        style: "formal",
        description: "はじめまして！",
    },
    RelationshipLevel {
        level: 1,
        min_conversations: 1,
        max_conversations: 2,
        name: "興味あり",
        name_en: "Interested",
        style: "slightly_casual",
        description: "どんどん興味が湧いてきた？",
    },
    RelationshipLevel {
        level: 2,
        min_conversations: 3,
        max_conversations: 4,
        name: "知り合い",
        name_en: "Acquaintance",
        style: "casual",
        description: "もっとお話しよう♪",
    },
    RelationshipLevel {
        level: 3,
        min_conversations: 5,
        max_conversations: 7,
        name: "お友達",
        name_en: "Friend",
        style: "friendly",
        description: "かなり詳しくなってきたね！",
    },
    RelationshipLevel {
        level: 4,
        min_conversations: 8,
        max_conversations: 10,
        name: "友禅マスター",
        name_en: "Master of Yuzen",
        style: "friend",
        description: "もう友禅マスターやね！",
    },
    RelationshipLevel {
        level: 5,
        min_conversations: 11,
        max_conversations: 999,
        name: "親友",
        name_en: "Best Friend",
        style: "bestfriend",
        description: "もう親友やね",
    },
];

/// Highest level whose minimum is at most `count`
pub fn calculate_level(count: u32) -> &'static RelationshipLevel {
    LEVELS
        .iter()
        .rev()
        .find(|l| l.min_conversations <= count)
        .unwrap_or(&LEVELS[0])
}

/// Level following `level`, if any
pub fn next_level(level: &RelationshipLevel) -> Option<&'static RelationshipLevel> {
    LEVELS.get(usize::from(level.level) + 1)
}

/// Percentage towards the next level, 100 at the top
pub fn calculate_progress(level: &RelationshipLevel, count: u32) -> f64 {
    let Some(next) = next_level(level) else {
        return 100.0;
    };
    let span = f64::from(next.min_conversations) - f64::from(level.min_conversations);
    let progress = (f64::from(count) - f64::from(level.min_conversations)) / span * 100.0;
    progress.clamp(0.0, 100.0)
}

/// Outcome of [`RelationshipTracker::observe`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelUpdate {
    pub level: &'static RelationshipLevel,
    pub progress: f64,
    pub leveled_up: bool,
}

/// Tracks the last celebrated level and the in-flight cue
#[derive(Debug)]
pub struct RelationshipTracker {
    previous_level: u8,
    cue_in_flight: bool,
    cue_duration: Duration,
}

impl RelationshipTracker {
    pub fn new(cue_duration: Duration) -> Self {
        Self {
            previous_level: 0,
            cue_in_flight: false,
            cue_duration,
        }
    }

    /// Adopt the level of a persisted count without celebrating it
    pub fn restore(&mut self, count: u32) -> &'static RelationshipLevel {
        let level = calculate_level(count);
        self.previous_level = level.level;
        level
    }

    /// Publish the level for `count` without any cue
    pub fn publish(count: u32, fx: &mut Effects) -> (&'static RelationshipLevel, f64) {
        let level = calculate_level(count);
        let progress = calculate_progress(level, count);
        fx.notify(UiEvent::RelationshipUpdated {
            level,
            conversations: count,
            progress,
            next_threshold: next_level(level).map(|l| l.min_conversations),
        });
        (level, progress)
    }

    /// Publish the level for `count`, firing the cue on a new level
    pub fn observe(&mut self, count: u32, fx: &mut Effects) -> LevelUpdate {
        let (level, progress) = Self::publish(count, fx);

        let leveled_up = level.level > self.previous_level && !self.cue_in_flight;
        if leveled_up {
            tracing::info!(level = level.level, name = level.name_en, count, "Relationship level up");
            self.cue_in_flight = true;
            self.previous_level = level.level;
            fx.notify(UiEvent::LevelUp { level });
            fx.schedule(self.cue_duration, Timer::LevelUpCueEnd);
        }

        LevelUpdate {
            level,
            progress,
            leveled_up,
        }
    }

    pub fn on_cue_finished(&mut self) {
        self.cue_in_flight = false;
    }

    pub fn previous_level(&self) -> u8 {
        self.previous_level
    }

    pub fn cue_in_flight(&self) -> bool {
        self.cue_in_flight
    }
}
