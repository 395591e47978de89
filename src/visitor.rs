//! Persistent visitor profile

use crate::ids;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything remembered about the local visitor across restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorProfile {
    pub visitor_id: String,
    pub first_visit: DateTime<Utc>,
    #[serde(default)]
    pub last_visit: Option<DateTime<Utc>>,
    #[serde(default)]
    pub visit_count: u32,
    /// Monotonic lifetime counter feeding the relationship level
    #[serde(default)]
    pub total_conversations: u32,
    #[serde(default)]
    pub topics_discussed: Vec<String>,
    /// Keyed by [`normalize_question`]
    #[serde(default)]
    pub question_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub relationship_level: u8,
    /// Distinct, oldest first, capped by the caller
    #[serde(default)]
    pub selected_suggestions: Vec<String>,
}

impl VisitorProfile {
    /// Fresh profile with a newly generated visitor id
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            visitor_id: ids::visitor_id(now),
            first_visit: now,
            last_visit: None,
            visit_count: 0,
            total_conversations: 0,
            topics_discussed: Vec::new(),
            question_counts: BTreeMap::new(),
            relationship_level: 0,
            selected_suggestions: Vec::new(),
        }
    }

    pub fn record_visit(&mut self, now: DateTime<Utc>) {
        self.visit_count += 1;
        self.last_visit = Some(now);
    }

    /// Count one more occurrence of `question`, returning the new count
    pub fn increment_question_count(&mut self, question: &str) -> u32 {
        let count = self
            .question_counts
            .entry(normalize_question(question))
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn add_topic(&mut self, topic: &str) -> bool {
        if self.topics_discussed.iter().any(|t| t == topic) {
            return false;
        }
        self.topics_discussed.push(topic.to_string());
        true
    }

    pub fn increment_conversations(&mut self) -> u32 {
        self.total_conversations = self.total_conversations.saturating_add(1);
        self.total_conversations
    }

    pub fn set_relationship_level(&mut self, level: u8) {
        self.relationship_level = level;
    }

    /// Remember a chosen suggestion once, keeping at most `cap` entries
    pub fn add_selected_suggestion(&mut self, suggestion: &str, cap: usize) -> bool {
        if self.selected_suggestions.iter().any(|s| s == suggestion) {
            return false;
        }
        self.selected_suggestions.push(suggestion.to_string());
        if self.selected_suggestions.len() > cap {
            let excess = self.selected_suggestions.len() - cap;
            self.selected_suggestions.drain(..excess);
        }
        true
    }
}

/// Deduplication key for a question: lowercase, no punctuation or whitespace
pub fn normalize_question(question: &str) -> String {
    question
        .chars()
        .filter(|c| !matches!(c, '？' | '?' | '。' | '、' | '！' | '!') && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
