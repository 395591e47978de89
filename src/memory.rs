//! Bounded conversation memory with topic tracking

use crate::protocol::Emotion;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One recorded exchange; sent to the server as part of the context window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub emotion: Option<Emotion>,
    /// Epoch milliseconds
    pub timestamp: i64,
    #[serde(rename = "turn")]
    pub turn_index: u64,
}

/// Most recent turn mentioning a keyword
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mention<'a> {
    pub turn: &'a ConversationTurn,
    /// 1 for the newest turn
    pub turns_ago: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySummary {
    /// Distinct previous topics, oldest first
    pub topics: Vec<String>,
    pub current_topic: Option<String>,
    pub turn_count: usize,
    /// Up to five most recent user turns
    pub user_questions: Vec<String>,
}

/// Ring buffer of the last `capacity` turns. Oldest turns are evicted first.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    history: VecDeque<ConversationTurn>,
    capacity: usize,
    next_turn: u64,
    current_topic: Option<String>,
    previous_topics: VecDeque<String>,
    topic_capacity: usize,
}

impl ConversationMemory {
    pub fn new(capacity: usize, topic_capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity + 1),
            capacity,
            next_turn: 0,
            current_topic: None,
            previous_topics: VecDeque::with_capacity(topic_capacity + 1),
            topic_capacity,
        }
    }

    /// Append a turn. `timestamp` defaults to now.
    pub fn add_message(
        &mut self,
        role: Role,
        content: impl Into<String>,
        emotion: Option<Emotion>,
        timestamp: Option<i64>,
    ) {
        let turn = ConversationTurn {
            role,
            content: content.into(),
            emotion,
            timestamp: timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
            turn_index: self.next_turn,
        };
        self.next_turn += 1;
        tracing::trace!(role = ?turn.role, turn = turn.turn_index, "Turn recorded");
        self.history.push_back(turn);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    /// Last `n` turns in chronological order
    pub fn recent_context(&self, n: usize) -> Vec<ConversationTurn> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn full_history(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.history.iter()
    }

    pub fn find_previous_mention(&self, keyword: &str) -> Option<Mention<'_>> {
        let len = self.history.len();
        self.history
            .iter()
            .enumerate()
            .rev()
            .find(|(_, turn)| turn.content.contains(keyword))
            .map(|(i, turn)| Mention {
                turn,
                turns_ago: len - i,
            })
    }

    pub fn update_current_topic(&mut self, topic: impl Into<String>) {
        let topic = topic.into();
        if let Some(previous) = self.current_topic.take() {
            if previous != topic {
                self.previous_topics.push_back(previous);
                while self.previous_topics.len() > self.topic_capacity {
                    self.previous_topics.pop_front();
                }
            }
        }
        self.current_topic = Some(topic);
    }

    pub fn current_topic(&self) -> Option<&str> {
        self.current_topic.as_deref()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn summary(&self) -> MemorySummary {
        let mut topics: Vec<String> = Vec::new();
        for topic in &self.previous_topics {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
        let user_turns: Vec<&ConversationTurn> = self
            .history
            .iter()
            .filter(|t| t.role == Role::User)
            .collect();
        let skip = user_turns.len().saturating_sub(5);
        MemorySummary {
            topics,
            current_topic: self.current_topic.clone(),
            turn_count: self.history.len(),
            user_questions: user_turns
                .into_iter()
                .skip(skip)
                .map(|t| t.content.clone())
                .collect(),
        }
    }
}
