use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::models::chat::{ChatMessage, ConversationId, Exchange};
use crate::utils::metrics::ConversationStats;

/// A completed user/assistant pair. Recorded atomically, so memory never
/// holds half a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub user: Exchange,
    pub assistant: Exchange,
}

/// Fixed-capacity window of past turns. The oldest turn is evicted first.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    capacity: usize,
    turns: VecDeque<Turn>,
}

impl ConversationMemory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            turns: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a turn, returning the evicted one when the window was full.
    pub fn record(&mut self, user_text: impl Into<String>, assistant_text: impl Into<String>) -> Option<Turn> {
        let evicted = if self.turns.len() == self.capacity {
            self.turns.pop_front()
        } else {
            None
        };

        self.turns.push_back(Turn {
            user: Exchange::user(user_text),
            assistant: Exchange::assistant(assistant_text),
        });

        evicted
    }

    /// Number of retained turns
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Oldest first
    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &Turn> + ExactSizeIterator {
        self.turns.iter()
    }

    /// Flattened user/assistant exchanges, oldest first
    pub fn exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.turns.iter().flat_map(|t| [&t.user, &t.assistant])
    }

    /// Last `n` turns in chronological order
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip)
    }

    /// Last `n` turns as chat messages for the generation prompt
    pub fn history_messages(&self, n: usize) -> Vec<ChatMessage> {
        self.recent(n)
            .flat_map(|t| [t.user.to_chat_message(), t.assistant.to_chat_message()])
            .collect()
    }
}

/// Complete conversation state held by the store
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub conversation_id: ConversationId,
    pub memory: ConversationMemory,
    pub stats: ConversationStats,
    pub last_activity: Instant,
}

impl ConversationState {
    pub fn new(conversation_id: ConversationId, capacity: usize) -> Self {
        Self {
            conversation_id,
            memory: ConversationMemory::new(capacity),
            stats: ConversationStats::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Idle for longer than `ttl`
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.last_activity.elapsed() > ttl
    }

    /// Clears memory and this conversation's counters
    pub fn reset(&mut self) {
        self.memory.clear();
        self.stats.reset();
        self.touch();
    }
}
