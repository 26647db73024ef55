use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::models::chat::ConversationId;
use super::types::ConversationState;

pub type SharedConversation = Arc<Mutex<ConversationState>>;

/// Thread-safe conversation store.
/// The map gives concurrent access across conversations; each entry carries
/// its own async mutex so a conversation has a single writer at a time.
/// Idle conversations expire after `idle_ttl`, and the store never holds more
/// than `max_conversations` entries when a new one is created.
#[derive(Clone)]
pub struct ConversationStore {
    storage: Arc<DashMap<ConversationId, SharedConversation>>,
    memory_capacity: usize,
    idle_ttl: Duration,
    max_conversations: usize,
}

impl ConversationStore {
    pub fn new(config: &MemoryConfig) -> Self {
        info!(
            "Initializing conversation store (memory capacity: {} turns, idle ttl: {}s, max conversations: {})",
            config.capacity, config.idle_ttl_seconds, config.max_conversations
        );
        Self {
            storage: Arc::new(DashMap::new()),
            memory_capacity: config.capacity,
            idle_ttl: config.idle_ttl(),
            max_conversations: config.max_conversations.max(1),
        }
    }

    /// Fetch the conversation, creating an empty one on first use.
    /// An expired entry is replaced by a fresh conversation.
    pub fn get_or_create(&self, conversation_id: &str) -> SharedConversation {
        if let Some(conversation) = self.get(conversation_id) {
            return conversation;
        }

        // New conversation: make room first
        if self.storage.len() >= self.max_conversations {
            self.cleanup_expired();
        }
        if self.storage.len() >= self.max_conversations {
            self.evict_least_recent();
        }

        self.storage
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!("Creating conversation {}", conversation_id);
                Arc::new(Mutex::new(ConversationState::new(
                    conversation_id.to_string(),
                    self.memory_capacity,
                )))
            })
            .value()
            .clone()
    }

    /// Live conversation for the id. Expired entries are removed on access.
    pub fn get(&self, conversation_id: &str) -> Option<SharedConversation> {
        let conversation = self.storage.get(conversation_id).map(|e| e.value().clone())?;

        let expired = conversation
            .try_lock()
            .map(|state| state.is_expired(self.idle_ttl))
            .unwrap_or(false);
        if expired {
            debug!("Conversation {} expired", conversation_id);
            self.remove(conversation_id);
            return None;
        }

        Some(conversation)
    }

    pub fn remove(&self, conversation_id: &str) -> Option<SharedConversation> {
        self.storage.remove(conversation_id).map(|(_, state)| state)
    }

    /// Drop every idle conversation past its ttl.
    /// Conversations locked by an in-flight request are kept.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.storage.len();
        let ttl = self.idle_ttl;
        self.storage.retain(|_, conversation| {
            conversation
                .try_lock()
                .map(|state| !state.is_expired(ttl))
                .unwrap_or(true)
        });

        let count = before.saturating_sub(self.storage.len());
        if count > 0 {
            info!("Cleaned up {} expired conversations", count);
        }
        count
    }

    /// Remove the idle conversation with the oldest activity
    fn evict_least_recent(&self) {
        let oldest = self
            .storage
            .iter()
            .filter_map(|entry| {
                let last_activity = entry.value().try_lock().ok()?.last_activity;
                Some((entry.key().clone(), last_activity))
            })
            .min_by_key(|(_, last_activity)| *last_activity)
            .map(|(id, _)| id);

        match oldest {
            Some(id) => {
                warn!("Conversation limit {} reached, evicting {}", self.max_conversations, id);
                self.remove(&id);
            }
            None => warn!(
                "Conversation limit {} reached with every conversation busy",
                self.max_conversations
            ),
        }
    }

    /// Number of known conversations
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory_capacity
    }
}
