use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Read-only counters snapshot returned by `get_stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_queries: u64,
    pub successful_retrievals: u64,
    pub failed_retrievals: u64,
    pub generation_failures: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
}

impl Stats {
    pub fn is_zero(&self) -> bool {
        self.total_queries == 0
            && self.successful_retrievals == 0
            && self.failed_retrievals == 0
            && self.generation_failures == 0
    }
}

/// What a finished turn contributes to the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnOutcome {
    /// At least one document survived the relevance threshold.
    pub retrieval_succeeded: bool,
    pub generation_failed: bool,
}

/// Process-wide aggregator. One instance per process, injected into the
/// orchestrator; clones share the same counters.
#[derive(Clone)]
pub struct StatsTracker {
    inner: Arc<StatsInner>,
}

struct StatsInner {
    total_queries: AtomicU64,
    successful_retrievals: AtomicU64,
    failed_retrievals: AtomicU64,
    generation_failures: AtomicU64,
    started_at: DateTime<Utc>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatsInner {
                total_queries: AtomicU64::new(0),
                successful_retrievals: AtomicU64::new(0),
                failed_retrievals: AtomicU64::new(0),
                generation_failures: AtomicU64::new(0),
                started_at: Utc::now(),
            }),
        }
    }

    pub fn record(&self, outcome: TurnOutcome) {
        self.inner.total_queries.fetch_add(1, Ordering::Relaxed);

        if outcome.retrieval_succeeded {
            self.inner.successful_retrievals.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.failed_retrievals.fetch_add(1, Ordering::Relaxed);
        }

        if outcome.generation_failed {
            self.inner.generation_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            total_queries: self.inner.total_queries.load(Ordering::Relaxed),
            successful_retrievals: self.inner.successful_retrievals.load(Ordering::Relaxed),
            failed_retrievals: self.inner.failed_retrievals.load(Ordering::Relaxed),
            generation_failures: self.inner.generation_failures.load(Ordering::Relaxed),
            started_at: self.inner.started_at,
            uptime_seconds: (Utc::now() - self.inner.started_at).num_seconds(),
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-conversation counters. Lives inside the conversation state, so it is
/// only touched under that conversation's lock.
#[derive(Debug, Clone)]
pub struct ConversationStats {
    total_queries: u64,
    successful_retrievals: u64,
    failed_retrievals: u64,
    generation_failures: u64,
    started_at: DateTime<Utc>,
}

impl ConversationStats {
    pub fn new() -> Self {
        Self {
            total_queries: 0,
            successful_retrievals: 0,
            failed_retrievals: 0,
            generation_failures: 0,
            started_at: Utc::now(),
        }
    }

    pub fn record(&mut self, outcome: TurnOutcome) {
        self.total_queries += 1;
        if outcome.retrieval_succeeded {
            self.successful_retrievals += 1;
        } else {
            self.failed_retrievals += 1;
        }
        if outcome.generation_failed {
            self.generation_failures += 1;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            total_queries: self.total_queries,
            successful_retrievals: self.successful_retrievals,
            failed_retrievals: self.failed_retrievals,
            generation_failures: self.generation_failures,
            started_at: self.started_at,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
        }
    }
}

impl Default for ConversationStats {
    fn default() -> Self {
        Self::new()
    }
}
