// End-to-end behaviour of the answer pipeline with in-memory collaborators

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use rag_chat_pipeline::config::Settings;
use rag_chat_pipeline::models::chat::{ChatMessage, Role};
use rag_chat_pipeline::services::query_analyzer::QueryCategory;
use rag_chat_pipeline::services::{GenerationParams, LlmProvider, Retriever, SearchHit, VectorIndex};
use rag_chat_pipeline::utils::metrics::StatsTracker;
use rag_chat_pipeline::{ConversationManager, PipelineError};

const STOPWORDS: [&str; 16] = [
    "what", "about", "with", "that", "this", "today", "does", "there", "is", "the", "are", "of", "for",
    "and", "to", "in",
];

/// Distance shrinks with the number of shared keywords
struct KeywordIndex {
    documents: Vec<(&'static str, &'static str, &'static str)>,
    queries: Mutex<Vec<String>>,
}

impl KeywordIndex {
    fn eu_ai_act() -> Self {
        Self {
            documents: vec![
                (
                    "overview",
                    "The EU AI Act is the European Union regulation on artificial intelligence. \
                     It sorts AI systems into risk tiers and sets key provisions for each tier.",
                    "EU AI Act, Article 1",
                ),
                (
                    "penalties",
                    "Penalties for non-compliance with the EU AI Act reach 35 million EUR or 7% of \
                     worldwide annual turnover for prohibited practices.",
                    "EU AI Act, Article 99",
                ),
            ],
            queries: Mutex::new(Vec::new()),
        }
    }
}

fn keywords(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

#[async_trait::async_trait]
impl VectorIndex for KeywordIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        self.queries.lock().unwrap().push(query.to_string());
        let query_words = keywords(query);

        let mut hits: Vec<SearchHit> = self
            .documents
            .iter()
            .map(|(id, content, source)| {
                let content_words = keywords(content);
                let overlap = query_words.iter().filter(|w| content_words.contains(w)).count();
                SearchHit {
                    id: id.to_string(),
                    content: content.to_string(),
                    metadata: HashMap::from([("source".to_string(), serde_json::json!(source))]),
                    distance: if overlap == 0 { 100.0 } else { 1.0 / overlap as f32 },
                }
            })
            .collect();
        hits.truncate(k);
        Ok(hits)
    }
}

struct SlowIndex;

#[async_trait::async_trait]
impl VectorIndex for SlowIndex {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<SearchHit>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    }
}

/// Echoes the current question so tests can see what was asked
#[derive(Default)]
struct ScriptedLlm {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, messages: &[ChatMessage], _params: &GenerationParams) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let question = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.content.lines().last())
            .unwrap_or_default()
            .to_string();
        Ok(format!("Answer to: {}\n\n* grounded in [1]", question))
    }
}

fn manager(index: Arc<dyn VectorIndex>, llm: Arc<ScriptedLlm>) -> ConversationManager {
    ConversationManager::new(&Settings::default(), index, llm, StatsTracker::new())
}

#[tokio::test]
async fn domain_question_uses_retrieved_context() {
    let llm = Arc::new(ScriptedLlm::default());
    let manager = manager(Arc::new(KeywordIndex::eu_ai_act()), llm.clone());

    let response = manager.answer("What is the EU AI Act?", "conv-a").await.unwrap();

    assert!(response.success);
    assert!(response.context_used);
    assert!(response.documents_retrieved >= 1);
    assert!(response.relevance_score >= 0.15);
    assert_eq!(response.sources[0].source, "EU AI Act, Article 1");
    assert!(response.text.contains("- grounded in [1]"));
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn off_topic_question_gets_canned_reply() {
    let llm = Arc::new(ScriptedLlm::default());
    let manager = manager(Arc::new(KeywordIndex::eu_ai_act()), llm.clone());

    let response = manager.answer("What's the weather today?", "conv-b").await.unwrap();

    assert!(response.success);
    assert!(!response.context_used);
    assert_eq!(response.documents_retrieved, 0);
    assert_eq!(response.query_analysis.category, QueryCategory::OutOfScope);
    assert!(response.text.starts_with("I don't have information about that"));
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);

    let stats = manager.get_stats(None).await;
    assert_eq!(stats.total_queries, 1);
    assert_eq!(stats.failed_retrievals, 1);
}

#[tokio::test(start_paused = true)]
async fn retrieval_timeout_degrades_and_is_recorded() {
    let llm = Arc::new(ScriptedLlm::default());
    let manager = manager(Arc::new(SlowIndex), llm);

    let response = manager
        .answer("What are the obligations for providers?", "conv-c")
        .await
        .unwrap();

    assert!(!response.success);
    assert!(!response.context_used);

    let conversation = manager.store().get("conv-c").unwrap();
    let state = conversation.lock().await;
    assert_eq!(state.memory.len(), 1);
    let turn = state.memory.turns().next().unwrap();
    assert_eq!(turn.user.text(), "What are the obligations for providers?");
    assert_eq!(turn.assistant.text(), response.text);
    drop(state);

    let stats = manager.get_stats(Some("conv-c")).await;
    assert_eq!(stats.failed_retrievals, 1);
    assert_eq!(stats.successful_retrievals, 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_request_leaves_no_trace() {
    let llm = Arc::new(ScriptedLlm::default());
    let manager = manager(Arc::new(SlowIndex), llm.clone());

    // caller gives up well before the retrieval timeout
    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        manager.answer("What are the obligations for providers?", "conv-x"),
    )
    .await;
    assert!(outcome.is_err());

    assert_eq!(manager.memory_len("conv-x").await, 0);
    assert!(manager.get_stats(Some("conv-x")).await.is_zero());
    assert!(manager.get_stats(None).await.is_zero());
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);

    // the conversation is not left locked
    let aborted = {
        let manager = Arc::new(manager);
        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.answer("What are the penalties?", "conv-x").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        manager
    };
    assert_eq!(aborted.memory_len("conv-x").await, 0);
    assert!(aborted.get_stats(None).await.is_zero());
}

#[tokio::test]
async fn chained_follow_ups_stay_on_topic() {
    let index = Arc::new(KeywordIndex::eu_ai_act());
    let manager = manager(index.clone(), Arc::new(ScriptedLlm::default()));

    manager.answer("What are high-risk AI systems?", "conv-h").await.unwrap();
    manager.answer("Can you give me an example?", "conv-h").await.unwrap();
    manager.answer("Tell me more", "conv-h").await.unwrap();
    let response = manager.answer("Elaborate further please", "conv-h").await.unwrap();

    let analysis = &response.query_analysis;
    assert!(analysis.is_follow_up);
    assert!(analysis.reformulated_query.contains("high-risk AI systems"));
    assert_ne!(analysis.category, QueryCategory::OutOfScope);
    assert!(index.queries.lock().unwrap().last().unwrap().contains("high-risk AI systems"));
}

#[tokio::test]
async fn follow_up_is_resolved_against_previous_turn() {
    let index = Arc::new(KeywordIndex::eu_ai_act());
    let manager = manager(index.clone(), Arc::new(ScriptedLlm::default()));

    manager
        .answer("What are the key provisions of the EU AI Act?", "conv-d")
        .await
        .unwrap();
    let response = manager.answer("What about penalties?", "conv-d").await.unwrap();

    assert!(response.query_analysis.is_follow_up);
    assert!(response.query_analysis.reformulated_query.contains("EU AI Act"));
    assert!(response.text.contains("EU AI Act"));

    // the rewritten query is what reaches the index
    let queries = index.queries.lock().unwrap();
    assert!(queries.last().unwrap().contains("EU AI Act"));
}

#[tokio::test]
async fn memory_keeps_most_recent_turns() {
    let manager = manager(Arc::new(KeywordIndex::eu_ai_act()), Arc::new(ScriptedLlm::default()));

    for i in 0..11 {
        manager
            .answer(&format!("Question {} about the EU AI Act?", i), "conv-e")
            .await
            .unwrap();
    }

    assert_eq!(manager.memory_len("conv-e").await, 10);
    let conversation = manager.store().get("conv-e").unwrap();
    let state = conversation.lock().await;
    let users: Vec<&str> = state.memory.turns().map(|t| t.user.text()).collect();
    assert_eq!(users.first(), Some(&"Question 1 about the EU AI Act?"));
    assert_eq!(users.last(), Some(&"Question 10 about the EU AI Act?"));
}

#[tokio::test]
async fn empty_query_is_rejected_and_not_recorded() {
    let manager = manager(Arc::new(KeywordIndex::eu_ai_act()), Arc::new(ScriptedLlm::default()));
    manager.answer("What is the EU AI Act?", "conv-f").await.unwrap();

    let err = manager.answer("   ", "conv-f").await.unwrap_err();

    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert_eq!(manager.memory_len("conv-f").await, 1);
    assert_eq!(manager.get_stats(Some("conv-f")).await.total_queries, 1);
}

#[tokio::test]
async fn reset_twice_leaves_empty_memory_and_zero_stats() {
    let manager = manager(Arc::new(KeywordIndex::eu_ai_act()), Arc::new(ScriptedLlm::default()));
    manager.answer("What is the EU AI Act?", "conv-g").await.unwrap();

    for _ in 0..2 {
        manager.reset("conv-g").await;
        assert_eq!(manager.memory_len("conv-g").await, 0);
        assert!(manager.get_stats(Some("conv-g")).await.is_zero());
    }

    // process-wide counters are not affected by a conversation reset
    assert_eq!(manager.get_stats(None).await.total_queries, 1);
}

#[tokio::test]
async fn concurrent_turns_on_one_conversation_are_serialized() {
    let manager = Arc::new(manager(
        Arc::new(KeywordIndex::eu_ai_act()),
        Arc::new(ScriptedLlm::default()),
    ));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let manager = manager.clone();
            let conversation = if i % 2 == 0 { "even" } else { "odd" };
            tokio::spawn(async move {
                manager
                    .answer(&format!("What are the penalties, take {}?", i), conversation)
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(manager.memory_len("even").await, 4);
    assert_eq!(manager.memory_len("odd").await, 4);
    assert_eq!(manager.get_stats(None).await.total_queries, 8);
}

#[tokio::test]
async fn retrieve_never_returns_documents_below_threshold() {
    let index: Arc<dyn VectorIndex> = Arc::new(KeywordIndex::eu_ai_act());

    for threshold in [0.0f32, 0.15, 0.4, 0.6, 1.0] {
        let mut settings = Settings::default();
        settings.retrieval.min_relevance = threshold;
        let retriever = Retriever::new(index.clone(), &settings.retrieval);

        for query in ["EU AI Act penalties", "artificial intelligence risk", "weather"] {
            let docs = retriever.retrieve(query, 5).await.unwrap();
            assert!(docs.iter().all(|d| d.relevance_score >= threshold));
            assert!(docs.windows(2).all(|w| w[0].relevance_score >= w[1].relevance_score));
        }
    }
}
