use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::utils::error::PipelineError;

/// Raw hit returned by the external similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub distance: f32,
}

/// Document that passed the relevance threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub content: String,
    pub source_metadata: HashMap<String, serde_json::Value>,
    pub relevance_score: f32,
}

impl RetrievedDocument {
    /// Human-readable label for citations: metadata "source", then "title", then the id
    pub fn source_label(&self) -> String {
        ["source", "title"]
            .iter()
            .find_map(|key| self.source_metadata.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Trait for the vector search service
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>>;

    /// Lightweight availability probe used by health checks
    async fn ping(&self) -> Result<()> {
        self.search("health check", 1).await.map(|_| ())
    }
}

pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    max_k: usize,
    min_relevance: f32,
    timeout: Duration,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, config: &RetrievalConfig) -> Self {
        info!(
            "Retriever configured: max_k={}, min_relevance={:.2}, timeout={}s",
            config.max_k, config.min_relevance, config.timeout_seconds
        );
        Self {
            index,
            max_k: config.max_k.max(1),
            min_relevance: config.min_relevance,
            timeout: config.timeout(),
        }
    }

    /// Search once and keep documents at or above the relevance threshold,
    /// most relevant first. An empty result is not an error.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, PipelineError> {
        let k = k.clamp(1, self.max_k);
        debug!("Retrieving up to {} documents for '{}'", k, query);

        let hits = match tokio::time::timeout(self.timeout, self.index.search(query, k)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!("Vector search failed: {:#}", e);
                return Err(PipelineError::RetrievalUnavailable(e.to_string()));
            }
            Err(_) => {
                warn!("Vector search timed out after {:?}", self.timeout);
                return Err(PipelineError::RetrievalUnavailable(format!(
                    "search timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let returned = hits.len();
        let mut documents: Vec<RetrievedDocument> = hits
            .into_iter()
            .map(|hit| RetrievedDocument {
                relevance_score: relevance_from_distance(hit.distance),
                id: hit.id,
                content: hit.content,
                source_metadata: hit.metadata,
            })
            .filter(|doc| doc.relevance_score >= self.min_relevance)
            .collect();

        // stable sort keeps service order for equal scores
        documents.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        documents.truncate(k);

        debug!(
            "Retrieved {} of {} documents above threshold {:.2}",
            documents.len(),
            returned,
            self.min_relevance
        );

        Ok(documents)
    }

    pub async fn ping(&self) -> bool {
        match tokio::time::timeout(self.timeout, self.index.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Vector index health probe failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Vector index health probe timed out");
                false
            }
        }
    }
}

/// Map a non-negative distance into (0, 1]
pub fn relevance_from_distance(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    1.0 / (1.0 + distance.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    fn hit(id: &str, distance: f32) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            content: format!("content of {}", id),
            metadata: HashMap::new(),
            distance,
        }
    }

    fn config() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    #[test]
    fn test_relevance_from_distance() {
        assert_eq!(relevance_from_distance(0.0), 1.0);
        assert_eq!(relevance_from_distance(1.0), 0.5);
        assert_eq!(relevance_from_distance(-3.0), 1.0);
        assert_eq!(relevance_from_distance(f32::NAN), 0.0);
        assert!(relevance_from_distance(f32::INFINITY) < 0.15);
    }

    #[tokio::test]
    async fn test_filters_below_threshold_and_sorts() {
        let mut index = MockVectorIndex::new();
        index
            .expect_search()
            .with(eq("penalties"), eq(5))
            .times(1)
            .returning(|_, _| Ok(vec![hit("far", 9.0), hit("mid", 1.0), hit("near", 0.2), hit("tie", 1.0)]));

        let retriever = Retriever::new(Arc::new(index), &config());
        let docs = retriever.retrieve("penalties", 5).await.unwrap();

        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "tie"]);
        assert!(docs.iter().all(|d| d.relevance_score >= 0.15));
    }

    #[tokio::test]
    async fn test_k_is_clamped() {
        let mut index = MockVectorIndex::new();
        index.expect_search().with(always(), eq(10)).times(1).returning(|_, _| Ok(vec![]));
        index.expect_search().with(always(), eq(1)).times(1).returning(|_, _| Ok(vec![]));

        let retriever = Retriever::new(Arc::new(index), &config());
        assert!(retriever.retrieve("q", 50).await.unwrap().is_empty());
        assert!(retriever.retrieve("q", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_error_is_retrieval_unavailable() {
        let mut index = MockVectorIndex::new();
        index
            .expect_search()
            .returning(|_, _| Err(anyhow::anyhow!("connection refused")));

        let retriever = Retriever::new(Arc::new(index), &config());
        let err = retriever.retrieve("q", 5).await.unwrap_err();
        assert!(matches!(err, PipelineError::RetrievalUnavailable(_)));
    }

    struct SlowIndex;

    #[async_trait::async_trait]
    impl VectorIndex for SlowIndex {
        async fn search(&self, _query: &str, _k: usize) -> Result<Vec<SearchHit>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retrieval_unavailable() {
        let retriever = Retriever::new(Arc::new(SlowIndex), &config());
        let err = retriever.retrieve("q", 5).await.unwrap_err();
        assert!(matches!(err, PipelineError::RetrievalUnavailable(_)));
        assert!(!retriever.ping().await);
    }

    #[test]
    fn test_source_label_falls_back_to_id() {
        let mut doc = RetrievedDocument {
            id: "doc-7".to_string(),
            content: String::new(),
            source_metadata: HashMap::new(),
            relevance_score: 0.9,
        };
        assert_eq!(doc.source_label(), "doc-7");

        doc.source_metadata
            .insert("source".to_string(), serde_json::json!("Article 99"));
        assert_eq!(doc.source_label(), "Article 99");
    }
}
