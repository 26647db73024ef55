use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::services::retriever::{SearchHit, VectorIndex};

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    k: usize,
}

/// Accepts a bare array of hits or one wrapped in `results`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Hits(Vec<SearchHit>),
    Wrapped { results: Vec<SearchHit> },
}

/// JSON client for the similarity search service
#[derive(Clone)]
pub struct VectorIndexClient {
    client: Client,
    base_url: String,
}

impl VectorIndexClient {
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl VectorIndex for VectorIndexClient {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&SearchRequest { query, k })
            .send()
            .await
            .context("Failed to call vector search")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Vector search error: {} - {}", status, body);
        }

        let hits = match response
            .json::<SearchResponse>()
            .await
            .context("Failed to parse vector search response")?
        {
            SearchResponse::Hits(hits) => hits,
            SearchResponse::Wrapped { results } => results,
        };

        debug!("Vector search returned {} hits", hits.len());
        Ok(hits)
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .context("Vector search unreachable")?;

        if !response.status().is_success() {
            bail!("Vector search health check returned {}", response.status());
        }
        Ok(())
    }
}
