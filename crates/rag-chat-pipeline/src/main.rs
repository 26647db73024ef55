use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use uuid::Uuid;

use rag_chat_pipeline::config::Settings;
use rag_chat_pipeline::services::{LlmService, VectorIndexClient};
use rag_chat_pipeline::utils::logger::init_logger;
use rag_chat_pipeline::utils::metrics::StatsTracker;
use rag_chat_pipeline::{ConversationManager, PipelineError};

const BANNER: &str = "EU AI Act Assistant\nAsk a question, or type 'stats', 'reset', 'health', 'exit'.";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logger(&settings.logging)?;
    info!("🚀 Starting RAG chat console...");

    // Initialize services
    let index = Arc::new(VectorIndexClient::new(&settings.retrieval)?);
    let llm = Arc::new(LlmService::new(settings.llm.clone())?);
    let manager = Arc::new(ConversationManager::new(&settings, index, llm, StatsTracker::new()));

    // Periodic sweep of idle conversations
    let sweeper = {
        let manager = Arc::clone(&manager);
        let period = settings.memory.idle_ttl().max(Duration::from_secs(60));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                manager.cleanup_expired_conversations();
            }
        })
    };
    info!("✅ Pipeline ready (llm: {}, index: {})", settings.llm.base_url, settings.retrieval.base_url);

    let conversation_id = Uuid::new_v4().to_string();
    println!("{}\n", BANNER);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };

        match line.trim().to_lowercase().as_str() {
            "exit" | "quit" => break,
            "stats" => {
                let stats = manager.get_stats(None).await;
                println!("\n{}\n", serde_json::to_string_pretty(&stats)?);
            }
            "reset" => {
                manager.reset(&conversation_id).await;
                println!("\nConversation cleared.\n");
            }
            "health" => {
                let report = manager.health().await;
                println!("\n{}\n", serde_json::to_string_pretty(&report)?);
            }
            _ => match manager.answer(&line, &conversation_id).await {
                Ok(response) => {
                    println!("\nAssistant: {}", response.text);
                    if response.context_used {
                        println!(
                            "[Retrieved {} documents, Relevance: {:.2}]",
                            response.documents_retrieved, response.relevance_score
                        );
                    }
                    println!();
                }
                Err(PipelineError::InvalidInput(_)) => continue,
                Err(e) => error!("Unexpected pipeline error: {}", e),
            },
        }
    }

    sweeper.abort();
    info!("👋 Goodbye");
    Ok(())
}
