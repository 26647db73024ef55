/// Query Analyzer
/// Classifies the user query, resolves follow-up questions against recent
/// conversation turns, and scores how well the query fits the domain.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AnalyzerConfig;
use crate::services::conversation::ConversationMemory;
use crate::utils::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    /// "What is the EU AI Act?"
    Factual,
    /// "How do providers register a high-risk system?"
    Procedural,
    /// "What is the difference between providers and deployers?"
    Comparative,
    /// "What do you mean by that?"
    Clarification,
    /// Low domain confidence; answered with the out-of-scope fallback
    /// unless retrieval still finds relevant context.
    OutOfScope,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnalysis {
    pub original_query: String,
    pub reformulated_query: String,
    pub category: QueryCategory,
    pub confidence: f32,
    pub is_follow_up: bool,
    /// Domain vocabulary terms found in the reformulated query
    pub key_concepts: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUpKind {
    /// "Can you give me an example?"
    ExampleRequest,
    /// "Tell me more"
    DetailRequest,
    /// "What about penalties?", "How does that work?"
    Reference,
}

#[derive(Debug, Error, PartialEq)]
pub enum ReformulationError {
    #[error("no antecedent topic in recent turns")]
    NoAntecedent,

    #[error("reformulated query exceeds {0} characters")]
    TooLong(usize),
}

static WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[a-z0-9]+(?:['\-][a-z0-9]+)*").expect("word pattern is valid")
});

// Leading question words and fillers, stripped to get the topic of a question
static QUESTION_LEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:what|which|who|whom|whose|how|why|when|where|can|could|would|will|should|does|do|did|is|are|was|were|tell|explain|describe|give|show|list|please)\b[\s,]*)+(?:(?:me|us|you|i|is|are|does|do|about|the|a|an)\b\s*)*",
    )
    .expect("question lead pattern is valid")
});

const FOLLOW_UP_OPENERS: [&str; 6] = [
    "what about",
    "how about",
    "and what",
    "and how",
    "what else",
    "anything else",
];

const EXAMPLE_PATTERNS: [&str; 7] = [
    "example",
    "examples",
    "instance",
    "instances",
    "case",
    "cases",
    "for example",
];

const DETAIL_PATTERNS: [&str; 12] = [
    "tell me more",
    "more",
    "detailed",
    "more detail",
    "in detail",
    "expand",
    "elaborate",
    "further",
    "go on",
    "continue",
    "additional",
    "comprehensive",
];

const PRONOUN_PATTERNS: [&str; 9] = [
    "it", "its", "that", "this", "they", "them", "those", "these", "there",
];

const COMPARATIVE_PATTERNS: [&str; 11] = [
    "compare",
    "comparison",
    "difference",
    "differences",
    "differ",
    "versus",
    "vs",
    "better than",
    "similar to",
    "distinguish",
    "contrast",
];

const CLARIFICATION_PATTERNS: [&str; 11] = [
    "what do you mean",
    "what does that mean",
    "clarify",
    "explain",
    "meaning of",
    "mean by",
    "elaborate",
    "tell me more",
    "more detail",
    "in other words",
    "rephrase",
];

const PROCEDURAL_PATTERNS: [&str; 14] = [
    "how do",
    "how can",
    "how should",
    "how to",
    "how does one",
    "steps",
    "step by step",
    "process",
    "procedure",
    "what should",
    "comply",
    "implement",
    "apply for",
    "register",
];

pub struct QueryAnalyzer {
    vocabulary: Vec<String>,
    min_confidence: f32,
    max_query_chars: usize,
}

impl QueryAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        let vocabulary = config
            .domain_vocabulary
            .iter()
            .map(|term| normalize(term).trim().to_string())
            .filter(|term| !term.is_empty())
            .collect();

        Self {
            vocabulary,
            min_confidence: config.min_confidence,
            max_query_chars: config.max_query_chars,
        }
    }

    /// Analyze a raw query against a snapshot of the conversation memory.
    /// Only an empty query is rejected; reformulation problems degrade to the
    /// original query with zero confidence.
    pub fn analyze(&self, query: &str, memory: &ConversationMemory) -> Result<QueryAnalysis, PipelineError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::InvalidInput("Empty query provided".to_string()));
        }

        let normalized = normalize(trimmed);
        let own_concepts = self.key_concepts(&normalized);

        let follow_up = if memory.is_empty() {
            None
        } else {
            detect_follow_up(&normalized, !own_concepts.is_empty())
        };

        let (reformulated_query, key_concepts, confidence, is_follow_up) = match follow_up {
            None => {
                let confidence = confidence_for(&own_concepts);
                (trimmed.to_string(), own_concepts, confidence, false)
            }
            Some(kind) => match self.reformulate(trimmed, kind, memory) {
                Ok(reformulated) => {
                    debug!("Follow-up ({:?}) reformulated to '{}'", kind, reformulated);
                    let concepts = self.key_concepts(&normalize(&reformulated));
                    let confidence = confidence_for(&concepts);
                    (reformulated, concepts, confidence, true)
                }
                Err(e) => {
                    warn!("Reformulation failed, using original query: {}", e);
                    (trimmed.to_string(), own_concepts, 0.0, true)
                }
            },
        };

        let category = if confidence < self.min_confidence {
            QueryCategory::OutOfScope
        } else {
            classify(&normalized)
        };

        debug!(
            "Query analysis: category={:?}, confidence={:.2}, follow_up={}",
            category, confidence, is_follow_up
        );

        Ok(QueryAnalysis {
            original_query: trimmed.to_string(),
            reformulated_query,
            category,
            confidence,
            is_follow_up,
            key_concepts,
        })
    }

    fn reformulate(
        &self,
        query: &str,
        kind: FollowUpKind,
        memory: &ConversationMemory,
    ) -> Result<String, ReformulationError> {
        let topic = self
            .antecedent_topic(memory)
            .ok_or(ReformulationError::NoAntecedent)?;

        let reformulated = match kind {
            FollowUpKind::ExampleRequest => format!("examples of {}", topic),
            FollowUpKind::DetailRequest => format!("detailed explanation of {}", topic),
            FollowUpKind::Reference => format!(
                "{} in the context of {}",
                query.trim_end_matches(|c: char| c == '?' || c == '.' || c == '!').trim_end(),
                topic
            ),
        };

        if reformulated.chars().count() > self.max_query_chars {
            return Err(ReformulationError::TooLong(self.max_query_chars));
        }

        Ok(reformulated)
    }

    /// Topic in force after the remembered turns. Each question is resolved
    /// against the topic before it, so chained follow-ups keep the subject of
    /// the last self-contained question plus anything a reference added.
    fn antecedent_topic(&self, memory: &ConversationMemory) -> Option<String> {
        memory
            .turns()
            .fold(None, |previous, turn| self.topic_of(turn.user.text(), previous))
    }

    /// Topic a single question is about, given the topic before it.
    /// A follow-up phrase never becomes a topic on its own.
    fn topic_of(&self, question: &str, previous: Option<String>) -> Option<String> {
        let normalized = normalize(question);
        let has_concepts = !self.key_concepts(&normalized).is_empty();

        match detect_follow_up(&normalized, has_concepts) {
            None => Some(extract_topic(question))
                .filter(|topic| !topic.is_empty())
                .or(previous),
            Some(FollowUpKind::Reference) => {
                let own = Some(extract_topic(question))
                    .filter(|topic| !self.key_concepts(&normalize(topic)).is_empty());
                match (own, previous) {
                    (Some(own), Some(previous)) => {
                        let combined = format!("{} in the context of {}", own, previous);
                        if combined.chars().count() > self.max_query_chars {
                            Some(own)
                        } else {
                            Some(combined)
                        }
                    }
                    (own, previous) => own.or(previous),
                }
            }
            Some(FollowUpKind::ExampleRequest) | Some(FollowUpKind::DetailRequest) => previous,
        }
    }

    /// Vocabulary terms present in `normalized`, minus terms that are part of
    /// a longer matched term ("ai act" inside "eu ai act").
    fn key_concepts(&self, normalized: &str) -> Vec<String> {
        let matched: Vec<&String> = self
            .vocabulary
            .iter()
            .filter(|term| contains_phrase(normalized, term))
            .collect();

        let mut concepts: Vec<String> = Vec::new();
        for term in &matched {
            let padded = format!(" {} ", term);
            let subsumed = matched
                .iter()
                .any(|other| other.len() > term.len() && format!(" {} ", other).contains(&padded));
            if !subsumed && !concepts.iter().any(|c| c == *term) {
                concepts.push((*term).clone());
            }
        }
        concepts
    }
}

/// Lowercase words separated and surrounded by single spaces, so phrases can
/// be matched on word boundaries with `contains`.
fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let words: Vec<&str> = WORD.find_iter(&lower).map(|m| m.as_str()).collect();
    format!(" {} ", words.join(" "))
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    normalized.contains(&format!(" {} ", phrase))
}

fn detect_follow_up(normalized: &str, has_own_concepts: bool) -> Option<FollowUpKind> {
    // Openers always refer back, even when they name a new concept
    for opener in &FOLLOW_UP_OPENERS {
        if normalized.starts_with(&format!(" {} ", opener)) {
            debug!("Follow-up opener matched '{}'", opener);
            return Some(if *opener == "what else" || *opener == "anything else" {
                FollowUpKind::DetailRequest
            } else {
                FollowUpKind::Reference
            });
        }
    }

    // A query that names its own domain concepts is self-contained
    if has_own_concepts {
        return None;
    }

    for pattern in &EXAMPLE_PATTERNS {
        if contains_phrase(normalized, pattern) {
            debug!("Follow-up example request matched '{}'", pattern);
            return Some(FollowUpKind::ExampleRequest);
        }
    }

    for pattern in &DETAIL_PATTERNS {
        if contains_phrase(normalized, pattern) {
            debug!("Follow-up detail request matched '{}'", pattern);
            return Some(FollowUpKind::DetailRequest);
        }
    }

    for pattern in &PRONOUN_PATTERNS {
        if contains_phrase(normalized, pattern) {
            debug!("Follow-up reference matched '{}'", pattern);
            return Some(FollowUpKind::Reference);
        }
    }

    None
}

fn classify(normalized: &str) -> QueryCategory {
    for pattern in &COMPARATIVE_PATTERNS {
        if contains_phrase(normalized, pattern) {
            debug!("Detected Comparative category: matched '{}'", pattern);
            return QueryCategory::Comparative;
        }
    }

    for pattern in &CLARIFICATION_PATTERNS {
        if contains_phrase(normalized, pattern) {
            debug!("Detected Clarification category: matched '{}'", pattern);
            return QueryCategory::Clarification;
        }
    }

    for pattern in &PROCEDURAL_PATTERNS {
        if contains_phrase(normalized, pattern) {
            debug!("Detected Procedural category: matched '{}'", pattern);
            return QueryCategory::Procedural;
        }
    }

    QueryCategory::Factual
}

fn confidence_for(concepts: &[String]) -> f32 {
    if concepts.is_empty() {
        0.1
    } else {
        (0.4 + 0.2 * concepts.len() as f32).min(0.95)
    }
}

/// "What are the key provisions of the EU AI Act?" -> "key provisions of the EU AI Act"
fn extract_topic(question: &str) -> String {
    QUESTION_LEAD
        .replace(question, "")
        .trim()
        .trim_end_matches(|c: char| c == '?' || c == '.' || c == '!')
        .trim()
        .to_string()
}
