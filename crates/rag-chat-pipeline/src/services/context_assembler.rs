use serde::Serialize;
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ContextConfig;
use crate::services::retriever::RetrievedDocument;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledContext {
    pub documents: Vec<RetrievedDocument>,
    pub context_used: bool,
    /// Highest relevance among included documents, 0.0 when empty
    pub aggregate_relevance: f32,
    /// A document was cut or left out to respect the budget
    pub truncated: bool,
}

impl AssembledContext {
    pub fn empty() -> Self {
        Self {
            documents: Vec::new(),
            context_used: false,
            aggregate_relevance: 0.0,
            truncated: false,
        }
    }

    /// Characters of document content included
    pub fn total_chars(&self) -> usize {
        self.documents.iter().map(|d| d.content.chars().count()).sum()
    }
}

pub struct ContextAssembler {
    min_fragment_chars: usize,
}

impl ContextAssembler {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            min_fragment_chars: config.min_fragment_chars,
        }
    }

    /// Pack documents (already ordered by relevance) into `budget` characters.
    /// The first document that does not fit whole is cut at a sentence
    /// boundary, or dropped when the cut would be too short, and assembly ends.
    pub fn assemble(&self, documents: Vec<RetrievedDocument>, budget: usize) -> AssembledContext {
        let mut included: Vec<RetrievedDocument> = Vec::with_capacity(documents.len());
        let mut used = 0usize;
        let mut truncated = false;

        for doc in documents {
            if doc.content.trim().is_empty() {
                continue;
            }

            let len = doc.content.chars().count();
            let remaining = budget.saturating_sub(used);

            if len <= remaining {
                used += len;
                included.push(doc);
                continue;
            }

            truncated = true;
            match truncate_at_sentence(&doc.content, remaining) {
                Some(fragment) if fragment.chars().count() >= self.min_fragment_chars => {
                    debug!(
                        "Document {} truncated from {} to {} chars",
                        doc.id,
                        len,
                        fragment.chars().count()
                    );
                    used += fragment.chars().count();
                    included.push(RetrievedDocument { content: fragment, ..doc });
                }
                _ => debug!("Document {} omitted, no sentence fits in {} chars", doc.id, remaining),
            }
            break;
        }

        let aggregate_relevance = included
            .iter()
            .map(|d| d.relevance_score)
            .fold(0.0f32, f32::max);

        debug!(
            "Assembled {} documents, {}/{} chars, truncated={}",
            included.len(),
            used,
            budget,
            truncated
        );

        AssembledContext {
            context_used: !included.is_empty(),
            documents: included,
            aggregate_relevance,
            truncated,
        }
    }
}

/// Longest prefix of whole sentences within `max_chars`, trailing whitespace removed
fn truncate_at_sentence(text: &str, max_chars: usize) -> Option<String> {
    let mut end = 0usize;
    let mut chars = 0usize;

    for (start, sentence) in text.split_sentence_bound_indices() {
        let sentence_chars = sentence.chars().count();
        if chars + sentence_chars > max_chars {
            break;
        }
        chars += sentence_chars;
        end = start + sentence.len();
    }

    let fragment = text[..end].trim_end();
    if fragment.is_empty() {
        None
    } else {
        Some(fragment.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn doc(id: &str, content: &str, score: f32) -> RetrievedDocument {
        RetrievedDocument {
            id: id.to_string(),
            content: content.to_string(),
            source_metadata: HashMap::new(),
            relevance_score: score,
        }
    }

    fn assembler() -> ContextAssembler {
        ContextAssembler::new(&ContextConfig::default())
    }

    const LONG: &str = "The EU AI Act sets harmonised rules for artificial intelligence. \
        It classifies systems by risk level. High-risk systems face strict obligations. \
        Providers must run conformity assessments before market entry.";

    #[test]
    fn test_everything_fits() {
        let ctx = assembler().assemble(vec![doc("a", "short one.", 0.9), doc("b", "short two.", 0.6)], 100);

        assert!(ctx.context_used);
        assert!(!ctx.truncated);
        assert_eq!(ctx.documents.len(), 2);
        assert_eq!(ctx.aggregate_relevance, 0.9);
    }

    #[test]
    fn test_truncates_at_sentence_boundary() {
        let ctx = assembler().assemble(vec![doc("a", LONG, 0.8)], 120);

        assert!(ctx.truncated);
        assert_eq!(ctx.documents.len(), 1);
        let content = &ctx.documents[0].content;
        assert!(content.ends_with("risk level."));
        assert!(content.chars().count() <= 120);
    }

    #[test]
    fn test_short_fragment_is_omitted_and_assembly_stops() {
        let first = "x".repeat(90);
        let ctx = assembler().assemble(
            vec![doc("a", &first, 0.9), doc("b", LONG, 0.7), doc("c", "tiny.", 0.5)],
            120,
        );

        // 30 chars left: no sentence of LONG fits, so b is dropped and c never considered
        let ids: Vec<&str> = ctx.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert!(ctx.truncated);
    }

    #[test]
    fn test_never_exceeds_budget() {
        let docs: Vec<RetrievedDocument> = (0..6)
            .map(|i| doc(&format!("d{}", i), LONG, 1.0 - i as f32 * 0.1))
            .collect();

        for budget in [0, 10, 49, 50, 64, 200, 333, 1000] {
            let ctx = assembler().assemble(docs.clone(), budget);
            assert!(ctx.total_chars() <= budget, "budget {} exceeded", budget);
        }
    }

    #[test]
    fn test_empty_input() {
        let ctx = assembler().assemble(vec![], 6000);
        assert_eq!(ctx, AssembledContext::empty());
    }

    #[test]
    fn test_truncate_handles_multibyte_text() {
        let text = "Pénalités élevées. Amendes jusqu'à 7 %. Fin.";
        let fragment = truncate_at_sentence(text, 20).unwrap();
        assert_eq!(fragment, "Pénalités élevées.");
    }
}
