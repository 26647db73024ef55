/// Response Formatter
/// Normalizes generated markdown for display and builds source citations.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::chat::SourceInfo;
use crate::services::context_assembler::AssembledContext;

const PREVIEW_CHARS: usize = 150;

static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)[*+•–·]\s+").expect("bullet pattern is valid"));

static NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)(\d+)\)\s+").expect("numbered pattern is valid"));

static UNDERSCORE_BOLD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__(\S(?:[^_]*?\S)?)__").expect("emphasis pattern is valid"));

/// Clean raw model output. Total and deterministic: any input yields a
/// string, and formatting an already formatted text changes nothing.
pub fn format_response(raw: &str) -> String {
    let text = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut lines: Vec<String> = Vec::new();
    let mut previous_blank = false;

    for line in text.lines() {
        let line = normalize_line(line.trim_end());

        if line.is_empty() {
            // at most one blank line between paragraphs
            if !previous_blank && !lines.is_empty() {
                lines.push(String::new());
            }
            previous_blank = true;
            continue;
        }

        previous_blank = false;
        lines.push(line);
    }

    lines.join("\n").trim().to_string()
}

fn normalize_line(line: &str) -> String {
    let line = BULLET.replace(line, "${1}- ");
    let line = NUMBERED.replace(&line, "${1}${2}. ");
    UNDERSCORE_BOLD.replace_all(&line, "**${1}**").into_owned()
}

/// Citation metadata for every document placed in the prompt, in prompt order
pub fn build_sources(context: &AssembledContext) -> Vec<SourceInfo> {
    context
        .documents
        .iter()
        .map(|doc| SourceInfo {
            document_id: doc.id.clone(),
            source: doc.source_label(),
            relevance_score: doc.relevance_score,
            preview: preview(&doc.content),
        })
        .collect()
}

fn preview(content: &str) -> String {
    let content = content.trim();
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let cut: String = content.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", cut.trim_end())
}
