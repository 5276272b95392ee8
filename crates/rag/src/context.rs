//! Citation-addressable context assembly
//!
//! The context is built once per query from the final ranked list. Entry `N`
//! (1-based) is the only handle the answer may cite, as `[N]`.

use ragforge_common::tokens::TokenCounter;
use ragforge_search::{FusedItem, ScoreBreakdown};
use serde::{Deserialize, Serialize};

/// Characters of content kept in a source preview
pub const SOURCE_PREVIEW_CHARS: usize = 300;

/// Characters of content shown in a citation tooltip
pub const CITATION_PREVIEW_CHARS: usize = 100;

/// One numbered context entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub citation_index: usize,
    pub source_label: String,
    pub content: String,
}

/// Ordered, 1-indexed context for one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    entries: Vec<ContextEntry>,
}

impl Context {
    /// Number the ranked items from 1 in order
    pub fn from_items(items: &[FusedItem]) -> Self {
        let entries = items
            .iter()
            .enumerate()
            .map(|(i, fused)| ContextEntry {
                citation_index: i + 1,
                source_label: fused.item.source_label().to_string(),
                content: fused.item.content.clone(),
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a 1-based citation index
    pub fn get(&self, citation_index: usize) -> Option<&ContextEntry> {
        citation_index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
    }

    /// Prompt rendering: `[N] label` then the content, entries separated by a blank line
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("[{}] {}\n{}\n", e.citation_index, e.source_label, e.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Keep entries in order until `max_tokens` is spent
    ///
    /// The first entry that does not fit is cut down to the remaining budget when
    /// more than 100 tokens are left, otherwise dropped; later entries are dropped.
    pub fn trim_to_budget(&self, max_tokens: usize, counter: &TokenCounter) -> Self {
        let mut entries = Vec::new();
        let mut used = 0;

        for entry in &self.entries {
            let tokens = counter.count(&entry.content);
            if used + tokens <= max_tokens {
                entries.push(entry.clone());
                used += tokens;
                continue;
            }

            let remaining = max_tokens - used;
            if remaining > 100 {
                entries.push(ContextEntry {
                    content: counter.truncate(&entry.content, remaining),
                    ..entry.clone()
                });
            }
            break;
        }

        Self { entries }
    }
}

/// Caller-facing view of one context entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceView {
    pub citation_index: usize,
    pub id: String,
    pub source: String,
    /// Content preview, suffixed with `...` when cut
    pub content: String,
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
    pub page: Option<u32>,
}

impl SourceView {
    pub fn from_item(citation_index: usize, fused: &FusedItem) -> Self {
        Self {
            citation_index,
            id: fused.item.id.clone(),
            source: fused.item.source_label().to_string(),
            content: preview(&fused.item.content, SOURCE_PREVIEW_CHARS),
            score: fused.score(),
            score_breakdown: fused.score_breakdown,
            page: fused.item.page,
        }
    }

    /// Views for every ranked item, numbered like [`Context::from_items`]
    pub fn from_items(items: &[FusedItem]) -> Vec<Self> {
        items
            .iter()
            .enumerate()
            .map(|(i, fused)| Self::from_item(i + 1, fused))
            .collect()
    }
}

/// First `max_chars` characters, with `...` appended when the text was longer
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\n' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// Wrap in-range `[N]` markers in annotated spans; out-of-range markers stay as written
pub fn highlight_citations(text: &str, sources: &[SourceView]) -> String {
    let Ok(pattern) = regex_lite::Regex::new(r"\[([1-9][0-9]*)\]") else {
        return text.to_string();
    };

    pattern
        .replace_all(text, |caps: &regex_lite::Captures<'_>| {
            let marker = &caps[0];
            let source = caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| sources.get(i));

            match source {
                Some(source) => {
                    let tooltip: String = source.content.chars().take(CITATION_PREVIEW_CHARS).collect();
                    format!(
                        r#"<span class="citation" data-source="{}" title="{}: {}">{}</span>"#,
                        source.citation_index,
                        escape_attr(&source.source),
                        escape_attr(&tooltip),
                        marker
                    )
                }
                None => marker.to_string(),
            }
        })
        .into_owned()
}
