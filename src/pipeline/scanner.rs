// Scanner — finds user-generated text worth classifying.
//
// Candidates are picked by cheap structural heuristics: generic content tags,
// ARIA roles, and class/id/test-id names that sites conventionally use for
// comments and posts. Each accepted node is marked in the registry before it
// is returned, so a node found by both the initial scan and the mutation
// watcher is queued once.

use std::sync::LazyLock;

use regex_lite::Regex;

use super::registry::NodeRegistry;
use crate::config::PipelineTuning;
use crate::dom::{ContentSurface, Element, NodeId};

const CONTENT_TAGS: &[&str] = &["article", "p", "li", "blockquote", "q", "figcaption"];

const CONTENT_ROLES: &[&str] = &["article", "comment"];

/// Never content, even when a class name says otherwise.
const EXCLUDED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "input", "textarea", "select", "button", "code",
    "pre", "svg",
];

static CONTENT_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(comment|message|post|reply|tweet|chat|review)")
        .expect("content hint pattern is valid")
});

/// A queued node and the text submitted for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub node: NodeId,
    pub text: String,
}

pub struct Scanner {
    min_chars: usize,
    max_chars: usize,
}

impl Scanner {
    pub fn new(tuning: &PipelineTuning) -> Self {
        Self {
            min_chars: tuning.min_text_chars,
            max_chars: tuning.max_text_chars,
        }
    }

    /// Scan `root` and everything below it for new candidates.
    pub fn discover(
        &self,
        surface: &impl ContentSurface,
        root: NodeId,
        registry: &mut NodeRegistry,
    ) -> Vec<BatchItem> {
        let mut items = Vec::new();
        for id in surface.subtree(root) {
            let Some(element) = surface.element(id) else {
                continue;
            };
            if !is_candidate(element) || registry.is_processed(id) || surface.is_overlaid(id) {
                continue;
            }

            let text = normalize_text(&surface.text(id));
            if text.chars().count() < self.min_chars {
                continue;
            }

            registry.mark_processed(id);
            items.push(BatchItem {
                node: id,
                text: truncate(text, self.max_chars),
            });
        }
        items
    }
}

/// Does this element look like it holds user-generated text?
pub fn is_candidate(element: &Element) -> bool {
    let tag = element.tag.as_str();
    if EXCLUDED_TAGS.contains(&tag) || element.is_overlay_chrome() {
        return false;
    }
    if CONTENT_TAGS.contains(&tag) {
        return true;
    }
    if element
        .attr("role")
        .is_some_and(|role| CONTENT_ROLES.contains(&role))
    {
        return true;
    }
    element.classes.iter().any(|c| CONTENT_HINT.is_match(c))
        || element.attr("id").is_some_and(|id| CONTENT_HINT.is_match(id))
        || element
            .attr("data-testid")
            .is_some_and(|id| CONTENT_HINT.is_match(id))
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text
    } else {
        text.chars().take(max_chars).collect()
    }
}
