//! ============================================================================
//! Context Block - Retrieved memory formatted for the prompt composer
//! ============================================================================

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::MemoryError;
use super::types::{RetrievalResult, ScoredRecord};

/// What the composer injects into the prompt for one turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub fragments: Vec<ScoredRecord>,
    /// Retrieval failed; the turn proceeds without memory
    pub degraded: bool,
}

impl ContextBlock {
    /// Turn a retrieval outcome into prompt context. A failure yields an
    /// empty, degraded block so the turn is never blocked on memory.
    pub fn from_outcome(outcome: Result<RetrievalResult, MemoryError>) -> Self {
        match outcome {
            Ok(result) => Self {
                fragments: result.hits,
                degraded: false,
            },
            Err(e) => {
                warn!("Composing without memory context: {}", e);
                Self {
                    fragments: Vec::new(),
                    degraded: true,
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Format fragments for inclusion in the system prompt. Fragments stored
    /// without text are skipped.
    pub fn format_for_prompt(&self) -> String {
        let lines: Vec<String> = self
            .fragments
            .iter()
            .filter_map(|hit| {
                let text = hit.source.text.as_deref()?;
                Some(format!(
                    "- [{}] {}\n",
                    hit.metadata.sender_role.display_name(),
                    text
                ))
            })
            .collect();

        if lines.is_empty() {
            return String::new();
        }

        let mut formatted =
            String::from("\n<memory_context>\nRelevant earlier messages from this organization:\n");
        for line in lines {
            formatted.push_str(&line);
        }
        formatted.push_str("</memory_context>\n");
        formatted
    }
}
