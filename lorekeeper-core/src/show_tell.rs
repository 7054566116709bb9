//! Show-vs-tell overlay.
//!
//! An on-demand mode: the whole manuscript is sent to a
//! [`ShowTellAnalyzer`](crate::services::ShowTellAnalyzer), and each returned
//! suggestion is pinned to the first literal occurrence of its phrase. The
//! overlay lives until the user picks an alternative, turns the mode off, or
//! makes any other edit; in every case all suggestions are dropped.

use crate::decoration::{Decoration, DecorationError, DecorationKind};
use crate::document::Document;
use crate::ids::{BlockId, SuggestionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from overlay actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShowTellError {
    #[error("show/tell mode is not active")]
    NotActive,

    #[error("show/tell analysis is already running")]
    Busy,

    #[error("unknown suggestion {0}")]
    UnknownSuggestion(SuggestionId),

    #[error("suggestion {0} was not found in the text")]
    Unplaced(SuggestionId),

    #[error("suggestion has no alternative #{index}")]
    UnknownAlternative { index: usize },
}

/// A phrase the analyzer flags as telling, with proposed rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(default)]
    pub id: SuggestionId,
    #[serde(rename = "originalText", alias = "original_text")]
    pub original_text: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

impl Suggestion {
    pub fn new(
        original_text: impl Into<String>,
        explanation: impl Into<String>,
        alternatives: Vec<String>,
    ) -> Self {
        Self {
            id: SuggestionId::new(),
            original_text: original_text.into(),
            explanation: explanation.into(),
            alternatives,
        }
    }
}

/// Where a suggestion's phrase was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub suggestion: SuggestionId,
    pub block: BlockId,
    pub start: usize,
    pub end: usize,
}

/// Pin each suggestion to the first occurrence of its phrase.
///
/// Blocks are searched in document order. A suggestion whose first
/// occurrence overlaps an earlier suggestion's placement is left unplaced;
/// earlier suggestions win conflicts.
pub fn place_suggestions(document: &Document, suggestions: &[Suggestion]) -> Vec<Placement> {
    let mut placements: Vec<Placement> = Vec::new();

    for suggestion in suggestions {
        let phrase = suggestion.original_text.as_str();
        if phrase.trim().is_empty() {
            continue;
        }

        let found = document.blocks().iter().find_map(|block| {
            block.text().find(phrase).map(|start| Placement {
                suggestion: suggestion.id,
                block: block.id(),
                start,
                end: start + phrase.len(),
            })
        });

        let Some(candidate) = found else {
            tracing::debug!(phrase, "suggestion phrase not found in document");
            continue;
        };

        let conflicts = placements.iter().any(|p| {
            p.block == candidate.block && p.start < candidate.end && candidate.start < p.end
        });
        if !conflicts {
            placements.push(candidate);
        }
    }

    placements
}

/// Write placements into the document as TellingPhrase decorations.
///
/// All-or-nothing: if any block rejects its spans, every TellingPhrase
/// decoration is removed again.
pub fn decorate(document: &mut Document, placements: &[Placement]) -> Result<(), DecorationError> {
    let mut result = Ok(());
    for block in document.blocks_mut() {
        let spans: Vec<Decoration> = placements
            .iter()
            .filter(|p| p.block == block.id())
            .map(|p| Decoration::telling(p.start, p.end, p.suggestion))
            .collect();
        if let Err(e) = block.apply_decorations(DecorationKind::SHOW_TELL_LAYER, spans) {
            result = Err(e);
            break;
        }
    }

    if result.is_err() {
        undecorate(document);
    }
    result
}

/// Remove every TellingPhrase decoration and return the blocks that had any.
///
/// Entity mentions under a telling phrase were skipped by the highlighter, so
/// those blocks need another highlight pass.
pub fn undecorate(document: &mut Document) -> Vec<BlockId> {
    let mut uncovered = Vec::new();
    for block in document.blocks_mut() {
        if block.decorations_of(DecorationKind::TellingPhrase).next().is_some() {
            block.clear_decorations(DecorationKind::SHOW_TELL_LAYER);
            uncovered.push(block.id());
        }
    }
    uncovered
}

/// A batch of suggestions currently shown over the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overlay {
    pub suggestions: Vec<Suggestion>,
    pub placements: Vec<Placement>,
}

impl Overlay {
    pub fn suggestion(&self, id: SuggestionId) -> Option<&Suggestion> {
        self.suggestions.iter().find(|s| s.id == id)
    }

    pub fn placement(&self, id: SuggestionId) -> Option<&Placement> {
        self.placements.iter().find(|p| p.suggestion == id)
    }
}

/// Mode state of the overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OverlayState {
    #[default]
    Off,
    /// Waiting on the analyzer. The generation tags the in-flight request.
    Analyzing { generation: u64 },
    Active(Overlay),
}

impl OverlayState {
    /// Whether show/tell mode is on (analyzing or showing suggestions).
    pub fn is_active(&self) -> bool {
        !matches!(self, OverlayState::Off)
    }

    pub fn overlay(&self) -> Option<&Overlay> {
        match self {
            OverlayState::Active(overlay) => Some(overlay),
            _ => None,
        }
    }

    /// Resolve a selection to the range to replace and the replacement text.
    pub fn selection(
        &self,
        suggestion: SuggestionId,
        alternative: usize,
    ) -> Result<(Placement, String), ShowTellError> {
        let overlay = self.overlay().ok_or(ShowTellError::NotActive)?;
        let chosen = overlay
            .suggestion(suggestion)
            .ok_or(ShowTellError::UnknownSuggestion(suggestion))?
            .alternatives
            .get(alternative)
            .ok_or(ShowTellError::UnknownAlternative { index: alternative })?;
        let placement = overlay
            .placement(suggestion)
            .ok_or(ShowTellError::Unplaced(suggestion))?;
        Ok((*placement, chosen.clone()))
    }
}
