//! Editor configuration.

use crate::versions::DEFAULT_MAX_AUTOMATIC;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for an [`EditSession`](crate::EditSession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Quiet period after the last edit before entity highlights are recomputed.
    pub highlight_debounce: Duration,

    /// Quiet period after the last edit to a block before it is verified.
    pub verify_debounce: Duration,

    /// Quiet period after the last edit before an automatic version is saved.
    pub autosave_debounce: Duration,

    /// Blocks shorter than this (in characters) are never verified.
    pub min_verify_chars: usize,

    /// Entity names shorter than this (in characters) are not highlighted.
    pub min_entity_name_chars: usize,

    /// Number of automatic versions kept.
    pub max_automatic_versions: usize,

    /// Whether edits schedule lore consistency checks.
    pub verify_enabled: bool,

    /// Whether edits schedule automatic versions.
    pub autosave_enabled: bool,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            highlight_debounce: Duration::from_millis(500),
            verify_debounce: Duration::from_secs(2),
            autosave_debounce: Duration::from_secs(5),
            min_verify_chars: 10,
            min_entity_name_chars: 3,
            max_automatic_versions: DEFAULT_MAX_AUTOMATIC,
            verify_enabled: true,
            autosave_enabled: true,
        }
    }
}

impl EditorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_highlight_debounce(mut self, delay: Duration) -> Self {
        self.highlight_debounce = delay;
        self
    }

    pub fn with_verify_debounce(mut self, delay: Duration) -> Self {
        self.verify_debounce = delay;
        self
    }

    pub fn with_autosave_debounce(mut self, delay: Duration) -> Self {
        self.autosave_debounce = delay;
        self
    }

    pub fn with_min_verify_chars(mut self, chars: usize) -> Self {
        self.min_verify_chars = chars;
        self
    }

    pub fn with_min_entity_name_chars(mut self, chars: usize) -> Self {
        self.min_entity_name_chars = chars;
        self
    }

    pub fn with_max_automatic_versions(mut self, max: usize) -> Self {
        self.max_automatic_versions = max;
        self
    }

    pub fn with_verify(mut self, enabled: bool) -> Self {
        self.verify_enabled = enabled;
        self
    }

    pub fn with_autosave(mut self, enabled: bool) -> Self {
        self.autosave_enabled = enabled;
        self
    }
}
