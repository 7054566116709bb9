//! Testing utilities for the annotation engine.
//!
//! This module provides scripted collaborators so sessions can be driven
//! deterministically without API calls:
//! - `MockVerifier` answers from per-entity rules
//! - `MockAnalyzer` returns a fixed list of suggestions
//! - `MockGenerator` returns canned continuations and rewrites
//!
//! Each mock counts its calls and can be given an artificial latency, which
//! combines with a paused tokio clock to reproduce races.

use crate::consistency::Verdict;
use crate::services::{ConsistencyVerifier, ServiceError, ShowTellAnalyzer, TextGenerator};
use crate::show_tell::Suggestion;
use crate::story::{Chapter, Character, Story, WorldEntry};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

async fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

fn scripted_failure() -> ServiceError {
    ServiceError::Network("scripted failure".to_string())
}

/// One call received by [`MockVerifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyCall {
    pub paragraph: String,
    pub entity_name: String,
}

#[derive(Debug, Clone)]
struct ContradictionRule {
    entity: String,
    needle: String,
    explanation: Option<String>,
}

/// A verifier that flags a contradiction when a paragraph contains a
/// scripted phrase, and reports every other paragraph as consistent.
#[derive(Debug, Default)]
pub struct MockVerifier {
    rules: Mutex<Vec<ContradictionRule>>,
    failing: Mutex<Vec<String>>,
    latency: Duration,
    calls: AtomicUsize,
    log: Mutex<Vec<VerifyCall>>,
}

impl MockVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag `entity` whenever the paragraph contains `needle` (case-insensitive).
    pub fn with_contradiction(
        self,
        entity: impl Into<String>,
        needle: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        self.push_rule(entity.into(), needle.into(), Some(explanation.into()));
        self
    }

    /// Like [`with_contradiction`](Self::with_contradiction) but the verdict
    /// carries no explanation.
    pub fn with_unexplained_contradiction(
        self,
        entity: impl Into<String>,
        needle: impl Into<String>,
    ) -> Self {
        self.push_rule(entity.into(), needle.into(), None);
        self
    }

    /// Fail every call for `entity`.
    pub fn with_failure(self, entity: impl Into<String>) -> Self {
        if let Ok(mut failing) = self.failing.lock() {
            failing.push(entity.into().to_lowercase());
        }
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Drop all contradiction rules so every paragraph verifies clean.
    pub fn clear_rules(&self) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.clear();
        }
    }

    /// Number of verify calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every call received, in order.
    pub fn recorded(&self) -> Vec<VerifyCall> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn push_rule(&self, entity: String, needle: String, explanation: Option<String>) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(ContradictionRule {
                entity: entity.to_lowercase(),
                needle: needle.to_lowercase(),
                explanation,
            });
        }
    }
}

#[async_trait]
impl ConsistencyVerifier for MockVerifier {
    async fn verify(
        &self,
        paragraph: &str,
        entity_name: &str,
        _entity_description: &str,
    ) -> Result<Verdict, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.log.lock() {
            log.push(VerifyCall {
                paragraph: paragraph.to_string(),
                entity_name: entity_name.to_string(),
            });
        }

        simulate_latency(self.latency).await;

        let entity = entity_name.to_lowercase();
        let fails = self
            .failing
            .lock()
            .map(|failing| failing.contains(&entity))
            .unwrap_or(false);
        if fails {
            return Err(scripted_failure());
        }

        let paragraph = paragraph.to_lowercase();
        let rule = self.rules.lock().ok().and_then(|rules| {
            rules
                .iter()
                .find(|r| r.entity == entity && paragraph.contains(&r.needle))
                .cloned()
        });

        Ok(match rule {
            Some(rule) => Verdict {
                is_contradictory: true,
                explanation: rule.explanation,
            },
            None => Verdict::consistent(),
        })
    }
}

/// An analyzer that returns the same suggestions on every call.
#[derive(Debug, Default)]
pub struct MockAnalyzer {
    suggestions: Vec<Suggestion>,
    fail: bool,
    latency: Duration,
    calls: AtomicUsize,
}

impl MockAnalyzer {
    pub fn new(suggestions: Vec<Suggestion>) -> Self {
        Self {
            suggestions,
            ..Self::default()
        }
    }

    /// An analyzer whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShowTellAnalyzer for MockAnalyzer {
    async fn analyze(&self, _full_text: &str) -> Result<Vec<Suggestion>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        simulate_latency(self.latency).await;
        if self.fail {
            return Err(scripted_failure());
        }
        Ok(self.suggestions.clone())
    }
}

/// A generator with canned output.
///
/// Without scripting, rewrites upper-case the selection and formatting
/// trims each line and drops blank ones.
#[derive(Debug)]
pub struct MockGenerator {
    continuation: String,
    rewrite: Option<String>,
    formatted: Option<String>,
    fail: bool,
    latency: Duration,
    calls: AtomicUsize,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self {
            continuation: "The wind picked up.".to_string(),
            rewrite: None,
            formatted: None,
            fail: false,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A generator whose every call fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_continuation(mut self, text: impl Into<String>) -> Self {
        self.continuation = text.into();
        self
    }

    pub fn with_rewrite(mut self, text: impl Into<String>) -> Self {
        self.rewrite = Some(text.into());
        self
    }

    pub fn with_formatted(mut self, text: impl Into<String>) -> Self {
        self.formatted = Some(text.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, output: impl FnOnce() -> String) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        simulate_latency(self.latency).await;
        if self.fail {
            return Err(scripted_failure());
        }
        Ok(output())
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn continue_text(&self, _text: &str) -> Result<String, ServiceError> {
        self.respond(|| self.continuation.clone()).await
    }

    async fn modify(
        &self,
        text: &str,
        _context: &str,
        _instruction: &str,
    ) -> Result<String, ServiceError> {
        self.respond(|| self.rewrite.clone().unwrap_or_else(|| text.to_uppercase()))
            .await
    }

    async fn format_rich(&self, text: &str) -> Result<String, ServiceError> {
        self.respond(|| {
            self.formatted.clone().unwrap_or_else(|| {
                text.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        })
        .await
    }
}

/// A small two-chapter story with characters and world entries.
///
/// Chapter one ("Departure") has three paragraphs: the first mentions Mara
/// and Oakhollow, the second Tobin, the third contains a telling phrase.
/// "Old King Bren" and the hill fort "Bren" share a word for longest-match
/// checks, and "Al" is too short to be highlighted.
pub fn sample_story() -> Story {
    let mut story = Story::new("The Salt Road")
        .with_synopsis("Two siblings carry a dead king's compass to the sea.");

    story.add_character(
        Character::new(
            "Mara",
            "Seventeen. Green eyes. Carries her grandmother's brass compass. Never learned to swim.",
        )
        .with_role("Protagonist"),
    );
    story.add_character(
        Character::new(
            "Tobin",
            "Mara's older brother, a blacksmith with a burn scar on his left hand.",
        )
        .with_role("Deuteragonist"),
    );
    story.add_character(
        Character::new("Old King Bren", "The exiled king. Blind since the siege.")
            .with_role("Antagonist"),
    );
    story.add_character(Character::new("Al", "A goat."));
    story.add_world_entry(WorldEntry::new(
        "Oakhollow",
        "Location",
        "A river village of thatched roofs and a single forge.",
    ));
    story.add_world_entry(WorldEntry::new(
        "Bren",
        "Location",
        "A ruined hill fort named for the old king.",
    ));

    story.add_chapter(Chapter::new(
        "Departure",
        "Mara left Oakhollow before dawn, the compass warm in her palm.\n\
         Tobin watched from the forge and said nothing.\n\
         She was very sad as the road bent out of sight.",
    ));
    story.add_chapter(Chapter::new(
        "The Hill Fort",
        "Old King Bren waited at Bren with his last guards.",
    ));

    story
}
