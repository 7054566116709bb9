//! Lore consistency checking.
//!
//! Paragraphs that mention known entities are checked against each entity's
//! description by an external [`ConsistencyVerifier`](crate::services::ConsistencyVerifier).
//! Verdicts land in [`InconsistencyRecords`], which the highlighter reads to
//! decide between Highlight and Inconsistency decorations.
//!
//! Each request carries the block's edit counter from the moment it was
//! issued. A verdict for a block whose counter has since moved on is stale
//! and must be discarded.

use crate::document::{Block, Document};
use crate::entity::{Entity, EntityIndex};
use crate::ids::{BlockId, EntityId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Explanation recorded when the verifier flags a contradiction without one.
pub const UNEXPLAINED_CONTRADICTION: &str = "Contradicts established lore";

/// Result of one verification call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(rename = "isContradictory", alias = "is_contradictory")]
    pub is_contradictory: bool,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl Verdict {
    pub fn consistent() -> Self {
        Self {
            is_contradictory: false,
            explanation: None,
        }
    }

    pub fn contradiction(explanation: impl Into<String>) -> Self {
        Self {
            is_contradictory: true,
            explanation: Some(explanation.into()),
        }
    }
}

/// A recorded contradiction for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inconsistency {
    pub explanation: String,
    /// Block whose verification produced the record.
    pub block: BlockId,
}

/// Entity id to contradiction explanation.
///
/// Owned by the verifier pipeline; the highlighter only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InconsistencyRecords {
    records: HashMap<EntityId, Inconsistency>,
}

impl InconsistencyRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: EntityId) -> Option<&Inconsistency> {
        self.records.get(&entity)
    }

    pub fn is_flagged(&self, entity: EntityId) -> bool {
        self.records.contains_key(&entity)
    }

    /// Record a contradiction. Returns whether anything changed.
    pub fn set(&mut self, entity: EntityId, block: BlockId, explanation: impl Into<String>) -> bool {
        let record = Inconsistency {
            explanation: explanation.into(),
            block,
        };
        self.records.insert(entity, record.clone()) != Some(record)
    }

    /// Clear an entity's record. Returns whether one existed.
    pub fn clear(&mut self, entity: EntityId) -> bool {
        self.records.remove(&entity).is_some()
    }

    /// Drop records for entities the index no longer knows.
    pub fn retain_known(&mut self, index: &EntityIndex) -> bool {
        let before = self.records.len();
        self.records.retain(|id, _| index.get(*id).is_some());
        before != self.records.len()
    }

    /// Drop records produced by `block`, except those for entities in `keep`.
    ///
    /// Called with an empty `keep` when the block is removed, and with the
    /// block's current mentions when it is verified again.
    pub fn release_block(&mut self, block: BlockId, keep: &[EntityId]) -> bool {
        let before = self.records.len();
        self.records
            .retain(|id, record| record.block != block || keep.contains(id));
        before != self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &Inconsistency)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Apply a verdict. Returns whether the records changed.
    pub fn apply(&mut self, request: &VerificationRequest, verdict: Verdict) -> bool {
        if verdict.is_contradictory {
            let explanation = verdict
                .explanation
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| UNEXPLAINED_CONTRADICTION.to_string());
            self.set(request.entity.id, request.block, explanation)
        } else {
            self.clear(request.entity.id)
        }
    }
}

/// One pending verifier call: a paragraph checked against one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub block: BlockId,
    /// The block's edit counter when the request was issued.
    pub edit_counter: u64,
    pub paragraph: String,
    pub entity: Entity,
}

/// Build one request per entity mentioned in `block`.
///
/// Blocks shorter than `min_chars` characters are not checked.
pub fn plan_verification(
    index: &EntityIndex,
    block: &Block,
    min_chars: usize,
) -> Vec<VerificationRequest> {
    if block.text().chars().count() < min_chars {
        return Vec::new();
    }

    index
        .mentioned_in(block.text())
        .into_iter()
        .map(|entity| VerificationRequest {
            block: block.id(),
            edit_counter: block.edit_counter(),
            paragraph: block.text().to_string(),
            entity: entity.clone(),
        })
        .collect()
}

/// Whether a request still describes the current text of its block.
pub fn is_current(document: &Document, request: &VerificationRequest) -> bool {
    document
        .block(request.block)
        .is_some_and(|b| b.edit_counter() == request.edit_counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityCategory;

    fn index() -> EntityIndex {
        EntityIndex::build(
            vec![
                Entity::new(EntityId::new(), "Mara", EntityCategory::Character, "Green eyes"),
                Entity::new(
                    EntityId::new(),
                    "Oakhollow",
                    EntityCategory::World("Location".into()),
                    "A village on the river",
                ),
            ],
            3,
        )
        .unwrap()
    }

    #[test]
    fn test_plan_one_request_per_mentioned_entity() {
        let index = index();
        let document = Document::from_text("Mara walked to Oakhollow. Mara was tired.");
        let requests = plan_verification(&index, &document.blocks()[0], 10);

        let names: Vec<_> = requests.iter().map(|r| r.entity.name.as_str()).collect();
        assert_eq!(names, vec!["Mara", "Oakhollow"]);
        assert!(requests.iter().all(|r| r.edit_counter == 0));
    }

    #[test]
    fn test_plan_skips_short_blocks() {
        let index = index();
        let document = Document::from_text("Mara ran.");
        assert!(plan_verification(&index, &document.blocks()[0], 10).is_empty());
    }

    #[test]
    fn test_stale_request_detected() {
        let index = index();
        let mut document = Document::from_text("Mara had blue eyes that morning.");
        let block = document.first_block();
        let request = plan_verification(&index, &document.blocks()[0], 10).remove(0);
        assert!(is_current(&document, &request));

        document.insert_text(block, 0, "Later, ").unwrap();
        assert!(!is_current(&document, &request));

        let mut gone = request.clone();
        gone.block = BlockId::new();
        assert!(!is_current(&document, &gone));
    }

    #[test]
    fn test_apply_sets_and_clears() {
        let index = index();
        let document = Document::from_text("Mara had blue eyes that morning.");
        let request = plan_verification(&index, &document.blocks()[0], 10).remove(0);
        let mut records = InconsistencyRecords::new();

        assert!(records.apply(&request, Verdict::contradiction("Mara's eyes are green")));
        assert_eq!(
            records.get(request.entity.id).map(|r| r.explanation.as_str()),
            Some("Mara's eyes are green")
        );
        // Same verdict again is not a change
        assert!(!records.apply(&request, Verdict::contradiction("Mara's eyes are green")));

        assert!(records.apply(&request, Verdict::consistent()));
        assert!(records.is_empty());
        assert!(!records.apply(&request, Verdict::consistent()));
    }

    #[test]
    fn test_contradiction_without_explanation() {
        let index = index();
        let document = Document::from_text("Mara had blue eyes that morning.");
        let request = plan_verification(&index, &document.blocks()[0], 10).remove(0);
        let mut records = InconsistencyRecords::new();

        records.apply(
            &request,
            Verdict {
                is_contradictory: true,
                explanation: None,
            },
        );
        assert_eq!(
            records.get(request.entity.id).unwrap().explanation,
            UNEXPLAINED_CONTRADICTION
        );
    }

    #[test]
    fn test_verdict_deserializes_both_spellings() {
        let camel: Verdict =
            serde_json::from_str(r#"{"isContradictory": true, "explanation": "x"}"#).unwrap();
        let snake: Verdict = serde_json::from_str(r#"{"is_contradictory": false}"#).unwrap();
        assert!(camel.is_contradictory);
        assert_eq!(snake, Verdict::consistent());
    }

    #[test]
    fn test_release_block() {
        let (mara, tobin) = (EntityId::new(), EntityId::new());
        let (first, second) = (BlockId::new(), BlockId::new());
        let mut records = InconsistencyRecords::new();
        records.set(mara, first, "eyes");
        records.set(tobin, second, "scar");

        // Still mentioned in the block that raised it
        assert!(!records.release_block(first, &[mara]));
        assert!(records.is_flagged(mara));

        assert!(records.release_block(first, &[]));
        assert!(!records.is_flagged(mara));
        assert!(records.is_flagged(tobin));
    }

    #[test]
    fn test_retain_known() {
        let index = index();
        let mut records = InconsistencyRecords::new();
        let mara = index.lookup("Mara").unwrap().id;
        records.set(mara, BlockId::new(), "x");
        records.set(EntityId::new(), BlockId::new(), "y");

        assert!(records.retain_known(&index));
        assert_eq!(records.len(), 1);
        assert!(records.is_flagged(mara));
    }
}
