//! Entity highlighter: decorates every known entity mention in the document.
//!
//! A pass recomputes the whole entity layer (Highlight and Inconsistency
//! decorations) of a block from scratch and applies it with replace-by-kind,
//! so running it twice on unchanged input yields identical decorations.

use crate::consistency::InconsistencyRecords;
use crate::decoration::{Decoration, DecorationError, DecorationKind};
use crate::document::{Block, Document};
use crate::entity::EntityIndex;
use crate::ids::BlockId;

/// Summary of a highlighter pass over several blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightReport {
    /// Blocks whose entity layer changed.
    pub changed: Vec<BlockId>,
    /// Blocks whose pass was aborted by an invariant violation.
    pub failed: Vec<BlockId>,
}

/// Compute the entity-layer decorations for a block without applying them.
///
/// Mentions that overlap a decoration outside the entity layer (a telling
/// phrase) are skipped.
pub fn entity_spans(
    index: &EntityIndex,
    records: &InconsistencyRecords,
    block: &Block,
) -> Vec<Decoration> {
    let foreign: Vec<&Decoration> = block
        .decorations()
        .iter()
        .filter(|d| !DecorationKind::ENTITY_LAYER.contains(&d.kind))
        .collect();

    index
        .find_matches(block.text())
        .into_iter()
        .filter_map(|m| {
            let kind = if records.is_flagged(m.entity.id) {
                DecorationKind::Inconsistency
            } else {
                DecorationKind::Highlight
            };
            let span = Decoration::entity(kind, m.start, m.end, m.entity.id);
            (!foreign.iter().any(|f| f.overlaps(&span))).then_some(span)
        })
        .collect()
}

/// Re-highlight one block. Returns whether its decorations changed.
pub fn highlight_block(
    index: &EntityIndex,
    records: &InconsistencyRecords,
    block: &mut Block,
) -> Result<bool, DecorationError> {
    let spans = entity_spans(index, records, block);
    let before: Vec<Decoration> = block
        .decorations()
        .iter()
        .filter(|d| DecorationKind::ENTITY_LAYER.contains(&d.kind))
        .cloned()
        .collect();

    if before == spans {
        return Ok(false);
    }

    block.apply_decorations(DecorationKind::ENTITY_LAYER, spans)?;
    Ok(true)
}

/// Re-highlight the blocks selected by `filter`.
///
/// A block whose pass fails keeps its previous decorations; the failure is
/// logged and the remaining blocks are still processed.
pub fn highlight_document(
    index: &EntityIndex,
    records: &InconsistencyRecords,
    document: &mut Document,
    filter: impl Fn(BlockId) -> bool,
) -> HighlightReport {
    let mut report = HighlightReport::default();

    for block in document.blocks_mut().filter(|b| filter(b.id())) {
        match highlight_block(index, records, block) {
            Ok(true) => report.changed.push(block.id()),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(block = %block.id(), error = %e, "highlighter pass aborted");
                report.failed.push(block.id());
            }
        }
    }

    if !report.changed.is_empty() {
        tracing::debug!(changed = report.changed.len(), "entity highlights updated");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, EntityCategory};
    use crate::ids::{EntityId, SuggestionId};
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn index(names: &[&str]) -> EntityIndex {
        let entities = names
            .iter()
            .map(|n| Entity::new(EntityId::new(), *n, EntityCategory::Character, ""))
            .collect();
        EntityIndex::build(entities, 3).unwrap()
    }

    fn digest(document: &Document) -> u64 {
        let mut hasher = DefaultHasher::new();
        for block in document.blocks() {
            block.decorations().hash(&mut hasher);
        }
        hasher.finish()
    }

    #[test]
    fn test_longest_match_single_decoration() {
        let index = index(&["Bren", "Old King Bren"]);
        let records = InconsistencyRecords::new();
        let mut document = Document::from_text("Old King Bren arrived");

        highlight_document(&index, &records, &mut document, |_| true);

        let decorations = document.blocks()[0].decorations();
        assert_eq!(decorations.len(), 1);
        assert_eq!((decorations[0].start, decorations[0].end), (0, 13));
        assert_eq!(decorations[0].kind, DecorationKind::Highlight);
    }

    #[test]
    fn test_idempotent() {
        let index = index(&["Mara", "Tobin", "Oakhollow"]);
        let records = InconsistencyRecords::new();
        let mut document = Document::from_text(
            "Mara left Oakhollow.\nTobin followed Mara.\nNobody else came.",
        );

        let first = highlight_document(&index, &records, &mut document, |_| true);
        let digest_first = digest(&document);
        let second = highlight_document(&index, &records, &mut document, |_| true);

        assert_eq!(first.changed.len(), 2);
        assert!(second.changed.is_empty());
        assert_eq!(digest_first, digest(&document));
    }

    #[test]
    fn test_flagged_entity_gets_inconsistency_kind() {
        let index = index(&["Mara", "Tobin"]);
        let mara = index.lookup("Mara").unwrap().id;
        let mut records = InconsistencyRecords::new();
        let mut document = Document::from_text("Mara and Tobin");
        let block_id = document.first_block();
        records.set(mara, block_id, "Mara has green eyes in the lore");

        highlight_document(&index, &records, &mut document, |_| true);

        let kinds: Vec<_> = document.blocks()[0]
            .decorations()
            .iter()
            .map(|d| d.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![DecorationKind::Inconsistency, DecorationKind::Highlight]
        );

        records.clear(mara);
        let report = highlight_document(&index, &records, &mut document, |_| true);
        assert_eq!(report.changed, vec![block_id]);
        assert!(document.blocks()[0]
            .decorations()
            .iter()
            .all(|d| d.kind == DecorationKind::Highlight));
    }

    #[test]
    fn test_skips_mentions_inside_telling_phrase() {
        let index = index(&["Mara", "Tobin"]);
        let records = InconsistencyRecords::new();
        let mut document = Document::from_text("Mara felt that Tobin was angry");
        let block_id = document.first_block();
        document
            .block_mut(block_id)
            .unwrap()
            .apply_decorations(
                DecorationKind::SHOW_TELL_LAYER,
                vec![Decoration::telling(5, 30, SuggestionId::new())],
            )
            .unwrap();

        highlight_document(&index, &records, &mut document, |_| true);

        let block = document.block(block_id).unwrap();
        let highlights: Vec<_> = block.decorations_of(DecorationKind::Highlight).collect();
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].start, 0);
        assert_eq!(block.decorations_of(DecorationKind::TellingPhrase).count(), 1);
    }

    #[test]
    fn test_filter_limits_pass() {
        let index = index(&["Mara"]);
        let records = InconsistencyRecords::new();
        let mut document = Document::from_text("Mara\nMara");
        let second = document.blocks()[1].id();

        let report = highlight_document(&index, &records, &mut document, |id| id == second);
        assert_eq!(report.changed, vec![second]);
        assert!(document.blocks()[0].decorations().is_empty());
    }
}
