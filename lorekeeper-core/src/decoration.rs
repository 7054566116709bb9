//! Decoration model: tagged, offset-bounded annotations over block text.
//!
//! Decorations are produced wholesale by a pass (the entity highlighter or the
//! show/tell overlay) and replace every earlier decoration of the kinds that
//! pass owns. They are never patched in place.
//!
//! Offsets are byte offsets into the block's UTF-8 text and always fall on
//! character boundaries.

use crate::ids::{EntityId, SuggestionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Invariant violations detected while applying a decoration pass.
///
/// These indicate a bug in the pass that produced the spans. The offending
/// pass is aborted and the block keeps its previous decorations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecorationError {
    #[error("decorations overlap: {first_start}..{first_end} and {second_start}..{second_end}")]
    Overlap {
        first_start: usize,
        first_end: usize,
        second_start: usize,
        second_end: usize,
    },

    #[error("decoration {start}..{end} out of bounds for text of length {len}")]
    OutOfBounds { start: usize, end: usize, len: usize },

    #[error("empty decoration at offset {at}")]
    Empty { at: usize },

    #[error("offset {offset} is not on a character boundary")]
    NotCharBoundary { offset: usize },

    #[error("{kind:?} decoration supplied to a pass that does not replace that kind")]
    KindNotReplaced { kind: DecorationKind },
}

/// What a decoration marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DecorationKind {
    /// A mention of a known entity.
    Highlight,
    /// A mention of an entity currently flagged as contradicting its lore.
    Inconsistency,
    /// A phrase the show/tell analysis suggests rewriting.
    TellingPhrase,
}

impl DecorationKind {
    /// Render priority when two kinds cover the same offset. Higher wins.
    pub fn priority(&self) -> u8 {
        match self {
            DecorationKind::Inconsistency => 3,
            DecorationKind::Highlight => 2,
            DecorationKind::TellingPhrase => 1,
        }
    }

    /// Kinds written by the entity highlighter.
    pub const ENTITY_LAYER: &'static [DecorationKind] =
        &[DecorationKind::Highlight, DecorationKind::Inconsistency];

    /// Kinds written by the show/tell overlay.
    pub const SHOW_TELL_LAYER: &'static [DecorationKind] = &[DecorationKind::TellingPhrase];
}

/// What a decoration points back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum DecorationRef {
    Entity(EntityId),
    Suggestion(SuggestionId),
}

/// A single annotated span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decoration {
    pub start: usize,
    pub end: usize,
    pub kind: DecorationKind,
    pub ref_id: DecorationRef,
}

impl Decoration {
    /// Decoration for an entity mention.
    pub fn entity(kind: DecorationKind, start: usize, end: usize, entity: EntityId) -> Self {
        Self {
            start,
            end,
            kind,
            ref_id: DecorationRef::Entity(entity),
        }
    }

    /// Decoration for a telling phrase.
    pub fn telling(start: usize, end: usize, suggestion: SuggestionId) -> Self {
        Self {
            start,
            end,
            kind: DecorationKind::TellingPhrase,
            ref_id: DecorationRef::Suggestion(suggestion),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two half-open spans share at least one byte.
    pub fn overlaps(&self, other: &Decoration) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether this decoration fully covers `start..end`.
    fn covers(&self, start: usize, end: usize) -> bool {
        self.start <= start && end <= self.end
    }
}

/// One run of a rendered block: either plain text or text under a decoration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub start: usize,
    pub end: usize,
    pub text: String,
    /// `None` for plain text.
    pub decoration: Option<(DecorationKind, DecorationRef)>,
}

impl Run {
    pub fn is_plain(&self) -> bool {
        self.decoration.is_none()
    }

    pub fn kind(&self) -> Option<DecorationKind> {
        self.decoration.map(|(kind, _)| kind)
    }
}

/// Sort `spans` and check them against `text` and the kinds being replaced.
///
/// On success the spans are sorted by start offset and pairwise disjoint.
pub fn validate_spans(
    text: &str,
    kinds: &[DecorationKind],
    spans: &mut [Decoration],
) -> Result<(), DecorationError> {
    spans.sort_by_key(|d| (d.start, d.end));

    for span in spans.iter() {
        if !kinds.contains(&span.kind) {
            return Err(DecorationError::KindNotReplaced { kind: span.kind });
        }
        if span.start >= span.end {
            return Err(DecorationError::Empty { at: span.start });
        }
        if span.end > text.len() {
            return Err(DecorationError::OutOfBounds {
                start: span.start,
                end: span.end,
                len: text.len(),
            });
        }
        for offset in [span.start, span.end] {
            if !text.is_char_boundary(offset) {
                return Err(DecorationError::NotCharBoundary { offset });
            }
        }
    }

    for pair in spans.windows(2) {
        if pair[0].overlaps(&pair[1]) {
            return Err(DecorationError::Overlap {
                first_start: pair[0].start,
                first_end: pair[0].end,
                second_start: pair[1].start,
                second_end: pair[1].end,
            });
        }
    }

    Ok(())
}

/// Replace every decoration whose kind is in `kinds` with `new_spans`.
///
/// Decorations of other kinds are left untouched. If `new_spans` fail
/// validation, `existing` is not modified.
pub fn replace_by_kind(
    text: &str,
    existing: &mut Vec<Decoration>,
    kinds: &[DecorationKind],
    mut new_spans: Vec<Decoration>,
) -> Result<(), DecorationError> {
    validate_spans(text, kinds, &mut new_spans)?;

    existing.retain(|d| !kinds.contains(&d.kind));
    existing.extend(new_spans);
    existing.sort_by_key(|d| (d.start, d.end, d.kind));
    Ok(())
}

/// Partition `text` into plain and decorated runs.
///
/// Where decorations of different kinds cover the same offset, the kind with
/// the higher [`DecorationKind::priority`] wins. Concatenating the runs'
/// text always reproduces `text`.
pub fn render(text: &str, decorations: &[Decoration]) -> Vec<Run> {
    let len = text.len();
    let mut cuts = BTreeSet::from([0, len]);
    for d in decorations {
        for offset in [d.start.min(len), d.end.min(len)] {
            if text.is_char_boundary(offset) {
                cuts.insert(offset);
            }
        }
    }

    let cuts: Vec<usize> = cuts.into_iter().collect();
    let mut runs: Vec<Run> = Vec::new();

    for window in cuts.windows(2) {
        let (start, end) = (window[0], window[1]);
        if start == end {
            continue;
        }

        let winner = decorations
            .iter()
            .filter(|d| d.covers(start, end))
            .fold(None::<&Decoration>, |best, d| match best {
                Some(b) if b.kind.priority() >= d.kind.priority() => Some(b),
                _ => Some(d),
            });
        let tag = winner.map(|d| (d.kind, d.ref_id));
        let source = winner.map(|d| (d.start, d.end));

        // Adjacent segments merge only when they come from the same decoration
        // (or are both plain).
        if let Some(last) = runs.last_mut() {
            let same_source = match (last.decoration, tag) {
                (None, None) => true,
                (Some(a), Some(b)) => {
                    a == b && source.is_some_and(|(s, e)| s <= last.start && end <= e)
                }
                _ => false,
            };
            if same_source {
                last.end = end;
                last.text.push_str(&text[start..end]);
                continue;
            }
        }

        runs.push(Run {
            start,
            end,
            text: text[start..end].to_string(),
            decoration: tag,
        });
    }

    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn highlight(start: usize, end: usize) -> Decoration {
        Decoration::entity(DecorationKind::Highlight, start, end, EntityId::new())
    }

    fn reconstruct(runs: &[Run]) -> String {
        runs.iter().map(|r| r.text.as_str()).collect()
    }

    #[test]
    fn test_validate_sorts_spans() {
        let text = "Mara met Tobin at dawn";
        let mut spans = vec![highlight(9, 14), highlight(0, 4)];
        validate_spans(text, DecorationKind::ENTITY_LAYER, &mut spans).unwrap();
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[1].start, 9);
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let text = "Old King Bren arrived";
        let mut spans = vec![highlight(0, 13), highlight(9, 13)];
        let err = validate_spans(text, DecorationKind::ENTITY_LAYER, &mut spans).unwrap_err();
        assert!(matches!(err, DecorationError::Overlap { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_offsets() {
        let text = "café";
        let mut out_of_bounds = vec![highlight(0, 10)];
        assert!(matches!(
            validate_spans(text, DecorationKind::ENTITY_LAYER, &mut out_of_bounds),
            Err(DecorationError::OutOfBounds { .. })
        ));

        // 'é' occupies bytes 3..5
        let mut split_char = vec![highlight(0, 4)];
        assert_eq!(
            validate_spans(text, DecorationKind::ENTITY_LAYER, &mut split_char),
            Err(DecorationError::NotCharBoundary { offset: 4 })
        );

        let mut empty = vec![highlight(2, 2)];
        assert_eq!(
            validate_spans(text, DecorationKind::ENTITY_LAYER, &mut empty),
            Err(DecorationError::Empty { at: 2 })
        );
    }

    #[test]
    fn test_replace_by_kind_keeps_other_kinds() {
        let text = "She was very angry with Tobin";
        let mut existing = vec![
            Decoration::telling(4, 18, SuggestionId::new()),
            highlight(24, 29),
        ];

        let replacement = Decoration::entity(DecorationKind::Inconsistency, 24, 29, EntityId::new());
        replace_by_kind(text, &mut existing, DecorationKind::ENTITY_LAYER, vec![replacement.clone()])
            .unwrap();

        assert_eq!(existing.len(), 2);
        assert_eq!(existing[0].kind, DecorationKind::TellingPhrase);
        assert_eq!(existing[1], replacement);
    }

    #[test]
    fn test_replace_by_kind_failure_leaves_state() {
        let text = "Mara and Tobin";
        let original = vec![highlight(0, 4)];
        let mut existing = original.clone();

        let err = replace_by_kind(
            text,
            &mut existing,
            DecorationKind::SHOW_TELL_LAYER,
            vec![highlight(9, 14)],
        )
        .unwrap_err();

        assert!(matches!(err, DecorationError::KindNotReplaced { .. }));
        assert_eq!(existing, original);
    }

    #[test]
    fn test_render_plain_text() {
        let runs = render("nothing to see", &[]);
        assert_eq!(runs.len(), 1);
        assert!(runs[0].is_plain());
        assert_eq!(runs[0].text, "nothing to see");
    }

    #[test]
    fn test_render_empty_text() {
        assert!(render("", &[]).is_empty());
    }

    #[test]
    fn test_render_priority() {
        // TellingPhrase covers "felt that Mara was"; Highlight covers "Mara".
        let text = "He felt that Mara was lost";
        let telling = Decoration::telling(3, 21, SuggestionId::new());
        let mara = Decoration::entity(DecorationKind::Inconsistency, 13, 17, EntityId::new());
        let runs = render(text, &[telling, mara]);

        let kinds: Vec<_> = runs.iter().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                None,
                Some(DecorationKind::TellingPhrase),
                Some(DecorationKind::Inconsistency),
                Some(DecorationKind::TellingPhrase),
                None,
            ]
        );
        assert_eq!(runs[2].text, "Mara");
        assert_eq!(reconstruct(&runs), text);
    }

    #[test]
    fn test_render_adjacent_decorations_stay_separate() {
        let text = "MaraTobin";
        let a = highlight(0, 4);
        let b = highlight(4, 9);
        let runs = render(text, &[a, b]);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].text, "Mara");
        assert_eq!(runs[1].text, "Tobin");
    }

    #[test]
    fn test_render_round_trip_and_disjoint() {
        let samples: Vec<(&str, Vec<Decoration>)> = vec![
            ("Old King Bren arrived", vec![highlight(0, 13)]),
            (
                "Mara was sad. Tobin was angry.",
                vec![
                    highlight(0, 4),
                    Decoration::telling(0, 12, SuggestionId::new()),
                    highlight(14, 19),
                    Decoration::telling(14, 29, SuggestionId::new()),
                ],
            ),
            ("Ünïcödé names: Zoë", vec![highlight(19, 23)]),
        ];

        for (text, decorations) in samples {
            let runs = render(text, &decorations);
            assert_eq!(reconstruct(&runs), text);
            for pair in runs.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            assert_eq!(runs.first().map(|r| r.start), Some(0));
            assert_eq!(runs.last().map(|r| r.end), Some(text.len()));
        }
    }
}
