//! The live document: an ordered list of paragraph blocks.
//!
//! Only the user's edits change block text. Every text change bumps the
//! block's edit counter, which background work captures when it starts and
//! compares when it finishes to detect stale results.

use crate::decoration::{self, Decoration, DecorationError, DecorationKind, Run};
use crate::ids::BlockId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from document edits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("unknown block {0}")]
    UnknownBlock(BlockId),

    #[error("offset {offset} is out of bounds or not on a character boundary")]
    InvalidOffset { offset: usize },

    #[error("invalid range {start}..{end}")]
    InvalidRange { start: usize, end: usize },

    #[error("the first block has no previous block to merge with")]
    FirstBlock,

    #[error("a document must keep at least one block")]
    LastBlock,
}

/// Caret position: a byte offset within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caret {
    pub block: BlockId,
    pub offset: usize,
}

/// A paragraph and its decorations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    id: BlockId,
    text: String,
    decorations: Vec<Decoration>,
    edit_counter: u64,
}

impl Block {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: BlockId::new(),
            text: text.into(),
            decorations: Vec::new(),
            edit_counter: 0,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Decorations sorted by start offset.
    pub fn decorations(&self) -> &[Decoration] {
        &self.decorations
    }

    /// Decorations of one kind.
    pub fn decorations_of(&self, kind: DecorationKind) -> impl Iterator<Item = &Decoration> {
        self.decorations.iter().filter(move |d| d.kind == kind)
    }

    /// Number of text edits this block has seen.
    pub fn edit_counter(&self) -> u64 {
        self.edit_counter
    }

    /// Replace all decorations whose kind is in `kinds` with `spans`.
    ///
    /// Fails without touching the block if the spans overlap each other or
    /// do not fit the text.
    pub fn apply_decorations(
        &mut self,
        kinds: &[DecorationKind],
        spans: Vec<Decoration>,
    ) -> Result<(), DecorationError> {
        decoration::replace_by_kind(&self.text, &mut self.decorations, kinds, spans)
    }

    /// Drop every decoration whose kind is in `kinds`.
    pub fn clear_decorations(&mut self, kinds: &[DecorationKind]) {
        self.decorations.retain(|d| !kinds.contains(&d.kind));
    }

    /// Plain and decorated runs for presentation.
    pub fn render(&self) -> Vec<Run> {
        decoration::render(&self.text, &self.decorations)
    }

    fn set_text(&mut self, text: String) {
        self.text = text;
        self.edit_counter += 1;
        // Offsets no longer line up with the text; the next pass rebuilds them.
        self.decorations.clear();
    }
}

/// What an edit changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditResult {
    /// Where the caret ends up.
    pub caret: Caret,
    /// Blocks whose text changed or that were created.
    pub touched: Vec<BlockId>,
    /// Blocks that no longer exist.
    pub removed: Vec<BlockId>,
}

/// The live text buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    blocks: Vec<Block>,
}

impl Default for Document {
    fn default() -> Self {
        Self::from_text("")
    }
}

impl Document {
    /// Split `text` into one block per line.
    pub fn from_text(text: &str) -> Self {
        Self {
            blocks: text.split('\n').map(Block::new).collect(),
        }
    }

    /// The document's plain text, blocks joined by newlines.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    pub(crate) fn blocks_mut(&mut self) -> impl Iterator<Item = &mut Block> {
        self.blocks.iter_mut()
    }

    pub fn first_block(&self) -> BlockId {
        // from_text always yields at least one block and removals keep one
        self.blocks[0].id
    }

    pub fn last_block(&self) -> BlockId {
        self.blocks[self.blocks.len() - 1].id
    }

    fn position(&self, id: BlockId) -> Result<usize, EditError> {
        self.blocks
            .iter()
            .position(|b| b.id == id)
            .ok_or(EditError::UnknownBlock(id))
    }

    /// Insert `text` at `offset`. Newlines in `text` split the block.
    pub fn insert_text(
        &mut self,
        block: BlockId,
        offset: usize,
        text: &str,
    ) -> Result<EditResult, EditError> {
        let idx = self.position(block)?;
        self.splice(idx, offset, offset, text)
    }

    /// Delete `start..end` within one block.
    pub fn delete_range(
        &mut self,
        block: BlockId,
        start: usize,
        end: usize,
    ) -> Result<EditResult, EditError> {
        let idx = self.position(block)?;
        self.splice(idx, start, end, "")
    }

    /// Replace `start..end` within one block with `text`.
    pub fn replace_range(
        &mut self,
        block: BlockId,
        start: usize,
        end: usize,
        text: &str,
    ) -> Result<EditResult, EditError> {
        let idx = self.position(block)?;
        self.splice(idx, start, end, text)
    }

    /// Replace a block's whole text.
    pub fn replace_block_text(
        &mut self,
        block: BlockId,
        text: &str,
    ) -> Result<EditResult, EditError> {
        let idx = self.position(block)?;
        let len = self.blocks[idx].text.len();
        self.splice(idx, 0, len, text)
    }

    /// Split a block at `offset`; the caret lands at the start of the new block.
    pub fn split_block(&mut self, block: BlockId, offset: usize) -> Result<EditResult, EditError> {
        self.insert_text(block, offset, "\n")
    }

    /// Insert a new block after `block`.
    pub fn insert_block_after(
        &mut self,
        block: BlockId,
        text: &str,
    ) -> Result<EditResult, EditError> {
        let idx = self.position(block)?;
        let new_blocks: Vec<Block> = text
            .split('\n')
            .map(|line| {
                let mut block = Block::new(line);
                block.edit_counter = 1;
                block
            })
            .collect();

        let touched: Vec<BlockId> = new_blocks.iter().map(|b| b.id).collect();
        let caret = new_blocks
            .last()
            .map(|b| Caret {
                block: b.id,
                offset: b.text.len(),
            })
            .unwrap_or(Caret { block, offset: 0 });

        self.blocks.splice(idx + 1..idx + 1, new_blocks);

        Ok(EditResult {
            caret,
            touched,
            removed: Vec::new(),
        })
    }

    /// Join a block onto the end of the block before it.
    pub fn merge_with_previous(&mut self, block: BlockId) -> Result<EditResult, EditError> {
        let idx = self.position(block)?;
        if idx == 0 {
            return Err(EditError::FirstBlock);
        }

        let removed = self.blocks.remove(idx);
        let previous = &mut self.blocks[idx - 1];
        let join_at = previous.text.len();
        let mut text = std::mem::take(&mut previous.text);
        text.push_str(&removed.text);
        previous.set_text(text);

        Ok(EditResult {
            caret: Caret {
                block: previous.id,
                offset: join_at,
            },
            touched: vec![previous.id],
            removed: vec![removed.id],
        })
    }

    /// Remove a block entirely.
    pub fn remove_block(&mut self, block: BlockId) -> Result<EditResult, EditError> {
        let idx = self.position(block)?;
        if self.blocks.len() == 1 {
            return Err(EditError::LastBlock);
        }

        self.blocks.remove(idx);
        let neighbour = &self.blocks[idx.saturating_sub(1).min(self.blocks.len() - 1)];
        let offset = if idx == 0 { 0 } else { neighbour.text.len() };

        Ok(EditResult {
            caret: Caret {
                block: neighbour.id,
                offset,
            },
            touched: Vec::new(),
            removed: vec![block],
        })
    }

    /// Replace `start..end` of block `idx` with `insert`, splitting on newlines.
    fn splice(
        &mut self,
        idx: usize,
        start: usize,
        end: usize,
        insert: &str,
    ) -> Result<EditResult, EditError> {
        let current = &self.blocks[idx].text;
        if start > end {
            return Err(EditError::InvalidRange { start, end });
        }
        for offset in [start, end] {
            if offset > current.len() || !current.is_char_boundary(offset) {
                return Err(EditError::InvalidOffset { offset });
            }
        }

        let mut combined = String::with_capacity(current.len() - (end - start) + insert.len());
        combined.push_str(&current[..start]);
        combined.push_str(insert);
        combined.push_str(&current[end..]);
        let caret_at = start + insert.len();

        let mut lines = combined.split('\n');
        let first = lines.next().unwrap_or_default().to_string();
        let mut consumed = first.len() + 1;

        let anchor = &mut self.blocks[idx];
        let anchor_id = anchor.id;
        let mut caret = (caret_at <= first.len()).then_some(Caret {
            block: anchor_id,
            offset: caret_at,
        });
        anchor.set_text(first);

        let mut touched = vec![anchor_id];
        let mut new_blocks = Vec::new();
        for line in lines {
            let mut block = Block::new(line);
            // Fresh blocks count as edited once so their counter is never zero.
            block.edit_counter = 1;
            if caret.is_none() && caret_at <= consumed + line.len() {
                caret = Some(Caret {
                    block: block.id,
                    offset: caret_at - consumed,
                });
            }
            consumed += line.len() + 1;
            touched.push(block.id);
            new_blocks.push(block);
        }

        let tail = idx + 1;
        self.blocks.splice(tail..tail, new_blocks);

        Ok(EditResult {
            caret: caret.unwrap_or(Caret {
                block: anchor_id,
                offset: 0,
            }),
            touched,
            removed: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::EntityId;

    #[test]
    fn test_from_text_round_trip() {
        let text = "First paragraph.\n\nThird paragraph.";
        let doc = Document::from_text(text);
        assert_eq!(doc.blocks().len(), 3);
        assert_eq!(doc.text(), text);
    }

    #[test]
    fn test_insert_bumps_counter_and_clears_decorations() {
        let mut doc = Document::from_text("Mara waits.");
        let id = doc.first_block();
        doc.block_mut(id)
            .unwrap()
            .apply_decorations(
                &[DecorationKind::Highlight],
                vec![Decoration::entity(DecorationKind::Highlight, 0, 4, EntityId::new())],
            )
            .unwrap();

        let result = doc.insert_text(id, 10, " patiently").unwrap();
        let block = doc.block(id).unwrap();
        assert_eq!(block.text(), "Mara waits patiently.");
        assert_eq!(block.edit_counter(), 1);
        assert!(block.decorations().is_empty());
        assert_eq!(result.caret, Caret { block: id, offset: 20 });
    }

    #[test]
    fn test_insert_with_newline_splits() {
        let mut doc = Document::from_text("onetwo");
        let id = doc.first_block();
        let result = doc.insert_text(id, 3, "\nmiddle\n").unwrap();

        let texts: Vec<_> = doc.blocks().iter().map(|b| b.text()).collect();
        assert_eq!(texts, vec!["one", "middle", "two"]);
        assert_eq!(result.touched.len(), 3);
        assert_eq!(result.caret.block, doc.blocks()[2].id());
        assert_eq!(result.caret.offset, 0);
    }

    #[test]
    fn test_split_and_merge() {
        let mut doc = Document::from_text("Hello world");
        let id = doc.first_block();
        let split = doc.split_block(id, 5).unwrap();
        assert_eq!(doc.blocks().len(), 2);
        assert_eq!(doc.blocks()[1].text(), " world");

        let merged = doc.merge_with_previous(split.caret.block).unwrap();
        assert_eq!(doc.blocks().len(), 1);
        assert_eq!(doc.text(), "Hello world");
        assert_eq!(merged.caret, Caret { block: id, offset: 5 });
        assert_eq!(merged.removed, vec![split.caret.block]);
    }

    #[test]
    fn test_delete_and_replace() {
        let mut doc = Document::from_text("She was very angry.");
        let id = doc.first_block();
        doc.delete_range(id, 8, 13).unwrap();
        assert_eq!(doc.text(), "She was angry.");
        doc.replace_range(id, 4, 13, "slammed the door").unwrap();
        assert_eq!(doc.text(), "She slammed the door.");
        assert_eq!(doc.block(id).unwrap().edit_counter(), 2);
    }

    #[test]
    fn test_invalid_offsets_rejected() {
        let mut doc = Document::from_text("café");
        let id = doc.first_block();
        assert_eq!(
            doc.insert_text(id, 4, "x"),
            Err(EditError::InvalidOffset { offset: 4 })
        );
        assert_eq!(
            doc.delete_range(id, 3, 1),
            Err(EditError::InvalidRange { start: 3, end: 1 })
        );
        assert_eq!(doc.block(id).unwrap().edit_counter(), 0);
    }

    #[test]
    fn test_remove_and_merge_limits() {
        let mut doc = Document::from_text("only");
        let id = doc.first_block();
        assert_eq!(doc.remove_block(id), Err(EditError::LastBlock));
        assert_eq!(doc.merge_with_previous(id), Err(EditError::FirstBlock));

        let unknown = BlockId::new();
        assert_eq!(
            doc.insert_text(unknown, 0, "x"),
            Err(EditError::UnknownBlock(unknown))
        );
    }

    #[test]
    fn test_insert_block_after() {
        let mut doc = Document::from_text("a\nc");
        let first = doc.first_block();
        let result = doc.insert_block_after(first, "b").unwrap();
        assert_eq!(doc.text(), "a\nb\nc");
        assert_eq!(result.touched.len(), 1);
        assert_eq!(result.caret.block, doc.blocks()[1].id());
        assert_eq!(doc.block(first).unwrap().edit_counter(), 0);
    }
}
