//! Live annotation engine for manuscript chapters.
//!
//! This crate provides:
//! - Entity highlighting: every mention of a known character or world entry
//!   is decorated as the author types
//! - Lore consistency checks against each entity's established description
//! - An on-demand show-vs-tell overlay with one-click rewrites
//! - Version history with manual saves and capped autosaves
//! - AI continuation, rewriting and formatting through Claude
//!
//! # Quick Start
//!
//! ```ignore
//! use lorekeeper_core::{Collaborators, EditSession, EditorConfig, Story, Chapter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut story = Story::new("The Salt Road");
//!     story.add_chapter(Chapter::new("Departure", "Mara left Oakhollow."));
//!
//!     let mut session =
//!         EditSession::open_first(story, EditorConfig::default(), Collaborators::from_env()?)?;
//!
//!     session.type_text("At dawn, ")?;
//!     while let Some(outcome) = session.next_outcome().await {
//!         println!("{outcome:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consistency;
pub mod decoration;
pub mod document;
pub mod entity;
pub mod highlight;
pub mod ids;
pub mod scheduler;
pub mod services;
pub mod session;
pub mod show_tell;
pub mod story;
pub mod testing;
pub mod versions;

// Primary public API
pub use config::EditorConfig;
pub use consistency::{Inconsistency, InconsistencyRecords, Verdict};
pub use decoration::{Decoration, DecorationError, DecorationKind, DecorationRef, Run};
pub use document::{Block, Caret, Document, EditError};
pub use entity::{Entity, EntityCategory, EntityIndex};
pub use ids::{BlockId, ChapterId, EntityId, StoryId, SuggestionId, VersionId};
pub use services::{
    ClaudeConfig, ClaudeServices, ConsistencyVerifier, ServiceError, ShowTellAnalyzer,
    TextGenerator,
};
pub use session::{Collaborators, EditSession, Outcome, SessionError};
pub use show_tell::{Overlay, OverlayState, Placement, ShowTellError, Suggestion};
pub use story::{Chapter, Character, Story, StorySnapshot, WorldEntry};
pub use versions::{Version, VersionKind, VersionLog};
