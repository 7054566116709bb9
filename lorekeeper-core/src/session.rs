//! EditSession - the primary public API for annotating a chapter.
//!
//! A session owns one chapter's live [`Document`] together with the entity
//! index, inconsistency records, show/tell overlay and the story's version
//! log. Edits are synchronous; everything that reacts to them (highlighting,
//! verification, autosave) is debounced onto spawned timers, and external
//! calls run as spawned tasks. Both report back over a channel, and the host
//! applies their results by calling [`EditSession::next_outcome`] or
//! [`EditSession::drain`]. All state is therefore mutated from the host's
//! task only.
//!
//! Methods that schedule work must be called from within a tokio runtime.

use crate::config::EditorConfig;
use crate::consistency::{self, InconsistencyRecords, Verdict, VerificationRequest};
use crate::decoration::{DecorationError, Run};
use crate::document::{Caret, Document, EditError, EditResult};
use crate::entity::{fingerprint_of, EntityIndex};
use crate::highlight::{self, HighlightReport};
use crate::ids::{BlockId, ChapterId, EntityId, SuggestionId, VersionId};
use crate::scheduler::Debouncer;
use crate::services::{
    ClaudeServices, ConsistencyVerifier, ServiceError, ShowTellAnalyzer, TextGenerator,
};
use crate::show_tell::{self, Overlay, OverlayState, ShowTellError, Suggestion};
use crate::story::{Character, Story, WorldEntry};
use crate::versions::Version;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Errors from EditSession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Edit error: {0}")]
    Edit(#[from] EditError),

    #[error("Show/tell error: {0}")]
    ShowTell(#[from] ShowTellError),

    #[error("Generation failed: {0}")]
    Generation(#[source] ServiceError),

    #[error("Could not build entity index: {0}")]
    EntityIndex(#[from] regex::Error),

    #[error("Unknown chapter {0}")]
    UnknownChapter(ChapterId),

    #[error("Story has no chapters")]
    NoChapters,

    #[error("Unknown version {0}")]
    UnknownVersion(VersionId),

    #[error("Session is closed")]
    Closed,
}

/// The external services a session calls.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn TextGenerator>,
    pub verifier: Arc<dyn ConsistencyVerifier>,
    pub analyzer: Arc<dyn ShowTellAnalyzer>,
}

impl Collaborators {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        verifier: Arc<dyn ConsistencyVerifier>,
        analyzer: Arc<dyn ShowTellAnalyzer>,
    ) -> Self {
        Self {
            generator,
            verifier,
            analyzer,
        }
    }

    /// Use one value for all three roles.
    pub fn shared<S>(services: S) -> Self
    where
        S: TextGenerator + ConsistencyVerifier + ShowTellAnalyzer + 'static,
    {
        let services = Arc::new(services);
        Self {
            generator: services.clone(),
            verifier: services.clone(),
            analyzer: services,
        }
    }

    /// Claude-backed collaborators using ANTHROPIC_API_KEY.
    pub fn from_env() -> Result<Self, ServiceError> {
        Ok(Self::shared(ClaudeServices::from_env()?))
    }
}

/// What applying one background event did.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The debounced highlight pass ran over recently edited blocks.
    Highlighted(HighlightReport),

    /// A block's verification debounce fired and `calls` verifier calls started.
    VerificationIssued { block: BlockId, calls: usize },

    /// A verdict was applied to the inconsistency records.
    VerificationApplied {
        block: BlockId,
        entity: EntityId,
        contradictory: bool,
        changed: bool,
    },

    /// A verdict arrived for text that has since changed and was dropped.
    StaleVerification { block: BlockId, entity: EntityId },

    /// A verifier call failed; records are unchanged.
    VerificationFailed {
        block: BlockId,
        entity: EntityId,
        error: ServiceError,
    },

    /// An automatic version was written.
    Autosaved(VersionId),

    /// Show/tell suggestions are on display.
    SuggestionsReady { placed: usize, total: usize },

    /// The show/tell analyzer failed; the mode is off again.
    AnalysisFailed(ServiceError),

    /// The suggestions could not be decorated; the mode is off again.
    OverlayRejected(DecorationError),

    /// An analysis result arrived after the mode was left or re-entered.
    StaleAnalysis,

    /// A timer fired after it had been rescheduled or cancelled.
    Superseded,
}

enum Event {
    HighlightDue {
        ticket: u64,
    },
    VerifyDue {
        block: BlockId,
        ticket: u64,
    },
    AutosaveDue {
        ticket: u64,
    },
    Verified {
        request: VerificationRequest,
        result: Result<Verdict, ServiceError>,
    },
    Analyzed {
        generation: u64,
        result: Result<Vec<Suggestion>, ServiceError>,
    },
}

fn highlight_due(_: (), ticket: u64) -> Event {
    Event::HighlightDue { ticket }
}

fn verify_due(block: BlockId, ticket: u64) -> Event {
    Event::VerifyDue { block, ticket }
}

fn autosave_due(_: (), ticket: u64) -> Event {
    Event::AutosaveDue { ticket }
}

/// A live editing session over one chapter of a story.
pub struct EditSession {
    config: EditorConfig,
    services: Collaborators,

    story: Story,
    chapter: ChapterId,
    document: Document,
    caret: Caret,

    index: EntityIndex,
    records: InconsistencyRecords,
    overlay: OverlayState,
    overlay_generation: u64,

    /// Blocks edited since the last highlight pass.
    dirty: HashSet<BlockId>,

    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    highlight_timer: Debouncer<(), Event>,
    verify_timers: Debouncer<BlockId, Event>,
    autosave_timer: Debouncer<(), Event>,
    in_flight: JoinSet<()>,

    closed: bool,
}

impl EditSession {
    /// Open `chapter` of `story` for editing.
    ///
    /// Builds the entity index and highlights the whole chapter before
    /// returning.
    pub fn open(
        mut story: Story,
        chapter: ChapterId,
        config: EditorConfig,
        services: Collaborators,
    ) -> Result<Self, SessionError> {
        let content = story
            .chapter(chapter)
            .ok_or(SessionError::UnknownChapter(chapter))?
            .content
            .clone();
        story.versions.set_retention(config.max_automatic_versions);

        let index = EntityIndex::build(story.entities(), config.min_entity_name_chars)?;
        let document = Document::from_text(&content);
        let caret = Caret {
            block: document.first_block(),
            offset: 0,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let highlight_timer = Debouncer::new(tx.clone(), config.highlight_debounce, highlight_due);
        let verify_timers = Debouncer::new(tx.clone(), config.verify_debounce, verify_due);
        let autosave_timer = Debouncer::new(tx.clone(), config.autosave_debounce, autosave_due);

        let mut session = Self {
            config,
            services,
            story,
            chapter,
            document,
            caret,
            index,
            records: InconsistencyRecords::new(),
            overlay: OverlayState::Off,
            overlay_generation: 0,
            dirty: HashSet::new(),
            tx,
            rx,
            highlight_timer,
            verify_timers,
            autosave_timer,
            in_flight: JoinSet::new(),
            closed: false,
        };
        session.highlight_all();

        tracing::info!(
            story = %session.story.id,
            chapter = %chapter,
            blocks = session.document.blocks().len(),
            entities = session.index.len(),
            "edit session opened"
        );
        Ok(session)
    }

    /// Open the first chapter of `story`.
    pub fn open_first(
        story: Story,
        config: EditorConfig,
        services: Collaborators,
    ) -> Result<Self, SessionError> {
        let chapter = story
            .chapters
            .first()
            .map(|c| c.id)
            .ok_or(SessionError::NoChapters)?;
        Self::open(story, chapter, config, services)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn story(&self) -> &Story {
        &self.story
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn chapter_id(&self) -> ChapterId {
        self.chapter
    }

    pub fn caret(&self) -> Caret {
        self.caret
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn entity_index(&self) -> &EntityIndex {
        &self.index
    }

    pub fn inconsistencies(&self) -> &InconsistencyRecords {
        &self.records
    }

    pub fn overlay(&self) -> &OverlayState {
        &self.overlay
    }

    pub fn show_tell_active(&self) -> bool {
        self.overlay.is_active()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Presentation runs for one block.
    pub fn render(&self, block: BlockId) -> Option<Vec<Run>> {
        self.document.block(block).map(|b| b.render())
    }

    /// Number of debounce timers that have not fired yet.
    pub fn pending_timers(&self) -> usize {
        self.highlight_timer.pending_count()
            + self.verify_timers.pending_count()
            + self.autosave_timer.pending_count()
    }

    /// Number of external calls still running.
    pub fn in_flight_calls(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether a verification is scheduled for `block`.
    pub fn verification_pending(&self, block: BlockId) -> bool {
        self.verify_timers.is_pending(&block)
    }

    /// Move the caret. The offset must lie on a character boundary.
    pub fn set_caret(&mut self, caret: Caret) -> Result<(), SessionError> {
        let block = self
            .document
            .block(caret.block)
            .ok_or(EditError::UnknownBlock(caret.block))?;
        if !block.text().is_char_boundary(caret.offset) {
            return Err(EditError::InvalidOffset {
                offset: caret.offset,
            }
            .into());
        }
        self.caret = caret;
        Ok(())
    }

    // ========================================================================
    // Edits
    // ========================================================================

    /// Insert text at the caret.
    pub fn type_text(&mut self, text: &str) -> Result<Caret, SessionError> {
        let Caret { block, offset } = self.caret;
        self.insert_text(block, offset, text)
    }

    pub fn insert_text(
        &mut self,
        block: BlockId,
        offset: usize,
        text: &str,
    ) -> Result<Caret, SessionError> {
        self.edit(|doc| doc.insert_text(block, offset, text))
    }

    pub fn delete_range(
        &mut self,
        block: BlockId,
        start: usize,
        end: usize,
    ) -> Result<Caret, SessionError> {
        self.edit(|doc| doc.delete_range(block, start, end))
    }

    pub fn replace_range(
        &mut self,
        block: BlockId,
        start: usize,
        end: usize,
        text: &str,
    ) -> Result<Caret, SessionError> {
        self.edit(|doc| doc.replace_range(block, start, end, text))
    }

    pub fn replace_block_text(&mut self, block: BlockId, text: &str) -> Result<Caret, SessionError> {
        self.edit(|doc| doc.replace_block_text(block, text))
    }

    pub fn split_block(&mut self, block: BlockId, offset: usize) -> Result<Caret, SessionError> {
        self.edit(|doc| doc.split_block(block, offset))
    }

    pub fn insert_block_after(&mut self, block: BlockId, text: &str) -> Result<Caret, SessionError> {
        self.edit(|doc| doc.insert_block_after(block, text))
    }

    pub fn merge_with_previous(&mut self, block: BlockId) -> Result<Caret, SessionError> {
        self.edit(|doc| doc.merge_with_previous(block))
    }

    pub fn remove_block(&mut self, block: BlockId) -> Result<Caret, SessionError> {
        self.edit(|doc| doc.remove_block(block))
    }

    fn edit(
        &mut self,
        apply: impl FnOnce(&mut Document) -> Result<EditResult, EditError>,
    ) -> Result<Caret, SessionError> {
        self.ensure_open()?;
        let result = apply(&mut self.document)?;
        if self.overlay.is_active() {
            self.leave_show_tell("edit");
        }
        Ok(self.after_edit(result))
    }

    /// Bookkeeping shared by every successful edit.
    fn after_edit(&mut self, result: EditResult) -> Caret {
        self.caret = result.caret;

        let mut released = false;
        for removed in &result.removed {
            self.verify_timers.cancel(removed);
            self.dirty.remove(removed);
            released |= self.records.release_block(*removed, &[]);
        }
        self.dirty.extend(result.touched.iter().copied());
        self.sync_chapter();
        if released {
            tracing::info!("lore contradictions from removed paragraphs cleared");
            self.highlight_all();
        }

        self.highlight_timer.schedule(());
        if self.config.verify_enabled {
            self.schedule_verification(self.caret.block);
        }
        if self.config.autosave_enabled {
            self.autosave_timer.schedule(());
        }

        self.caret
    }

    fn schedule_verification(&mut self, block: BlockId) {
        let long_enough = self
            .document
            .block(block)
            .is_some_and(|b| b.text().chars().count() >= self.config.min_verify_chars);
        if long_enough {
            self.verify_timers.schedule(block);
        } else {
            self.verify_timers.cancel(&block);
        }
    }

    fn sync_chapter(&mut self) {
        let text = self.document.text();
        if let Some(chapter) = self.story.chapter_mut(self.chapter) {
            chapter.content = text;
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Wait for the next background event and apply it.
    ///
    /// Returns `None` once nothing is scheduled or running, or after
    /// [`close`](Self::close).
    pub async fn next_outcome(&mut self) -> Option<Outcome> {
        loop {
            if self.closed {
                return None;
            }
            if let Ok(event) = self.rx.try_recv() {
                return Some(self.handle(event));
            }
            if self.is_idle() {
                return None;
            }

            tokio::select! {
                Some(event) = self.rx.recv() => return Some(self.handle(event)),
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "background call panicked");
                        }
                    }
                }
                else => return None,
            }
        }
    }

    /// Apply every event that is already queued, without waiting.
    pub fn drain(&mut self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while !self.closed {
            match self.rx.try_recv() {
                Ok(event) => outcomes.push(self.handle(event)),
                Err(_) => break,
            }
        }
        outcomes
    }

    /// Apply events until nothing is scheduled or running.
    pub async fn settle(&mut self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.next_outcome().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    fn is_idle(&mut self) -> bool {
        while self.in_flight.try_join_next().is_some() {}
        self.pending_timers() == 0 && self.in_flight.is_empty() && self.rx.is_empty()
    }

    fn handle(&mut self, event: Event) -> Outcome {
        match event {
            Event::HighlightDue { ticket } => {
                if !self.highlight_timer.claim(&(), ticket) {
                    return Outcome::Superseded;
                }
                Outcome::Highlighted(self.highlight_dirty())
            }
            Event::VerifyDue { block, ticket } => {
                if !self.verify_timers.claim(&block, ticket) {
                    return Outcome::Superseded;
                }
                let calls = self.issue_verification(block);
                Outcome::VerificationIssued { block, calls }
            }
            Event::AutosaveDue { ticket } => {
                if !self.autosave_timer.claim(&(), ticket) {
                    return Outcome::Superseded;
                }
                let snapshot = self.story.snapshot();
                let id = self.story.versions.save_automatic(snapshot);
                tracing::info!(version = %id, "autosaved");
                Outcome::Autosaved(id)
            }
            Event::Verified { request, result } => self.apply_verification(request, result),
            Event::Analyzed { generation, result } => self.apply_analysis(generation, result),
        }
    }

    // ========================================================================
    // Highlighting and verification
    // ========================================================================

    fn highlight_all(&mut self) -> HighlightReport {
        self.dirty.clear();
        highlight::highlight_document(&self.index, &self.records, &mut self.document, |_| true)
    }

    fn highlight_dirty(&mut self) -> HighlightReport {
        let dirty = std::mem::take(&mut self.dirty);
        highlight::highlight_document(&self.index, &self.records, &mut self.document, |id| {
            dirty.contains(&id)
        })
    }

    /// Start one verifier call per entity mentioned in `block`.
    fn issue_verification(&mut self, block: BlockId) -> usize {
        let Some(target) = self.document.block(block) else {
            return 0;
        };
        let mentioned: Vec<EntityId> = self
            .index
            .mentioned_in(target.text())
            .into_iter()
            .map(|e| e.id)
            .collect();
        let requests =
            consistency::plan_verification(&self.index, target, self.config.min_verify_chars);
        let calls = requests.len();

        if self.records.release_block(block, &mentioned) {
            tracing::info!(block = %block, "lore contradictions no longer mentioned cleared");
            self.highlight_all();
        }

        for request in requests {
            let verifier = Arc::clone(&self.services.verifier);
            let tx = self.tx.clone();
            self.in_flight.spawn(async move {
                let result = verifier
                    .verify(
                        &request.paragraph,
                        &request.entity.name,
                        &request.entity.description,
                    )
                    .await;
                let _ = tx.send(Event::Verified { request, result });
            });
        }

        if calls > 0 {
            tracing::debug!(block = %block, calls, "verification issued");
        }
        calls
    }

    fn apply_verification(
        &mut self,
        request: VerificationRequest,
        result: Result<Verdict, ServiceError>,
    ) -> Outcome {
        let block = request.block;
        let entity = request.entity.id;

        let entity_unchanged = self.index.get(entity) == Some(&request.entity);
        if !consistency::is_current(&self.document, &request) || !entity_unchanged {
            tracing::debug!(
                block = %block,
                entity = %request.entity.name,
                "discarding stale verification result"
            );
            return Outcome::StaleVerification { block, entity };
        }

        match result {
            Ok(verdict) => {
                let contradictory = verdict.is_contradictory;
                let changed = self.records.apply(&request, verdict);
                if changed {
                    if contradictory {
                        tracing::info!(entity = %request.entity.name, "lore contradiction flagged");
                    } else {
                        tracing::info!(entity = %request.entity.name, "lore contradiction cleared");
                    }
                    self.highlight_all();
                }
                Outcome::VerificationApplied {
                    block,
                    entity,
                    contradictory,
                    changed,
                }
            }
            Err(error) => {
                tracing::warn!(
                    block = %block,
                    entity = %request.entity.name,
                    error = %error,
                    "verification failed"
                );
                Outcome::VerificationFailed {
                    block,
                    entity,
                    error,
                }
            }
        }
    }

    // ========================================================================
    // Entities
    // ========================================================================

    /// Rebuild the entity index if the story's entities changed.
    ///
    /// Returns whether a rebuild happened. A rebuild drops records for
    /// entities that no longer exist and re-highlights every block.
    pub fn refresh_entities(&mut self) -> Result<bool, SessionError> {
        self.ensure_open()?;
        let entities = self.story.entities();
        if fingerprint_of(&entities) == self.index.fingerprint() {
            return Ok(false);
        }

        self.index = EntityIndex::build(entities, self.config.min_entity_name_chars)?;
        self.records.retain_known(&self.index);
        let report = self.highlight_all();
        tracing::info!(
            entities = self.index.len(),
            changed = report.changed.len(),
            "entity index rebuilt"
        );
        Ok(true)
    }

    /// Change characters or world entries, then refresh the index.
    pub fn edit_entities<R>(
        &mut self,
        f: impl FnOnce(&mut Vec<Character>, &mut Vec<WorldEntry>) -> R,
    ) -> Result<R, SessionError> {
        self.ensure_open()?;
        let result = f(&mut self.story.characters, &mut self.story.world);
        self.refresh_entities()?;
        Ok(result)
    }

    pub fn add_character(&mut self, character: Character) -> Result<EntityId, SessionError> {
        let id = character.id;
        self.edit_entities(|characters, _| characters.push(character))?;
        Ok(id)
    }

    pub fn add_world_entry(&mut self, entry: WorldEntry) -> Result<EntityId, SessionError> {
        let id = entry.id;
        self.edit_entities(|_, world| world.push(entry))?;
        Ok(id)
    }

    /// Remove a character or world entry. Returns whether it existed.
    pub fn remove_entity(&mut self, id: EntityId) -> Result<bool, SessionError> {
        self.edit_entities(|characters, world| {
            let before = characters.len() + world.len();
            characters.retain(|c| c.id != id);
            world.retain(|w| w.id != id);
            before != characters.len() + world.len()
        })
    }

    // ========================================================================
    // Show/tell
    // ========================================================================

    /// Enter show/tell mode and start analysis of the whole chapter.
    ///
    /// The pending highlight pass runs immediately; edit-triggered passes
    /// stay off while the mode is active.
    pub fn request_show_tell(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.overlay.is_active() {
            return Err(ShowTellError::Busy.into());
        }

        if self.highlight_timer.cancel(&()) {
            self.highlight_dirty();
        }

        self.overlay_generation += 1;
        let generation = self.overlay_generation;
        self.overlay = OverlayState::Analyzing { generation };

        let analyzer = Arc::clone(&self.services.analyzer);
        let tx = self.tx.clone();
        let text = self.document.text();
        self.in_flight.spawn(async move {
            let result = analyzer.analyze(&text).await;
            let _ = tx.send(Event::Analyzed { generation, result });
        });

        tracing::info!(generation, "show/tell analysis requested");
        Ok(())
    }

    /// Leave show/tell mode. Returns whether it was active.
    pub fn exit_show_tell(&mut self) -> bool {
        if !self.overlay.is_active() {
            return false;
        }
        self.leave_show_tell("toggled off");
        true
    }

    /// Enter show/tell mode if it is off, leave it otherwise.
    /// Returns whether the mode is now active.
    pub fn toggle_show_tell(&mut self) -> Result<bool, SessionError> {
        if self.exit_show_tell() {
            return Ok(false);
        }
        self.request_show_tell()?;
        Ok(true)
    }

    /// Replace a suggestion's phrase with one of its alternatives.
    ///
    /// Leaves show/tell mode and resumes normal highlighting, verification
    /// and autosave for the edited block.
    pub fn select_alternative(
        &mut self,
        suggestion: SuggestionId,
        alternative: usize,
    ) -> Result<Caret, SessionError> {
        self.ensure_open()?;
        let (placement, replacement) = self.overlay.selection(suggestion, alternative)?;
        self.leave_show_tell("alternative selected");
        let result = self.document.replace_range(
            placement.block,
            placement.start,
            placement.end,
            &replacement,
        )?;
        Ok(self.after_edit(result))
    }

    fn leave_show_tell(&mut self, reason: &'static str) {
        let uncovered = show_tell::undecorate(&mut self.document);
        self.overlay = OverlayState::Off;
        if !uncovered.is_empty() {
            highlight::highlight_document(&self.index, &self.records, &mut self.document, |id| {
                uncovered.contains(&id)
            });
        }
        tracing::debug!(reason, uncovered = uncovered.len(), "show/tell mode left");
    }

    fn apply_analysis(
        &mut self,
        generation: u64,
        result: Result<Vec<Suggestion>, ServiceError>,
    ) -> Outcome {
        let current =
            matches!(self.overlay, OverlayState::Analyzing { generation: g } if g == generation);
        if !current {
            tracing::debug!(generation, "discarding stale show/tell analysis");
            return Outcome::StaleAnalysis;
        }

        match result {
            Ok(suggestions) => {
                let placements = show_tell::place_suggestions(&self.document, &suggestions);
                if let Err(e) = show_tell::decorate(&mut self.document, &placements) {
                    tracing::error!(error = %e, "could not decorate show/tell suggestions");
                    self.overlay = OverlayState::Off;
                    return Outcome::OverlayRejected(e);
                }

                let placed = placements.len();
                let total = suggestions.len();
                tracing::info!(placed, total, "show/tell suggestions ready");
                self.overlay = OverlayState::Active(Overlay {
                    suggestions,
                    placements,
                });
                Outcome::SuggestionsReady { placed, total }
            }
            Err(error) => {
                tracing::warn!(error = %error, "show/tell analysis failed");
                self.overlay = OverlayState::Off;
                Outcome::AnalysisFailed(error)
            }
        }
    }

    // ========================================================================
    // Versions and chapters
    // ========================================================================

    /// Save a named version of the story as it is now.
    pub fn save_version(&mut self, name: impl Into<String>) -> Result<VersionId, SessionError> {
        self.ensure_open()?;
        self.sync_chapter();
        let snapshot = self.story.snapshot();
        let id = self.story.versions.save_manual(name, snapshot);
        tracing::info!(version = %id, "version saved");
        Ok(id)
    }

    /// All versions, newest first.
    pub fn versions(&self) -> &[Version] {
        self.story.versions.list()
    }

    pub fn delete_version(&mut self, id: VersionId) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.story.versions.delete(id) {
            tracing::info!(version = %id, "version deleted");
            Ok(())
        } else {
            Err(SessionError::UnknownVersion(id))
        }
    }

    /// Replace the story's content with a saved version.
    ///
    /// Pending and in-flight work is cancelled and inconsistency records are
    /// cleared. The session stays on the same chapter if the version has it,
    /// otherwise it moves to the version's first chapter.
    pub fn restore_version(&mut self, id: VersionId) -> Result<(), SessionError> {
        self.ensure_open()?;
        let snapshot = self
            .story
            .versions
            .get(id)
            .ok_or(SessionError::UnknownVersion(id))?
            .snapshot
            .clone();
        let chapter = if snapshot.chapters.iter().any(|c| c.id == self.chapter) {
            self.chapter
        } else {
            snapshot
                .chapters
                .first()
                .map(|c| c.id)
                .ok_or(SessionError::NoChapters)?
        };

        let cancelled = self.cancel_background();
        self.overlay = OverlayState::Off;
        self.story.restore(&snapshot);
        self.records = InconsistencyRecords::new();
        self.index = EntityIndex::build(self.story.entities(), self.config.min_entity_name_chars)?;
        self.load_chapter(chapter)?;

        tracing::info!(version = %id, cancelled, "version restored");
        Ok(())
    }

    /// Switch the session to another chapter of the story.
    pub fn open_chapter(&mut self, chapter: ChapterId) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.story.chapter(chapter).is_none() {
            return Err(SessionError::UnknownChapter(chapter));
        }

        self.sync_chapter();
        let cancelled = self.cancel_background();
        if self.overlay.is_active() {
            self.leave_show_tell("chapter changed");
        }
        self.load_chapter(chapter)?;

        tracing::info!(chapter = %chapter, cancelled, "chapter opened");
        Ok(())
    }

    fn load_chapter(&mut self, chapter: ChapterId) -> Result<(), SessionError> {
        let content = &self
            .story
            .chapter(chapter)
            .ok_or(SessionError::UnknownChapter(chapter))?
            .content;
        self.document = Document::from_text(content);
        self.chapter = chapter;
        self.caret = Caret {
            block: self.document.first_block(),
            offset: 0,
        };
        self.highlight_all();
        Ok(())
    }

    // ========================================================================
    // Generation
    // ========================================================================

    /// Continue the story from the caret and insert the result there.
    pub async fn continue_writing(&mut self) -> Result<Caret, SessionError> {
        self.ensure_open()?;
        let context = self.text_before_caret();
        let generated = self
            .services
            .generator
            .continue_text(&context)
            .await
            .map_err(SessionError::Generation)?;

        let insertion = join_continuation(&context, &generated);
        if insertion.is_empty() {
            return Ok(self.caret);
        }
        let Caret { block, offset } = self.caret;
        self.edit(|doc| doc.insert_text(block, offset, &insertion))
    }

    /// Rewrite `start..end` of a block following `instruction`.
    pub async fn modify_selection(
        &mut self,
        block: BlockId,
        start: usize,
        end: usize,
        instruction: &str,
    ) -> Result<Caret, SessionError> {
        self.ensure_open()?;
        let paragraph = self
            .document
            .block(block)
            .ok_or(EditError::UnknownBlock(block))?
            .text();
        if start >= end {
            return Err(EditError::InvalidRange { start, end }.into());
        }
        for offset in [start, end] {
            if !paragraph.is_char_boundary(offset) {
                return Err(EditError::InvalidOffset { offset }.into());
            }
        }
        let selection = paragraph[start..end].to_string();
        let context = paragraph.to_string();

        let rewritten = self
            .services
            .generator
            .modify(&selection, &context, instruction)
            .await
            .map_err(SessionError::Generation)?;

        self.edit(|doc| doc.replace_range(block, start, end, rewritten.trim()))
    }

    /// Format raw notes into prose and insert them as new blocks after the caret.
    pub async fn insert_formatted(&mut self, raw: &str) -> Result<Caret, SessionError> {
        self.ensure_open()?;
        let formatted = self
            .services
            .generator
            .format_rich(raw)
            .await
            .map_err(SessionError::Generation)?;

        let formatted = formatted.trim();
        if formatted.is_empty() {
            return Ok(self.caret);
        }
        let anchor = self.caret.block;
        self.edit(|doc| doc.insert_block_after(anchor, formatted))
    }

    fn text_before_caret(&self) -> String {
        let mut parts = Vec::new();
        for block in self.document.blocks() {
            if block.id() == self.caret.block {
                parts.push(block.text().get(..self.caret.offset).unwrap_or(block.text()));
                break;
            }
            parts.push(block.text());
        }
        parts.join("\n")
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Cancel every timer and in-flight call and drop queued events.
    /// Returns how many timers and calls were cancelled.
    fn cancel_background(&mut self) -> usize {
        let mut cancelled = self.highlight_timer.cancel_all()
            + self.verify_timers.cancel_all()
            + self.autosave_timer.cancel_all();

        while self.in_flight.try_join_next().is_some() {}
        cancelled += self.in_flight.len();
        self.in_flight.abort_all();
        self.in_flight.detach_all();

        while self.rx.try_recv().is_ok() {}
        self.dirty.clear();
        cancelled
    }

    /// Close the session. Pending and in-flight work is cancelled and later
    /// edits fail with [`SessionError::Closed`].
    pub fn close(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        self.sync_chapter();
        let cancelled = self.cancel_background();
        self.overlay = OverlayState::Off;
        self.closed = true;
        tracing::info!(story = %self.story.id, cancelled, "edit session closed");
        cancelled
    }

    /// Close the session and hand back the story.
    pub fn into_story(mut self) -> Story {
        self.close();
        self.story
    }
}

/// Text to insert for a continuation: trailing whitespace trimmed and a
/// separating space added when neither side has one.
fn join_continuation(context: &str, generated: &str) -> String {
    let generated = generated.trim_end();
    let needs_space = context.ends_with(|c: char| !c.is_whitespace())
        && generated.starts_with(|c: char| !c.is_whitespace());
    if needs_space {
        format!(" {generated}")
    } else {
        generated.to_string()
    }
}
