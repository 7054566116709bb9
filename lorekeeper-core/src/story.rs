//! The story aggregate: content, characters, world entries and version log.
//!
//! The annotation engine reads entities from here, writes chapter text back
//! after edits, appends versions and restores snapshots.

use crate::entity::{Entity, EntityCategory};
use crate::ids::{ChapterId, EntityId, StoryId};
use crate::versions::VersionLog;
use serde::{Deserialize, Serialize};

/// A chapter of the manuscript. Paragraphs are separated by newlines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    pub title: String,
    pub content: String,
}

impl Chapter {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: ChapterId::new(),
            title: title.into(),
            content: content.into(),
        }
    }
}

/// A story character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub role: String,
    /// Derived image data (e.g. a generated portrait). Never snapshotted.
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Character {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            description: description.into(),
            role: String::new(),
            avatar: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// A world-building entry (place, faction, artifact, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldEntry {
    pub id: EntityId,
    pub name: String,
    pub category: String,
    pub description: String,
}

impl WorldEntry {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            category: category.into(),
            description: description.into(),
        }
    }
}

/// A character as captured in a snapshot: everything except derived assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub role: String,
}

impl From<&Character> for CharacterSnapshot {
    fn from(c: &Character) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            description: c.description.clone(),
            role: c.role.clone(),
        }
    }
}

/// Immutable point-in-time copy of story content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorySnapshot {
    pub title: String,
    pub synopsis: String,
    pub chapters: Vec<Chapter>,
    pub world: Vec<WorldEntry>,
    pub characters: Vec<CharacterSnapshot>,
}

/// A manuscript and everything the annotation engine needs from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub title: String,
    pub synopsis: String,
    pub chapters: Vec<Chapter>,
    pub world: Vec<WorldEntry>,
    pub characters: Vec<Character>,
    #[serde(default)]
    pub versions: VersionLog,
}

impl Story {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: StoryId::new(),
            title: title.into(),
            synopsis: String::new(),
            chapters: Vec::new(),
            world: Vec::new(),
            characters: Vec::new(),
            versions: VersionLog::default(),
        }
    }

    pub fn with_synopsis(mut self, synopsis: impl Into<String>) -> Self {
        self.synopsis = synopsis.into();
        self
    }

    /// Add a chapter and return its ID.
    pub fn add_chapter(&mut self, chapter: Chapter) -> ChapterId {
        let id = chapter.id;
        self.chapters.push(chapter);
        id
    }

    /// Add a character and return its ID.
    pub fn add_character(&mut self, character: Character) -> EntityId {
        let id = character.id;
        self.characters.push(character);
        id
    }

    /// Add a world entry and return its ID.
    pub fn add_world_entry(&mut self, entry: WorldEntry) -> EntityId {
        let id = entry.id;
        self.world.push(entry);
        id
    }

    pub fn chapter(&self, id: ChapterId) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.id == id)
    }

    pub fn chapter_mut(&mut self, id: ChapterId) -> Option<&mut Chapter> {
        self.chapters.iter_mut().find(|c| c.id == id)
    }

    pub fn character(&self, id: EntityId) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == id)
    }

    /// Every recognizable entity: characters first, then world entries.
    pub fn entities(&self) -> Vec<Entity> {
        let characters = self.characters.iter().map(|c| {
            Entity::new(c.id, &c.name, EntityCategory::Character, &c.description)
        });
        let world = self.world.iter().map(|w| {
            Entity::new(
                w.id,
                &w.name,
                EntityCategory::World(w.category.clone()),
                &w.description,
            )
        });
        characters.chain(world).collect()
    }

    /// Copy the content fields, leaving out derived assets and the version log.
    pub fn snapshot(&self) -> StorySnapshot {
        StorySnapshot {
            title: self.title.clone(),
            synopsis: self.synopsis.clone(),
            chapters: self.chapters.clone(),
            world: self.world.clone(),
            characters: self.characters.iter().map(CharacterSnapshot::from).collect(),
        }
    }

    /// Overwrite content with `snapshot`.
    ///
    /// The story id and version log are kept. Character avatars are taken from
    /// the live character with the same id, or left empty when that character
    /// no longer exists.
    pub fn restore(&mut self, snapshot: &StorySnapshot) {
        let characters = snapshot
            .characters
            .iter()
            .map(|saved| Character {
                id: saved.id,
                name: saved.name.clone(),
                description: saved.description.clone(),
                role: saved.role.clone(),
                avatar: self.character(saved.id).and_then(|live| live.avatar.clone()),
            })
            .collect();

        self.title = snapshot.title.clone();
        self.synopsis = snapshot.synopsis.clone();
        self.chapters = snapshot.chapters.clone();
        self.world = snapshot.world.clone();
        self.characters = characters;
    }
}
