//! Entities and the name index used to recognize them in prose.

use crate::ids::EntityId;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Where an entity comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityCategory {
    /// A story character.
    Character,
    /// A world entry, carrying its user-defined category ("Location", "Faction", ...).
    World(String),
}

impl EntityCategory {
    /// Display name for this category.
    pub fn name(&self) -> &str {
        match self {
            EntityCategory::Character => "Character",
            EntityCategory::World(category) => category,
        }
    }
}

/// A named story element the annotation engine can recognize.
///
/// Read-only from the engine's point of view; rebuilt from the story whenever
/// characters or world entries change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub category: EntityCategory,
    pub description: String,
}

impl Entity {
    pub fn new(
        id: EntityId,
        name: impl Into<String>,
        category: EntityCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            category,
            description: description.into(),
        }
    }

    /// Check if a name matches this entity (case-insensitive).
    pub fn matches_name(&self, query: &str) -> bool {
        self.name.trim().to_lowercase() == query.trim().to_lowercase()
    }
}

/// A name match found in a block of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityMatch<'a> {
    pub start: usize,
    pub end: usize,
    pub entity: &'a Entity,
}

/// Case-insensitive, word-anchored index from entity names to entities.
///
/// All names are compiled into one alternation ordered longest first, so a
/// longer name ("Old King Bren") always preempts a shorter one it contains
/// ("Bren") at the same position.
#[derive(Debug, Clone)]
pub struct EntityIndex {
    entities: Vec<Entity>,
    /// Lowercased name to position in `entities`.
    by_name: HashMap<String, usize>,
    pattern: Option<Regex>,
    fingerprint: u64,
}

impl Default for EntityIndex {
    fn default() -> Self {
        Self::empty()
    }
}

impl EntityIndex {
    /// An index that recognizes nothing.
    pub fn empty() -> Self {
        Self {
            entities: Vec::new(),
            by_name: HashMap::new(),
            pattern: None,
            fingerprint: fingerprint_of(&[]),
        }
    }

    /// Build an index over `entities`.
    ///
    /// Names shorter than `min_name_chars` characters are not indexed. When
    /// two entities share a name (ignoring case) the first one wins.
    pub fn build(entities: Vec<Entity>, min_name_chars: usize) -> Result<Self, regex::Error> {
        let fingerprint = fingerprint_of(&entities);

        let mut by_name = HashMap::new();
        for (i, entity) in entities.iter().enumerate() {
            let name = entity.name.trim();
            if name.chars().count() < min_name_chars {
                continue;
            }
            by_name.entry(name.to_lowercase()).or_insert(i);
        }

        let mut names: Vec<&str> = by_name
            .values()
            .map(|&i| entities[i].name.trim())
            .collect();
        names.sort_by(|a, b| {
            b.chars()
                .count()
                .cmp(&a.chars().count())
                .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        });

        let pattern = if names.is_empty() {
            None
        } else {
            let alternation = names
                .iter()
                .map(|name| regex::escape(name))
                .collect::<Vec<_>>()
                .join("|");
            Some(
                RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
                    .case_insensitive(true)
                    .build()?,
            )
        };

        Ok(Self {
            entities,
            by_name,
            pattern,
            fingerprint,
        })
    }

    /// Fingerprint of the entity list this index was built from.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Number of indexed (matchable) names.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Get an entity by ID.
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Find an entity by name (case-insensitive exact match).
    pub fn lookup(&self, name: &str) -> Option<&Entity> {
        self.by_name
            .get(&name.trim().to_lowercase())
            .map(|&i| &self.entities[i])
    }

    /// All non-overlapping entity mentions in `text`, left to right.
    pub fn find_matches<'a>(&'a self, text: &str) -> Vec<EntityMatch<'a>> {
        let Some(pattern) = &self.pattern else {
            return Vec::new();
        };

        pattern
            .find_iter(text)
            .filter_map(|m| {
                self.lookup(m.as_str()).map(|entity| EntityMatch {
                    start: m.start(),
                    end: m.end(),
                    entity,
                })
            })
            .collect()
    }

    /// Entities mentioned in `text`, each once, in order of first mention.
    pub fn mentioned_in(&self, text: &str) -> Vec<&Entity> {
        let mut seen = Vec::new();
        for m in self.find_matches(text) {
            if !seen.iter().any(|e: &&Entity| e.id == m.entity.id) {
                seen.push(m.entity);
            }
        }
        seen
    }
}

/// Fingerprint an entity list so callers can tell whether a rebuild is needed.
pub fn fingerprint_of(entities: &[Entity]) -> u64 {
    let mut hasher = DefaultHasher::new();
    entities.hash(&mut hasher);
    hasher.finish()
}
