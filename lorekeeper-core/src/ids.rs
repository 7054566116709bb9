//! Typed identifiers for story elements and editor state.
//!
//! Every identifier is a UUID newtype so that a block id can never be handed
//! to something expecting an entity id.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random ID.
            #[inline]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[inline]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            #[inline]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.0.to_string()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_id!(
    /// Identifies a story.
    StoryId
);

define_id!(
    /// Identifies a chapter within a story.
    ChapterId
);

define_id!(
    /// Identifies a character or world entry the engine can recognize by name.
    EntityId
);

define_id!(
    /// Identifies a paragraph block in the live document.
    BlockId
);

define_id!(
    /// Identifies a show-vs-tell suggestion within one analysis batch.
    SuggestionId
);

define_id!(
    /// Identifies a saved version of the story.
    VersionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(BlockId::new(), BlockId::new());
    }

    #[test]
    fn test_id_from_str_round_trip() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id: EntityId = uuid_str.parse().unwrap();
        assert_eq!(id.to_string(), uuid_str);
    }

    #[test]
    fn test_id_debug_format() {
        let id = VersionId::from_uuid(Uuid::nil());
        assert_eq!(format!("{id:?}"), "VersionId(00000000)");
    }

    #[test]
    fn test_id_serde_transparent() {
        let id = ChapterId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: ChapterId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
