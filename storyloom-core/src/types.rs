//! Identifier types shared by every Storyloom module.
//!
//! Location and NPC ids are authored by world files (`loc_001`, `npc_007`),
//! so they are opaque strings. Session ids are generated locally and double
//! as directory names and SQLite keys, which is why they are validated.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoryError};

// ---------------------------------------------------------------------------
// World identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an id string.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw id.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a location node in the world graph.
    LocationId
);

string_id!(
    /// Identifier of a non-player character.
    NpcId
);

// ---------------------------------------------------------------------------
// Session identifiers
// ---------------------------------------------------------------------------

/// Identifier of one play session.
///
/// Generated ids look like `20261015_142233_9f2c41ab`: UTC creation time
/// followed by eight hex characters of a v4 UUID.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh session id stamped with `now`.
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8]))
    }

    /// Parse an externally supplied session id.
    ///
    /// Only ASCII letters, digits, `_` and `-` are accepted so the id is safe
    /// to use as a path component.
    ///
    /// # Errors
    ///
    /// Returns [`StoryError::InvalidSession`] for empty, traversal or
    /// non-portable ids.
    pub fn parse(raw: &str) -> Result<Self> {
        let reason = if raw.is_empty() {
            Some("empty")
        } else if raw.contains("..") {
            Some("path traversal")
        } else if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            Some("only [A-Za-z0-9_-] allowed")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(StoryError::InvalidSession {
                id: raw.to_string(),
                reason,
            }),
            None => Ok(Self(raw.to_string())),
        }
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = StoryError;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
