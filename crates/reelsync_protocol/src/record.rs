//! Entity state and change records.

use serde::{Deserialize, Serialize};

/// Stable identifier of a syncable entity, unique per account.
///
/// Movies are keyed by their external catalog id (e.g. `tt0111161`);
/// people are keyed by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "entity_key", rename_all = "snake_case")]
pub enum EntityKey {
    /// A movie, keyed by catalog id.
    Movie(String),
    /// A person, keyed by name.
    Person(String),
}

impl EntityKey {
    /// Returns the raw key string.
    pub fn raw(&self) -> &str {
        match self {
            EntityKey::Movie(id) => id,
            EntityKey::Person(name) => name,
        }
    }

    /// Returns the entity type name used on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            EntityKey::Movie(_) => "movie",
            EntityKey::Person(_) => "person",
        }
    }
}

/// Watch status of a movie. Always written as an absolute value, never
/// toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WatchStatus {
    /// On the to-watch pile.
    ToWatch,
    /// Watched.
    Watched,
    /// Deliberately skipped.
    Skipped,
}

impl Default for WatchStatus {
    fn default() -> Self {
        WatchStatus::ToWatch
    }
}

/// Vote on a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    /// Upvote.
    Up,
    /// Downvote.
    Down,
    /// No vote recorded.
    None,
}

impl Default for Vote {
    fn default() -> Self {
        Vote::None
    }
}

/// One person's recommendation of a movie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationEntry {
    /// Name of the recommending person.
    pub person: String,
    /// When the recommendation was made (Unix seconds).
    pub date_recommended: f64,
    /// The account holder's vote on this recommendation.
    #[serde(default)]
    pub vote: Vote,
}

/// Authoritative state of one movie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieState {
    /// External catalog id.
    pub imdb_id: String,
    /// Display title, if known.
    #[serde(default)]
    pub title: Option<String>,
    /// Watch status.
    #[serde(default)]
    pub status: WatchStatus,
    /// The account holder's rating, 0.0..=10.0.
    #[serde(default)]
    pub my_rating: Option<f64>,
    /// When the movie was watched (Unix seconds).
    #[serde(default)]
    pub date_watched: Option<f64>,
    /// Who recommended this movie.
    #[serde(default)]
    pub recommendations: Vec<RecommendationEntry>,
    /// Tombstone flag. Deleted movies stay in the change feed.
    #[serde(default)]
    pub deleted: bool,
    /// Server-assigned modification timestamp (Unix seconds).
    pub last_modified: f64,
}

impl MovieState {
    /// Creates a fresh movie state with no server timestamp yet.
    pub fn new(imdb_id: impl Into<String>) -> Self {
        Self {
            imdb_id: imdb_id.into(),
            title: None,
            status: WatchStatus::default(),
            my_rating: None,
            date_watched: None,
            recommendations: Vec::new(),
            deleted: false,
            last_modified: 0.0,
        }
    }

    /// Finds the recommendation from a given person.
    pub fn recommendation(&self, person: &str) -> Option<&RecommendationEntry> {
        self.recommendations.iter().find(|r| r.person == person)
    }
}

/// Authoritative state of one person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonState {
    /// Name, unique per account.
    pub name: String,
    /// Whether recommendations from this person are trusted.
    #[serde(default)]
    pub is_trusted: bool,
    /// Whether this person is preselected in new recommendations.
    #[serde(default)]
    pub is_default: bool,
    /// Display color.
    #[serde(default)]
    pub color: Option<String>,
    /// Display emoji.
    #[serde(default)]
    pub emoji: Option<String>,
    /// Tombstone flag.
    #[serde(default)]
    pub deleted: bool,
    /// Server-assigned modification timestamp (Unix seconds).
    pub last_modified: f64,
}

impl PersonState {
    /// Creates a fresh person state with no server timestamp yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_trusted: false,
            is_default: false,
            color: None,
            emoji: None,
            deleted: false,
            last_modified: 0.0,
        }
    }
}

/// Wire representation of one entity's current state plus its
/// server-assigned timestamp.
///
/// Returned both by the action endpoint (as part of an ack) and by the
/// change feed (as a bulk listing). Clients apply a record only when it is
/// strictly newer than their local copy; see [`ChangeRecord::is_newer_than`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum ChangeRecord {
    /// A movie snapshot.
    Movie(MovieState),
    /// A person snapshot.
    Person(PersonState),
}

impl ChangeRecord {
    /// Returns the key of the entity this record describes.
    pub fn entity_key(&self) -> EntityKey {
        match self {
            ChangeRecord::Movie(m) => EntityKey::Movie(m.imdb_id.clone()),
            ChangeRecord::Person(p) => EntityKey::Person(p.name.clone()),
        }
    }

    /// Returns the server-assigned timestamp.
    pub fn last_modified(&self) -> f64 {
        match self {
            ChangeRecord::Movie(m) => m.last_modified,
            ChangeRecord::Person(p) => p.last_modified,
        }
    }

    /// Overwrites the server-assigned timestamp.
    pub fn set_last_modified(&mut self, ts: f64) {
        match self {
            ChangeRecord::Movie(m) => m.last_modified = ts,
            ChangeRecord::Person(p) => p.last_modified = ts,
        }
    }

    /// Returns true if this record is strictly newer than the given
    /// timestamp.
    ///
    /// Strict comparison is what makes re-applying a change-feed page a
    /// no-op and protects against stale overwrites from out-of-order
    /// network delivery.
    pub fn is_newer_than(&self, local_last_modified: f64) -> bool {
        self.last_modified() > local_last_modified
    }

    /// Returns true if this record is a tombstone.
    pub fn is_deleted(&self) -> bool {
        match self {
            ChangeRecord::Movie(m) => m.deleted,
            ChangeRecord::Person(p) => p.deleted,
        }
    }
}
