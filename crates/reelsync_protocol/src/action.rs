//! Sync actions: serialized intents to mutate one entity.

use crate::record::{EntityKey, Vote, WatchStatus};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Payload for `addRecommendation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddRecommendation {
    /// Target movie.
    pub imdb_id: String,
    /// Recommending person.
    pub person: String,
    /// When the recommendation was made; defaults to the server clock.
    #[serde(default)]
    pub date_recommended: Option<f64>,
    /// Display title, carried so the server can create the movie row.
    #[serde(default)]
    pub title: Option<String>,
}

/// Payload for `removeRecommendation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoveRecommendation {
    /// Target movie.
    pub imdb_id: String,
    /// Recommending person.
    pub person: String,
}

/// Payload for `markWatched`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkWatched {
    /// Target movie.
    pub imdb_id: String,
    /// When the movie was watched.
    #[serde(default)]
    pub date_watched: Option<f64>,
    /// Rating given at watch time, 0.0..=10.0.
    #[serde(default)]
    pub my_rating: Option<f64>,
}

/// Payload for `updateStatus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStatus {
    /// Target movie.
    pub imdb_id: String,
    /// New status, as an absolute value.
    pub status: WatchStatus,
}

/// Payload for `updateRating`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRating {
    /// Target movie.
    pub imdb_id: String,
    /// New rating, 0.0..=10.0.
    pub rating: f64,
}

/// Payload for `setRecommendationVote`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetRecommendationVote {
    /// Target movie.
    pub imdb_id: String,
    /// Recommending person whose entry is voted on.
    pub person: String,
    /// The vote, as an absolute value ("set vote to up"), never a toggle.
    pub vote: Vote,
}

/// Payload for `deleteMovie`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteMovie {
    /// Target movie.
    pub imdb_id: String,
}

/// Payload for `addPerson`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddPerson {
    /// Person name, unique per account.
    pub name: String,
    /// Trust flag.
    #[serde(default)]
    pub is_trusted: bool,
    /// Default-selection flag.
    #[serde(default)]
    pub is_default: bool,
    /// Display color.
    #[serde(default)]
    pub color: Option<String>,
    /// Display emoji.
    #[serde(default)]
    pub emoji: Option<String>,
}

/// Payload for `updatePerson`. Absent fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePerson {
    /// Target person.
    pub name: String,
    /// New trust flag.
    #[serde(default)]
    pub is_trusted: Option<bool>,
    /// New default-selection flag.
    #[serde(default)]
    pub is_default: Option<bool>,
    /// New display color.
    #[serde(default)]
    pub color: Option<String>,
    /// New display emoji.
    #[serde(default)]
    pub emoji: Option<String>,
}

/// Payload for `updatePersonTrust`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePersonTrust {
    /// Target person.
    pub name: String,
    /// New trust flag, as an absolute value.
    pub is_trusted: bool,
}

/// Payload for `removePerson`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovePerson {
    /// Target person.
    pub name: String,
}

/// The closed set of recognized mutations.
///
/// Serialized as `{"action": "<name>", "data": {...}}`. An unknown action
/// string fails deserialization; there is no catch-all variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "camelCase")]
pub enum ActionKind {
    /// Record that a person recommended a movie.
    AddRecommendation(AddRecommendation),
    /// Remove a person's recommendation of a movie.
    RemoveRecommendation(RemoveRecommendation),
    /// Mark a movie watched, with optional date and rating.
    MarkWatched(MarkWatched),
    /// Set a movie's watch status.
    UpdateStatus(UpdateStatus),
    /// Set the account holder's rating of a movie.
    UpdateRating(UpdateRating),
    /// Set the vote on one recommendation.
    SetRecommendationVote(SetRecommendationVote),
    /// Soft-delete a movie (tombstone).
    DeleteMovie(DeleteMovie),
    /// Create a person.
    AddPerson(AddPerson),
    /// Update a person's attributes.
    UpdatePerson(UpdatePerson),
    /// Set a person's trust flag.
    UpdatePersonTrust(UpdatePersonTrust),
    /// Soft-delete a person (tombstone).
    RemovePerson(RemovePerson),
}

impl ActionKind {
    /// Returns the wire name of this action.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::AddRecommendation(_) => "addRecommendation",
            ActionKind::RemoveRecommendation(_) => "removeRecommendation",
            ActionKind::MarkWatched(_) => "markWatched",
            ActionKind::UpdateStatus(_) => "updateStatus",
            ActionKind::UpdateRating(_) => "updateRating",
            ActionKind::SetRecommendationVote(_) => "setRecommendationVote",
            ActionKind::DeleteMovie(_) => "deleteMovie",
            ActionKind::AddPerson(_) => "addPerson",
            ActionKind::UpdatePerson(_) => "updatePerson",
            ActionKind::UpdatePersonTrust(_) => "updatePersonTrust",
            ActionKind::RemovePerson(_) => "removePerson",
        }
    }

    /// Returns the key of the entity this action targets.
    pub fn entity_key(&self) -> EntityKey {
        match self {
            ActionKind::AddRecommendation(p) => EntityKey::Movie(p.imdb_id.clone()),
            ActionKind::RemoveRecommendation(p) => EntityKey::Movie(p.imdb_id.clone()),
            ActionKind::MarkWatched(p) => EntityKey::Movie(p.imdb_id.clone()),
            ActionKind::UpdateStatus(p) => EntityKey::Movie(p.imdb_id.clone()),
            ActionKind::UpdateRating(p) => EntityKey::Movie(p.imdb_id.clone()),
            ActionKind::SetRecommendationVote(p) => EntityKey::Movie(p.imdb_id.clone()),
            ActionKind::DeleteMovie(p) => EntityKey::Movie(p.imdb_id.clone()),
            ActionKind::AddPerson(p) => EntityKey::Person(p.name.clone()),
            ActionKind::UpdatePerson(p) => EntityKey::Person(p.name.clone()),
            ActionKind::UpdatePersonTrust(p) => EntityKey::Person(p.name.clone()),
            ActionKind::RemovePerson(p) => EntityKey::Person(p.name.clone()),
        }
    }
}

/// A deterministic idempotency key for one action delivery.
///
/// Re-sending the same action (same nonce) produces the same key, which is
/// what lets the server dedupe at-least-once delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Returns the hex-encoded key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An intent to mutate one entity.
///
/// Wire shape: `{"action": ..., "data": {...}, "timestamp": ..., "nonce": ...}`.
/// `timestamp` is the client's clock and is advisory only; it is never used
/// for conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// The mutation itself.
    #[serde(flatten)]
    pub kind: ActionKind,
    /// Client wall-clock time at enqueue (Unix seconds). Advisory only.
    #[serde(rename = "timestamp")]
    pub client_timestamp: f64,
    /// Client-generated nonce distinguishing separate intents of the same
    /// shape (e.g. two consecutive rating updates).
    pub nonce: Uuid,
}

impl Action {
    /// Creates an action with a fresh nonce.
    pub fn new(kind: ActionKind, client_timestamp: f64) -> Self {
        Self {
            kind,
            client_timestamp,
            nonce: Uuid::new_v4(),
        }
    }

    /// Returns the key of the entity this action targets.
    pub fn entity_key(&self) -> EntityKey {
        self.kind.entity_key()
    }

    /// Derives the idempotency key for this delivery.
    ///
    /// Naturally idempotent actions (tombstones, relationship add/remove)
    /// are keyed by type and target alone, so any redelivery collapses.
    /// Value-setting actions additionally fold in the nonce, because two
    /// distinct intents of the same shape must not dedupe each other.
    pub fn idempotency_key(&self) -> IdempotencyKey {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.name().as_bytes());
        hasher.update(b"|");
        let key = self.kind.entity_key();
        hasher.update(key.type_name().as_bytes());
        hasher.update(b"|");
        hasher.update(key.raw().as_bytes());
        hasher.update(b"|");

        match &self.kind {
            ActionKind::AddRecommendation(p) => hasher.update(p.person.as_bytes()),
            ActionKind::RemoveRecommendation(p) => hasher.update(p.person.as_bytes()),
            ActionKind::DeleteMovie(_) | ActionKind::RemovePerson(_) => {}
            _ => hasher.update(self.nonce.as_bytes()),
        }

        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            use fmt::Write;
            let _ = write!(out, "{byte:02x}");
        }
        IdempotencyKey(out)
    }
}
