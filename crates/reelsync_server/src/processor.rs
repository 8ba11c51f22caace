//! Applies client actions to the canonical store.

use crate::broadcast::SyncBroadcaster;
use crate::clock::ServerClock;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::AccountRegistry;
use reelsync_protocol::{
    Action, ActionAck, ActionKind, BatchRequest, BatchResponse, ChangeNotice, ChangeRecord,
    EntityKey, MovieState, PersonState, RecommendationEntry,
};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Applies actions under the per-account lock, assigns authoritative
/// timestamps, and publishes change notices.
///
/// Every outcome is expressed as an [`ActionAck`]; transport-level failures
/// (malformed batch, deadline overrun on the single-action path) surface as
/// [`ServerError`] instead.
pub struct ActionProcessor {
    registry: Arc<AccountRegistry>,
    clock: Arc<ServerClock>,
    broadcaster: Arc<SyncBroadcaster>,
    config: ServerConfig,
}

impl ActionProcessor {
    /// Creates a processor over the given store, clock, and broadcaster.
    pub fn new(
        registry: Arc<AccountRegistry>,
        clock: Arc<ServerClock>,
        broadcaster: Arc<SyncBroadcaster>,
        config: ServerConfig,
    ) -> Self {
        Self {
            registry,
            clock,
            broadcaster,
            config,
        }
    }

    /// Applies one action for an account.
    ///
    /// Rejections and conflicts come back as unsuccessful acks; only a
    /// deadline overrun is an `Err`, so callers can map it to a retryable
    /// transport failure.
    pub fn process(&self, account_id: &str, action: &Action) -> ServerResult<ActionAck> {
        let started = Instant::now();

        if let Err(reason) = validate(action) {
            tracing::debug!(account = account_id, action = action.kind.name(), %reason, "action rejected");
            return Ok(ActionAck::rejected(reason));
        }

        let account = self.registry.account(account_id);
        let key = action.idempotency_key();

        let (ack, notice) = {
            let mut data = account.lock();

            // Redelivery inside the window replays the recorded outcome,
            // original timestamp included, without touching the store.
            if let Some(recorded) = data.recent.get(&key) {
                tracing::debug!(account = account_id, %key, "replaying recorded ack");
                return Ok(recorded.clone());
            }

            if started.elapsed() > self.config.processing_deadline {
                return Err(ServerError::DeadlineExceeded);
            }

            let ts = self.clock.next();
            match apply(&mut data.entities, &action.kind, ts) {
                Ok(record) => {
                    let notice = ChangeNotice {
                        entity: record.entity_key(),
                        last_modified: ts,
                    };
                    let ack = ActionAck::ok(ts);
                    data.recent.record(key, ack.clone());
                    (ack, Some(notice))
                }
                Err(ack) => {
                    if ack.conflict {
                        tracing::debug!(
                            account = account_id,
                            action = action.kind.name(),
                            "conflict"
                        );
                        data.recent.record(key, ack.clone());
                    }
                    (ack, None)
                }
            }
        };

        // Published outside the account lock; delivery is best-effort.
        if let Some(notice) = notice {
            self.broadcaster.publish(account_id, notice);
        }
        Ok(ack)
    }

    /// Applies a batch of actions, independently and in order.
    ///
    /// A deadline overrun on one item becomes a retryable ack for that item
    /// alone; the rest of the batch still runs.
    pub fn process_batch(
        &self,
        account_id: &str,
        batch: &BatchRequest,
    ) -> ServerResult<BatchResponse> {
        if batch.actions.len() > self.config.max_batch as usize {
            return Err(ServerError::InvalidRequest(format!(
                "batch of {} exceeds maximum of {}",
                batch.actions.len(),
                self.config.max_batch
            )));
        }

        let mut results = Vec::with_capacity(batch.actions.len());
        for action in &batch.actions {
            let ack = match self.process(account_id, action) {
                Ok(ack) => ack,
                Err(err) if err.is_server_error() => ActionAck::retry_later(err.to_string()),
                Err(err) => ActionAck::rejected(err.to_string()),
            };
            results.push(ack);
        }

        Ok(BatchResponse {
            results,
            server_timestamp: self.clock.now(),
        })
    }
}

/// Structural validation, before any store access.
fn validate(action: &Action) -> Result<(), String> {
    if action.entity_key().raw().is_empty() {
        return Err("empty entity key".into());
    }
    let rating = match &action.kind {
        ActionKind::UpdateRating(p) => Some(p.rating),
        ActionKind::MarkWatched(p) => p.my_rating,
        _ => None,
    };
    if let Some(rating) = rating {
        if !(0.0..=10.0).contains(&rating) || rating.is_nan() {
            return Err(format!("rating {rating} outside 0..=10"));
        }
    }
    match &action.kind {
        ActionKind::AddRecommendation(p) if p.person.is_empty() => Err("empty person".into()),
        ActionKind::RemoveRecommendation(p) if p.person.is_empty() => Err("empty person".into()),
        ActionKind::SetRecommendationVote(p) if p.person.is_empty() => Err("empty person".into()),
        _ => Ok(()),
    }
}

/// Looks up a live movie, creating it when the action implies existence.
///
/// Mutating a tombstoned movie is a conflict carrying the tombstone, so the
/// client learns the deletion won.
fn movie_mut<'a>(
    entities: &'a mut HashMap<EntityKey, ChangeRecord>,
    imdb_id: &str,
    create: bool,
) -> Result<&'a mut MovieState, ActionAck> {
    let record = match entities.entry(EntityKey::Movie(imdb_id.to_string())) {
        Entry::Occupied(entry) => {
            if entry.get().is_deleted() {
                return Err(ActionAck::conflict(
                    format!("movie {imdb_id} is deleted"),
                    Some(entry.get().clone()),
                ));
            }
            entry.into_mut()
        }
        Entry::Vacant(entry) => {
            if !create {
                return Err(ActionAck::conflict(format!("unknown movie {imdb_id}"), None));
            }
            entry.insert(ChangeRecord::Movie(MovieState::new(imdb_id)))
        }
    };
    match record {
        ChangeRecord::Movie(movie) => Ok(movie),
        ChangeRecord::Person(_) => Err(ActionAck::rejected("entity is not a movie")),
    }
}

/// Looks up a live person. Never creates; only `addPerson` does that.
fn person_mut<'a>(
    entities: &'a mut HashMap<EntityKey, ChangeRecord>,
    name: &str,
) -> Result<&'a mut PersonState, ActionAck> {
    let record = match entities.get_mut(&EntityKey::Person(name.to_string())) {
        Some(record) => {
            if record.is_deleted() {
                return Err(ActionAck::conflict(
                    format!("person {name} is deleted"),
                    Some(record.clone()),
                ));
            }
            record
        }
        None => return Err(ActionAck::conflict(format!("unknown person {name}"), None)),
    };
    match record {
        ChangeRecord::Person(person) => Ok(person),
        ChangeRecord::Movie(_) => Err(ActionAck::rejected("entity is not a person")),
    }
}

/// Applies one action to the entity map at timestamp `ts`.
///
/// Actions carry absolute values, so application is a plain overwrite of
/// the targeted fields; there is no field-level merge.
fn apply(
    entities: &mut HashMap<EntityKey, ChangeRecord>,
    kind: &ActionKind,
    ts: f64,
) -> Result<ChangeRecord, ActionAck> {
    match kind {
        ActionKind::AddRecommendation(p) => {
            let movie = movie_mut(entities, &p.imdb_id, true)?;
            if let Some(title) = &p.title {
                movie.title = Some(title.clone());
            }
            let date = p.date_recommended.unwrap_or(ts);
            match movie.recommendations.iter_mut().find(|r| r.person == p.person) {
                Some(existing) => existing.date_recommended = date,
                None => movie.recommendations.push(RecommendationEntry {
                    person: p.person.clone(),
                    date_recommended: date,
                    vote: Default::default(),
                }),
            }
            movie.last_modified = ts;
        }
        ActionKind::RemoveRecommendation(p) => {
            let movie = movie_mut(entities, &p.imdb_id, false)?;
            let before = movie.recommendations.len();
            movie.recommendations.retain(|r| r.person != p.person);
            if movie.recommendations.len() == before {
                let state = ChangeRecord::Movie(movie.clone());
                return Err(ActionAck::conflict(
                    format!("no recommendation from {} on {}", p.person, p.imdb_id),
                    Some(state),
                ));
            }
            movie.last_modified = ts;
        }
        ActionKind::MarkWatched(p) => {
            let movie = movie_mut(entities, &p.imdb_id, true)?;
            movie.status = reelsync_protocol::WatchStatus::Watched;
            movie.date_watched = Some(p.date_watched.unwrap_or(ts));
            if let Some(rating) = p.my_rating {
                movie.my_rating = Some(rating);
            }
            movie.last_modified = ts;
        }
        ActionKind::UpdateStatus(p) => {
            let movie = movie_mut(entities, &p.imdb_id, true)?;
            movie.status = p.status;
            movie.last_modified = ts;
        }
        ActionKind::UpdateRating(p) => {
            let movie = movie_mut(entities, &p.imdb_id, true)?;
            movie.my_rating = Some(p.rating);
            movie.last_modified = ts;
        }
        ActionKind::SetRecommendationVote(p) => {
            let movie = movie_mut(entities, &p.imdb_id, false)?;
            match movie.recommendations.iter_mut().find(|r| r.person == p.person) {
                Some(entry) => entry.vote = p.vote,
                None => {
                    let state = ChangeRecord::Movie(movie.clone());
                    return Err(ActionAck::conflict(
                        format!("no recommendation from {} on {}", p.person, p.imdb_id),
                        Some(state),
                    ));
                }
            }
            movie.last_modified = ts;
        }
        ActionKind::DeleteMovie(p) => {
            let movie = movie_mut(entities, &p.imdb_id, false)?;
            movie.deleted = true;
            movie.last_modified = ts;
        }
        ActionKind::AddPerson(p) => {
            // Upsert: re-adding an existing or tombstoned person revives it
            // with the new attributes.
            let mut person = PersonState::new(&p.name);
            person.is_trusted = p.is_trusted;
            person.is_default = p.is_default;
            person.color = p.color.clone();
            person.emoji = p.emoji.clone();
            person.last_modified = ts;
            entities.insert(EntityKey::Person(p.name.clone()), ChangeRecord::Person(person));
        }
        ActionKind::UpdatePerson(p) => {
            let person = person_mut(entities, &p.name)?;
            if let Some(is_trusted) = p.is_trusted {
                person.is_trusted = is_trusted;
            }
            if let Some(is_default) = p.is_default {
                person.is_default = is_default;
            }
            if let Some(color) = &p.color {
                person.color = Some(color.clone());
            }
            if let Some(emoji) = &p.emoji {
                person.emoji = Some(emoji.clone());
            }
            person.last_modified = ts;
        }
        ActionKind::UpdatePersonTrust(p) => {
            let person = person_mut(entities, &p.name)?;
            person.is_trusted = p.is_trusted;
            person.last_modified = ts;
        }
        ActionKind::RemovePerson(p) => {
            let person = person_mut(entities, &p.name)?;
            person.deleted = true;
            person.last_modified = ts;
        }
    }

    let key = kind.entity_key();
    entities
        .get(&key)
        .cloned()
        .ok_or_else(|| ActionAck::rejected("entity vanished during apply"))
}
