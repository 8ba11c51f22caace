//! # reelsync Protocol
//!
//! Sync action vocabulary, change records, and wire messages for reelsync.
//!
//! This crate provides:
//! - `Action` / `ActionKind` for client mutations, idempotency-keyed
//! - `ChangeRecord` for authoritative entity state on the wire
//! - Request/response messages for the action, batch, and change-feed
//!   endpoints, plus realtime notification frames
//!
//! This is a pure protocol crate with no I/O operations. Both the client
//! engine and the server speak exclusively through these types, so adding a
//! new action variant is a compile-time-checked exhaustive match on both
//! sides rather than a string lookup.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod error;
mod messages;
mod record;

pub use action::{
    Action, ActionKind, AddPerson, AddRecommendation, DeleteMovie, IdempotencyKey, MarkWatched,
    RemovePerson, RemoveRecommendation, SetRecommendationVote, UpdatePerson, UpdatePersonTrust,
    UpdateRating, UpdateStatus,
};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ActionAck, BatchRequest, BatchResponse, ChangeNotice, ChangesPage, ChangesQuery, RealtimeFrame,
};
pub use record::{
    ChangeRecord, EntityKey, MovieState, PersonState, RecommendationEntry, Vote, WatchStatus,
};
