//! Server side of the reelsync protocol.
//!
//! Applies client actions to a canonical in-memory store under per-account
//! locks, assigns authoritative `last_modified` timestamps from a monotonic
//! clock, serves the paginated change feed, and pushes compact change
//! notices to realtime sessions.
//!
//! [`SyncServer`] is the facade; embed it behind any HTTP or WebSocket
//! front, or drive it in-process for tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod broadcast;
mod clock;
mod config;
mod error;
mod feed;
mod processor;
mod server;
mod store;

pub use auth::TokenValidator;
pub use broadcast::{RealtimeSession, SyncBroadcaster};
pub use clock::{ManualTimeSource, ServerClock, SystemTimeSource, TimeSource};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use feed::ChangeFeed;
pub use processor::ActionProcessor;
pub use server::SyncServer;
pub use store::{AccountData, AccountRegistry, AccountState, IdempotencyWindow};
