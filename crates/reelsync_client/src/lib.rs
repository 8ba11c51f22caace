//! Client side of the reelsync protocol.
//!
//! Mutations are enqueued into a durable journal-backed queue, delivered to
//! the server in order with retry and backoff, and reconciled against the
//! server's change feed. The local journal guarantees that an action
//! enqueued while offline survives restarts until the server acks it.
//!
//! The pieces: [`LocalStore`] is the journal (queue, entity cache,
//! change-feed cursor); [`SyncQueueManager`] drives flushes and pulls over
//! an [`ActionTransport`]; [`FlushLoop`] owns a background thread that
//! flushes on [`FlushTrigger`]s and a timer; [`JsonTransport`] is the HTTP
//! wiring.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod queue;
mod scheduler;
mod store;
mod transport;

pub use config::{ClientConfig, RetryConfig};
pub use error::{ClientError, ClientResult};
pub use http::{HttpClient, JsonTransport, LoopbackClient, LoopbackServer, TransportFailure};
pub use queue::{CancelToken, FlushReport, SyncQueueManager};
pub use scheduler::{FlushLoop, FlushScheduler, FlushTrigger};
pub use store::{LocalStore, QueueEntry, QueueEntryStatus};
pub use transport::{ActionTransport, MockTransport};
