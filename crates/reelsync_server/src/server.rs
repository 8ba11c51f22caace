//! The sync server facade.

use crate::auth::TokenValidator;
use crate::broadcast::{RealtimeSession, SyncBroadcaster};
use crate::clock::ServerClock;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::feed::ChangeFeed;
use crate::processor::ActionProcessor;
use crate::store::AccountRegistry;
use reelsync_protocol::{
    Action, ActionAck, BatchRequest, BatchResponse, ChangesPage, ChangesQuery, RealtimeFrame,
};
use std::sync::Arc;
use std::time::Instant;

/// One sync server: action processing, change feed, and realtime push over
/// a shared in-memory store.
///
/// The typed `handle_*` methods are the embeddable API; `handle_post` and
/// `handle_get` wrap them in the JSON wire shapes for an HTTP front.
pub struct SyncServer {
    config: ServerConfig,
    clock: Arc<ServerClock>,
    processor: ActionProcessor,
    feed: ChangeFeed,
    broadcaster: Arc<SyncBroadcaster>,
    validator: Option<TokenValidator>,
}

impl SyncServer {
    /// Creates a server over the system clock.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_clock(config, ServerClock::system())
    }

    /// Creates a server over a custom clock.
    pub fn with_clock(config: ServerConfig, clock: ServerClock) -> Self {
        let registry = Arc::new(AccountRegistry::new(config.idempotency_window));
        let clock = Arc::new(clock);
        let broadcaster = Arc::new(SyncBroadcaster::new(config.broadcast_capacity));
        let validator = config
            .auth_secret
            .clone()
            .map(|secret| TokenValidator::new(secret, config.token_expiry));

        Self {
            processor: ActionProcessor::new(
                Arc::clone(&registry),
                Arc::clone(&clock),
                Arc::clone(&broadcaster),
                config.clone(),
            ),
            feed: ChangeFeed::new(registry, config.clone()),
            clock,
            broadcaster,
            validator,
            config,
        }
    }

    /// Applies one action for an account.
    pub fn handle_action(&self, account_id: &str, action: &Action) -> ServerResult<ActionAck> {
        self.processor.process(account_id, action)
    }

    /// Applies a batch of actions for an account.
    pub fn handle_batch(
        &self,
        account_id: &str,
        batch: &BatchRequest,
    ) -> ServerResult<BatchResponse> {
        self.processor.process_batch(account_id, batch)
    }

    /// Answers a change-feed query for an account.
    pub fn handle_changes(
        &self,
        account_id: &str,
        query: &ChangesQuery,
    ) -> ServerResult<ChangesPage> {
        self.feed.changes(account_id, query)
    }

    /// Opens a realtime session for an account.
    ///
    /// When the server was configured with an auth secret, a valid token is
    /// required and the session expires with it.
    pub fn subscribe(&self, account_id: &str, token: Option<&str>) -> ServerResult<RealtimeSession> {
        let expires_at = match (&self.validator, token) {
            (Some(validator), Some(token)) => {
                let remaining = validator.validate(account_id, token)?;
                Some(Instant::now() + remaining)
            }
            _ if self.config.require_auth => {
                return Err(ServerError::NotAuthorized("token required".into()));
            }
            _ => None,
        };

        let receiver = self.broadcaster.attach(account_id);
        let hello = RealtimeFrame::Connected {
            timestamp: self.clock.now(),
        };
        tracing::debug!(account = account_id, "realtime session opened");
        Ok(RealtimeSession::new(
            account_id.to_string(),
            receiver,
            hello,
            self.config.heartbeat_timeout,
            expires_at,
        ))
    }

    /// Issues a realtime token for an account.
    pub fn issue_token(&self, account_id: &str) -> ServerResult<String> {
        match &self.validator {
            Some(validator) => validator.issue(account_id),
            None => Err(ServerError::Internal("auth is not configured".into())),
        }
    }

    /// The broadcaster, for embedding callers that push their own notices.
    pub fn broadcaster(&self) -> &Arc<SyncBroadcaster> {
        &self.broadcaster
    }

    /// Handles a JSON POST. Paths: `/sync` (one action), `/sync/batch`.
    pub fn handle_post(&self, account_id: &str, path: &str, body: &str) -> ServerResult<String> {
        match path {
            "/sync" => {
                let action: Action = serde_json::from_str(body)
                    .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
                let ack = self.handle_action(account_id, &action)?;
                encode(&ack)
            }
            "/sync/batch" => {
                let batch: BatchRequest = serde_json::from_str(body)
                    .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
                let response = self.handle_batch(account_id, &batch)?;
                encode(&response)
            }
            other => Err(ServerError::InvalidRequest(format!(
                "unknown path: {other}"
            ))),
        }
    }

    /// Handles a JSON GET of the form `/sync?since=...&limit=...&offset=...`.
    pub fn handle_get(&self, account_id: &str, path_and_query: &str) -> ServerResult<String> {
        let (path, query) = path_and_query
            .split_once('?')
            .unwrap_or((path_and_query, ""));
        if path != "/sync" {
            return Err(ServerError::InvalidRequest(format!("unknown path: {path}")));
        }
        let query = ChangesQuery::parse_query(query)
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
        let page = self.handle_changes(account_id, &query)?;
        encode(&page)
    }
}

fn encode<T: serde::Serialize>(value: &T) -> ServerResult<String> {
    serde_json::to_string(value).map_err(|e| ServerError::Internal(e.to_string()))
}
