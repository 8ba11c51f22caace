//! JSON-over-HTTP transport.
//!
//! The actual HTTP client is abstracted behind a trait so any library
//! (reqwest, ureq, hyper) or an in-process loopback can carry the bytes.
//! Account identity travels with the HTTP client, typically as an auth
//! header it attaches to every request.

use crate::error::{ClientError, ClientResult};
use crate::transport::ActionTransport;
use reelsync_protocol::{Action, ActionAck, BatchRequest, BatchResponse, ChangesPage, ChangesQuery};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// A failed HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    /// What went wrong.
    pub message: String,
    /// Whether re-sending the same request may succeed. Connection-level
    /// failures and 5xx statuses are retryable; 4xx statuses are not.
    pub retryable: bool,
}

impl TransportFailure {
    /// A retryable failure.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A permanent failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<TransportFailure> for ClientError {
    fn from(failure: TransportFailure) -> Self {
        ClientError::Transport {
            message: failure.message,
            retryable: failure.retryable,
        }
    }
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST with a JSON body; returns the response body.
    fn post(&self, url: &str, body: &str) -> Result<String, TransportFailure>;

    /// Sends a GET; returns the response body.
    fn get(&self, url: &str) -> Result<String, TransportFailure>;

    /// Whether the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// [`ActionTransport`] over JSON HTTP bodies.
///
/// Endpoints: `POST {base}/sync` for one action, `POST {base}/sync/batch`,
/// and `GET {base}/sync?since=...` for the change feed.
pub struct JsonTransport<C: HttpClient> {
    base_url: String,
    client: C,
    connected: AtomicBool,
}

impl<C: HttpClient> JsonTransport<C> {
    /// Creates a transport against a base URL.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            connected: AtomicBool::new(true),
        }
    }

    /// The configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post_json<Req, Res>(&self, path: &str, request: &Req) -> ClientResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let body = serde_json::to_string(request)?;
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url, &body).map_err(|failure| {
            self.connected.store(false, Ordering::SeqCst);
            ClientError::from(failure)
        })?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(serde_json::from_str(&response)?)
    }
}

impl<C: HttpClient> ActionTransport for JsonTransport<C> {
    fn send(&self, action: &Action) -> ClientResult<ActionAck> {
        self.post_json("/sync", action)
    }

    fn send_batch(&self, batch: &BatchRequest) -> ClientResult<BatchResponse> {
        self.post_json("/sync/batch", batch)
    }

    fn pull(&self, query: &ChangesQuery) -> ClientResult<ChangesPage> {
        let url = format!("{}/sync?{}", self.base_url, query.to_query_string());
        let response = self.client.get(&url).map_err(|failure| {
            self.connected.store(false, Ordering::SeqCst);
            ClientError::from(failure)
        })?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(serde_json::from_str(&response)?)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }
}

/// A server that answers loopback requests in-process.
///
/// Implemented by test harnesses that wrap a real server instance, so the
/// whole client stack can be exercised without sockets.
pub trait LoopbackServer {
    /// Handles a POST; the path has the base URL stripped.
    fn handle_post(&self, path: &str, body: &str) -> Result<String, TransportFailure>;

    /// Handles a GET of path plus query string.
    fn handle_get(&self, path_and_query: &str) -> Result<String, TransportFailure>;
}

/// [`HttpClient`] that routes straight into a [`LoopbackServer`].
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    online: AtomicBool,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a loopback client over the server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            online: AtomicBool::new(true),
        }
    }

    /// Simulates losing or regaining connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn strip_base(url: &str) -> &str {
        // Skip the scheme and authority; the path starts at the first `/`
        // after `://`. A bare path is passed through unchanged.
        let host = match url.find("://") {
            Some(i) => &url[i + 3..],
            None => return url,
        };
        match host.find('/') {
            Some(i) => &host[i..],
            None => "/",
        }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: &str) -> Result<String, TransportFailure> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportFailure::retryable("offline"));
        }
        self.server.handle_post(Self::strip_base(url), body)
    }

    fn get(&self, url: &str) -> Result<String, TransportFailure> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportFailure::retryable("offline"));
        }
        self.server.handle_get(Self::strip_base(url))
    }

    fn is_healthy(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
