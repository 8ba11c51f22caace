//! Transport abstraction for talking to the sync server.

use crate::error::{ClientError, ClientResult};
use reelsync_protocol::{Action, ActionAck, BatchRequest, BatchResponse, ChangesPage, ChangesQuery};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Network communication with the sync server.
///
/// Abstracts the wire so the queue manager can run over HTTP, an in-process
/// loopback, or a mock.
pub trait ActionTransport: Send + Sync {
    /// Delivers one action and returns the server's ack.
    fn send(&self, action: &Action) -> ClientResult<ActionAck>;

    /// Delivers a batch of actions.
    fn send_batch(&self, batch: &BatchRequest) -> ClientResult<BatchResponse>;

    /// Pulls one page of the change feed.
    fn pull(&self, query: &ChangesQuery) -> ClientResult<ChangesPage>;

    /// Whether the transport believes it can reach the server.
    fn is_connected(&self) -> bool;
}

/// A scriptable transport for tests.
///
/// Acks and pages are queues: each call consumes the next scripted
/// response. An empty script is a retryable transport error, which doubles
/// as an "offline" default.
#[derive(Debug, Default)]
pub struct MockTransport {
    connected: AtomicBool,
    acks: Mutex<VecDeque<ActionAck>>,
    pages: Mutex<VecDeque<ChangesPage>>,
    sent: Mutex<Vec<Action>>,
}

impl MockTransport {
    /// Creates a connected mock with nothing scripted.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            acks: Mutex::new(VecDeque::new()),
            pages: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Scripts the next ack.
    pub fn push_ack(&self, ack: ActionAck) {
        self.acks.lock().unwrap().push_back(ack);
    }

    /// Scripts the next change-feed page.
    pub fn push_page(&self, page: ChangesPage) {
        self.pages.lock().unwrap().push_back(page);
    }

    /// Sets the connectivity flag.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Actions delivered so far, in order.
    pub fn sent(&self) -> Vec<Action> {
        self.sent.lock().unwrap().clone()
    }

    fn next_ack(&self) -> ClientResult<ActionAck> {
        self.acks
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ClientError::transport_retryable("no scripted ack"))
    }
}

impl ActionTransport for MockTransport {
    fn send(&self, action: &Action) -> ClientResult<ActionAck> {
        if !self.is_connected() {
            return Err(ClientError::transport_retryable("offline"));
        }
        self.sent.lock().unwrap().push(action.clone());
        self.next_ack()
    }

    fn send_batch(&self, batch: &BatchRequest) -> ClientResult<BatchResponse> {
        if !self.is_connected() {
            return Err(ClientError::transport_retryable("offline"));
        }
        let mut results = Vec::with_capacity(batch.actions.len());
        for action in &batch.actions {
            self.sent.lock().unwrap().push(action.clone());
            results.push(self.next_ack()?);
        }
        Ok(BatchResponse {
            results,
            server_timestamp: 0.0,
        })
    }

    fn pull(&self, _query: &ChangesQuery) -> ClientResult<ChangesPage> {
        if !self.is_connected() {
            return Err(ClientError::transport_retryable("offline"));
        }
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ClientError::transport_retryable("no scripted page"))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsync_protocol::{ActionKind, UpdateRating};

    fn rate() -> Action {
        Action::new(
            ActionKind::UpdateRating(UpdateRating {
                imdb_id: "tt0001".into(),
                rating: 8.0,
            }),
            1.0,
        )
    }

    #[test]
    fn mock_scripts_in_order() {
        let transport = MockTransport::new();
        transport.push_ack(ActionAck::ok(1.0));
        transport.push_ack(ActionAck::rejected("bad"));

        assert!(transport.send(&rate()).unwrap().success);
        assert!(!transport.send(&rate()).unwrap().success);
        assert_eq!(transport.sent().len(), 2);
    }

    #[test]
    fn disconnected_mock_fails_retryably() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        let err = transport.send(&rate()).unwrap_err();
        assert!(err.is_retryable());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn unscripted_call_is_retryable() {
        let transport = MockTransport::new();
        assert!(transport.send(&rate()).unwrap_err().is_retryable());
        assert!(transport
            .pull(&ChangesQuery::legacy(0.0))
            .unwrap_err()
            .is_retryable());
    }
}
