//! Realtime change fan-out.

use parking_lot::{Mutex, RwLock};
use reelsync_protocol::{ChangeNotice, RealtimeFrame};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Fan-out of change notifications to live sessions, one channel per
/// account.
///
/// Delivery is best-effort: publishing never blocks the action processor,
/// and a session that lags past the channel capacity simply loses frames.
/// Losing frames is safe because the change feed, not this channel, is the
/// consistency path; a reconnecting session does a catch-up pull.
pub struct SyncBroadcaster {
    channels: RwLock<HashMap<String, broadcast::Sender<RealtimeFrame>>>,
    capacity: usize,
}

impl SyncBroadcaster {
    /// Creates a broadcaster with the given per-channel capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Publishes a change notice to every live session of the account.
    ///
    /// Fire-and-forget: an account with no live sessions is a no-op.
    pub fn publish(&self, account_id: &str, notice: ChangeNotice) {
        let channels = self.channels.read();
        if let Some(sender) = channels.get(account_id) {
            // send() fails only when no receiver is alive, which is fine.
            let _ = sender.send(RealtimeFrame::Change { notice });
        }
    }

    /// Opens a receiver on the account's channel, creating it on demand.
    pub(crate) fn attach(&self, account_id: &str) -> broadcast::Receiver<RealtimeFrame> {
        if let Some(sender) = self.channels.read().get(account_id) {
            return sender.subscribe();
        }
        let mut channels = self.channels.write();
        channels
            .entry(account_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Number of live sessions for an account.
    pub fn session_count(&self, account_id: &str) -> usize {
        self.channels
            .read()
            .get(account_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

/// One client's realtime connection.
///
/// Authenticated once at open; afterwards the client keeps it alive with
/// periodic pings. A session whose heartbeat or credential expires must be
/// dropped by the caller, and the client reconnects and closes any gap with
/// a change-feed pull.
pub struct RealtimeSession {
    account_id: String,
    receiver: broadcast::Receiver<RealtimeFrame>,
    /// Frames addressed to this session alone (the connect hello, pong
    /// replies), delivered before broadcast frames.
    pending: Mutex<VecDeque<RealtimeFrame>>,
    last_heartbeat: Mutex<Instant>,
    heartbeat_timeout: Duration,
    expires_at: Option<Instant>,
}

impl RealtimeSession {
    pub(crate) fn new(
        account_id: String,
        receiver: broadcast::Receiver<RealtimeFrame>,
        hello: RealtimeFrame,
        heartbeat_timeout: Duration,
        expires_at: Option<Instant>,
    ) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back(hello);
        Self {
            account_id,
            receiver,
            pending: Mutex::new(pending),
            last_heartbeat: Mutex::new(Instant::now()),
            heartbeat_timeout,
            expires_at,
        }
    }

    /// The account this session belongs to.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Takes the next frame, if one is ready.
    ///
    /// Lagged gaps are skipped silently; the session will learn what it
    /// missed from the change feed.
    pub fn try_recv(&mut self) -> Option<RealtimeFrame> {
        if let Some(frame) = self.pending.lock().pop_front() {
            return Some(frame);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(account = %self.account_id, skipped, "realtime session lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    /// Records a client ping and queues the pong reply.
    pub fn ping(&self, server_now: f64) {
        *self.last_heartbeat.lock() = Instant::now();
        self.pending.lock().push_back(RealtimeFrame::Pong {
            timestamp: server_now,
        });
    }

    /// True when the session missed its heartbeat window or its credential
    /// expired. Expired sessions must be dropped and reconnect.
    pub fn is_expired(&self) -> bool {
        if self.last_heartbeat.lock().elapsed() > self.heartbeat_timeout {
            return true;
        }
        matches!(self.expires_at, Some(deadline) if Instant::now() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsync_protocol::EntityKey;

    fn notice(id: &str, ts: f64) -> ChangeNotice {
        ChangeNotice {
            entity: EntityKey::Movie(id.into()),
            last_modified: ts,
        }
    }

    fn session(broadcaster: &SyncBroadcaster, account: &str) -> RealtimeSession {
        RealtimeSession::new(
            account.to_string(),
            broadcaster.attach(account),
            RealtimeFrame::Connected { timestamp: 0.0 },
            Duration::from_secs(60),
            None,
        )
    }

    #[test]
    fn hello_arrives_first() {
        let broadcaster = SyncBroadcaster::new(8);
        let mut session = session(&broadcaster, "alice");

        broadcaster.publish("alice", notice("tt0001", 1.0));

        assert!(matches!(
            session.try_recv(),
            Some(RealtimeFrame::Connected { .. })
        ));
        assert!(matches!(
            session.try_recv(),
            Some(RealtimeFrame::Change { .. })
        ));
        assert!(session.try_recv().is_none());
    }

    #[test]
    fn publish_without_sessions_is_noop() {
        let broadcaster = SyncBroadcaster::new(8);
        broadcaster.publish("nobody", notice("tt0001", 1.0));
        assert_eq!(broadcaster.session_count("nobody"), 0);
    }

    #[test]
    fn fan_out_reaches_all_sessions() {
        let broadcaster = SyncBroadcaster::new(8);
        let mut a = session(&broadcaster, "alice");
        let mut b = session(&broadcaster, "alice");
        let mut other = session(&broadcaster, "bob");

        broadcaster.publish("alice", notice("tt0001", 5.0));

        // Drain hellos.
        a.try_recv();
        b.try_recv();
        other.try_recv();

        assert!(matches!(a.try_recv(), Some(RealtimeFrame::Change { .. })));
        assert!(matches!(b.try_recv(), Some(RealtimeFrame::Change { .. })));
        // Sibling account sees nothing.
        assert!(other.try_recv().is_none());
    }

    #[test]
    fn ping_queues_pong_and_refreshes_heartbeat() {
        let broadcaster = SyncBroadcaster::new(8);
        let mut session = session(&broadcaster, "alice");
        session.try_recv(); // hello

        session.ping(42.0);
        assert!(matches!(
            session.try_recv(),
            Some(RealtimeFrame::Pong { timestamp }) if timestamp == 42.0
        ));
        assert!(!session.is_expired());
    }

    #[test]
    fn zero_heartbeat_window_expires() {
        let broadcaster = SyncBroadcaster::new(8);
        let session = RealtimeSession::new(
            "alice".into(),
            broadcaster.attach("alice"),
            RealtimeFrame::Connected { timestamp: 0.0 },
            Duration::ZERO,
            None,
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(session.is_expired());
    }

    #[test]
    fn lagged_session_skips_to_fresh_frames() {
        let broadcaster = SyncBroadcaster::new(2);
        let mut session = session(&broadcaster, "alice");
        session.try_recv(); // hello

        for i in 0..10 {
            broadcaster.publish("alice", notice(&format!("tt{i:04}"), i as f64));
        }

        // Only the newest frames within capacity survive; the rest were
        // dropped without blocking the publisher.
        let mut received = 0;
        while session.try_recv().is_some() {
            received += 1;
        }
        assert!(received <= 2);
        assert!(received > 0);
    }
}
