//! The durable action queue and its flush policy.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::store::{LocalStore, QueueEntry, QueueEntryStatus};
use crate::transport::ActionTransport;
use parking_lot::Mutex;
use reelsync_protocol::{
    Action, ActionAck, ActionKind, BatchRequest, ChangeNotice, ChangeRecord, ChangesQuery,
    EntityKey,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Shared cancellation flag for the flush path.
///
/// Cancellation is observed between entries, never mid-send; unsent entries
/// stay `Pending`. The flag is one-shot: the flush that observes it clears
/// it, so the token can be reused.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Requests that the running (or next) flush stop between entries.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation is currently requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Exclusive claim on the flush path, released on drop.
struct FlushClaim<'a>(&'a AtomicBool);

impl<'a> FlushClaim<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            .then_some(Self(flag))
    }
}

impl Drop for FlushClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What one flush accomplished.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Actions acked and removed from the queue.
    pub delivered: usize,
    /// Actions the server answered with a conflict; local state adopted the
    /// server's, and the entries were dropped.
    pub conflicts: usize,
    /// Actions permanently rejected and dropped.
    pub rejected: usize,
    /// Entries out of retry budget, waiting for manual attention.
    pub parked: usize,
    /// Entries left queued: still in backoff, or behind a stall.
    pub deferred: usize,
    /// True when the flush stopped early on a retryable failure.
    pub stalled: bool,
}

/// Manages the durable queue over a transport.
///
/// Delivery is strictly FIFO: a retryable failure at the head stalls the
/// flush rather than letting later actions overtake, because reordering two
/// writes to the same entity would change the outcome. The only exception
/// is a parked entry (retry budget exhausted), which is skipped until
/// [`SyncQueueManager::retry_entry`] revives it.
pub struct SyncQueueManager<T: ActionTransport> {
    config: ClientConfig,
    store: Mutex<LocalStore>,
    transport: Arc<T>,
    flushing: AtomicBool,
    cancel: CancelToken,
}

impl<T: ActionTransport> SyncQueueManager<T> {
    /// Creates a manager over an opened store and a transport.
    pub fn new(config: ClientConfig, store: LocalStore, transport: T) -> Self {
        Self {
            config,
            store: Mutex::new(store),
            transport: Arc::new(transport),
            flushing: AtomicBool::new(false),
            cancel: CancelToken::default(),
        }
    }

    /// Replaces the cancel token, so a caller can share one it already
    /// hands out elsewhere.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// A clone of the cancel token interrupting this manager's flushes.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Enqueues an action for delivery.
    pub fn enqueue(&self, kind: ActionKind) -> ClientResult<Uuid> {
        let action = Action::new(kind, unix_now());
        self.store.lock().enqueue(action, unix_now())
    }

    /// Enqueues an action together with the optimistic local state it
    /// produces. The pair is journaled atomically.
    pub fn enqueue_with_state(
        &self,
        kind: ActionKind,
        optimistic: ChangeRecord,
    ) -> ClientResult<Uuid> {
        let action = Action::new(kind, unix_now());
        self.store
            .lock()
            .enqueue_and_apply(action, optimistic, unix_now())
    }

    /// Number of queued actions.
    pub fn queue_len(&self) -> usize {
        self.store.lock().queue_len()
    }

    /// Cached local state of an entity.
    pub fn entity(&self, key: &EntityKey) -> Option<ChangeRecord> {
        self.store.lock().entity(key).cloned()
    }

    /// The change-feed high-water mark.
    pub fn cursor(&self) -> f64 {
        self.store.lock().cursor()
    }

    /// Entries out of retry budget, waiting for [`retry_entry`].
    ///
    /// [`retry_entry`]: SyncQueueManager::retry_entry
    pub fn needs_attention(&self) -> Vec<QueueEntry> {
        let store = self.store.lock();
        store
            .queue()
            .iter()
            .filter(|e| self.is_parked(e))
            .cloned()
            .collect()
    }

    /// Revives a parked entry with a fresh retry budget.
    pub fn retry_entry(&self, id: Uuid) -> ClientResult<()> {
        self.store.lock().mark_pending(id)
    }

    /// Drops a parked entry without delivering it.
    pub fn discard_entry(&self, id: Uuid) -> ClientResult<()> {
        let mut store = self.store.lock();
        if store.entry(id).is_none() {
            return Err(ClientError::UnknownEntry(id));
        }
        store.remove(id)
    }

    fn is_parked(&self, entry: &QueueEntry) -> bool {
        entry.status == QueueEntryStatus::Failed
            && entry.attempt_count >= self.config.retry.max_attempts
    }

    /// True when a failed entry is still waiting out its backoff.
    fn in_backoff(&self, entry: &QueueEntry, now: f64) -> bool {
        if entry.status != QueueEntryStatus::Failed {
            return false;
        }
        let delay = self
            .config
            .retry
            .delay_for_attempt(entry.attempt_count)
            .as_secs_f64();
        match entry.last_attempt_at {
            Some(last) => now < last + delay,
            None => false,
        }
    }

    /// Delivers queued actions one at a time, in order.
    ///
    /// The journal lock is held only around local mutations, never across
    /// the transport call, so enqueuers do not wait on the network. At most
    /// one flush runs at a time; a call that finds one already running
    /// coalesces into a no-op and returns an empty report. Entries enqueued
    /// while the flush is running are picked up before it returns.
    pub fn flush(&self) -> ClientResult<FlushReport> {
        let Some(_claim) = FlushClaim::acquire(&self.flushing) else {
            tracing::debug!("flush already running, coalescing");
            return Ok(FlushReport::default());
        };
        if self.cancel.take() {
            return Err(ClientError::Cancelled);
        }

        let mut report = FlushReport::default();
        let mut seen = HashSet::new();
        'drain: loop {
            let now = unix_now();
            let ids: Vec<Uuid> = {
                let store = self.store.lock();
                store
                    .queue()
                    .iter()
                    .map(|e| e.id)
                    .filter(|id| !seen.contains(id))
                    .collect()
            };
            if ids.is_empty() {
                break;
            }

            for (i, id) in ids.iter().enumerate() {
                seen.insert(*id);
                if self.cancel.take() {
                    report.deferred += ids.len() - i;
                    return Err(ClientError::Cancelled);
                }

                let entry = {
                    let mut store = self.store.lock();
                    let entry = match store.entry(*id) {
                        Some(entry) => entry.clone(),
                        None => continue,
                    };
                    if self.is_parked(&entry) {
                        report.parked += 1;
                        continue;
                    }
                    if self.in_backoff(&entry, now) {
                        report.deferred += ids.len() - i;
                        report.stalled = true;
                        break 'drain;
                    }
                    store.mark_in_flight(*id, now)?;
                    entry
                };

                let outcome = self.transport.send(&entry.action);
                let mut store = self.store.lock();
                match outcome {
                    Ok(ack) => {
                        let stop = self.settle(&mut store, *id, &entry, ack, &mut report)?;
                        if stop {
                            report.deferred += ids.len() - i - 1;
                            break 'drain;
                        }
                    }
                    Err(e) if e.is_retryable() => {
                        tracing::debug!(entry = %id, error = %e, "flush stalled");
                        store.mark_failed(*id, now)?;
                        if self.is_parked_after_failure(&store, *id) {
                            report.parked += 1;
                        }
                        report.deferred += ids.len() - i - 1;
                        report.stalled = true;
                        break 'drain;
                    }
                    Err(e) => {
                        store.mark_failed(*id, now)?;
                        return Err(e);
                    }
                }
            }
        }

        Ok(report)
    }

    /// Delivers queued actions in batches.
    ///
    /// The server applies batch items independently, so per-item outcomes
    /// are settled individually; a retryable item stays queued for the next
    /// flush.
    pub fn flush_batch(&self) -> ClientResult<FlushReport> {
        let Some(_claim) = FlushClaim::acquire(&self.flushing) else {
            return Err(ClientError::FlushInProgress);
        };
        if self.cancel.take() {
            return Err(ClientError::Cancelled);
        }

        let mut report = FlushReport::default();
        let now = unix_now();

        // The sendable prefix: parked entries are skipped, and a failed
        // entry still in backoff ends the window to preserve order.
        let sendable = {
            let mut store = self.store.lock();
            let mut sendable = Vec::new();
            for entry in store.queue() {
                if self.is_parked(entry) {
                    report.parked += 1;
                    continue;
                }
                if self.in_backoff(entry, now) {
                    report.stalled = true;
                    break;
                }
                sendable.push(entry.clone());
                if sendable.len() == self.config.flush_batch_size as usize {
                    break;
                }
            }
            if sendable.is_empty() {
                report.deferred = store.queue_len() - report.parked;
                return Ok(report);
            }
            for entry in &sendable {
                store.mark_in_flight(entry.id, now)?;
            }
            sendable
        };

        let batch = BatchRequest {
            actions: sendable.iter().map(|e| e.action.clone()).collect(),
        };
        // The journal lock is released across the network call.
        let outcome = self.transport.send_batch(&batch);

        let mut store = self.store.lock();
        match outcome {
            Ok(response) => {
                for (entry, ack) in sendable.iter().zip(response.results) {
                    self.settle(&mut store, entry.id, entry, ack, &mut report)?;
                }
            }
            Err(e) if e.is_retryable() => {
                for entry in &sendable {
                    store.mark_failed(entry.id, now)?;
                }
                report.stalled = true;
            }
            Err(e) => {
                for entry in &sendable {
                    store.mark_failed(entry.id, now)?;
                }
                return Err(e);
            }
        }
        report.deferred = store.queue_len() - report.parked;
        Ok(report)
    }

    /// Settles one server ack against the queue and the local cache.
    ///
    /// Returns true when a single-action flush should stop (the entry
    /// stayed queued for a retry).
    fn settle(
        &self,
        store: &mut LocalStore,
        id: Uuid,
        entry: &QueueEntry,
        ack: ActionAck,
        report: &mut FlushReport,
    ) -> ClientResult<bool> {
        if ack.success {
            if let Some(ts) = ack.last_modified {
                store.confirm(&entry.action.entity_key(), ts)?;
            }
            store.remove(id)?;
            report.delivered += 1;
            return Ok(false);
        }

        if ack.conflict {
            // The server's state wins; our intent is dropped.
            tracing::info!(entry = %id, action = entry.action.kind.name(), "conflict, adopting server state");
            if let Some(state) = ack.server_state {
                store.adopt(state)?;
            }
            store.remove(id)?;
            report.conflicts += 1;
            return Ok(false);
        }

        if ack.retryable {
            store.mark_failed(id, unix_now())?;
            if self.is_parked_after_failure(store, id) {
                report.parked += 1;
            } else {
                report.stalled = true;
            }
            return Ok(true);
        }

        tracing::warn!(
            entry = %id,
            action = entry.action.kind.name(),
            error = ack.error.as_deref().unwrap_or("unspecified"),
            "action rejected, dropping"
        );
        store.remove(id)?;
        report.rejected += 1;
        Ok(false)
    }

    fn is_parked_after_failure(&self, store: &LocalStore, id: Uuid) -> bool {
        store
            .entry(id)
            .is_some_and(|e| e.attempt_count >= self.config.retry.max_attempts)
    }

    /// Pulls the change feed until exhausted, applying strictly-newer
    /// records and advancing the cursor.
    ///
    /// Returns how many records were applied. Resumable: the cursor
    /// advances page by page, so an interrupted pull re-fetches only the
    /// unseen tail.
    pub fn pull_changes(&self) -> ClientResult<usize> {
        let mut applied = 0;
        loop {
            let query = {
                let store = self.store.lock();
                ChangesQuery::paged(store.cursor(), self.config.pull_page_size)
            };
            let page = self.transport.pull(&query)?;

            let mut store = self.store.lock();
            let before = store.cursor();
            let mut high_water = before;
            let empty = page.records.is_empty();
            let has_more = page.has_more;
            for record in page.records {
                let ts = record.last_modified();
                if store.apply(record)? {
                    applied += 1;
                }
                if ts > high_water {
                    high_water = ts;
                }
            }
            if high_water > before {
                store.set_cursor(high_water)?;
            }

            if !has_more || empty {
                break;
            }
            if high_water <= before {
                // A server claiming more data while repeating records at or
                // below the cursor would otherwise loop forever.
                tracing::warn!(cursor = before, "change feed page made no progress, stopping pull");
                break;
            }
        }
        tracing::debug!(applied, "change feed pull complete");
        Ok(applied)
    }

    /// Reacts to a realtime change notice.
    ///
    /// The notice carries no payload; if it is news (past our cursor), the
    /// state is fetched through the change feed. Returns whether a pull
    /// happened.
    pub fn handle_notice(&self, notice: &ChangeNotice) -> ClientResult<bool> {
        let known = {
            let store = self.store.lock();
            let local = store
                .entity(&notice.entity)
                .map(|r| r.last_modified())
                .unwrap_or(f64::NEG_INFINITY);
            notice.last_modified <= local || notice.last_modified <= store.cursor()
        };
        if known {
            return Ok(false);
        }
        self.pull_changes()?;
        Ok(true)
    }

    /// One full sync cycle: flush the queue, then pull the feed.
    pub fn sync_cycle(&self) -> ClientResult<(FlushReport, usize)> {
        let report = self.flush()?;
        let pulled = self.pull_changes()?;
        Ok((report, pulled))
    }

    /// Connectivity came back: flush immediately, then catch up.
    pub fn on_reconnected(&self) -> ClientResult<(FlushReport, usize)> {
        tracing::info!("connectivity regained, syncing");
        self.sync_cycle()
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
