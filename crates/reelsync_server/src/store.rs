//! Canonical per-account entity store.

use parking_lot::{Mutex, MutexGuard, RwLock};
use reelsync_protocol::{ActionAck, ChangeRecord, EntityKey, IdempotencyKey};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Bounded memory of recently applied actions.
///
/// Maps idempotency keys to the ack that was returned when the action was
/// first applied. A redelivered action inside the window gets the recorded
/// ack back, including the original `last_modified`, without re-applying.
pub struct IdempotencyWindow {
    order: VecDeque<IdempotencyKey>,
    results: HashMap<IdempotencyKey, ActionAck>,
    capacity: usize,
}

impl IdempotencyWindow {
    /// Creates a window remembering at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            results: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    /// Looks up the recorded ack for a key.
    pub fn get(&self, key: &IdempotencyKey) -> Option<&ActionAck> {
        self.results.get(key)
    }

    /// Records an ack, evicting the oldest entry when full.
    pub fn record(&mut self, key: IdempotencyKey, ack: ActionAck) {
        if self.results.contains_key(&key) {
            self.results.insert(key, ack);
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.results.remove(&evicted);
            }
        }
        self.order.push_back(key.clone());
        self.results.insert(key, ack);
    }

    /// Number of remembered keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Mutable state of one account, guarded by the account lock.
pub struct AccountData {
    /// Canonical entity snapshots, tombstones included.
    pub entities: HashMap<EntityKey, ChangeRecord>,
    /// Recently applied actions.
    pub recent: IdempotencyWindow,
}

impl AccountData {
    fn new(idempotency_window: usize) -> Self {
        Self {
            entities: HashMap::new(),
            recent: IdempotencyWindow::new(idempotency_window),
        }
    }

    /// Records with `last_modified` strictly after `since`, ascending.
    ///
    /// Ties are broken by entity key so the ordering is total and pagination
    /// offsets are stable.
    pub fn records_since(&self, since: f64) -> Vec<ChangeRecord> {
        let mut records: Vec<ChangeRecord> = self
            .entities
            .values()
            .filter(|r| r.last_modified() > since)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.last_modified()
                .partial_cmp(&b.last_modified())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity_key().cmp(&b.entity_key()))
        });
        records
    }
}

/// One account's store plus its short-lived write lock.
pub struct AccountState {
    inner: Mutex<AccountData>,
}

impl AccountState {
    fn new(idempotency_window: usize) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(idempotency_window)),
        }
    }

    /// Locks this account for a read-modify-write.
    ///
    /// The lock serializes actions within one account; actions on other
    /// accounts proceed concurrently.
    pub fn lock(&self) -> MutexGuard<'_, AccountData> {
        self.inner.lock()
    }
}

/// Registry of all accounts known to this server.
pub struct AccountRegistry {
    accounts: RwLock<HashMap<String, Arc<AccountState>>>,
    idempotency_window: usize,
}

impl AccountRegistry {
    /// Creates an empty registry.
    pub fn new(idempotency_window: usize) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            idempotency_window,
        }
    }

    /// Returns the account's state, creating it on first use.
    pub fn account(&self, account_id: &str) -> Arc<AccountState> {
        if let Some(state) = self.accounts.read().get(account_id) {
            return Arc::clone(state);
        }
        let mut accounts = self.accounts.write();
        Arc::clone(
            accounts
                .entry(account_id.to_string())
                .or_insert_with(|| Arc::new(AccountState::new(self.idempotency_window))),
        )
    }

    /// Returns the account's state only if it already exists.
    pub fn existing(&self, account_id: &str) -> Option<Arc<AccountState>> {
        self.accounts.read().get(account_id).map(Arc::clone)
    }

    /// Number of known accounts.
    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    /// True when no account has been touched yet.
    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsync_protocol::MovieState;

    fn movie(id: &str, ts: f64) -> ChangeRecord {
        let mut m = MovieState::new(id);
        m.last_modified = ts;
        ChangeRecord::Movie(m)
    }

    #[test]
    fn window_records_and_evicts() {
        let mut window = IdempotencyWindow::new(2);
        let keys: Vec<IdempotencyKey> = (0..3)
            .map(|i| {
                use reelsync_protocol::{Action, ActionKind, UpdateRating};
                Action::new(
                    ActionKind::UpdateRating(UpdateRating {
                        imdb_id: format!("tt{i:04}"),
                        rating: 5.0,
                    }),
                    0.0,
                )
                .idempotency_key()
            })
            .collect();

        window.record(keys[0].clone(), ActionAck::ok(1.0));
        window.record(keys[1].clone(), ActionAck::ok(2.0));
        assert_eq!(window.len(), 2);

        window.record(keys[2].clone(), ActionAck::ok(3.0));
        assert_eq!(window.len(), 2);
        assert!(window.get(&keys[0]).is_none());
        assert!(window.get(&keys[2]).is_some());
    }

    #[test]
    fn records_since_is_sorted_and_strict() {
        let registry = AccountRegistry::new(16);
        let account = registry.account("alice");
        {
            let mut data = account.lock();
            data.entities
                .insert(EntityKey::Movie("tt0002".into()), movie("tt0002", 20.0));
            data.entities
                .insert(EntityKey::Movie("tt0001".into()), movie("tt0001", 10.0));
            data.entities
                .insert(EntityKey::Movie("tt0003".into()), movie("tt0003", 30.0));
        }

        let data = account.lock();
        let records = data.records_since(10.0);
        assert_eq!(records.len(), 2); // strict: tt0001 at exactly 10.0 excluded
        assert_eq!(records[0].last_modified(), 20.0);
        assert_eq!(records[1].last_modified(), 30.0);
    }

    #[test]
    fn accounts_are_isolated() {
        let registry = AccountRegistry::new(16);
        let alice = registry.account("alice");
        alice
            .lock()
            .entities
            .insert(EntityKey::Movie("tt0001".into()), movie("tt0001", 1.0));

        let bob = registry.account("bob");
        assert!(bob.lock().entities.is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn existing_does_not_create() {
        let registry = AccountRegistry::new(16);
        assert!(registry.existing("nobody").is_none());
        registry.account("alice");
        assert!(registry.existing("alice").is_some());
    }
}
