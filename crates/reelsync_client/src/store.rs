//! Durable local state: the action queue, the entity cache, and the
//! change-feed cursor, all backed by one append-only journal.

use crate::error::{ClientError, ClientResult};
use fs2::FileExt;
use reelsync_protocol::{Action, ChangeRecord, EntityKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Delivery state of one queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    /// Waiting to be sent.
    Pending,
    /// Handed to the transport; outcome unknown.
    InFlight,
    /// A retryable failure was recorded; waits out its backoff.
    Failed,
}

/// One durably queued action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Stable id of this queue entry.
    pub id: Uuid,
    /// The action to deliver.
    pub action: Action,
    /// Client wall clock at enqueue (Unix seconds).
    pub enqueued_at: f64,
    /// Delivery attempts made so far.
    pub attempt_count: u32,
    /// Current delivery state.
    pub status: QueueEntryStatus,
    /// Client wall clock of the last attempt.
    #[serde(default)]
    pub last_attempt_at: Option<f64>,
}

/// One journal line. Replayed in order to rebuild the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    Enqueue {
        entry: QueueEntry,
    },
    Dequeue {
        id: Uuid,
    },
    Attempt {
        id: Uuid,
        status: QueueEntryStatus,
        attempt_count: u32,
        #[serde(default)]
        last_attempt_at: Option<f64>,
    },
    /// An entity snapshot accepted into the cache. The newer-than check
    /// happened before the record was journaled, so replay is unconditional.
    Apply {
        record: ChangeRecord,
    },
    /// Timestamp bump after our own action was acked.
    Confirm {
        #[serde(flatten)]
        entity: EntityKey,
        last_modified: f64,
    },
    Cursor {
        since: f64,
    },
}

/// Append-only journal of queue and cache state.
///
/// Every mutation is one JSON line, fsynced before the call returns, so an
/// enqueued action survives a crash at any point. A torn final line (crash
/// mid-append) is dropped at replay; corruption anywhere earlier is an
/// error. The file is held under an exclusive lock for the lifetime of the
/// store.
pub struct LocalStore {
    path: PathBuf,
    file: File,
    queue: Vec<QueueEntry>,
    entities: HashMap<EntityKey, ChangeRecord>,
    cursor: f64,
}

impl LocalStore {
    /// Opens (or creates) the journal at `path` and replays it.
    ///
    /// Entries that were in flight when the previous process died go back
    /// to pending; the server's idempotency window absorbs the re-send.
    pub fn open(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        lock_journal(&file, &path)?;

        let text = std::fs::read_to_string(&path)?;
        let mut store = Self {
            path,
            file,
            queue: Vec::new(),
            entities: HashMap::new(),
            cursor: 0.0,
        };
        store.replay(&text)?;

        for entry in &mut store.queue {
            if entry.status == QueueEntryStatus::InFlight {
                entry.status = QueueEntryStatus::Pending;
            }
        }

        tracing::debug!(
            path = %store.path.display(),
            queued = store.queue.len(),
            entities = store.entities.len(),
            "journal opened"
        );
        Ok(store)
    }

    fn replay(&mut self, text: &str) -> ClientResult<()> {
        let lines: Vec<&str> = text.lines().collect();
        let last = lines
            .iter()
            .rposition(|l| !l.trim().is_empty())
            .unwrap_or(0);

        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(_) if i == last => {
                    // Torn write from a crash mid-append.
                    tracing::warn!(line = i + 1, "dropping torn journal tail");
                    break;
                }
                Err(e) => {
                    return Err(ClientError::CorruptJournal {
                        line: i + 1,
                        reason: e.to_string(),
                    });
                }
            };
            self.replay_record(record);
        }
        Ok(())
    }

    fn replay_record(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Enqueue { entry } => self.queue.push(entry),
            JournalRecord::Dequeue { id } => self.queue.retain(|e| e.id != id),
            JournalRecord::Attempt {
                id,
                status,
                attempt_count,
                last_attempt_at,
            } => {
                if let Some(entry) = self.queue.iter_mut().find(|e| e.id == id) {
                    entry.status = status;
                    entry.attempt_count = attempt_count;
                    entry.last_attempt_at = last_attempt_at;
                }
            }
            JournalRecord::Apply { record } => {
                self.entities.insert(record.entity_key(), record);
            }
            JournalRecord::Confirm {
                entity,
                last_modified,
            } => {
                if let Some(record) = self.entities.get_mut(&entity) {
                    if last_modified > record.last_modified() {
                        record.set_last_modified(last_modified);
                    }
                }
            }
            JournalRecord::Cursor { since } => self.cursor = since,
        }
    }

    /// Appends records as one buffered write followed by one fsync, so
    /// multi-record mutations land atomically or not at all.
    fn append(&mut self, records: &[JournalRecord]) -> ClientResult<()> {
        let mut buffer = String::new();
        for record in records {
            buffer.push_str(&serde_json::to_string(record)?);
            buffer.push('\n');
        }
        self.file.write_all(buffer.as_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Enqueues an action. Returns the queue entry id.
    pub fn enqueue(&mut self, action: Action, now: f64) -> ClientResult<Uuid> {
        self.enqueue_inner(action, None, now)
    }

    /// Enqueues an action together with the optimistic local state it
    /// produces, durably and atomically, so a crash can never separate the
    /// visible mutation from its pending upload.
    pub fn enqueue_and_apply(
        &mut self,
        action: Action,
        optimistic: ChangeRecord,
        now: f64,
    ) -> ClientResult<Uuid> {
        self.enqueue_inner(action, Some(optimistic), now)
    }

    fn enqueue_inner(
        &mut self,
        action: Action,
        optimistic: Option<ChangeRecord>,
        now: f64,
    ) -> ClientResult<Uuid> {
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            action,
            enqueued_at: now,
            attempt_count: 0,
            status: QueueEntryStatus::Pending,
            last_attempt_at: None,
        };
        let id = entry.id;

        let mut records = vec![JournalRecord::Enqueue {
            entry: entry.clone(),
        }];
        if let Some(record) = &optimistic {
            records.push(JournalRecord::Apply {
                record: record.clone(),
            });
        }
        self.append(&records)?;

        self.queue.push(entry);
        if let Some(record) = optimistic {
            self.entities.insert(record.entity_key(), record);
        }
        Ok(id)
    }

    /// The queue in enqueue order.
    pub fn queue(&self) -> &[QueueEntry] {
        &self.queue
    }

    /// Finds a queue entry by id.
    pub fn entry(&self, id: Uuid) -> Option<&QueueEntry> {
        self.queue.iter().find(|e| e.id == id)
    }

    /// Number of queued actions.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn set_status(
        &mut self,
        id: Uuid,
        status: QueueEntryStatus,
        bump_attempt: bool,
        now: Option<f64>,
    ) -> ClientResult<()> {
        let (attempt_count, last_attempt_at) = {
            let entry = self
                .queue
                .iter()
                .find(|e| e.id == id)
                .ok_or(ClientError::UnknownEntry(id))?;
            let attempts = if bump_attempt {
                entry.attempt_count + 1
            } else {
                entry.attempt_count
            };
            (attempts, now.or(entry.last_attempt_at))
        };

        self.append(&[JournalRecord::Attempt {
            id,
            status,
            attempt_count,
            last_attempt_at,
        }])?;

        if let Some(entry) = self.queue.iter_mut().find(|e| e.id == id) {
            entry.status = status;
            entry.attempt_count = attempt_count;
            entry.last_attempt_at = last_attempt_at;
        }
        Ok(())
    }

    /// Marks an entry as handed to the transport.
    pub fn mark_in_flight(&mut self, id: Uuid, now: f64) -> ClientResult<()> {
        self.set_status(id, QueueEntryStatus::InFlight, true, Some(now))
    }

    /// Records a retryable delivery failure.
    pub fn mark_failed(&mut self, id: Uuid, now: f64) -> ClientResult<()> {
        self.set_status(id, QueueEntryStatus::Failed, false, Some(now))
    }

    /// Revives an entry for another round of deliveries.
    pub fn mark_pending(&mut self, id: Uuid) -> ClientResult<()> {
        if !self.queue.iter().any(|e| e.id == id) {
            return Err(ClientError::UnknownEntry(id));
        }
        self.append(&[JournalRecord::Attempt {
            id,
            status: QueueEntryStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
        }])?;
        if let Some(entry) = self.queue.iter_mut().find(|e| e.id == id) {
            entry.status = QueueEntryStatus::Pending;
            entry.attempt_count = 0;
            entry.last_attempt_at = None;
        }
        Ok(())
    }

    /// Removes an entry, after an ack or a permanent drop.
    pub fn remove(&mut self, id: Uuid) -> ClientResult<()> {
        self.append(&[JournalRecord::Dequeue { id }])?;
        self.queue.retain(|e| e.id != id);
        Ok(())
    }

    /// Applies a server record if it is strictly newer than the local copy.
    ///
    /// Returns whether it was applied. Equal-or-older records are dropped,
    /// which makes re-pulling a page a no-op and rejects stale deliveries.
    pub fn apply(&mut self, record: ChangeRecord) -> ClientResult<bool> {
        let key = record.entity_key();
        let local = self.entities.get(&key).map(|r| r.last_modified());
        if let Some(local) = local {
            if !record.is_newer_than(local) {
                return Ok(false);
            }
        }
        self.append(&[JournalRecord::Apply {
            record: record.clone(),
        }])?;
        self.entities.insert(key, record);
        Ok(true)
    }

    /// Adopts a server record unconditionally, overwriting local state.
    ///
    /// Used when the server reported a conflict: its state wins regardless
    /// of timestamps.
    pub fn adopt(&mut self, record: ChangeRecord) -> ClientResult<()> {
        self.append(&[JournalRecord::Apply {
            record: record.clone(),
        }])?;
        self.entities.insert(record.entity_key(), record);
        Ok(())
    }

    /// Bumps the local timestamp of an entity after our own action was
    /// acked, so the next pull does not echo it back as a change.
    pub fn confirm(&mut self, entity: &EntityKey, last_modified: f64) -> ClientResult<()> {
        let needs_bump = self
            .entities
            .get(entity)
            .is_some_and(|r| last_modified > r.last_modified());
        if !needs_bump {
            return Ok(());
        }
        self.append(&[JournalRecord::Confirm {
            entity: entity.clone(),
            last_modified,
        }])?;
        if let Some(record) = self.entities.get_mut(entity) {
            record.set_last_modified(last_modified);
        }
        Ok(())
    }

    /// The change-feed high-water mark.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Advances the change-feed high-water mark.
    pub fn set_cursor(&mut self, since: f64) -> ClientResult<()> {
        self.append(&[JournalRecord::Cursor { since }])?;
        self.cursor = since;
        Ok(())
    }

    /// Looks up the cached state of an entity.
    pub fn entity(&self, key: &EntityKey) -> Option<&ChangeRecord> {
        self.entities.get(key)
    }

    /// All cached entities.
    pub fn entities(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.entities.values()
    }

    /// Rewrites the journal as a minimal snapshot of current state.
    pub fn compact(&mut self) -> ClientResult<()> {
        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            let mut buffer = String::new();
            let mut push = |record: &JournalRecord| -> ClientResult<()> {
                buffer.push_str(&serde_json::to_string(record)?);
                buffer.push('\n');
                Ok(())
            };
            push(&JournalRecord::Cursor { since: self.cursor })?;
            for record in self.entities.values() {
                push(&JournalRecord::Apply {
                    record: record.clone(),
                })?;
            }
            for entry in &self.queue {
                push(&JournalRecord::Enqueue {
                    entry: entry.clone(),
                })?;
            }
            tmp.write_all(buffer.as_bytes())?;
            tmp.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        lock_journal(&file, &self.path)?;
        self.file = file;
        Ok(())
    }
}

fn lock_journal(file: &File, path: &Path) -> ClientResult<()> {
    file.try_lock_exclusive().map_err(|e| {
        if e.kind() == fs2::lock_contended_error().kind() {
            ClientError::JournalLocked(path.to_path_buf())
        } else {
            ClientError::Journal(e)
        }
    })
}
