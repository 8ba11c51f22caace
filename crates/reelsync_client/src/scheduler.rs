//! Flush scheduling: the trigger policy and the background loop that
//! applies it.

use crate::error::ClientError;
use crate::queue::{CancelToken, SyncQueueManager};
use crate::transport::ActionTransport;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

/// Why a flush is being considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The periodic timer fired.
    Timer,
    /// The transport went from offline to online.
    ConnectivityRegained,
    /// The application came back to the foreground.
    Foregrounded,
}

/// Decides when the queue should flush.
///
/// Event triggers (connectivity, foregrounding) always flush; the timer
/// flushes at most once per interval. [`FlushLoop`] drives this from its
/// own thread; a host with its own event loop can drive it directly.
pub struct FlushScheduler {
    interval: Option<Duration>,
    last_flush: Mutex<Option<Instant>>,
}

impl FlushScheduler {
    /// Creates a scheduler; `interval` of `None` disables timer flushes.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            interval,
            last_flush: Mutex::new(None),
        }
    }

    /// Whether this trigger should cause a flush now.
    pub fn should_flush(&self, trigger: FlushTrigger) -> bool {
        match trigger {
            FlushTrigger::ConnectivityRegained | FlushTrigger::Foregrounded => true,
            FlushTrigger::Timer => {
                let Some(interval) = self.interval else {
                    return false;
                };
                match *self.last_flush.lock() {
                    Some(last) => last.elapsed() >= interval,
                    None => true,
                }
            }
        }
    }

    /// Records that a flush ran, resetting the timer.
    pub fn note_flushed(&self) {
        *self.last_flush.lock() = Some(Instant::now());
    }
}

/// Background thread owning the flush loop.
///
/// The thread blocks on a trigger channel; with an interval configured, a
/// quiet channel fires [`FlushTrigger::Timer`] at that cadence. Each
/// accepted trigger runs one [`SyncQueueManager::sync_cycle`].
/// [`FlushLoop::stop`] (or dropping the handle) cancels any running flush
/// and joins the thread.
pub struct FlushLoop {
    triggers: mpsc::Sender<FlushTrigger>,
    cancel: CancelToken,
    stopping: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl FlushLoop {
    /// Spawns the loop over a shared queue manager.
    ///
    /// `interval` of `None` disables timer flushes; the loop then runs only
    /// on explicit triggers. Hosts typically pass
    /// `ClientConfig::flush_interval` here.
    pub fn spawn<T>(manager: Arc<SyncQueueManager<T>>, interval: Option<Duration>) -> Self
    where
        T: ActionTransport + 'static,
    {
        let (triggers, inbox) = mpsc::channel();
        let stopping = Arc::new(AtomicBool::new(false));
        let cancel = manager.cancel_token();
        let thread = {
            let stopping = Arc::clone(&stopping);
            thread::spawn(move || run(manager, inbox, interval, &stopping))
        };
        Self {
            triggers,
            cancel,
            stopping,
            thread: Some(thread),
        }
    }

    /// Wakes the loop with a trigger.
    pub fn trigger(&self, trigger: FlushTrigger) {
        let _ = self.triggers.send(trigger);
    }

    /// Stops the loop: interrupts any running flush between entries and
    /// joins the thread. Idempotent.
    pub fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        let _ = self.triggers.send(FlushTrigger::Foregrounded);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FlushLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<T: ActionTransport>(
    manager: Arc<SyncQueueManager<T>>,
    inbox: mpsc::Receiver<FlushTrigger>,
    interval: Option<Duration>,
    stopping: &AtomicBool,
) {
    let scheduler = FlushScheduler::new(interval);
    loop {
        let trigger = match interval {
            Some(timer) => match inbox.recv_timeout(timer) {
                Ok(trigger) => trigger,
                Err(mpsc::RecvTimeoutError::Timeout) => FlushTrigger::Timer,
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            },
            None => match inbox.recv() {
                Ok(trigger) => trigger,
                Err(_) => break,
            },
        };
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        if !scheduler.should_flush(trigger) {
            continue;
        }
        match manager.sync_cycle() {
            Ok(_) => scheduler.note_flushed(),
            Err(ClientError::Cancelled) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(error) => tracing::warn!(error = %error, "background sync failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::store::LocalStore;
    use crate::transport::MockTransport;
    use reelsync_protocol::{ActionAck, ActionKind, ChangesPage, UpdateRating};
    use tempfile::TempDir;

    #[test]
    fn event_triggers_always_flush() {
        let scheduler = FlushScheduler::new(None);
        assert!(scheduler.should_flush(FlushTrigger::ConnectivityRegained));
        assert!(scheduler.should_flush(FlushTrigger::Foregrounded));
        assert!(!scheduler.should_flush(FlushTrigger::Timer));
    }

    #[test]
    fn timer_respects_interval() {
        let scheduler = FlushScheduler::new(Some(Duration::from_secs(3600)));

        // Never flushed yet: the first tick flushes.
        assert!(scheduler.should_flush(FlushTrigger::Timer));
        scheduler.note_flushed();
        assert!(!scheduler.should_flush(FlushTrigger::Timer));

        // Events still cut through the interval.
        assert!(scheduler.should_flush(FlushTrigger::ConnectivityRegained));
    }

    #[test]
    fn zero_interval_always_fires() {
        let scheduler = FlushScheduler::new(Some(Duration::ZERO));
        scheduler.note_flushed();
        assert!(scheduler.should_flush(FlushTrigger::Timer));
    }

    fn spawn_manager(dir: &TempDir) -> Arc<SyncQueueManager<MockTransport>> {
        let store = LocalStore::open(dir.path().join("queue.journal")).unwrap();
        Arc::new(SyncQueueManager::new(
            ClientConfig::new("alice"),
            store,
            MockTransport::new(),
        ))
    }

    fn rate() -> ActionKind {
        ActionKind::UpdateRating(UpdateRating {
            imdb_id: "tt0001".into(),
            rating: 8.0,
        })
    }

    fn wait_for_drain(manager: &SyncQueueManager<MockTransport>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.queue_len() > 0 {
            assert!(Instant::now() < deadline, "queue never drained");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn background_loop_flushes_on_trigger() {
        let dir = TempDir::new().unwrap();
        let manager = spawn_manager(&dir);
        manager.enqueue(rate()).unwrap();
        manager.transport().push_ack(ActionAck::ok(1.0));
        manager.transport().push_page(ChangesPage::empty());

        let mut flush_loop = FlushLoop::spawn(Arc::clone(&manager), None);
        flush_loop.trigger(FlushTrigger::Foregrounded);
        wait_for_drain(&manager);
        flush_loop.stop();
        assert_eq!(manager.queue_len(), 0);
    }

    #[test]
    fn timer_drives_the_loop() {
        let dir = TempDir::new().unwrap();
        let manager = spawn_manager(&dir);
        manager.enqueue(rate()).unwrap();
        manager.transport().push_ack(ActionAck::ok(1.0));
        manager.transport().push_page(ChangesPage::empty());

        // No explicit trigger; the timer alone must deliver the entry.
        let mut flush_loop = FlushLoop::spawn(Arc::clone(&manager), Some(Duration::from_millis(10)));
        wait_for_drain(&manager);
        flush_loop.stop();
    }

    #[test]
    fn stop_joins_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = spawn_manager(&dir);
        let mut flush_loop = FlushLoop::spawn(manager, Some(Duration::from_millis(5)));
        flush_loop.stop();
        // A second stop (and the eventual drop) must not hang or panic.
        flush_loop.stop();
    }
}
