use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use super::pool::BufferPool;

/// Something that writes dirty frames back when asked.
pub trait PageCleaner: Send + Sync {
    /// Requests a cleaning pass. With `block`, returns only after a pass
    /// that started after this call has finished.
    fn wakeup(&self, block: bool);
}

#[derive(Default)]
struct CleanerState {
    requested: u64,
    completed: u64,
    shutdown: bool,
    passes: u64,
    pages_written: u64,
}

struct Shared {
    state: Mutex<CleanerState>,
    work: Condvar,
    done: Condvar,
}

/// Worker thread that runs [`BufferPool::clean_pass`] on wakeups and every
/// `cleaner_interval_ms`.
pub struct BackgroundCleaner {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundCleaner {
    /// Spawns the worker and registers it with `pool`.
    pub fn start(pool: &Arc<BufferPool>) -> Arc<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(CleanerState::default()),
            work: Condvar::new(),
            done: Condvar::new(),
        });
        let interval = match pool.options().cleaner_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let batch = pool.options().cleaner_batch_pages;
        let weak = Arc::downgrade(pool);
        let worker_shared = Arc::clone(&shared);
        let handle = thread::spawn(move || Self::worker_loop(weak, worker_shared, interval, batch));
        let cleaner = Arc::new(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        });
        let as_dyn: Arc<dyn PageCleaner> = cleaner.clone();
        pool.register_cleaner(Arc::downgrade(&as_dyn));
        info!(interval_ms = pool.options().cleaner_interval_ms, batch, "cleaner.start");
        cleaner
    }

    /// Completed passes.
    pub fn passes(&self) -> u64 {
        self.shared.state.lock().passes
    }

    /// Pages written across all passes.
    pub fn pages_written(&self) -> u64 {
        self.shared.state.lock().pages_written
    }

    /// Stops the worker and waits for it. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.work.notify_all();
            self.shared.done.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("cleaner.worker_panicked");
            }
            info!("cleaner.stop");
        }
    }

    fn worker_loop(
        pool: Weak<BufferPool>,
        shared: Arc<Shared>,
        interval: Option<Duration>,
        batch: usize,
    ) {
        loop {
            let target = {
                let mut state = shared.state.lock();
                loop {
                    if state.shutdown {
                        return;
                    }
                    if state.requested > state.completed {
                        break;
                    }
                    match interval {
                        Some(interval) => {
                            if shared.work.wait_for(&mut state, interval).timed_out() {
                                break;
                            }
                        }
                        None => shared.work.wait(&mut state),
                    }
                }
                state.requested
            };

            let Some(pool) = pool.upgrade() else {
                let mut state = shared.state.lock();
                state.shutdown = true;
                shared.done.notify_all();
                debug!("cleaner.pool_gone");
                return;
            };
            let written = match pool.clean_pass(batch) {
                Ok(report) => report.pages_written as u64,
                Err(err) => {
                    warn!(error = %err, "cleaner.pass_failed");
                    0
                }
            };
            drop(pool);

            let mut state = shared.state.lock();
            state.completed = state.completed.max(target);
            state.passes += 1;
            state.pages_written += written;
            shared.done.notify_all();
        }
    }
}

impl PageCleaner for BackgroundCleaner {
    fn wakeup(&self, block: bool) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.requested += 1;
        let ticket = state.requested;
        self.shared.work.notify_one();
        if block {
            while state.completed < ticket && !state.shutdown {
                self.shared.done.wait(&mut state);
            }
        }
    }
}

impl Drop for BackgroundCleaner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
