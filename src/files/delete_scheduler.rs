//! Rate-limited file deletion.
//!
//! Files are renamed into a trash directory and removed by a background
//! thread that sleeps `size / rate` after each deletion. A rate of 0 deletes
//! inline, except for deletions explicitly deferred to the background queue.

use crate::env::Env;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const TRASH_EXTENSION: &str = "trash";
const WORKER_THREAD_NAME: &str = "aidb-delete-scheduler";

#[derive(Default)]
struct State {
    queue: VecDeque<PathBuf>,
    /// Queued plus in-flight deletions.
    pending: usize,
    closing: bool,
    bg_errors: HashMap<PathBuf, Error>,
}

struct Shared {
    env: Arc<dyn Env>,
    rate_bytes_per_sec: u64,
    state: Mutex<State>,
    cv: Condvar,
}

/// Deletes files at a bounded byte rate.
pub struct DeleteScheduler {
    shared: Arc<Shared>,
    trash_dir: PathBuf,
    // Started at creation when rate limited, else on the first deferral.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DeleteScheduler {
    /// Creates a scheduler. With a non-zero rate the trash directory is
    /// created and a worker thread is started.
    pub fn new(env: Arc<dyn Env>, trash_dir: impl Into<PathBuf>, rate_bytes_per_sec: u64) -> Result<Self> {
        let trash_dir = trash_dir.into();
        let shared = Arc::new(Shared {
            env,
            rate_bytes_per_sec,
            state: Mutex::new(State::default()),
            cv: Condvar::new(),
        });

        let scheduler = Self {
            shared,
            trash_dir,
            worker: Mutex::new(None),
        };
        if rate_bytes_per_sec > 0 {
            scheduler.shared.env.create_dir_if_missing(&scheduler.trash_dir)?;
            scheduler.ensure_worker()?;
        }
        Ok(scheduler)
    }

    fn ensure_worker(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_none() {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_string())
                .spawn(move || background_empty_trash(&shared))?;
            *worker = Some(handle);
        }
        Ok(())
    }

    fn enqueue(&self, path: PathBuf) {
        let mut state = self.shared.state.lock();
        state.queue.push_back(path);
        state.pending += 1;
        self.shared.cv.notify_all();
    }

    /// Bytes per second; 0 means inline deletion.
    pub fn rate_bytes_per_sec(&self) -> u64 {
        self.shared.rate_bytes_per_sec
    }

    /// Deletes `path`, now or later depending on the rate.
    pub fn delete_file(&self, path: &Path) -> Result<()> {
        if self.shared.rate_bytes_per_sec == 0 {
            self.shared.env.delete_file(path)?;
            log::info!("deleted file {}", path.display());
            return Ok(());
        }

        let trash = match self.move_to_trash(path) {
            Ok(trash) => trash,
            Err(e) => {
                log::error!(
                    "failed to move {} to trash ({}), deleting it immediately",
                    path.display(),
                    e
                );
                self.shared.env.delete_file(path)?;
                return Ok(());
            }
        };
        self.enqueue(trash);
        Ok(())
    }

    /// Hands `path` to the background thread and returns at once. Rate
    /// limited schedulers move it to the trash first; otherwise the worker
    /// deletes it in place. Failures show up in [`background_errors`].
    ///
    /// [`background_errors`]: DeleteScheduler::background_errors
    pub fn schedule_deletion(&self, path: &Path) -> Result<()> {
        if self.shared.rate_bytes_per_sec > 0 {
            return self.delete_file(path);
        }
        self.ensure_worker()?;
        self.enqueue(path.to_path_buf());
        Ok(())
    }

    fn move_to_trash(&self, path: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::invalid_argument(format!("not a file path: {}", path.display())))?;

        let env = &self.shared.env;
        let mut target = self.trash_dir.join(format!("{}.{}", name, TRASH_EXTENSION));
        let mut attempt = 0;
        while env.file_exists(&target) {
            attempt += 1;
            target = self
                .trash_dir
                .join(format!("{}_{}.{}", name, attempt, TRASH_EXTENSION));
        }
        env.rename_file(path, &target)?;
        Ok(target)
    }

    /// Blocks until every scheduled deletion has run.
    pub fn wait_for_empty_trash(&self) {
        let mut state = self.shared.state.lock();
        while state.pending > 0 && !state.closing {
            self.shared.cv.wait(&mut state);
        }
    }

    /// Failures of background deletions keyed by trash path.
    pub fn background_errors(&self) -> HashMap<PathBuf, Error> {
        self.shared.state.lock().bg_errors.clone()
    }
}

fn background_empty_trash(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        while state.queue.is_empty() && !state.closing {
            shared.cv.wait(&mut state);
        }
        // Deferred deletions without a rate limit are drained before exit.
        if state.closing && (shared.rate_bytes_per_sec > 0 || state.queue.is_empty()) {
            return;
        }
        let Some(path) = state.queue.pop_front() else {
            continue;
        };

        let (size, result) = parking_lot::MutexGuard::unlocked(&mut state, || {
            let size = shared.env.get_file_size(&path).unwrap_or(0);
            (size, shared.env.delete_file(&path))
        });

        match result {
            Ok(()) => log::info!("deleted scheduled file {} ({} bytes)", path.display(), size),
            Err(e) if e.is_not_found() => {
                log::info!("scheduled file {} was already gone", path.display())
            }
            Err(e) => {
                log::error!("failed to delete scheduled file {}: {}", path.display(), e);
                state.bg_errors.insert(path, e);
            }
        }
        state.pending -= 1;
        if state.pending == 0 {
            shared.cv.notify_all();
        }

        if shared.rate_bytes_per_sec == 0 {
            continue;
        }
        let penalty = Duration::from_micros(size.saturating_mul(1_000_000) / shared.rate_bytes_per_sec);
        let deadline = Instant::now() + penalty;
        while !state.closing {
            if shared.cv.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }
}

impl Drop for DeleteScheduler {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.closing = true;
            self.shared.cv.notify_all();
        }
        if let Some(worker) = self.worker.get_mut().take() {
            if worker.join().is_err() {
                log::error!("delete scheduler thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for DeleteScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteScheduler")
            .field("trash_dir", &self.trash_dir)
            .field("rate_bytes_per_sec", &self.shared.rate_bytes_per_sec)
            .finish()
    }
}
