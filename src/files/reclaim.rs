//! Obsolete file reclamation.
//!
//! A pass has two phases. [`FileReclaimer::find_obsolete_files`] runs with
//! the database state locked and snapshots everything the purge needs into
//! a [`JobContext`]: obsolete tables and manifests reported by the version
//! metadata, logs that fell below the minimum log to keep and, on a full
//! scan, every file found on disk. [`FileReclaimer::purge_obsolete_files`]
//! then runs unlocked, classifies each candidate and deletes, schedules or
//! archives it.
//!
//! Files at or above the smallest pending output number are never deleted:
//! a writer may still be producing them before they become live.

use crate::config::{MetaFilePolicy, ReclaimOptions};
use crate::env::Env;
use crate::error::{Error, Result};
use crate::files::delete_scheduler::DeleteScheduler;
use crate::files::filename::{
    log_file_name, parse_file_name, table_file_name, info_log_prefix, FileType, OPTIONS_FILE_PREFIX,
};
use crate::files::prep_tracker::PrepSectionTracker;
use crate::files::wal_archive::WalArchive;
use crate::sstable::table_cache::TableCache;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Name of the trash directory inside the first data path.
pub const TRASH_DIR: &str = "trash";

/// A table file and the index of the data path holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFile {
    /// File number.
    pub number: u64,
    /// Index into `ReclaimOptions::db_paths`.
    pub path_id: u32,
}

/// View of the version metadata the reclaimer needs.
pub trait VersionSource: Send + Sync {
    /// Numbers of every table referenced by a live version.
    fn live_table_files(&self) -> Vec<u64>;

    /// Drains tables that dropped out of every version and are numbered
    /// below `min_pending_output`.
    fn obsolete_table_files(&self, min_pending_output: u64) -> Vec<TableFile>;

    /// Drains file names of manifests replaced by a newer one.
    fn obsolete_manifests(&self) -> Vec<String> {
        Vec::new()
    }

    /// Smallest log still needed by any column family.
    fn min_log_number(&self) -> u64;

    /// Log of the previous incarnation, kept for recovery. 0 if none.
    fn prev_log_number(&self) -> u64 {
        0
    }

    /// Number of the current manifest.
    fn manifest_file_number(&self) -> u64;

    /// Manifest being written, 0 if none.
    fn pending_manifest_file_number(&self) -> u64 {
        0
    }

    /// Number of the current checkpoint, 0 if none.
    fn checkpoint_file_number(&self) -> u64 {
        0
    }

    /// Next file number the version set will hand out.
    fn current_next_file_number(&self) -> u64;

    /// Smallest log holding a prepare section that a live memtable still
    /// references. 0 if none.
    fn min_prep_log_referenced_by_memtables(&self) -> u64 {
        0
    }
}

/// A write-ahead log still in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogFile {
    /// Log number.
    pub number: u64,
    /// Bytes written so far.
    pub size: u64,
}

/// Database file state guarded by the reclaimer's lock.
#[derive(Debug, Default)]
pub struct DbFileState {
    /// Logs that may still hold unflushed data, oldest first.
    pub alive_log_files: VecDeque<LogFile>,
    /// Obsolete logs kept for reuse.
    pub log_recycle_files: VecDeque<u64>,
    /// Sum of `alive_log_files` sizes.
    pub total_log_size: u64,
    pending_outputs: BTreeMap<u64, usize>,
    disable_delete_obsolete_files: u32,
    delete_obsolete_files_last_run: u64,
}

impl DbFileState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new log.
    pub fn add_alive_log(&mut self, number: u64, size: u64) {
        self.alive_log_files.push_back(LogFile { number, size });
        self.total_log_size += size;
    }

    /// Smallest number being written, `u64::MAX` if nothing is.
    pub fn min_pending_output(&self) -> u64 {
        self.pending_outputs.keys().next().copied().unwrap_or(u64::MAX)
    }

    /// True while file deletions are disabled.
    pub fn deletions_disabled(&self) -> bool {
        self.disable_delete_obsolete_files > 0
    }
}

/// A file found by the directory scan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CandidateFile {
    /// Name inside its directory.
    pub file_name: String,
    /// Index into `ReclaimOptions::db_paths`.
    pub path_id: u32,
}

/// Snapshot taken by [`FileReclaimer::find_obsolete_files`].
#[derive(Debug, Default, Clone)]
pub struct JobContext {
    /// Identifier used in log lines.
    pub job_id: u64,
    /// Files found on disk, empty unless a full scan ran.
    pub full_scan_candidate_files: Vec<CandidateFile>,
    /// Live tables, filled on a full scan.
    pub sst_live: HashSet<u64>,
    /// Tables reported obsolete by the version metadata.
    pub sst_delete_files: Vec<TableFile>,
    /// Logs that fell below `log_number`.
    pub log_delete_files: Vec<u64>,
    /// Logs kept for recycling.
    pub log_recycle_files: Vec<u64>,
    /// Names of replaced manifests.
    pub manifest_delete_files: Vec<String>,
    /// Smallest number being written.
    pub min_pending_output: u64,
    /// Smallest log to keep.
    pub log_number: u64,
    /// Previous log number.
    pub prev_log_number: u64,
    /// Current manifest number.
    pub manifest_file_number: u64,
    /// Manifest being written.
    pub pending_manifest_file_number: u64,
    /// Current checkpoint number.
    pub checkpoint_file_number: u64,
    /// Bytes in logs handed to the purge.
    pub size_log_to_delete: u64,
    /// Number of alive logs before the pass.
    pub num_alive_log_files: usize,
}

impl JobContext {
    /// True if the purge phase has any work.
    pub fn have_something_to_delete(&self) -> bool {
        !self.full_scan_candidate_files.is_empty()
            || !self.sst_delete_files.is_empty()
            || !self.log_delete_files.is_empty()
            || !self.manifest_delete_files.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deletion {
    Inline,
    RateLimited,
    // Queued for the scheduler's background thread.
    Deferred,
}

/// Finds and removes files the database no longer references.
pub struct FileReclaimer {
    env: Arc<dyn Env>,
    options: ReclaimOptions,
    versions: Arc<dyn VersionSource>,
    prep_tracker: Arc<PrepSectionTracker>,
    state: Mutex<DbFileState>,
    table_cache: Option<Arc<TableCache>>,
    scheduler: DeleteScheduler,
    wal_archive: WalArchive,
    purge_errors: Mutex<HashMap<PathBuf, Error>>,
    info_log_prefix: String,
    next_job_id: AtomicU64,
}

impl FileReclaimer {
    /// Creates a reclaimer. Fails if `options` has no data path.
    pub fn new(
        env: Arc<dyn Env>,
        options: ReclaimOptions,
        versions: Arc<dyn VersionSource>,
        prep_tracker: Arc<PrepSectionTracker>,
    ) -> Result<Self> {
        options.validate()?;
        let db_dir = options.db_dir()?.to_path_buf();
        let wal_dir = options.wal_dir_or_default()?.to_path_buf();
        let scheduler = DeleteScheduler::new(
            Arc::clone(&env),
            db_dir.join(TRASH_DIR),
            options.delete_rate_bytes_per_sec,
        )?;
        let wal_archive = WalArchive::new(
            Arc::clone(&env),
            wal_dir,
            options.wal_ttl_seconds,
            options.wal_size_limit_mb,
        );
        let has_log_dir = options
            .db_log_dir
            .as_deref()
            .is_some_and(|dir| dir != db_dir.as_path());

        Ok(Self {
            env,
            info_log_prefix: info_log_prefix(has_log_dir, &db_dir),
            options,
            versions,
            prep_tracker,
            state: Mutex::new(DbFileState::new()),
            table_cache: None,
            scheduler,
            wal_archive,
            purge_errors: Mutex::new(HashMap::new()),
            next_job_id: AtomicU64::new(1),
        })
    }

    /// Evicts deleted tables from `cache` before unlinking them.
    pub fn with_table_cache(mut self, cache: Arc<TableCache>) -> Self {
        self.table_cache = Some(cache);
        self
    }

    /// Locks the database file state.
    pub fn state(&self) -> MutexGuard<'_, DbFileState> {
        self.state.lock()
    }

    /// Scheduler used for table and deferred deletions.
    pub fn delete_scheduler(&self) -> &DeleteScheduler {
        &self.scheduler
    }

    /// Failed deletions of the purge phase keyed by path.
    pub fn purge_errors(&self) -> HashMap<PathBuf, Error> {
        self.purge_errors.lock().clone()
    }

    /// Registers the next file number as being written and returns it.
    pub fn capture_pending_output(&self) -> u64 {
        let number = self.versions.current_next_file_number();
        *self.state.lock().pending_outputs.entry(number).or_insert(0) += 1;
        number
    }

    /// Releases a number returned by [`Self::capture_pending_output`].
    pub fn release_pending_output(&self, number: u64) {
        let mut state = self.state.lock();
        match state.pending_outputs.get_mut(&number) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                state.pending_outputs.remove(&number);
            }
            None => log::warn!("releasing pending output {} that was not captured", number),
        }
    }

    /// Stops file deletions until the matching enable.
    pub fn disable_file_deletions(&self) {
        let mut state = self.state.lock();
        state.disable_delete_obsolete_files += 1;
        log::info!("file deletions disabled ({})", state.disable_delete_obsolete_files);
    }

    /// Re-enables file deletions, or all of them with `force`. Runs a pass
    /// once deletions are enabled again.
    pub fn enable_file_deletions(&self, force: bool) {
        let enabled = {
            let mut state = self.state.lock();
            if force {
                state.disable_delete_obsolete_files = 0;
            } else {
                state.disable_delete_obsolete_files = state.disable_delete_obsolete_files.saturating_sub(1);
            }
            state.disable_delete_obsolete_files == 0
        };
        if enabled {
            log::info!("file deletions enabled");
            self.delete_obsolete_files();
        }
    }

    /// Smallest log that must survive. With two-phase commit enabled logs
    /// holding outstanding prepare sections are kept too.
    pub fn min_log_number_to_keep(&self) -> u64 {
        let mut log_number = self.versions.min_log_number();
        if self.options.allow_2pc {
            if let Some(prep) = self.prep_tracker.min_outstanding() {
                log_number = log_number.min(prep);
            }
            let memtable_prep = self.versions.min_prep_log_referenced_by_memtables();
            if memtable_prep != 0 {
                log_number = log_number.min(memtable_prep);
            }
        }
        log_number
    }

    /// Collects what the purge phase needs. `force` bypasses the full scan
    /// throttle; `no_full_scan` skips the scan entirely.
    pub fn find_obsolete_files(&self, state: &mut DbFileState, force: bool, no_full_scan: bool) -> JobContext {
        let mut job = JobContext {
            job_id: self.next_job_id.fetch_add(1, Ordering::Relaxed),
            ..JobContext::default()
        };
        if state.deletions_disabled() {
            return job;
        }

        let doing_full_scan = if no_full_scan {
            false
        } else if force {
            true
        } else {
            let now = self.env.now_micros();
            state.delete_obsolete_files_last_run + self.options.delete_obsolete_files_period_micros < now
        };
        if doing_full_scan {
            state.delete_obsolete_files_last_run = self.env.now_micros();
        }

        job.min_pending_output = state.min_pending_output();
        job.sst_delete_files = self.versions.obsolete_table_files(job.min_pending_output);
        job.manifest_delete_files = self.versions.obsolete_manifests();
        job.log_number = self.min_log_number_to_keep();
        job.prev_log_number = self.versions.prev_log_number();
        job.manifest_file_number = self.versions.manifest_file_number();
        job.pending_manifest_file_number = self.versions.pending_manifest_file_number();
        job.checkpoint_file_number = self.versions.checkpoint_file_number();

        if doing_full_scan {
            job.sst_live = self.versions.live_table_files().into_iter().collect();
            self.scan_directories(&mut job.full_scan_candidate_files);
        }

        job.num_alive_log_files = state.alive_log_files.len();
        // The newest log is always alive.
        while state.alive_log_files.len() > 1 {
            let Some(earliest) = state.alive_log_files.front().copied() else {
                break;
            };
            if earliest.number >= job.log_number {
                break;
            }
            state.alive_log_files.pop_front();
            state.total_log_size = state.total_log_size.saturating_sub(earliest.size);
            if state.log_recycle_files.len() < self.options.recycle_log_file_num {
                log::info!("[JOB {}] log {} kept for recycling", job.job_id, earliest.number);
                state.log_recycle_files.push_back(earliest.number);
            } else {
                job.log_delete_files.push(earliest.number);
                job.size_log_to_delete += earliest.size;
            }
        }
        job.log_recycle_files = state.log_recycle_files.iter().copied().collect();
        job
    }

    fn scan_directories(&self, out: &mut Vec<CandidateFile>) {
        let db_dir = self.options.db_paths.first().map(PathBuf::as_path);
        let mut scan = |dir: &Path, path_id: u32| match self.env.get_children(dir) {
            Ok(names) => out.extend(names.into_iter().map(|file_name| CandidateFile { file_name, path_id })),
            Err(e) => log::warn!("cannot list {}: {}", dir.display(), e),
        };

        for (path_id, dir) in self.options.db_paths.iter().enumerate() {
            scan(dir, path_id as u32);
        }
        if let Some(wal_dir) = self.options.wal_dir.as_deref() {
            if Some(wal_dir) != db_dir {
                scan(wal_dir, 0);
            }
        }
        if let Some(log_dir) = self.options.db_log_dir.as_deref() {
            if Some(log_dir) != db_dir && Some(log_dir) != self.options.wal_dir.as_deref() {
                scan(log_dir, 0);
            }
        }
    }

    /// Deletes, schedules or archives every candidate of `job` that nothing
    /// references any more. With `schedule_only` every deletion is queued
    /// for the delete scheduler's background thread and this returns
    /// without unlinking anything itself; failures then land in the
    /// scheduler's background errors.
    pub fn purge_obsolete_files(&self, job: &JobContext, schedule_only: bool) {
        let mut candidates = job.full_scan_candidate_files.clone();
        candidates.reserve(job.sst_delete_files.len() + job.log_delete_files.len() + job.manifest_delete_files.len());
        for table in &job.sst_delete_files {
            candidates.push(CandidateFile {
                file_name: bare_name(table_file_name(Path::new(""), table.number)),
                path_id: table.path_id,
            });
        }
        for &number in job.log_delete_files.iter().filter(|&&n| n > 0) {
            candidates.push(CandidateFile {
                file_name: bare_name(log_file_name(Path::new(""), number)),
                path_id: 0,
            });
        }
        for name in &job.manifest_delete_files {
            candidates.push(CandidateFile {
                file_name: name.clone(),
                path_id: 0,
            });
        }
        candidates.sort();
        candidates.dedup();

        let options_threshold = self.options_file_threshold(&candidates);
        let recycled: HashSet<u64> = job.log_recycle_files.iter().copied().collect();
        let mut old_info_logs = Vec::new();

        for candidate in &candidates {
            let Some((number, file_type)) = parse_file_name(&candidate.file_name, &self.info_log_prefix) else {
                continue;
            };

            let keep = match file_type {
                FileType::Log => {
                    number >= job.log_number || number == job.prev_log_number || recycled.contains(&number)
                }
                FileType::Table => job.sst_live.contains(&number) || number >= job.min_pending_output,
                FileType::Temp => {
                    job.sst_live.contains(&number)
                        || number >= job.min_pending_output
                        || number == job.pending_manifest_file_number
                        || candidate.file_name.starts_with(OPTIONS_FILE_PREFIX)
                }
                FileType::Descriptor => match self.options.meta_file_policy {
                    MetaFilePolicy::Retain => true,
                    MetaFilePolicy::Reclaim => number >= job.manifest_file_number,
                },
                FileType::Checkpoint => match self.options.meta_file_policy {
                    MetaFilePolicy::Retain => true,
                    MetaFilePolicy::Reclaim => number >= job.checkpoint_file_number,
                },
                FileType::Options => number >= options_threshold,
                FileType::InfoLog => {
                    if number != 0 {
                        old_info_logs.push(candidate.file_name.clone());
                    }
                    true
                }
                FileType::Current
                | FileType::CurrentCheckpoint
                | FileType::DbLock
                | FileType::Identity
                | FileType::MetaDatabase
                | FileType::Blob => true,
            };
            if keep {
                continue;
            }

            let path = match self.resolve(file_type, candidate) {
                Ok(path) => path,
                Err(e) => {
                    log::error!("[JOB {}] cannot resolve {}: {}", job.job_id, candidate.file_name, e);
                    continue;
                }
            };

            if file_type == FileType::Table {
                if let Some(cache) = &self.table_cache {
                    cache.evict(number);
                }
            }
            if file_type == FileType::Log && self.wal_archive.enabled() {
                if let Err(e) = self.wal_archive.archive_wal_file(&path, number) {
                    log::error!("[JOB {}] cannot archive log {}: {}", job.job_id, path.display(), e);
                    self.purge_errors.lock().insert(path, e);
                }
                continue;
            }
            let how = if schedule_only {
                Deletion::Deferred
            } else if file_type == FileType::Table {
                Deletion::RateLimited
            } else {
                Deletion::Inline
            };
            self.delete_file(job.job_id, &path, file_type, number, how);
        }

        self.delete_old_info_logs(job.job_id, old_info_logs);

        if let Err(e) = self.wal_archive.purge_obsolete_wal_files() {
            log::warn!("[JOB {}] archived log purge failed: {}", job.job_id, e);
        }
        log::debug!("[JOB {}] purge of {} candidates done", job.job_id, candidates.len());
    }

    /// Smallest options file number that survives.
    fn options_file_threshold(&self, candidates: &[CandidateFile]) -> u64 {
        let mut numbers: Vec<u64> = candidates
            .iter()
            .filter_map(|c| match parse_file_name(&c.file_name, &self.info_log_prefix) {
                Some((number, FileType::Options)) => Some(number),
                _ => None,
            })
            .collect();
        if numbers.len() <= self.options.options_files_to_keep {
            return 0;
        }
        numbers.sort_unstable_by(|a, b| b.cmp(a));
        numbers[self.options.options_files_to_keep - 1]
    }

    fn delete_old_info_logs(&self, job_id: u64, mut old_info_logs: Vec<String>) {
        let keep = self.options.keep_log_file_num;
        if old_info_logs.len() < keep {
            return;
        }
        let dir = match self.options.log_dir_or_default() {
            Ok(dir) => dir.to_path_buf(),
            Err(e) => {
                log::error!("[JOB {}] no info log directory: {}", job_id, e);
                return;
            }
        };
        // Names differ only in the timestamp suffix, so numeric order is age.
        old_info_logs.sort_by_key(|name| {
            parse_file_name(name, &self.info_log_prefix).map_or(0, |(number, _)| number)
        });
        // The current LOG counts towards the limit.
        let excess = old_info_logs.len() - keep + 1;
        for name in old_info_logs.into_iter().take(excess) {
            let path = dir.join(&name);
            self.delete_file(job_id, &path, FileType::InfoLog, 0, Deletion::Inline);
        }
    }

    fn resolve(&self, file_type: FileType, candidate: &CandidateFile) -> Result<PathBuf> {
        let dir = match file_type {
            FileType::Log => self.options.wal_dir_or_default()?,
            FileType::InfoLog => self.options.log_dir_or_default()?,
            _ => match self.options.db_paths.get(candidate.path_id as usize) {
                Some(dir) => dir.as_path(),
                None => self.options.db_dir()?,
            },
        };
        Ok(dir.join(&candidate.file_name))
    }

    fn delete_file(&self, job_id: u64, path: &Path, file_type: FileType, number: u64, how: Deletion) {
        let result = match how {
            Deletion::Inline => self.env.delete_file(path),
            Deletion::RateLimited => self.scheduler.delete_file(path),
            Deletion::Deferred => self.scheduler.schedule_deletion(path),
        };
        match result {
            Ok(()) => log::info!(
                "[JOB {}] {} {:?} file {} #{}",
                job_id,
                if how == Deletion::Deferred { "scheduled" } else { "deleted" },
                file_type,
                path.display(),
                number
            ),
            Err(e) if e.is_not_found() || !self.env.file_exists(path) => log::info!(
                "[JOB {}] tried to delete a non-existing {:?} file {}",
                job_id,
                file_type,
                path.display()
            ),
            Err(e) => {
                log::error!(
                    "[JOB {}] failed to delete {:?} file {}: {}",
                    job_id,
                    file_type,
                    path.display(),
                    e
                );
                self.purge_errors.lock().insert(path.to_path_buf(), e);
            }
        }
    }

    /// Runs a forced find under the lock, then purges without it.
    pub fn delete_obsolete_files(&self) {
        let job = {
            let mut state = self.state.lock();
            self.find_obsolete_files(&mut state, true, false)
        };
        if job.have_something_to_delete() {
            self.purge_obsolete_files(&job, false);
        }
    }
}

impl std::fmt::Debug for FileReclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReclaimer")
            .field("options", &self.options)
            .field("scheduler", &self.scheduler)
            .field("wal_archive", &self.wal_archive)
            .finish()
    }
}

fn bare_name(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PosixEnv;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FixedVersions {
        live: Vec<u64>,
        obsolete: Mutex<Vec<TableFile>>,
        min_log: u64,
        manifest: u64,
        next_file: u64,
        memtable_prep: u64,
    }

    impl VersionSource for FixedVersions {
        fn live_table_files(&self) -> Vec<u64> {
            self.live.clone()
        }
        fn obsolete_table_files(&self, min_pending_output: u64) -> Vec<TableFile> {
            let mut obsolete = self.obsolete.lock();
            let (ready, later): (Vec<_>, Vec<_>) =
                obsolete.drain(..).partition(|t| t.number < min_pending_output);
            *obsolete = later;
            ready
        }
        fn min_log_number(&self) -> u64 {
            self.min_log
        }
        fn manifest_file_number(&self) -> u64 {
            self.manifest
        }
        fn current_next_file_number(&self) -> u64 {
            self.next_file
        }
        fn min_prep_log_referenced_by_memtables(&self) -> u64 {
            self.memtable_prep
        }
    }

    fn reclaimer(dir: &Path, versions: FixedVersions, opts: ReclaimOptions) -> FileReclaimer {
        FileReclaimer::new(
            PosixEnv::shared(),
            opts,
            Arc::new(versions),
            Arc::new(PrepSectionTracker::new()),
        )
        .unwrap_or_else(|e| panic!("reclaimer for {}: {}", dir.display(), e))
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_table_classification() {
        let dir = TempDir::new().unwrap();
        for name in ["000003.sst", "000004.sst", "000009.sst", "CURRENT", "IDENTITY", "LOCK"] {
            touch(dir.path(), name);
        }
        let versions = FixedVersions {
            live: vec![4],
            next_file: 9,
            ..Default::default()
        };
        let r = reclaimer(dir.path(), versions, ReclaimOptions::for_path(dir.path()));
        assert_eq!(r.capture_pending_output(), 9);

        r.delete_obsolete_files();
        assert!(!dir.path().join("000003.sst").exists());
        assert!(dir.path().join("000004.sst").exists());
        assert!(dir.path().join("000009.sst").exists());
        for name in ["CURRENT", "IDENTITY", "LOCK"] {
            assert!(dir.path().join(name).exists());
        }

        r.release_pending_output(9);
        r.delete_obsolete_files();
        assert!(!dir.path().join("000009.sst").exists());
    }

    #[test]
    fn test_alive_logs_recycle_then_delete() {
        let dir = TempDir::new().unwrap();
        let versions = FixedVersions {
            min_log: 5,
            ..Default::default()
        };
        let r = reclaimer(dir.path(), versions, ReclaimOptions::for_path(dir.path()).recycle_log_file_num(1));
        let job = {
            let mut state = r.state();
            for number in 2..=5 {
                state.add_alive_log(number, 100);
            }
            r.find_obsolete_files(&mut state, false, true)
        };
        assert!(job.full_scan_candidate_files.is_empty());
        assert_eq!(job.log_recycle_files, vec![2]);
        assert_eq!(job.log_delete_files, vec![3, 4]);
        assert_eq!(job.size_log_to_delete, 200);
        assert_eq!(job.num_alive_log_files, 4);

        let state = r.state();
        assert_eq!(state.alive_log_files.len(), 1);
        assert_eq!(state.total_log_size, 100);
    }

    #[test]
    fn test_min_log_number_with_2pc() {
        let dir = TempDir::new().unwrap();
        let tracker = Arc::new(PrepSectionTracker::new());
        let versions = Arc::new(FixedVersions {
            min_log: 10,
            memtable_prep: 8,
            ..Default::default()
        });

        let plain = FileReclaimer::new(
            PosixEnv::shared(),
            ReclaimOptions::for_path(dir.path()),
            versions.clone(),
            tracker.clone(),
        )
        .unwrap();
        let two_pc = FileReclaimer::new(
            PosixEnv::shared(),
            ReclaimOptions::for_path(dir.path()).allow_2pc(true),
            versions,
            tracker.clone(),
        )
        .unwrap();

        assert_eq!(plain.min_log_number_to_keep(), 10);
        assert_eq!(two_pc.min_log_number_to_keep(), 8);
        tracker.mark(6);
        assert_eq!(plain.min_log_number_to_keep(), 10);
        assert_eq!(two_pc.min_log_number_to_keep(), 6);
        tracker.unmark(6);
        assert_eq!(two_pc.min_log_number_to_keep(), 8);
    }

    #[test]
    fn test_options_files_keep_newest() {
        let dir = TempDir::new().unwrap();
        for name in ["OPTIONS-000002", "OPTIONS-000005", "OPTIONS-000007", "OPTIONS-000008.dbtmp"] {
            touch(dir.path(), name);
        }
        let r = reclaimer(dir.path(), FixedVersions::default(), ReclaimOptions::for_path(dir.path()));
        r.delete_obsolete_files();
        assert!(!dir.path().join("OPTIONS-000002").exists());
        assert!(dir.path().join("OPTIONS-000005").exists());
        assert!(dir.path().join("OPTIONS-000007").exists());
        assert!(dir.path().join("OPTIONS-000008.dbtmp").exists());
    }

    #[test]
    fn test_old_info_logs_trimmed() {
        let dir = TempDir::new().unwrap();
        for name in ["LOG", "LOG.old.100", "LOG.old.200", "LOG.old.300"] {
            touch(dir.path(), name);
        }
        let r = reclaimer(
            dir.path(),
            FixedVersions::default(),
            ReclaimOptions::for_path(dir.path()).keep_log_file_num(2),
        );
        r.delete_obsolete_files();
        assert!(dir.path().join("LOG").exists());
        assert!(!dir.path().join("LOG.old.100").exists());
        assert!(!dir.path().join("LOG.old.200").exists());
        assert!(dir.path().join("LOG.old.300").exists());
    }

    #[test]
    fn test_disabled_deletions() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "000001.sst");
        let r = reclaimer(dir.path(), FixedVersions::default(), ReclaimOptions::for_path(dir.path()));

        r.disable_file_deletions();
        r.delete_obsolete_files();
        assert!(dir.path().join("000001.sst").exists());

        r.enable_file_deletions(false);
        assert!(!dir.path().join("000001.sst").exists());
    }

    #[test]
    fn test_full_scan_throttled() {
        let dir = TempDir::new().unwrap();
        let r = reclaimer(dir.path(), FixedVersions::default(), ReclaimOptions::for_path(dir.path()));
        touch(dir.path(), "000001.sst");

        let mut state = r.state();
        let first = r.find_obsolete_files(&mut state, false, false);
        assert!(!first.full_scan_candidate_files.is_empty());
        let second = r.find_obsolete_files(&mut state, false, false);
        assert!(second.full_scan_candidate_files.is_empty());
        let forced = r.find_obsolete_files(&mut state, true, false);
        assert!(!forced.full_scan_candidate_files.is_empty());
        assert!(forced.job_id > first.job_id);
    }
}
