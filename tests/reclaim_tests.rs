//! Integration tests for obsolete file reclamation.

use aidb_table::config::{MetaFilePolicy, ReclaimOptions, TableOptions};
use aidb_table::env::{Env, PosixEnv, RandomAccessFile, WritableFile};
use aidb_table::files::filename::{archived_log_file_name, log_file_name, table_file_name};
use aidb_table::files::{FileReclaimer, JobContext, PrepSectionTracker, TableFile, VersionSource};
use aidb_table::key::{InternalKey, ValueType};
use aidb_table::sstable::{TableBuilder, TableBuilderOptions, TableCache, TableContext};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Version metadata with fixed answers.
#[derive(Default)]
struct TestVersions {
    live: Vec<u64>,
    obsolete: Mutex<Vec<TableFile>>,
    obsolete_manifests: Mutex<Vec<String>>,
    min_log: u64,
    manifest: u64,
    checkpoint: u64,
    next_file: u64,
}

impl VersionSource for TestVersions {
    fn live_table_files(&self) -> Vec<u64> {
        self.live.clone()
    }

    fn obsolete_table_files(&self, min_pending_output: u64) -> Vec<TableFile> {
        let mut obsolete = self.obsolete.lock();
        let (ready, later): (Vec<_>, Vec<_>) = obsolete
            .drain(..)
            .partition(|table| table.number < min_pending_output);
        *obsolete = later;
        ready
    }

    fn obsolete_manifests(&self) -> Vec<String> {
        std::mem::take(&mut *self.obsolete_manifests.lock())
    }

    fn min_log_number(&self) -> u64 {
        self.min_log
    }

    fn manifest_file_number(&self) -> u64 {
        self.manifest
    }

    fn checkpoint_file_number(&self) -> u64 {
        self.checkpoint
    }

    fn current_next_file_number(&self) -> u64 {
        self.next_file
    }
}

fn touch(dir: &Path, name: &str) {
    fs::write(dir.join(name), b"payload").unwrap();
}

fn reclaimer(options: ReclaimOptions, versions: TestVersions) -> FileReclaimer {
    FileReclaimer::new(
        PosixEnv::shared(),
        options,
        Arc::new(versions),
        Arc::new(PrepSectionTracker::new()),
    )
    .unwrap()
}

#[test]
fn test_pending_output_protects_unregistered_tables() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    for number in 5..=8 {
        touch(dir.path(), &format!("{:06}.sst", number));
    }
    let versions = TestVersions {
        live: vec![5, 6],
        next_file: 7,
        ..Default::default()
    };
    let r = reclaimer(ReclaimOptions::for_path(dir.path()), versions);
    assert_eq!(r.capture_pending_output(), 7);

    let job = {
        let mut state = r.state();
        r.find_obsolete_files(&mut state, true, false)
    };
    assert_eq!(job.min_pending_output, 7);
    r.purge_obsolete_files(&job, false);

    for number in 5..=8 {
        assert!(table_file_name(dir.path(), number).exists(), "table {}", number);
    }
    assert!(r.purge_errors().is_empty());
}

#[test]
fn test_meta_file_policy() {
    for policy in [MetaFilePolicy::Retain, MetaFilePolicy::Reclaim] {
        let dir = TempDir::new().unwrap();
        for name in [
            "MANIFEST-000003",
            "MANIFEST-000005",
            "CHECKPOINT-000001",
            "CHECKPOINT-000002",
            "CURRENT",
            "CURRENT_CHECKPOINT",
        ] {
            touch(dir.path(), name);
        }
        let versions = TestVersions {
            manifest: 5,
            checkpoint: 2,
            ..Default::default()
        };
        let r = reclaimer(ReclaimOptions::for_path(dir.path()).meta_file_policy(policy), versions);
        r.delete_obsolete_files();

        let reclaimed = policy == MetaFilePolicy::Reclaim;
        assert_eq!(dir.path().join("MANIFEST-000003").exists(), !reclaimed);
        assert_eq!(dir.path().join("CHECKPOINT-000001").exists(), !reclaimed);
        for name in ["MANIFEST-000005", "CHECKPOINT-000002", "CURRENT", "CURRENT_CHECKPOINT"] {
            assert!(dir.path().join(name).exists(), "{:?}: {}", policy, name);
        }
    }
}

#[test]
fn test_obsolete_manifest_list_respects_policy() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "MANIFEST-000002");
    let versions = TestVersions {
        manifest: 4,
        obsolete_manifests: Mutex::new(vec!["MANIFEST-000002".to_string()]),
        ..Default::default()
    };
    let r = reclaimer(ReclaimOptions::for_path(dir.path()), versions);
    let job = {
        let mut state = r.state();
        r.find_obsolete_files(&mut state, false, true)
    };
    assert_eq!(job.manifest_delete_files, vec!["MANIFEST-000002".to_string()]);
    assert!(job.have_something_to_delete());
    r.purge_obsolete_files(&job, false);
    assert!(dir.path().join("MANIFEST-000002").exists());
}

#[test]
fn test_logs_below_min_log_number() {
    let db = TempDir::new().unwrap();
    let wal = TempDir::new().unwrap();
    for number in [2, 3, 9, 10] {
        fs::write(log_file_name(wal.path(), number), b"log").unwrap();
    }
    let versions = TestVersions {
        min_log: 9,
        ..Default::default()
    };
    let r = reclaimer(ReclaimOptions::for_path(db.path()).wal_dir(wal.path()), versions);
    r.delete_obsolete_files();

    assert!(!log_file_name(wal.path(), 2).exists());
    assert!(!log_file_name(wal.path(), 3).exists());
    assert!(log_file_name(wal.path(), 9).exists());
    assert!(log_file_name(wal.path(), 10).exists());
}

#[test]
fn test_logs_archived_with_ttl() {
    let dir = TempDir::new().unwrap();
    fs::write(log_file_name(dir.path(), 4), b"log").unwrap();
    let versions = TestVersions {
        min_log: 6,
        ..Default::default()
    };
    let r = reclaimer(ReclaimOptions::for_path(dir.path()).wal_ttl_seconds(3600), versions);
    r.delete_obsolete_files();

    assert!(!log_file_name(dir.path(), 4).exists());
    assert!(archived_log_file_name(dir.path(), 4).exists());
}

#[test]
fn test_missing_file_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let r = reclaimer(ReclaimOptions::for_path(dir.path()), TestVersions::default());
    let job = JobContext {
        sst_delete_files: vec![TableFile {
            number: 11,
            path_id: 0,
        }],
        log_delete_files: vec![12],
        min_pending_output: u64::MAX,
        log_number: 20,
        ..JobContext::default()
    };
    r.purge_obsolete_files(&job, false);
    assert!(r.purge_errors().is_empty());
}

#[cfg(unix)]
#[test]
fn test_failed_deletion_is_recorded() {
    let dir = TempDir::new().unwrap();
    // A directory cannot be unlinked as a file.
    fs::create_dir(log_file_name(dir.path(), 3)).unwrap();
    let versions = TestVersions {
        min_log: 10,
        ..Default::default()
    };
    let r = reclaimer(ReclaimOptions::for_path(dir.path()), versions);
    r.delete_obsolete_files();

    let errors = r.purge_errors();
    assert_eq!(errors.len(), 1);
    assert!(errors.contains_key(&log_file_name(dir.path(), 3)));
}

#[test]
fn test_table_cache_evicted_before_delete() {
    let dir = TempDir::new().unwrap();
    let ctx = Arc::new(TableContext::new(TableOptions::default()).unwrap());
    let file = PosixEnv.new_writable_file(&table_file_name(dir.path(), 4)).unwrap();
    let mut builder = TableBuilder::new(Arc::clone(&ctx), file, TableBuilderOptions::default());
    builder
        .add(InternalKey::new(b"k", 1, ValueType::Value).encode(), b"v")
        .unwrap();
    builder.finish().unwrap();

    let cache = Arc::new(TableCache::new(ctx, dir.path(), 16));
    cache.find_table(4).unwrap();
    assert_eq!(cache.len(), 1);

    let versions = TestVersions {
        live: vec![],
        obsolete: Mutex::new(vec![TableFile { number: 4, path_id: 0 }]),
        ..Default::default()
    };
    let r = reclaimer(ReclaimOptions::for_path(dir.path()), versions).with_table_cache(Arc::clone(&cache));
    r.delete_obsolete_files();

    assert!(cache.is_empty());
    assert!(!table_file_name(dir.path(), 4).exists());
}

#[test]
fn test_rate_limited_purge() {
    let dir = TempDir::new().unwrap();
    for number in 1..=4 {
        fs::write(table_file_name(dir.path(), number), vec![0u8; 4096]).unwrap();
    }
    let options = ReclaimOptions::for_path(dir.path()).delete_rate_bytes_per_sec(1024 * 1024);
    let r = reclaimer(options, TestVersions::default());

    let job = {
        let mut state = r.state();
        r.find_obsolete_files(&mut state, true, false)
    };
    r.purge_obsolete_files(&job, true);
    for number in 1..=4 {
        assert!(!table_file_name(dir.path(), number).exists());
    }

    r.delete_scheduler().wait_for_empty_trash();
    let trash = dir.path().join(aidb_table::files::reclaim::TRASH_DIR);
    assert_eq!(fs::read_dir(trash).unwrap().count(), 0);
    assert!(r.delete_scheduler().background_errors().is_empty());
}

#[test]
fn test_multiple_db_paths() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    touch(first.path(), "000001.sst");
    touch(second.path(), "000002.sst");
    touch(second.path(), "000003.sst");

    let mut options = ReclaimOptions::for_path(first.path());
    options.db_paths.push(second.path().to_path_buf());
    let versions = TestVersions {
        live: vec![3],
        ..Default::default()
    };
    let r = reclaimer(options, versions);
    r.delete_obsolete_files();

    assert!(!first.path().join("000001.sst").exists());
    assert!(!second.path().join("000002.sst").exists());
    assert!(second.path().join("000003.sst").exists());
}

/// Posix environment that records the thread of every deletion.
#[derive(Default)]
struct RecordingEnv {
    deleted_by: Mutex<Vec<(PathBuf, Option<String>)>>,
}

impl Env for RecordingEnv {
    fn new_random_access_file(&self, path: &Path) -> aidb_table::Result<Arc<dyn RandomAccessFile>> {
        PosixEnv.new_random_access_file(path)
    }
    fn new_writable_file(&self, path: &Path) -> aidb_table::Result<Box<dyn WritableFile>> {
        PosixEnv.new_writable_file(path)
    }
    fn delete_file(&self, path: &Path) -> aidb_table::Result<()> {
        let thread = std::thread::current().name().map(str::to_string);
        self.deleted_by.lock().push((path.to_path_buf(), thread));
        PosixEnv.delete_file(path)
    }
    fn file_exists(&self, path: &Path) -> bool {
        PosixEnv.file_exists(path)
    }
    fn get_children(&self, dir: &Path) -> aidb_table::Result<Vec<String>> {
        PosixEnv.get_children(dir)
    }
    fn get_file_size(&self, path: &Path) -> aidb_table::Result<u64> {
        PosixEnv.get_file_size(path)
    }
    fn get_file_modification_time(&self, path: &Path) -> aidb_table::Result<u64> {
        PosixEnv.get_file_modification_time(path)
    }
    fn rename_file(&self, from: &Path, to: &Path) -> aidb_table::Result<()> {
        PosixEnv.rename_file(from, to)
    }
    fn create_dir_if_missing(&self, dir: &Path) -> aidb_table::Result<()> {
        PosixEnv.create_dir_if_missing(dir)
    }
}

#[test]
fn test_schedule_only_defers_without_rate_limit() {
    env_logger::try_init().ok();

    let dir = TempDir::new().unwrap();
    for number in 1..=3 {
        touch(dir.path(), &format!("{:06}.sst", number));
    }
    fs::write(log_file_name(dir.path(), 2), b"log").unwrap();
    let versions = TestVersions {
        live: vec![3],
        min_log: 5,
        ..Default::default()
    };
    let env = Arc::new(RecordingEnv::default());
    let r = FileReclaimer::new(
        env.clone(),
        ReclaimOptions::for_path(dir.path()),
        Arc::new(versions),
        Arc::new(PrepSectionTracker::new()),
    )
    .unwrap();
    assert_eq!(r.delete_scheduler().rate_bytes_per_sec(), 0);

    let job = {
        let mut state = r.state();
        r.find_obsolete_files(&mut state, true, false)
    };
    r.purge_obsolete_files(&job, true);
    r.delete_scheduler().wait_for_empty_trash();

    assert!(!table_file_name(dir.path(), 1).exists());
    assert!(!table_file_name(dir.path(), 2).exists());
    assert!(table_file_name(dir.path(), 3).exists());
    assert!(!log_file_name(dir.path(), 2).exists());
    assert!(r.purge_errors().is_empty());
    assert!(r.delete_scheduler().background_errors().is_empty());

    let deleted_by = env.deleted_by.lock();
    assert_eq!(deleted_by.len(), 3);
    for (path, thread) in deleted_by.iter() {
        assert_eq!(thread.as_deref(), Some("aidb-delete-scheduler"), "{}", path.display());
    }
}
