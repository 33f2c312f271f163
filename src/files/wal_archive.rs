//! Archived write-ahead logs and their TTL / size based purge.

use crate::env::Env;
use crate::error::Result;
use crate::files::filename::{archival_directory, archived_log_file_name, parse_file_name, FileType};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Seconds between purges when only a size limit is set.
const DEFAULT_PURGE_INTERVAL_SECS: u64 = 600;

/// Moves obsolete logs to `<wal_dir>/archive` and trims the archive.
pub struct WalArchive {
    env: Arc<dyn Env>,
    wal_dir: PathBuf,
    ttl_seconds: u64,
    size_limit_mb: u64,
    last_purge_secs: Mutex<u64>,
}

impl WalArchive {
    /// Creates an archive for logs in `wal_dir`. With both limits at 0 logs
    /// are never archived.
    pub fn new(env: Arc<dyn Env>, wal_dir: impl Into<PathBuf>, ttl_seconds: u64, size_limit_mb: u64) -> Self {
        Self {
            env,
            wal_dir: wal_dir.into(),
            ttl_seconds,
            size_limit_mb,
            last_purge_secs: Mutex::new(0),
        }
    }

    /// True if obsolete logs are archived rather than deleted.
    pub fn enabled(&self) -> bool {
        self.ttl_seconds > 0 || self.size_limit_mb > 0
    }

    /// Archive directory.
    pub fn dir(&self) -> PathBuf {
        archival_directory(&self.wal_dir)
    }

    /// Moves log `number` at `path` into the archive.
    pub fn archive_wal_file(&self, path: &Path, number: u64) -> Result<()> {
        self.env.create_dir_if_missing(&self.dir())?;
        let target = archived_log_file_name(&self.wal_dir, number);
        self.env.rename_file(path, &target)?;
        log::info!("archived log {} to {}", path.display(), target.display());
        Ok(())
    }

    /// Deletes archived logs older than the TTL, then the oldest logs until
    /// the archive fits the size limit. Runs at most once per interval.
    /// Returns the number of files deleted.
    pub fn purge_obsolete_wal_files(&self) -> Result<usize> {
        if !self.enabled() {
            return Ok(0);
        }

        let now = self.env.now_micros() / 1_000_000;
        let interval = if self.ttl_seconds > 0 {
            (self.ttl_seconds / 2).clamp(1, DEFAULT_PURGE_INTERVAL_SECS)
        } else {
            DEFAULT_PURGE_INTERVAL_SECS
        };
        {
            let mut last = self.last_purge_secs.lock();
            if *last != 0 && *last + interval > now {
                return Ok(0);
            }
            *last = now;
        }

        let dir = self.dir();
        let names = match self.env.get_children(&dir) {
            Ok(names) => names,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut deleted = 0;
        let mut sized = Vec::new();
        for name in names {
            let Some((number, FileType::Log)) = parse_file_name(&name, "LOG") else {
                continue;
            };
            let path = dir.join(&name);

            if self.ttl_seconds > 0 {
                match self.env.get_file_modification_time(&path) {
                    Ok(mtime) if now.saturating_sub(mtime) > self.ttl_seconds => {
                        if self.delete(&path) {
                            deleted += 1;
                        }
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("cannot get modification time of {}: {}", path.display(), e);
                        continue;
                    }
                }
            }
            if self.size_limit_mb > 0 {
                match self.env.get_file_size(&path) {
                    Ok(size) => sized.push((number, path, size)),
                    Err(e) => log::warn!("cannot get size of {}: {}", path.display(), e),
                }
            }
        }

        if self.size_limit_mb > 0 {
            let limit = self.size_limit_mb.saturating_mul(1024 * 1024);
            let mut total: u64 = sized.iter().map(|(_, _, size)| size).sum();
            sized.sort_by_key(|(number, _, _)| *number);
            for (_, path, size) in sized {
                if total <= limit {
                    break;
                }
                if self.delete(&path) {
                    deleted += 1;
                    total -= size;
                }
            }
        }
        Ok(deleted)
    }

    fn delete(&self, path: &Path) -> bool {
        match self.env.delete_file(path) {
            Ok(()) => {
                log::info!("deleted archived log {}", path.display());
                true
            }
            Err(e) => {
                log::warn!("cannot delete archived log {}: {}", path.display(), e);
                false
            }
        }
    }
}

impl std::fmt::Debug for WalArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalArchive")
            .field("wal_dir", &self.wal_dir)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("size_limit_mb", &self.size_limit_mb)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{PosixEnv, RandomAccessFile, WritableFile};
    use std::fs;
    use tempfile::TempDir;

    /// Posix environment whose clock runs ahead.
    struct FastForwardEnv {
        skew_micros: u64,
    }

    impl Env for FastForwardEnv {
        fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>> {
            PosixEnv.new_random_access_file(path)
        }
        fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
            PosixEnv.new_writable_file(path)
        }
        fn delete_file(&self, path: &Path) -> Result<()> {
            PosixEnv.delete_file(path)
        }
        fn file_exists(&self, path: &Path) -> bool {
            PosixEnv.file_exists(path)
        }
        fn get_children(&self, dir: &Path) -> Result<Vec<String>> {
            PosixEnv.get_children(dir)
        }
        fn get_file_size(&self, path: &Path) -> Result<u64> {
            PosixEnv.get_file_size(path)
        }
        fn get_file_modification_time(&self, path: &Path) -> Result<u64> {
            PosixEnv.get_file_modification_time(path)
        }
        fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
            PosixEnv.rename_file(from, to)
        }
        fn create_dir_if_missing(&self, dir: &Path) -> Result<()> {
            PosixEnv.create_dir_if_missing(dir)
        }
        fn now_micros(&self) -> u64 {
            PosixEnv.now_micros() + self.skew_micros
        }
    }

    fn write_log(dir: &Path, number: u64, size: usize) -> PathBuf {
        let path = crate::files::filename::log_file_name(dir, number);
        fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    #[test]
    fn test_archive_moves_file() {
        let dir = TempDir::new().unwrap();
        let archive = WalArchive::new(PosixEnv::shared(), dir.path(), 3600, 0);
        let log = write_log(dir.path(), 4, 10);

        archive.archive_wal_file(&log, 4).unwrap();
        assert!(!log.exists());
        assert!(archived_log_file_name(dir.path(), 4).exists());
    }

    #[test]
    fn test_purge_by_ttl() {
        let dir = TempDir::new().unwrap();
        let env = Arc::new(FastForwardEnv {
            skew_micros: 2 * 3600 * 1_000_000,
        });
        let archive = WalArchive::new(env, dir.path(), 3600, 0);
        for number in 1..=3 {
            let log = write_log(dir.path(), number, 10);
            archive.archive_wal_file(&log, number).unwrap();
        }
        fs::write(archive.dir().join("notes.txt"), b"keep").unwrap();

        assert_eq!(archive.purge_obsolete_wal_files().unwrap(), 3);
        assert_eq!(fs::read_dir(archive.dir()).unwrap().count(), 1);
        // Throttled until the interval passes.
        assert_eq!(archive.purge_obsolete_wal_files().unwrap(), 0);
    }

    #[test]
    fn test_purge_by_size_removes_oldest() {
        let dir = TempDir::new().unwrap();
        let archive = WalArchive::new(PosixEnv::shared(), dir.path(), 0, 1);
        for number in 1..=3 {
            let log = write_log(dir.path(), number, 600 * 1024);
            archive.archive_wal_file(&log, number).unwrap();
        }

        assert_eq!(archive.purge_obsolete_wal_files().unwrap(), 2);
        assert!(!archived_log_file_name(dir.path(), 1).exists());
        assert!(!archived_log_file_name(dir.path(), 2).exists());
        assert!(archived_log_file_name(dir.path(), 3).exists());
    }

    #[test]
    fn test_disabled_archive_is_noop() {
        let dir = TempDir::new().unwrap();
        let archive = WalArchive::new(PosixEnv::shared(), dir.path(), 0, 0);
        assert!(!archive.enabled());
        assert_eq!(archive.purge_obsolete_wal_files().unwrap(), 0);
    }
}
