//! File-system access used by tables and file reclamation.
//!
//! Everything goes through [`Env`] so callers can substitute their own
//! storage; [`PosixEnv`] is the `std::fs` implementation.

use crate::error::{Error, Result};
use crate::util::coding::put_varint64;
use bytes::Bytes;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A file read at arbitrary offsets, safe to share between threads.
pub trait RandomAccessFile: Send + Sync {
    /// Reads up to `n` bytes at `offset`. Returns fewer bytes only at end of
    /// file.
    fn read(&self, offset: u64, n: usize) -> Result<Bytes>;

    /// Current file size.
    fn size(&self) -> Result<u64>;

    /// Identifier stable for the lifetime of the file, if the platform has
    /// one. Used as a block cache key prefix.
    fn unique_id(&self) -> Option<Vec<u8>> {
        None
    }
}

/// An append-only file.
pub trait WritableFile: Send {
    /// Appends bytes.
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Pushes buffered bytes to the operating system.
    fn flush(&mut self) -> Result<()>;

    /// Makes appended bytes durable.
    fn sync(&mut self) -> Result<()>;

    /// Same identifier the file reports once reopened for reads.
    fn unique_id(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Environment abstraction over a file system.
pub trait Env: Send + Sync {
    /// Opens a file for positional reads.
    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>>;

    /// Creates (truncating) a file for appends.
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;

    /// Removes a file.
    fn delete_file(&self, path: &Path) -> Result<()>;

    /// Whether a file exists.
    fn file_exists(&self, path: &Path) -> bool;

    /// Names (not paths) of the entries in a directory.
    fn get_children(&self, dir: &Path) -> Result<Vec<String>>;

    /// File size in bytes.
    fn get_file_size(&self, path: &Path) -> Result<u64>;

    /// Modification time in seconds since the epoch.
    fn get_file_modification_time(&self, path: &Path) -> Result<u64>;

    /// Renames a file, replacing any existing target.
    fn rename_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Creates a directory and its parents.
    fn create_dir_if_missing(&self, dir: &Path) -> Result<()>;

    /// Wall clock in microseconds.
    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

/// `std::fs` backed environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixEnv;

impl PosixEnv {
    /// Shared default instance.
    pub fn shared() -> Arc<dyn Env> {
        Arc::new(PosixEnv)
    }
}

struct PosixRandomAccessFile {
    file: File,
    path: PathBuf,
}

impl RandomAccessFile for PosixRandomAccessFile {
    fn read(&self, offset: u64, n: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let read = read_at(&self.file, &mut buf[filled..], offset + filled as u64)?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn unique_id(&self) -> Option<Vec<u8>> {
        file_unique_id(&self.file)
    }
}

#[cfg(unix)]
fn file_unique_id(file: &File) -> Option<Vec<u8>> {
    use std::os::unix::fs::MetadataExt;
    let meta = file.metadata().ok()?;
    let mut id = Vec::with_capacity(20);
    put_varint64(&mut id, meta.dev());
    put_varint64(&mut id, meta.ino());
    Some(id)
}

#[cfg(not(unix))]
fn file_unique_id(_file: &File) -> Option<Vec<u8>> {
    None
}

impl std::fmt::Debug for PosixRandomAccessFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PosixRandomAccessFile")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

struct PosixWritableFile {
    writer: BufWriter<File>,
}

impl WritableFile for PosixWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn unique_id(&self) -> Option<Vec<u8>> {
        file_unique_id(self.writer.get_ref())
    }
}

impl Env for PosixEnv {
    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>> {
        let file = File::open(path)?;
        Ok(Arc::new(PosixRandomAccessFile {
            file,
            path: path.to_path_buf(),
        }))
    }

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(PosixWritableFile {
            writer: BufWriter::new(file),
        }))
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn get_children(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn get_file_size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn get_file_modification_time(&self, path: &Path) -> Result<u64> {
        let modified = fs::metadata(path)?.modified()?;
        let since = modified
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::invalid_state(format!("modification time before epoch: {}", e)))?;
        Ok(since.as_secs())
    }

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }

    fn create_dir_if_missing(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        Ok(())
    }
}
