//! Names of the files in a database directory.
//!
//! ```text
//! 000012.log           write-ahead log
//! 000013.sst           table
//! 000014.dbtmp         temp output
//! 000015.blob          blob file
//! MANIFEST-000005      descriptor
//! CHECKPOINT-000006    checkpoint
//! OPTIONS-000007       options (OPTIONS-000007.dbtmp while written)
//! METADB-000001        meta database
//! CURRENT  CURRENT_CHECKPOINT  LOCK  IDENTITY
//! LOG  LOG.old.<micros>  info logs
//! ```

use std::path::{Path, PathBuf};

/// Kinds of files found in a database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Write-ahead log.
    Log,
    /// Lock file.
    DbLock,
    /// Table file.
    Table,
    /// Manifest.
    Descriptor,
    /// Pointer to the current manifest.
    Current,
    /// Output being written.
    Temp,
    /// Current or old info log.
    InfoLog,
    /// Meta database.
    MetaDatabase,
    /// Database identity.
    Identity,
    /// Options file.
    Options,
    /// Blob file.
    Blob,
    /// Checkpoint.
    Checkpoint,
    /// Pointer to the current checkpoint.
    CurrentCheckpoint,
}

/// Name prefix of options files.
pub const OPTIONS_FILE_PREFIX: &str = "OPTIONS-";
/// Suffix of temp files.
pub const TEMP_FILE_SUFFIX: &str = "dbtmp";
/// Subdirectory of archived logs.
pub const ARCHIVAL_DIR: &str = "archive";

fn numbered(dir: &Path, number: u64, suffix: &str) -> PathBuf {
    dir.join(format!("{:06}.{}", number, suffix))
}

/// `dir/NNNNNN.log`
pub fn log_file_name(dir: &Path, number: u64) -> PathBuf {
    numbered(dir, number, "log")
}

/// `dir/NNNNNN.sst`
pub fn table_file_name(dir: &Path, number: u64) -> PathBuf {
    numbered(dir, number, "sst")
}

/// `dir/NNNNNN.dbtmp`
pub fn temp_file_name(dir: &Path, number: u64) -> PathBuf {
    numbered(dir, number, TEMP_FILE_SUFFIX)
}

/// `dir/NNNNNN.blob`
pub fn blob_file_name(dir: &Path, number: u64) -> PathBuf {
    numbered(dir, number, "blob")
}

/// `dir/MANIFEST-NNNNNN`
pub fn descriptor_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("MANIFEST-{:06}", number))
}

/// `dir/CHECKPOINT-NNNNNN`
pub fn checkpoint_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("CHECKPOINT-{:06}", number))
}

/// `dir/METADB-NNNNNN`
pub fn meta_database_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("METADB-{:06}", number))
}

/// `dir/OPTIONS-NNNNNN`
pub fn options_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{}{:06}", OPTIONS_FILE_PREFIX, number))
}

/// `dir/OPTIONS-NNNNNN.dbtmp`
pub fn temp_options_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{}{:06}.{}", OPTIONS_FILE_PREFIX, number, TEMP_FILE_SUFFIX))
}

/// `dir/CURRENT`
pub fn current_file_name(dir: &Path) -> PathBuf {
    dir.join("CURRENT")
}

/// `dir/CURRENT_CHECKPOINT`
pub fn current_checkpoint_name(dir: &Path) -> PathBuf {
    dir.join("CURRENT_CHECKPOINT")
}

/// `dir/LOCK`
pub fn lock_file_name(dir: &Path) -> PathBuf {
    dir.join("LOCK")
}

/// `dir/IDENTITY`
pub fn identity_file_name(dir: &Path) -> PathBuf {
    dir.join("IDENTITY")
}

/// `dir/archive`
pub fn archival_directory(dir: &Path) -> PathBuf {
    dir.join(ARCHIVAL_DIR)
}

/// `dir/archive/NNNNNN.log`
pub fn archived_log_file_name(dir: &Path, number: u64) -> PathBuf {
    log_file_name(&archival_directory(dir), number)
}

/// Prefix of info log names. Logs kept in a separate log directory carry
/// the flattened database path so several databases can share it.
pub fn info_log_prefix(has_log_dir: bool, db_path: &Path) -> String {
    if !has_log_dir {
        return "LOG".to_string();
    }
    let flattened: String = db_path
        .to_string_lossy()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' { c } else { '_' })
        .collect();
    format!("{}_LOG", flattened.trim_start_matches('_'))
}

/// `dir/<prefix>`
pub fn info_log_file_name(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(prefix)
}

/// `dir/<prefix>.old.<micros>`
pub fn old_info_log_file_name(dir: &Path, prefix: &str, micros: u64) -> PathBuf {
    dir.join(format!("{}.old.{}", prefix, micros))
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parses a file name (a leading `/` is ignored) into its number and type.
/// Returns `None` for names that are not database files.
pub fn parse_file_name(name: &str, info_log_prefix: &str) -> Option<(u64, FileType)> {
    let name = name.strip_prefix('/').unwrap_or(name);
    match name {
        "CURRENT" => return Some((0, FileType::Current)),
        "CURRENT_CHECKPOINT" => return Some((0, FileType::CurrentCheckpoint)),
        "LOCK" => return Some((0, FileType::DbLock)),
        "IDENTITY" => return Some((0, FileType::Identity)),
        _ => {}
    }

    if let Some(rest) = name.strip_prefix(info_log_prefix) {
        if rest.is_empty() {
            return Some((0, FileType::InfoLog));
        }
        if let Some(ts) = rest.strip_prefix(".old.") {
            return parse_number(ts).map(|n| (n, FileType::InfoLog));
        }
    }
    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return parse_number(rest).map(|n| (n, FileType::Descriptor));
    }
    if let Some(rest) = name.strip_prefix("CHECKPOINT-") {
        return parse_number(rest).map(|n| (n, FileType::Checkpoint));
    }
    if let Some(rest) = name.strip_prefix("METADB-") {
        return parse_number(rest).map(|n| (n, FileType::MetaDatabase));
    }
    if let Some(rest) = name.strip_prefix(OPTIONS_FILE_PREFIX) {
        return match rest.split_once('.') {
            None => parse_number(rest).map(|n| (n, FileType::Options)),
            Some((number, TEMP_FILE_SUFFIX)) => parse_number(number).map(|n| (n, FileType::Temp)),
            Some(_) => None,
        };
    }

    let (number, suffix) = name.split_once('.')?;
    let number = parse_number(number)?;
    let file_type = match suffix {
        "log" => FileType::Log,
        "sst" => FileType::Table,
        "blob" => FileType::Blob,
        TEMP_FILE_SUFFIX => FileType::Temp,
        _ => return None,
    };
    Some((number, file_type))
}
