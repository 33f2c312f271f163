//! Database files outside the table format: naming, and reclamation of
//! files no longer referenced.

pub mod delete_scheduler;
pub mod filename;
pub mod prep_tracker;
pub mod reclaim;
pub mod wal_archive;

pub use delete_scheduler::DeleteScheduler;
pub use filename::{parse_file_name, FileType};
pub use prep_tracker::PrepSectionTracker;
pub use reclaim::{CandidateFile, DbFileState, FileReclaimer, JobContext, LogFile, TableFile, VersionSource};
pub use wal_archive::WalArchive;
