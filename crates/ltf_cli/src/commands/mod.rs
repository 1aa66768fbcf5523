//! CLI command implementations.

pub mod dump_journal;
pub mod format;
pub mod inspect;
pub mod verify;

use ltf_core::{JournalConfig, Partition, PartitionId, Superblock};
use ltf_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Result type shared by the commands.
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Partition id used for journals opened by the CLI.
pub const CLI_PARTITION: PartitionId = PartitionId::new(1);

/// Superblock as read from one mirror file.
#[derive(Debug, Serialize)]
pub struct MirrorSuperblock {
    /// Mirror file.
    pub path: String,
    /// Decoded superblock, if valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superblock: Option<Superblock>,
    /// Why the superblock could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub(crate) fn require_mirrors(paths: &[PathBuf]) -> CliResult<()> {
    if paths.is_empty() {
        return Err("At least one --mirror is required".into());
    }
    Ok(())
}

/// Reads the superblock of every mirror file.
pub(crate) fn read_superblocks(paths: &[PathBuf]) -> Vec<MirrorSuperblock> {
    paths
        .iter()
        .map(|path| match read_superblock(path) {
            Ok(superblock) => MirrorSuperblock {
                path: path.display().to_string(),
                superblock: Some(superblock),
                error: None,
            },
            Err(e) => MirrorSuperblock {
                path: path.display().to_string(),
                superblock: None,
                error: Some(e.to_string()),
            },
        })
        .collect()
}

fn read_superblock(path: &Path) -> CliResult<Superblock> {
    let backend = FileBackend::open(path)?;
    let bytes = backend.read_at(0, Superblock::ENCODED_SIZE)?;
    Ok(Superblock::decode(&bytes)?)
}

/// Geometry of the newest valid superblock among the mirrors.
pub(crate) fn journal_config(superblocks: &[MirrorSuperblock]) -> CliResult<JournalConfig> {
    let newest = superblocks
        .iter()
        .filter_map(|m| m.superblock)
        .max_by_key(|s| s.generation)
        .ok_or("No mirror holds a valid superblock")?;
    Ok(JournalConfig::new()
        .segment_count(newest.segment_count)
        .segment_size(newest.segment_size))
}

pub(crate) fn open_backends(paths: &[PathBuf]) -> CliResult<Vec<Box<dyn StorageBackend>>> {
    paths
        .iter()
        .map(|path| {
            FileBackend::open(path)
                .map(|b| Box::new(b) as Box<dyn StorageBackend>)
                .map_err(|e| format!("Cannot open mirror {}: {e}", path.display()).into())
        })
        .collect()
}

/// Opens the journal on `paths`, running recovery.
pub(crate) fn open_partition(paths: &[PathBuf]) -> CliResult<Partition> {
    require_mirrors(paths)?;
    let config = journal_config(&read_superblocks(paths))?;
    Ok(Partition::open(CLI_PARTITION, config, open_backends(paths)?)?)
}
