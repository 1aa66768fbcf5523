//! Format command implementation.

use super::{read_superblocks, require_mirrors, CliResult, CLI_PARTITION};
use ltf_core::{JournalConfig, Partition};
use ltf_storage::{FileBackend, StorageBackend};
use std::path::PathBuf;
use tracing::info;

/// Runs the format command.
pub fn run(paths: &[PathBuf], segments: u32, segment_size: u32, force: bool) -> CliResult<()> {
    require_mirrors(paths)?;
    let config = JournalConfig::new()
        .segment_count(segments)
        .segment_size(segment_size);
    config.validate()?;

    if !force {
        let existing: Vec<PathBuf> = paths
            .iter()
            .filter(|p| p.exists())
            .cloned()
            .collect();
        let formatted = read_superblocks(&existing)
            .into_iter()
            .find(|m| m.superblock.is_some());
        if let Some(mirror) = formatted {
            return Err(format!(
                "{} already holds a journal (use --force to overwrite)",
                mirror.path
            )
            .into());
        }
    }

    let capacity = config.device_capacity();
    let mut backends: Vec<Box<dyn StorageBackend>> = Vec::with_capacity(paths.len());
    for path in paths {
        info!("Creating mirror {:?} ({} bytes)", path, capacity);
        backends.push(Box::new(FileBackend::create(path, capacity)?));
    }

    let partition = Partition::format(CLI_PARTITION, config, backends)?;
    println!(
        "Formatted {} mirror(s): {} segments of {} bytes, generation {}",
        paths.len(),
        segments,
        segment_size,
        partition.generation()
    );
    Ok(())
}
