//! Verify command implementation.

use super::{journal_config, open_backends, open_partition, read_superblocks, require_mirrors, CliResult};
use ltf_core::{MirrorSet, SegmentId, SegmentStore};
use std::path::PathBuf;

/// Verification result for one mirror.
#[derive(Debug)]
pub struct VerifyResult {
    /// Number of live segments checked.
    pub segments_checked: usize,
    /// Number of segments whose checksums validate.
    pub valid_segments: usize,
    /// Number of corrupt or unreadable segments.
    pub corrupt_segments: usize,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn new() -> Self {
        Self {
            segments_checked: 0,
            valid_segments: 0,
            corrupt_segments: 0,
            errors: Vec::new(),
        }
    }

    fn is_ok(&self) -> bool {
        self.corrupt_segments == 0 && self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(paths: &[PathBuf], quiet: bool) -> CliResult<()> {
    require_mirrors(paths)?;
    let superblocks = read_superblocks(paths);
    let config = journal_config(&superblocks)?;
    let partition = open_partition(paths)?;
    let report = partition.recovery_report();

    let live: Vec<SegmentId> = partition
        .dump()
        .transactions
        .iter()
        .flat_map(|t| t.range.iter().collect::<Vec<_>>())
        .collect();

    let mut all_ok = true;
    for (index, (path, backend)) in paths.iter().zip(open_backends(paths)?).enumerate() {
        let mut result = VerifyResult::new();
        if let Some(error) = &superblocks[index].error {
            result.errors.push(format!("superblock: {error}"));
        }

        let store = SegmentStore::new(
            MirrorSet::new(vec![backend], false)?,
            config.segment_count,
            config.segment_size,
        )?;
        for &id in &live {
            result.segments_checked += 1;
            match store.read_segment(id) {
                Ok(_) => result.valid_segments += 1,
                Err(e) => {
                    result.corrupt_segments += 1;
                    result.errors.push(format!("segment {id}: {e}"));
                }
            }
        }

        all_ok &= result.is_ok();
        if !quiet {
            print_result(&path.display().to_string(), &result);
        }
    }

    if !quiet {
        println!(
            "Journal: {} transaction(s) recovered, {} dropped",
            report.transactions,
            report.dropped.len()
        );
        if let Some(at) = report.truncated_at {
            println!("Journal: history truncated at segment {at}");
        }
        println!();
    }

    if all_ok && report.dropped.is_empty() && report.truncated_at.is_none() {
        println!("✓ Journal verification passed");
        Ok(())
    } else {
        println!("✗ Journal verification failed");
        Err("Verification failed".into())
    }
}

fn print_result(name: &str, result: &VerifyResult) {
    println!("{name}:");
    println!("  Segments checked: {}", result.segments_checked);
    println!("  Valid segments:   {}", result.valid_segments);
    println!("  Corrupt segments: {}", result.corrupt_segments);

    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }
}
