//! Inspect command implementation.

use super::{open_partition, read_superblocks, require_mirrors, CliResult, MirrorSuperblock};
use ltf_core::{DroppedTransaction, SegmentState};
use serde::Serialize;
use std::path::PathBuf;

/// Journal inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Superblock of each mirror.
    pub mirrors: Vec<MirrorSuperblock>,
    /// Segments in the ring.
    pub segment_count: u32,
    /// Segment size in bytes.
    pub segment_size: u32,
    /// Current generation.
    pub generation: u64,
    /// Next segment to be written.
    pub head: u32,
    /// Oldest live segment.
    pub tail: u32,
    /// Segments between tail and head.
    pub segments_in_use: u32,
    /// Sequence number of the next commit.
    pub next_sequence: u64,
    /// Transactions replayed by recovery.
    pub transactions: usize,
    /// Live objects.
    pub object_count: usize,
    /// Transactions recovery skipped.
    pub dropped: Vec<DroppedTransaction>,
    /// Where recovery stopped early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_at: Option<u32>,
    /// Per-segment state (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentState>>,
}

/// Runs the inspect command.
pub fn run(paths: &[PathBuf], show_segments: bool, format: &str) -> CliResult<()> {
    require_mirrors(paths)?;
    let mirrors = read_superblocks(paths);
    let partition = open_partition(paths)?;
    let report = partition.recovery_report();
    let config = partition.config();

    let result = InspectResult {
        mirrors,
        segment_count: config.segment_count,
        segment_size: config.segment_size,
        generation: partition.generation().as_u64(),
        head: partition.head(),
        tail: partition.tail(),
        segments_in_use: partition.segments_in_use(),
        next_sequence: partition.next_sequence().as_u64(),
        transactions: report.transactions,
        object_count: partition.object_count(),
        dropped: report.dropped.clone(),
        truncated_at: report.truncated_at,
        segments: show_segments.then(|| {
            (0..config.segment_count)
                .filter_map(|id| partition.segment_state(id))
                .collect()
        }),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("LTF Journal Inspection");
    println!("======================");
    println!();
    println!("Mirrors:");
    for mirror in &result.mirrors {
        match (&mirror.superblock, &mirror.error) {
            (Some(sb), _) => println!(
                "  {}: generation {}, head {}",
                mirror.path, sb.generation, sb.real_head_segment_id
            ),
            (None, Some(error)) => println!("  {}: unreadable ({})", mirror.path, error),
            (None, None) => println!("  {}: unreadable", mirror.path),
        }
    }
    println!();
    println!("Geometry:");
    println!("  Segments:        {}", result.segment_count);
    println!("  Segment size:    {}", format_bytes(u64::from(result.segment_size)));
    println!();
    println!("Journal:");
    println!("  Generation:      {}", result.generation);
    println!("  Head:            {}", result.head);
    println!("  Tail:            {}", result.tail);
    println!("  In use:          {}/{}", result.segments_in_use, result.segment_count);
    println!("  Next sequence:   {}", result.next_sequence);
    println!("  Transactions:    {}", result.transactions);
    println!("  Live objects:    {}", result.object_count);
    if let Some(at) = result.truncated_at {
        println!("  Truncated at:    segment {at}");
    }
    for dropped in &result.dropped {
        println!(
            "  Dropped:         txn {} (seq {}): {}",
            dropped.txn_id, dropped.sequence, dropped.reason
        );
    }

    if let Some(segments) = &result.segments {
        println!();
        println!("Segments:");
        for (id, state) in segments.iter().enumerate() {
            println!("  {id:>5}  {state:?}");
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
