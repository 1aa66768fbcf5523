//! Dump journal command implementation.

use super::{open_partition, CliResult};
use ltf_core::admin::{AdminService, JournalDump};
use std::path::PathBuf;
use std::sync::Arc;

/// Runs the dump-journal command.
pub fn run(paths: &[PathBuf], limit: Option<usize>, format: &str) -> CliResult<()> {
    let partition = Arc::new(open_partition(paths)?);
    let id = partition.id();

    let service = AdminService::new();
    service.register(partition);
    let (status, dump) = service.dump_journal(id);
    let mut dump = dump.ok_or(status.text)?;
    if let Some(limit) = limit {
        dump.transactions.truncate(limit);
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
        _ => {
            print_text_output(&dump);
        }
    }

    Ok(())
}

fn print_text_output(dump: &JournalDump) {
    println!(
        "{} mode={:?} generation={} head={} tail={} next_seq={}",
        dump.partition, dump.mode, dump.generation, dump.head, dump.tail, dump.next_sequence
    );
    println!(
        "mirrors: {}/{} live, objects: {}",
        dump.mirrors.live.len(),
        dump.mirrors.total,
        dump.object_count
    );
    println!();
    println!(
        "{:>8}  {:>8}  {:>8}  {:>7}  {:>6}  {:<12}  OBJECTS",
        "TXN", "SEQ", "GEN", "START", "PARTS", "OWNER"
    );
    println!("{}", "-".repeat(72));

    for txn in &dump.transactions {
        println!(
            "{:>8}  {:>8}  {:>8}  {:>7}  {:>6}  {:<12}  {}",
            txn.txn_id.as_u64(),
            txn.sequence.as_u64(),
            txn.generation.as_u64(),
            txn.range.start,
            txn.range.count,
            txn.owner.to_string(),
            txn.added.len()
        );
    }

    println!();
    println!("Total: {} transaction(s)", dump.transactions.len());
}
