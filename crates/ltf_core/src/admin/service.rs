//! Partition registry and admin requests.

use super::{AdminStatus, FileTraceRecorder, JournalDump, TraceControl};
use crate::partition::{Partition, PartitionMode};
use crate::types::PartitionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default space a serialized journal dump may take (1 MiB).
pub const DEFAULT_DUMP_BUDGET: usize = 1024 * 1024;

/// Modules still permitted while a partition is service-only.
const SERVICE_MODULES: &[&str] = &["admin", "trace", "dump", "recovery"];

/// ENOSPC, reported when a dump does not fit its budget.
const NO_SPACE: i32 = 28;

/// Admin entry point over an explicit set of partitions.
pub struct AdminService {
    partitions: RwLock<HashMap<PartitionId, Arc<Partition>>>,
    next_id: AtomicU32,
    dump_budget: usize,
    tracer: Arc<dyn TraceControl>,
}

impl Default for AdminService {
    fn default() -> Self {
        Self::new()
    }
}

impl AdminService {
    /// Creates a service recording traces to files.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tracer(Arc::new(FileTraceRecorder::new()))
    }

    /// Creates a service using `tracer` for trace recording.
    #[must_use]
    pub fn with_tracer(tracer: Arc<dyn TraceControl>) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            dump_budget: DEFAULT_DUMP_BUDGET,
            tracer,
        }
    }

    /// Sets the largest serialized dump, in bytes.
    #[must_use]
    pub fn with_dump_budget(mut self, bytes: usize) -> Self {
        self.dump_budget = bytes;
        self
    }

    /// Returns an id not yet handed out by this service.
    pub fn new_partition_id(&self) -> PartitionId {
        PartitionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Registers `partition` and routes its events to the trace recorder.
    ///
    /// Returns the partition previously registered under the same id.
    pub fn register(&self, partition: Arc<Partition>) -> Option<Arc<Partition>> {
        let id = partition.id();
        self.next_id.fetch_max(id.as_u32().saturating_add(1), Ordering::SeqCst);
        partition.attach_trace(Arc::clone(&self.tracer));
        debug!(partition = %id, "partition registered");
        self.partitions.write().insert(id, partition)
    }

    /// Removes a partition from the registry.
    pub fn deregister(&self, id: PartitionId) -> Option<Arc<Partition>> {
        self.partitions.write().remove(&id)
    }

    /// Returns a registered partition.
    #[must_use]
    pub fn partition(&self, id: PartitionId) -> Option<Arc<Partition>> {
        self.partitions.read().get(&id).cloned()
    }

    /// Registered partition ids, sorted.
    #[must_use]
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        let mut ids: Vec<PartitionId> = self.partitions.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Starts a trace recording session. See [`TraceControl`].
    pub fn enable_trace_recording(
        &self,
        path: &Path,
        sampling_rate: f64,
        duration: Duration,
    ) -> AdminStatus {
        self.tracer
            .enable_trace_recording(path, sampling_rate, duration)
    }

    /// Returns true while a session records to `path`.
    #[must_use]
    pub fn is_recording(&self, path: &Path) -> bool {
        self.tracer.is_recording(path)
    }

    /// Dumps a partition's journal, provided its JSON form fits the dump
    /// budget.
    pub fn dump_journal(&self, id: PartitionId) -> (AdminStatus, Option<JournalDump>) {
        let Some(partition) = self.partition(id) else {
            return (AdminStatus::failed("Unknown partition"), None);
        };

        let dump = partition.dump();
        let size = match serde_json::to_vec(&dump) {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                warn!(partition = %id, error = %e, "journal dump failed");
                return (AdminStatus::failed(format!("Error dumping journal: {e}")), None);
            }
        };
        if size > self.dump_budget {
            warn!(partition = %id, size, budget = self.dump_budget, "journal dump over budget");
            return (
                AdminStatus::failed(format!("Error dumping journal due to error {NO_SPACE}")),
                None,
            );
        }
        (AdminStatus::success("Journal dumped"), Some(dump))
    }

    /// Returns whether module `name` may run against a partition.
    ///
    /// Everything is permitted unless the partition is service-only, in
    /// which case only the admin modules are.
    #[must_use]
    pub fn is_module_permitted(&self, name: &str, id: PartitionId) -> bool {
        match self.submodule_mode(id) {
            Some(PartitionMode::ServiceOnly) => SERVICE_MODULES.contains(&name),
            _ => true,
        }
    }

    /// Operating mode of a partition, or `None` if it is not registered.
    #[must_use]
    pub fn submodule_mode(&self, id: PartitionId) -> Option<PartitionMode> {
        self.partition(id).map(|p| p.mode())
    }

    /// Puts a partition into or out of service-only mode.
    pub fn set_service_only(&self, id: PartitionId, enabled: bool) -> AdminStatus {
        match self.partition(id) {
            Some(partition) => {
                partition.set_service_only(enabled);
                AdminStatus::success("Mode changed")
            }
            None => AdminStatus::failed("Unknown partition"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::StatusCode;
    use crate::{JournalConfig, ObjectType, Owner};
    use ltf_storage::{InMemoryBackend, StorageBackend};

    fn partition(id: PartitionId) -> Arc<Partition> {
        let config = JournalConfig::new().segment_count(8).segment_size(1024);
        let mirrors: Vec<Box<dyn StorageBackend>> =
            vec![Box::new(InMemoryBackend::new(config.device_capacity()))];
        Arc::new(Partition::format(id, config, mirrors).unwrap())
    }

    #[test]
    fn unknown_partition() {
        let admin = AdminService::new();
        let (status, dump) = admin.dump_journal(PartitionId::new(9));
        assert_eq!(status.code, StatusCode::Failed);
        assert_eq!(status.text, "Unknown partition");
        assert!(dump.is_none());
        assert_eq!(admin.submodule_mode(PartitionId::new(9)), None);
    }

    #[test]
    fn dump_within_budget() {
        let admin = AdminService::new();
        let id = admin.new_partition_id();
        let p = partition(id);
        let mut txn = p.create_transaction(Owner::WriteBuffer);
        txn.add_object(ObjectType::new(1), b"x".to_vec()).unwrap();
        p.commit(&mut txn).unwrap();
        admin.register(p);

        let (status, dump) = admin.dump_journal(id);
        assert!(status.is_success());
        let dump = dump.unwrap();
        assert_eq!(dump.transactions.len(), 1);
        assert_eq!(dump.object_count, 1);
        assert_eq!(dump.head, 1);
    }

    #[test]
    fn dump_over_budget_reports_no_space() {
        let admin = AdminService::new().with_dump_budget(16);
        let id = admin.new_partition_id();
        admin.register(partition(id));

        let (status, dump) = admin.dump_journal(id);
        assert_eq!(status.code, StatusCode::Failed);
        assert_eq!(status.text, "Error dumping journal due to error 28");
        assert!(dump.is_none());
    }

    #[test]
    fn service_only_restricts_modules() {
        let admin = AdminService::new();
        let id = admin.new_partition_id();
        admin.register(partition(id));

        assert!(admin.is_module_permitted("write-buffer", id));
        assert_eq!(admin.submodule_mode(id), Some(PartitionMode::Normal));

        assert!(admin.set_service_only(id, true).is_success());
        assert_eq!(admin.submodule_mode(id), Some(PartitionMode::ServiceOnly));
        assert!(!admin.is_module_permitted("write-buffer", id));
        assert!(admin.is_module_permitted("admin", id));

        admin.set_service_only(id, false);
        assert!(admin.is_module_permitted("write-buffer", id));
    }

    #[test]
    fn registered_ids_are_not_reissued() {
        let admin = AdminService::new();
        admin.register(partition(PartitionId::new(5)));
        assert_eq!(admin.new_partition_id(), PartitionId::new(6));
        assert_eq!(admin.partition_ids(), vec![PartitionId::new(5)]);
        assert!(admin.deregister(PartitionId::new(5)).is_some());
        assert!(admin.partition_ids().is_empty());
    }
}
