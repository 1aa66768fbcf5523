//! Journal configuration.

use crate::error::{CoreError, CoreResult};
use crate::format::{MIN_SEGMENT_SIZE, SECTOR_SIZE, SUPERBLOCK_REGION_SIZE};
use serde::{Deserialize, Serialize};

/// Configuration for formatting or opening a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Number of segments in the journal ring.
    pub segment_count: u32,

    /// Size of one segment in bytes, trailer included.
    pub segment_size: u32,

    /// Whether every live mirror must acknowledge a segment write.
    ///
    /// When disabled a write acknowledged by at least one mirror commits
    /// with [`crate::CommitOutcome::Degraded`].
    pub require_full_replication: bool,

    /// Whether reads walk every mirror ordering before reporting corruption.
    pub try_all_mirror_permutations: bool,

    /// Whether opening a partition replays the journal.
    ///
    /// When disabled the partition starts empty at the recorded head.
    pub enable_recovery: bool,

    /// Whether a full journal triggers copy-forward before failing.
    pub copy_forward: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            segment_count: 64,
            segment_size: 512 * 1024, // 512 KiB
            require_full_replication: true,
            try_all_mirror_permutations: true,
            enable_recovery: true,
            copy_forward: true,
        }
    }
}

impl JournalConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of segments in the ring.
    #[must_use]
    pub const fn segment_count(mut self, count: u32) -> Self {
        self.segment_count = count;
        self
    }

    /// Sets the segment size in bytes.
    #[must_use]
    pub const fn segment_size(mut self, size: u32) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets whether all mirrors must acknowledge writes.
    #[must_use]
    pub const fn require_full_replication(mut self, value: bool) -> Self {
        self.require_full_replication = value;
        self
    }

    /// Sets whether reads try every mirror permutation.
    #[must_use]
    pub const fn try_all_mirror_permutations(mut self, value: bool) -> Self {
        self.try_all_mirror_permutations = value;
        self
    }

    /// Sets whether opening replays the journal.
    #[must_use]
    pub const fn enable_recovery(mut self, value: bool) -> Self {
        self.enable_recovery = value;
        self
    }

    /// Sets whether copy-forward runs on a full journal.
    #[must_use]
    pub const fn copy_forward(mut self, value: bool) -> Self {
        self.copy_forward = value;
        self
    }

    /// Bytes every mirror device must provide for this geometry.
    #[must_use]
    pub const fn device_capacity(&self) -> u64 {
        SUPERBLOCK_REGION_SIZE + self.segment_count as u64 * self.segment_size as u64
    }

    /// Checks that the geometry can hold a journal.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] describing the first violated rule.
    pub fn validate(&self) -> CoreResult<()> {
        if self.segment_count < 2 {
            return Err(CoreError::config(format!(
                "segment_count must be at least 2, got {}",
                self.segment_count
            )));
        }
        if self.segment_size < MIN_SEGMENT_SIZE {
            return Err(CoreError::config(format!(
                "segment_size must be at least {MIN_SEGMENT_SIZE}, got {}",
                self.segment_size
            )));
        }
        if self.segment_size % SECTOR_SIZE != 0 {
            return Err(CoreError::config(format!(
                "segment_size must be a multiple of {SECTOR_SIZE}, got {}",
                self.segment_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = JournalConfig::default();
        assert!(config.require_full_replication);
        assert!(config.try_all_mirror_permutations);
        assert!(config.enable_recovery);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = JournalConfig::new()
            .segment_count(10)
            .segment_size(4096)
            .copy_forward(false);

        assert_eq!(config.segment_count, 10);
        assert_eq!(config.segment_size, 4096);
        assert!(!config.copy_forward);
        assert_eq!(config.device_capacity(), SUPERBLOCK_REGION_SIZE + 10 * 4096);
    }

    #[test]
    fn rejects_tiny_ring() {
        let config = JournalConfig::new().segment_count(1);
        assert!(matches!(config.validate(), Err(CoreError::Config { .. })));
    }

    #[test]
    fn rejects_unaligned_segments() {
        let config = JournalConfig::new().segment_size(MIN_SEGMENT_SIZE + 1);
        assert!(config.validate().is_err());
    }
}
