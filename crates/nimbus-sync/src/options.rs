//! Per-run configuration
//!
//! A [`SyncOptions`] value is built once, validated at engine start, and
//! never mutated during the run.

use nimbus_types::{BufferSize, RetryPolicy, TimeoutPolicy, WorkerCount};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When destination-only objects are deleted during a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeleteMode {
    /// Never delete (forced for copy and move)
    Off,
    /// Delete destination-only objects serially before any transfer
    Before,
    /// Delete interleaved with transfers
    During,
    /// Delete only once all transfers have finished
    #[default]
    After,
}

/// Flags steering the transfer decision for an existing pair
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Never replace an existing destination object
    pub ignore_existing: bool,
    /// Always transfer, skipping all comparisons
    pub ignore_times: bool,
    /// Compare by size only
    pub size_only: bool,
    /// Compare by size and checksum instead of modification time
    pub checksum: bool,
    /// Skip objects whose destination copy is newer
    pub update: bool,
    /// Fail the run when an existing destination object would change
    pub immutable: bool,
    /// Ignore size differences when comparing and verifying
    pub ignore_size: bool,
    /// Skip post-transfer checksum verification
    pub ignore_checksum: bool,
    /// Never touch destination modification times
    pub no_update_modtime: bool,
    /// User-supplied floor for the modification time comparison window
    pub modify_window: Option<Duration>,
}

/// Immutable configuration of one engine run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Log actions without performing them
    pub dry_run: bool,
    /// Number of comparison workers
    pub checkers: WorkerCount,
    /// Number of transfer workers
    pub transfers: WorkerCount,
    /// Deletion phase for sync runs
    pub delete_mode: DeleteMode,
    /// Also delete destination objects the filter excludes
    pub delete_excluded: bool,
    /// Comparison flags
    pub compare: CompareOptions,
    /// Replace copy-and-delete with server-side moves for renamed content
    pub track_renames: bool,
    /// Move overwritten and deleted destination objects here instead of
    /// removing them
    pub backup_dir: Option<String>,
    /// Suffix appended to object names moved into the backup directory
    pub suffix: Option<String>,
    /// Probe destination objects one by one instead of listing
    pub no_traverse: bool,
    /// Use recursive listing when the store supports it
    pub fast_list: bool,
    /// Cap on listing depth
    pub max_depth: Option<usize>,
    /// Low-level and whole-run retry policy
    pub retry: RetryPolicy,
    /// Timeouts applied to backend operations
    pub timeouts: TimeoutPolicy,
    /// Buffer size for streamed transfers
    pub buffer_size: BufferSize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            checkers: WorkerCount::DEFAULT_CHECKERS,
            transfers: WorkerCount::DEFAULT_TRANSFERS,
            delete_mode: DeleteMode::default(),
            delete_excluded: false,
            compare: CompareOptions::default(),
            track_renames: false,
            backup_dir: None,
            suffix: None,
            no_traverse: false,
            fast_list: false,
            max_depth: None,
            retry: RetryPolicy::default(),
            timeouts: TimeoutPolicy::default(),
            buffer_size: BufferSize::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let opts = SyncOptions::default();
        assert_eq!(opts.checkers.get(), 8);
        assert_eq!(opts.transfers.get(), 4);
        assert_eq!(opts.delete_mode, DeleteMode::After);
        assert!(!opts.dry_run);
    }
}
