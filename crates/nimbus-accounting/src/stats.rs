//! Run counters and progress snapshots
//!
//! One [`SyncStats`] instance is shared by every worker of a run. Counters
//! are atomic; reads are snapshot-consistent per field but not globally.

use nimbus_types::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Unit used when rendering byte quantities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SizeUnit {
    /// Render as bytes (KiB, MiB, ...)
    #[default]
    Bytes,
    /// Render as bits (kbit, Mbit, ...)
    Bits,
}

/// Progress of one in-flight transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProgress {
    /// Bytes moved so far
    pub bytes: u64,
    /// Total size when known
    pub total: Option<u64>,
}

/// Counters for one run, shared across all workers
#[derive(Debug)]
pub struct SyncStats {
    start: Instant,
    bytes: AtomicU64,
    transfers: AtomicU64,
    server_copies: AtomicU64,
    checks: AtomicU64,
    skips: AtomicU64,
    deletes: AtomicU64,
    deleted_dirs: AtomicU64,
    made_dirs: AtomicU64,
    renames: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    fatal: AtomicBool,
    last_error: Mutex<Option<Error>>,
    fatal_error: Mutex<Option<Error>>,
    in_flight: Mutex<BTreeMap<String, FileProgress>>,
}

impl Default for SyncStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStats {
    /// Create a zeroed stats instance starting its clock now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            bytes: AtomicU64::new(0),
            transfers: AtomicU64::new(0),
            server_copies: AtomicU64::new(0),
            checks: AtomicU64::new(0),
            skips: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            deleted_dirs: AtomicU64::new(0),
            made_dirs: AtomicU64::new(0),
            renames: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            fatal: AtomicBool::new(false),
            last_error: Mutex::new(None),
            fatal_error: Mutex::new(None),
            in_flight: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record bytes moved by a transfer
    pub fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Record one completed transfer
    pub fn inc_transfers(&self) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one server-side copy
    pub fn inc_server_copies(&self) {
        self.server_copies.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one comparison
    pub fn inc_checks(&self) {
        self.checks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one pair skipped as already equal
    pub fn inc_skips(&self) {
        self.skips.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one deleted object
    pub fn inc_deletes(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one pruned directory
    pub fn inc_deleted_dirs(&self) {
        self.deleted_dirs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one created directory
    pub fn inc_made_dirs(&self) {
        self.made_dirs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one tracked rename
    pub fn inc_renames(&self) {
        self.renames.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one low-level retry
    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an error, remembering it and whether it was fatal
    pub fn count_error(&self, err: &Error) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        if err.is_fatal() {
            self.fatal.store(true, Ordering::Relaxed);
            let mut fatal = self.fatal_error.lock().unwrap();
            if fatal.is_none() {
                *fatal = Some(err.clone());
            }
        }
        *self.last_error.lock().unwrap() = Some(err.clone());
    }

    /// The first fatal error counted, if any
    pub fn fatal_error(&self) -> Option<Error> {
        self.fatal_error.lock().unwrap().clone()
    }

    /// Number of counted errors so far
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Whether a fatal error was counted
    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Relaxed)
    }

    /// The most recently counted error
    pub fn last_error(&self) -> Option<Error> {
        self.last_error.lock().unwrap().clone()
    }

    /// Total bytes moved so far
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Completed transfers so far
    pub fn transfers(&self) -> u64 {
        self.transfers.load(Ordering::Relaxed)
    }

    /// Deleted objects so far
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Tracked renames so far
    pub fn renames(&self) -> u64 {
        self.renames.load(Ordering::Relaxed)
    }

    /// Clear the error state before a whole-run retry
    pub fn reset_errors(&self) {
        self.errors.store(0, Ordering::Relaxed);
        *self.last_error.lock().unwrap() = None;
    }

    /// Register an in-flight transfer
    pub fn start_transfer(&self, path: &str, total: Option<u64>) {
        self.in_flight
            .lock()
            .unwrap()
            .insert(path.to_string(), FileProgress { bytes: 0, total });
    }

    /// Update the progress of an in-flight transfer
    pub fn update_transfer(&self, path: &str, bytes: u64) {
        if let Some(progress) = self.in_flight.lock().unwrap().get_mut(path) {
            progress.bytes = bytes;
        }
    }

    /// Deregister an in-flight transfer
    pub fn end_transfer(&self, path: &str) {
        self.in_flight.lock().unwrap().remove(path);
    }

    /// Consistent-enough copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.start.elapsed();
        let bytes = self.bytes();
        StatsSnapshot {
            bytes,
            transfers: self.transfers(),
            server_copies: self.server_copies.load(Ordering::Relaxed),
            checks: self.checks.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            deletes: self.deletes(),
            deleted_dirs: self.deleted_dirs.load(Ordering::Relaxed),
            made_dirs: self.made_dirs.load(Ordering::Relaxed),
            renames: self.renames(),
            errors: self.errors(),
            retries: self.retries.load(Ordering::Relaxed),
            elapsed,
            rate: if elapsed.as_secs_f64() > 0.0 {
                bytes as f64 / elapsed.as_secs_f64()
            } else {
                0.0
            },
            in_flight: self.in_flight.lock().unwrap().clone(),
        }
    }

    /// Human-readable multi-line summary
    pub fn format_summary(&self, unit: SizeUnit) -> String {
        self.snapshot().format(unit)
    }
}

/// Point-in-time copy of the run counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Total bytes moved
    pub bytes: u64,
    /// Completed transfers
    pub transfers: u64,
    /// Server-side copies among the transfers
    pub server_copies: u64,
    /// Comparisons performed
    pub checks: u64,
    /// Pairs skipped as already equal
    pub skips: u64,
    /// Deleted objects
    pub deletes: u64,
    /// Pruned directories
    pub deleted_dirs: u64,
    /// Created directories
    pub made_dirs: u64,
    /// Tracked renames
    pub renames: u64,
    /// Counted errors
    pub errors: u64,
    /// Low-level retries
    pub retries: u64,
    /// Time since the run started
    pub elapsed: Duration,
    /// Overall transfer rate in bytes per second
    pub rate: f64,
    /// Transfers currently in flight
    pub in_flight: BTreeMap<String, FileProgress>,
}

impl StatsSnapshot {
    /// Render the snapshot the way the periodic stats logger prints it
    pub fn format(&self, unit: SizeUnit) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Transferred: {:>12} ({})\n",
            format_size(self.bytes, unit),
            format_rate(self.rate, unit)
        ));
        out.push_str(&format!("Transfers:   {:>12}\n", self.transfers));
        out.push_str(&format!("Checks:      {:>12}\n", self.checks));
        if self.deletes > 0 || self.deleted_dirs > 0 {
            out.push_str(&format!(
                "Deleted:     {:>12} files, {} dirs\n",
                self.deletes, self.deleted_dirs
            ));
        }
        if self.renames > 0 {
            out.push_str(&format!("Renamed:     {:>12}\n", self.renames));
        }
        out.push_str(&format!("Errors:      {:>12}\n", self.errors));
        out.push_str(&format!(
            "Elapsed:     {:>12}\n",
            format_duration(self.elapsed)
        ));
        for (path, progress) in &self.in_flight {
            match progress.total {
                Some(total) if total > 0 => {
                    let percent = (progress.bytes as f64 / total as f64 * 100.0) as u64;
                    out.push_str(&format!(
                        " * {}: {}% of {}\n",
                        path,
                        percent,
                        format_size(total, unit)
                    ));
                }
                _ => {
                    out.push_str(&format!(
                        " * {}: {} so far\n",
                        path,
                        format_size(progress.bytes, unit)
                    ));
                }
            }
        }
        out
    }
}

/// Format a byte count in the requested unit
pub fn format_size(bytes: u64, unit: SizeUnit) -> String {
    match unit {
        SizeUnit::Bytes => {
            const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
            scale(bytes as f64, 1024.0, UNITS)
        }
        SizeUnit::Bits => {
            const UNITS: &[&str] = &["bit", "kbit", "Mbit", "Gbit", "Tbit"];
            scale(bytes as f64 * 8.0, 1000.0, UNITS)
        }
    }
}

/// Format a transfer rate in the requested unit
pub fn format_rate(bytes_per_sec: f64, unit: SizeUnit) -> String {
    match unit {
        SizeUnit::Bytes => {
            const UNITS: &[&str] = &["B/s", "KiB/s", "MiB/s", "GiB/s", "TiB/s"];
            scale(bytes_per_sec, 1024.0, UNITS)
        }
        SizeUnit::Bits => {
            const UNITS: &[&str] = &["bit/s", "kbit/s", "Mbit/s", "Gbit/s", "Tbit/s"];
            scale(bytes_per_sec * 8.0, 1000.0, UNITS)
        }
    }
}

fn scale(mut value: f64, step: f64, units: &[&str]) -> String {
    let mut idx = 0;
    while value >= step && idx < units.len() - 1 {
        value /= step;
        idx += 1;
    }
    format!("{:.3} {}", value, units[idx])
}

/// Format a duration as `1h 2m 3s`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = SyncStats::new();
        stats.add_bytes(100);
        stats.add_bytes(23);
        stats.inc_transfers();
        stats.inc_checks();

        let snap = stats.snapshot();
        assert_eq!(snap.bytes, 123);
        assert_eq!(snap.transfers, 1);
        assert_eq!(snap.checks, 1);
        assert_eq!(snap.errors, 0);
    }

    #[test]
    fn test_fatal_error_latches() {
        let stats = SyncStats::new();
        stats.count_error(&Error::io("transient"));
        assert!(!stats.is_fatal());
        assert_eq!(stats.errors(), 1);

        stats.count_error(&Error::ImmutableModified { path: "e".into() });
        assert!(stats.is_fatal());

        stats.reset_errors();
        assert_eq!(stats.errors(), 0);
        // Fatality survives an error reset.
        assert!(stats.is_fatal());
    }

    #[test]
    fn test_in_flight_tracking() {
        let stats = SyncStats::new();
        stats.start_transfer("a/b", Some(100));
        stats.update_transfer("a/b", 50);

        let snap = stats.snapshot();
        assert_eq!(snap.in_flight["a/b"].bytes, 50);

        stats.end_transfer("a/b");
        assert!(stats.snapshot().in_flight.is_empty());
    }

    #[test]
    fn test_format_size_units() {
        assert_eq!(format_size(1024, SizeUnit::Bytes), "1.000 KiB");
        assert_eq!(format_size(1000, SizeUnit::Bits), "8.000 kbit");
        assert_eq!(format_size(0, SizeUnit::Bytes), "0.000 B");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3665)), "1h 1m 5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
    }
}
