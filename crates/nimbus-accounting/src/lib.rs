//! Run statistics, bandwidth shaping and progress reporting for Nimbus
//!
//! - **[`SyncStats`]**: atomic counters shared by every worker of a run,
//!   with point-in-time [`StatsSnapshot`]s and a human-readable summary
//! - **[`BandwidthLimiter`]** and **[`ThrottledReader`]**: a token-bucket
//!   limiter shared by all transfer workers, optionally driven by a
//!   wall-clock [`BwTimetable`]
//! - **[`TpsLimiter`]**: a separate bucket capping backend transactions
//!   per second
//! - **[`spawn_progress_logger`]**: periodic stats output at a chosen log
//!   level

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod limiter;
pub mod progress;
pub mod stats;

pub use limiter::{
    parse_rate, BandwidthLimiter, BwSlot, BwTimetable, ThrottledReader, TokenBucket, TpsLimiter,
};
pub use progress::spawn_progress_logger;
pub use stats::{
    format_duration, format_rate, format_size, FileProgress, SizeUnit, StatsSnapshot, SyncStats,
};
