//! The Nimbus synchronization engine
//!
//! Given two object store handles and a per-run configuration, the engine
//! decides for every candidate pair whether to transfer, skip, delete,
//! rename or back up, then drives those actions concurrently:
//!
//! - **[`compare`]**: the transfer decision over size, hash, modification
//!   time and existence, with its many override flags
//! - **[`lister`]**: sorted listings via per-directory walk or recursive
//!   traversal
//! - **[`march`]**: lock-step merge of the two listings into aligned pairs
//! - **[`transfer`]**: the single-object transfer primitive with
//!   server-side fast path, throttled streaming, low-level retries and
//!   post-copy verification
//! - **[`engine`]**: worker pools, delete-mode sequencing, rename tracking,
//!   backup-dir, dry-run and whole-run retries
//!
//! # Examples
//!
//! ```rust
//! use nimbus_fs::MemoryStore;
//! use nimbus_sync::{SyncEngine, SyncOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> nimbus_types::Result<()> {
//! let src = Arc::new(MemoryStore::new("src"));
//! let dst = Arc::new(MemoryStore::new("dst"));
//! let engine = SyncEngine::new(src, dst, SyncOptions::default());
//! let summary = engine.sync().await?;
//! println!("{} transfers, {} bytes", summary.transfers, summary.bytes);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod compare;
pub mod engine;
pub mod lister;
pub mod march;
pub mod options;
pub mod transfer;

pub use compare::{modify_window, needs_transfer, times_equal, CompareResult};
pub use engine::{SyncEngine, SyncSummary};
pub use lister::{list_store, Listing};
pub use march::{march, Pair, PairKind};
pub use options::{CompareOptions, DeleteMode, SyncOptions};
pub use transfer::{transfer_object, update_mod_time, TransferContext};
