//! Object store abstraction and backends for Nimbus
//!
//! This crate defines the contract every backend implements and the object
//! model the engine works with:
//!
//! - **[`ObjectStore`]**: listing, probing, streaming read/write, on-demand
//!   hashing, and the optional server-side operations (copy, move,
//!   directory move, purge)
//! - **[`Features`]**: capability flags the engine probes before relying on
//!   an optional operation
//! - **Backends**: [`LocalStore`] for the local disk and [`MemoryStore`],
//!   an in-memory store that supports every capability
//!
//! # Examples
//!
//! ```rust
//! use nimbus_fs::{MemoryStore, ObjectStore, PutMeta};
//!
//! # async fn example() -> nimbus_types::Result<()> {
//! let store = MemoryStore::new("scratch");
//! let mut content: &[u8] = b"hello";
//! store.put("greeting", &mut content, PutMeta::default()).await?;
//! assert_eq!(store.stat("greeting").await?.size, Some(5));
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod features;
pub mod local;
pub mod memory;
pub mod path;
pub mod resolver;
pub mod store;

pub use entry::{DirInfo, Entry, ObjectInfo};
pub use features::Features;
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use resolver::{resolve, resolve_with, ResolveOptions};
pub use store::{common_hash_kind, object_hash, ObjectReader, ObjectStore, PutMeta};
