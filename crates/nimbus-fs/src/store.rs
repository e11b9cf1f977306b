//! The object store contract
//!
//! Every backend implements [`ObjectStore`]. The engine only ever talks to
//! this trait; capability differences are expressed through
//! [`Features`](crate::Features) and the optional methods' default
//! implementations, which fail with [`Error::Unsupported`].

use crate::{Entry, Features, ObjectInfo};
use async_trait::async_trait;
use nimbus_types::{Error, HashKind, Result};
use std::any::Any;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncRead;

/// Metadata supplied alongside the byte stream of a put
#[derive(Debug, Clone, Default)]
pub struct PutMeta {
    /// Expected size in bytes, `None` for streaming uploads of unknown length
    pub size: Option<u64>,
    /// Modification time to record on the new object
    pub mod_time: Option<SystemTime>,
    /// Digests already known for the content, lowercase hex
    pub hashes: HashMap<HashKind, String>,
}

/// A reader of object content
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// A live handle to a rooted subtree of some backend
///
/// Implementations must be safe for concurrent method calls; the engine
/// shares one handle across all of its workers. Listings must deliver each
/// path at most once, in lexicographic order.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Human-readable name of the store, e.g. `local:/srv/data`
    fn name(&self) -> String;

    /// Provider identifier; two stores can exchange server-side operations
    /// only when their providers match
    fn provider(&self) -> &'static str;

    /// Root of the store within its provider namespace
    fn root(&self) -> &str;

    /// Modification time granularity, `None` when mod times are unsupported
    fn precision(&self) -> Option<Duration>;

    /// Hash kinds this store can produce
    fn hash_kinds(&self) -> &[HashKind];

    /// Optional capabilities
    fn features(&self) -> Features;

    /// Escape hatch for same-provider fast paths
    fn as_any(&self) -> &dyn Any;

    /// List one directory level, sorted by path
    ///
    /// Fails with [`Error::DirNotFound`] when the directory does not exist.
    async fn list(&self, dir: &str) -> Result<Vec<Entry>>;

    /// List all descendants of a directory in one traversal, sorted by path
    async fn list_recursive(&self, dir: &str) -> Result<Vec<Entry>> {
        let _ = dir;
        Err(Error::unsupported("recursive listing"))
    }

    /// Look up a single object by path
    ///
    /// Fails with [`Error::NotFound`] when there is no object at the path.
    async fn stat(&self, path: &str) -> Result<ObjectInfo>;

    /// Open an object for reading
    async fn open(&self, path: &str) -> Result<ObjectReader>;

    /// Store an object from a byte stream
    ///
    /// Overwrites any existing object at the path. Implementations write to
    /// a temporary name and rename atomically where the backend allows it.
    async fn put(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        meta: PutMeta,
    ) -> Result<ObjectInfo>;

    /// Compute a digest of an object, `None` when the kind is unsupported
    async fn hash(&self, path: &str, kind: HashKind) -> Result<Option<String>>;

    /// Set the modification time of an existing object
    async fn set_mod_time(&self, path: &str, mod_time: SystemTime) -> Result<()>;

    /// Delete a single object
    async fn remove(&self, path: &str) -> Result<()>;

    /// Create a directory (and any missing parents)
    async fn mkdir(&self, dir: &str) -> Result<()>;

    /// Remove an empty directory; fails when it has children
    async fn rmdir(&self, dir: &str) -> Result<()>;

    /// Delete a whole subtree in one call
    async fn purge(&self, dir: &str) -> Result<()> {
        let _ = dir;
        Err(Error::unsupported("purge"))
    }

    /// Server-side copy from a same-provider store
    ///
    /// Returns `Ok(None)` when the pair of stores cannot do this, in which
    /// case the caller falls back to streaming.
    async fn copy_from(
        &self,
        src_store: &dyn ObjectStore,
        src: &ObjectInfo,
        dst_path: &str,
    ) -> Result<Option<ObjectInfo>> {
        let _ = (src_store, src, dst_path);
        Ok(None)
    }

    /// Server-side rename within this store
    async fn rename(&self, from: &str, to: &str) -> Result<ObjectInfo> {
        let _ = (from, to);
        Err(Error::unsupported("server-side move"))
    }

    /// Rename a whole subtree from a same-provider store into this one
    async fn dir_move(
        &self,
        src_store: &dyn ObjectStore,
        src_dir: &str,
        dst_dir: &str,
    ) -> Result<()> {
        let _ = (src_store, src_dir, dst_dir);
        Err(Error::unsupported("directory move"))
    }
}

/// Digest of an object, consulting the listing cache before the store
pub async fn object_hash(
    store: &dyn ObjectStore,
    obj: &ObjectInfo,
    kind: HashKind,
) -> Result<Option<String>> {
    if let Some(known) = obj.hash(kind) {
        return Ok(Some(known.to_string()));
    }
    store.hash(&obj.path, kind).await
}

/// First hash kind supported by both stores, if any
pub fn common_hash_kind(a: &dyn ObjectStore, b: &dyn ObjectStore) -> Option<HashKind> {
    a.hash_kinds()
        .iter()
        .copied()
        .find(|kind| b.hash_kinds().contains(kind))
}
