//! In-memory backend
//!
//! A full-featured store kept entirely in process memory. It advertises
//! every optional capability, which makes it the reference backend for the
//! engine's server-side fast paths and for tests.

use crate::{path as opath, DirInfo, Entry, Features, ObjectInfo, ObjectReader, ObjectStore, PutMeta};
use async_trait::async_trait;
use bytes::Bytes;
use nimbus_types::{Error, HashKind, Result};
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Cursor;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

#[derive(Debug, Clone)]
struct MemObject {
    data: Bytes,
    mod_time: SystemTime,
    hashes: HashMap<HashKind, String>,
}

impl MemObject {
    fn info(&self, path: &str) -> ObjectInfo {
        ObjectInfo {
            path: path.to_string(),
            size: Some(self.data.len() as u64),
            mod_time: Some(self.mod_time),
            hashes: self.hashes.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct MemInner {
    objects: BTreeMap<String, MemObject>,
    dirs: BTreeSet<String>,
}

impl MemInner {
    fn dir_exists(&self, dir: &str) -> bool {
        dir.is_empty()
            || self.dirs.contains(dir)
            || self
                .objects
                .range(format!("{}/", dir)..)
                .next()
                .map_or(false, |(path, _)| opath::is_within(dir, path))
    }

    fn has_children(&self, dir: &str) -> bool {
        let prefix = format!("{}/", dir);
        self.objects.range(prefix.clone()..).next().map_or(false, |(p, _)| p.starts_with(&prefix))
            || self.dirs.range(prefix.clone()..).next().map_or(false, |d| d.starts_with(&prefix))
    }
}

/// Store backed by a sorted in-memory map
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    inner: Arc<RwLock<MemInner>>,
}

impl MemoryStore {
    /// Create an empty store with the given namespace name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(RwLock::new(MemInner::default())),
        }
    }

    fn compute_hashes(data: &[u8]) -> HashMap<HashKind, String> {
        let mut hashes = HashMap::new();
        hashes.insert(HashKind::Blake3, blake3::hash(data).to_hex().to_string());
        let mut sha = Sha256::new();
        sha.update(data);
        hashes.insert(HashKind::Sha256, format!("{:x}", sha.finalize()));
        hashes
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> String {
        format!("mem:{}", self.name)
    }

    fn provider(&self) -> &'static str {
        "memory"
    }

    fn root(&self) -> &str {
        &self.name
    }

    fn precision(&self) -> Option<Duration> {
        Some(Duration::from_nanos(1))
    }

    fn hash_kinds(&self) -> &[HashKind] {
        HashKind::ALL
    }

    fn features(&self) -> Features {
        Features {
            server_side_copy: true,
            server_side_move: true,
            dir_move: true,
            recursive_list: true,
            set_mod_time: true,
            purge: true,
            empty_dirs: true,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn list(&self, dir: &str) -> Result<Vec<Entry>> {
        let inner = self.inner.read().unwrap();
        if !inner.dir_exists(dir) {
            return Err(Error::DirNotFound { path: dir.into() });
        }

        let want_depth = opath::depth(dir) + 1;
        let mut by_path: BTreeMap<String, Entry> = BTreeMap::new();

        for (path, obj) in &inner.objects {
            if !opath::is_within(dir, path) || path == dir {
                continue;
            }
            if opath::depth(path) == want_depth {
                by_path.insert(path.clone(), Entry::Object(obj.info(path)));
            } else {
                // Deeper object implies a child directory at this level.
                let child: String = path.split('/').take(want_depth).collect::<Vec<_>>().join("/");
                by_path
                    .entry(child.clone())
                    .or_insert(Entry::Dir(DirInfo { path: child }));
            }
        }
        for d in &inner.dirs {
            if opath::is_within(dir, d) && d != dir && opath::depth(d) == want_depth {
                by_path
                    .entry(d.clone())
                    .or_insert(Entry::Dir(DirInfo { path: d.clone() }));
            }
        }

        Ok(by_path.into_values().collect())
    }

    async fn list_recursive(&self, dir: &str) -> Result<Vec<Entry>> {
        let inner = self.inner.read().unwrap();
        if !inner.dir_exists(dir) {
            return Err(Error::DirNotFound { path: dir.into() });
        }

        let mut by_path: BTreeMap<String, Entry> = BTreeMap::new();
        for (path, obj) in &inner.objects {
            if !opath::is_within(dir, path) || path == dir {
                continue;
            }
            by_path.insert(path.clone(), Entry::Object(obj.info(path)));
            for ancestor in opath::ancestors(path) {
                if opath::is_within(dir, &ancestor) && ancestor != dir {
                    by_path
                        .entry(ancestor.clone())
                        .or_insert(Entry::Dir(DirInfo { path: ancestor }));
                }
            }
        }
        for d in &inner.dirs {
            if opath::is_within(dir, d) && d != dir {
                by_path
                    .entry(d.clone())
                    .or_insert(Entry::Dir(DirInfo { path: d.clone() }));
            }
        }

        Ok(by_path.into_values().collect())
    }

    async fn stat(&self, path: &str) -> Result<ObjectInfo> {
        let inner = self.inner.read().unwrap();
        inner
            .objects
            .get(path)
            .map(|obj| obj.info(path))
            .ok_or_else(|| Error::not_found(path))
    }

    async fn open(&self, path: &str) -> Result<ObjectReader> {
        let inner = self.inner.read().unwrap();
        let obj = inner.objects.get(path).ok_or_else(|| Error::not_found(path))?;
        Ok(Box::new(Cursor::new(obj.data.to_vec())))
    }

    async fn put(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        meta: PutMeta,
    ) -> Result<ObjectInfo> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;

        if let Some(expected) = meta.size {
            if data.len() as u64 != expected {
                return Err(Error::SizeMismatch {
                    path: path.to_string(),
                    expected,
                    actual: data.len() as u64,
                });
            }
        }

        let obj = MemObject {
            hashes: Self::compute_hashes(&data),
            data: Bytes::from(data),
            mod_time: meta.mod_time.unwrap_or_else(SystemTime::now),
        };
        let info = obj.info(path);

        let mut inner = self.inner.write().unwrap();
        for ancestor in opath::ancestors(path) {
            inner.dirs.insert(ancestor);
        }
        inner.objects.insert(path.to_string(), obj);
        Ok(info)
    }

    async fn hash(&self, path: &str, kind: HashKind) -> Result<Option<String>> {
        let inner = self.inner.read().unwrap();
        let obj = inner.objects.get(path).ok_or_else(|| Error::not_found(path))?;
        Ok(obj.hashes.get(&kind).cloned())
    }

    async fn set_mod_time(&self, path: &str, mod_time: SystemTime) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let obj = inner
            .objects
            .get_mut(path)
            .ok_or_else(|| Error::not_found(path))?;
        obj.mod_time = mod_time;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .objects
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(path))
    }

    async fn mkdir(&self, dir: &str) -> Result<()> {
        if dir.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.write().unwrap();
        for ancestor in opath::ancestors(dir) {
            inner.dirs.insert(ancestor);
        }
        inner.dirs.insert(dir.to_string());
        Ok(())
    }

    async fn rmdir(&self, dir: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.has_children(dir) {
            return Err(Error::io(format!("directory not empty: {}", dir)));
        }
        inner.dirs.remove(dir);
        Ok(())
    }

    async fn purge(&self, dir: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner.objects.retain(|path, _| !opath::is_within(dir, path));
        inner.dirs.retain(|d| !opath::is_within(dir, d));
        Ok(())
    }

    async fn copy_from(
        &self,
        src_store: &dyn ObjectStore,
        src: &ObjectInfo,
        dst_path: &str,
    ) -> Result<Option<ObjectInfo>> {
        let Some(mem) = src_store.as_any().downcast_ref::<MemoryStore>() else {
            return Ok(None);
        };
        let obj = {
            let inner = mem.inner.read().unwrap();
            inner
                .objects
                .get(&src.path)
                .cloned()
                .ok_or_else(|| Error::not_found(&src.path))?
        };
        let info = obj.info(dst_path);

        let mut inner = self.inner.write().unwrap();
        for ancestor in opath::ancestors(dst_path) {
            inner.dirs.insert(ancestor);
        }
        inner.objects.insert(dst_path.to_string(), obj);
        debug!(src = %src.path, dst = %dst_path, "server-side copy");
        Ok(Some(info))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<ObjectInfo> {
        let mut inner = self.inner.write().unwrap();
        let obj = inner
            .objects
            .remove(from)
            .ok_or_else(|| Error::not_found(from))?;
        let info = obj.info(to);
        for ancestor in opath::ancestors(to) {
            inner.dirs.insert(ancestor);
        }
        inner.objects.insert(to.to_string(), obj);
        Ok(info)
    }

    async fn dir_move(
        &self,
        src_store: &dyn ObjectStore,
        src_dir: &str,
        dst_dir: &str,
    ) -> Result<()> {
        let Some(mem) = src_store.as_any().downcast_ref::<MemoryStore>() else {
            return Err(Error::unsupported("directory move across providers"));
        };

        let rebase = |path: &str| -> String {
            let tail = if src_dir.is_empty() {
                path
            } else {
                path.strip_prefix(&format!("{}/", src_dir)).unwrap_or(path)
            };
            opath::join(dst_dir, tail)
        };

        let (objects, dirs) = {
            let mut src_inner = mem.inner.write().unwrap();
            let objects: Vec<(String, MemObject)> = src_inner
                .objects
                .iter()
                .filter(|(p, _)| opath::is_within(src_dir, p))
                .map(|(p, o)| (p.clone(), o.clone()))
                .collect();
            let dirs: Vec<String> = src_inner
                .dirs
                .iter()
                .filter(|d| opath::is_within(src_dir, d))
                .cloned()
                .collect();
            src_inner.objects.retain(|p, _| !opath::is_within(src_dir, p));
            src_inner.dirs.retain(|d| !opath::is_within(src_dir, d));
            (objects, dirs)
        };

        let mut inner = self.inner.write().unwrap();
        for (path, obj) in objects {
            inner.objects.insert(rebase(&path), obj);
        }
        for dir in dirs {
            if dir != src_dir {
                inner.dirs.insert(rebase(&dir));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch_plus(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    async fn put_str(store: &MemoryStore, path: &str, content: &str, secs: u64) -> ObjectInfo {
        let mut reader = content.as_bytes();
        store
            .put(
                path,
                &mut reader,
                PutMeta {
                    size: Some(content.len() as u64),
                    mod_time: Some(epoch_plus(secs)),
                    hashes: HashMap::new(),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_listing_is_sorted_and_unique() {
        let store = MemoryStore::new("t");
        put_str(&store, "b", "1", 1).await;
        put_str(&store, "a/deep/x", "2", 1).await;
        put_str(&store, "a/y", "3", 1).await;

        let entries = store.list("").await.unwrap();
        let paths: Vec<&str> = entries.iter().map(Entry::path).collect();
        assert_eq!(paths, vec!["a", "b"]);

        let all = store.list_recursive("").await.unwrap();
        let paths: Vec<&str> = all.iter().map(Entry::path).collect();
        assert_eq!(paths, vec!["a", "a/deep", "a/deep/x", "a/y", "b"]);
    }

    #[tokio::test]
    async fn test_put_records_hashes_eagerly() {
        let store = MemoryStore::new("t");
        let info = put_str(&store, "k", "potato", 1).await;

        assert_eq!(
            info.hash(HashKind::Blake3).unwrap(),
            blake3::hash(b"potato").to_hex().to_string()
        );
        assert!(info.hash(HashKind::Sha256).is_some());
    }

    #[tokio::test]
    async fn test_put_size_mismatch_rejected() {
        let store = MemoryStore::new("t");
        let mut reader: &[u8] = b"four";
        let meta = PutMeta {
            size: Some(99),
            mod_time: None,
            hashes: HashMap::new(),
        };
        assert!(matches!(
            store.put("k", &mut reader, meta).await,
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_rename_preserves_content_and_time() {
        let store = MemoryStore::new("t");
        let before = put_str(&store, "yam", "c2", 2).await;

        let after = store.rename("yam", "yaml").await.unwrap();
        assert_eq!(after.mod_time, before.mod_time);
        assert_eq!(after.hashes, before.hashes);
        assert!(store.stat("yam").await.is_err());
        assert!(store.stat("yaml").await.is_ok());
    }

    #[tokio::test]
    async fn test_copy_from_other_memory_store() {
        let a = MemoryStore::new("a");
        let b = MemoryStore::new("b");
        let obj = put_str(&a, "x", "hello", 5).await;

        let copied = b.copy_from(&a, &obj, "x").await.unwrap().unwrap();
        assert_eq!(copied.size, Some(5));
        assert_eq!(copied.mod_time, Some(epoch_plus(5)));
    }

    #[tokio::test]
    async fn test_rmdir_only_when_empty() {
        let store = MemoryStore::new("t");
        store.mkdir("d/e").await.unwrap();
        put_str(&store, "d/f", "x", 1).await;

        assert!(store.rmdir("d").await.is_err());
        store.rmdir("d/e").await.unwrap();
        store.remove("d/f").await.unwrap();
        store.rmdir("d").await.unwrap();

        let entries = store.list("").await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_dir_move_rebases_subtree() {
        let a = MemoryStore::new("a");
        let b = MemoryStore::new("b");
        put_str(&a, "sub/one", "1", 1).await;
        put_str(&a, "sub/two", "2", 2).await;

        b.dir_move(&a, "", "").await.unwrap();
        assert!(a.list("").await.unwrap().is_empty());
        let all = b.list_recursive("").await.unwrap();
        let paths: Vec<&str> = all.iter().map(Entry::path).collect();
        assert_eq!(paths, vec!["sub", "sub/one", "sub/two"]);
    }
}
