//! Local disk backend

use crate::{path as opath, Entry, Features, ObjectInfo, ObjectReader, ObjectStore, PutMeta};
use async_trait::async_trait;
use nimbus_types::{Error, HashKind, Result};
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

const READ_CHUNK: usize = 64 * 1024;

/// Store rooted at a directory on the local filesystem
#[derive(Debug)]
pub struct LocalStore {
    root: PathBuf,
    root_display: String,
    one_file_system: bool,
}

impl LocalStore {
    /// Create a store rooted at `root`; the directory need not exist yet
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root_display = root.to_string_lossy().into_owned();
        Self {
            root,
            root_display,
            one_file_system: false,
        }
    }

    /// Refuse to cross device boundaries while listing (Unix only)
    pub fn with_one_file_system(mut self, enabled: bool) -> Self {
        self.one_file_system = enabled;
        self
    }

    #[cfg(unix)]
    fn device_of(meta: &std::fs::Metadata) -> u64 {
        use std::os::unix::fs::MetadataExt;
        meta.dev()
    }

    fn abs(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    fn not_found(path: &str, err: std::io::Error) -> Error {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::not_found(path)
        } else {
            err.into()
        }
    }

    async fn object_info(&self, path: &str, meta: &std::fs::Metadata) -> ObjectInfo {
        ObjectInfo {
            path: path.to_string(),
            size: Some(meta.len()),
            mod_time: meta.modified().ok(),
            hashes: HashMap::new(),
        }
    }

    async fn hash_file(&self, abs: &Path, kind: HashKind) -> Result<String> {
        let mut file = fs::File::open(abs).await?;
        let mut buf = vec![0u8; READ_CHUNK];
        match kind {
            HashKind::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                loop {
                    let n = file.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                Ok(hasher.finalize().to_hex().to_string())
            }
            HashKind::Sha256 => {
                let mut hasher = Sha256::new();
                loop {
                    let n = file.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                Ok(format!("{:x}", hasher.finalize()))
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> String {
        format!("local:{}", self.root_display)
    }

    fn provider(&self) -> &'static str {
        "local"
    }

    fn root(&self) -> &str {
        &self.root_display
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
            recursive_list: false,
            set_mod_time: true,
            purge: true,
            empty_dirs: true,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn list(&self, dir: &str) -> Result<Vec<Entry>> {
        let abs = self.abs(dir);
        let mut reader = fs::read_dir(&abs).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::DirNotFound { path: dir.into() }
            } else {
                e.into()
            }
        })?;

        #[cfg(unix)]
        let parent_device = if self.one_file_system {
            Some(Self::device_of(&fs::metadata(&abs).await?))
        } else {
            None
        };

        let mut entries = Vec::new();
        while let Some(item) = reader.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            let entry_path = opath::join(dir, &name);
            let file_type = item.file_type().await?;

            if file_type.is_symlink() {
                debug!(path = %entry_path, "skipping symlink");
                continue;
            }
            if file_type.is_dir() {
                #[cfg(unix)]
                if let Some(device) = parent_device {
                    let meta = item.metadata().await?;
                    if Self::device_of(&meta) != device {
                        debug!(path = %entry_path, "not crossing filesystem boundary");
                        continue;
                    }
                }
                entries.push(Entry::Dir(crate::DirInfo { path: entry_path }));
            } else {
                let meta = item.metadata().await?;
                entries.push(Entry::Object(self.object_info(&entry_path, &meta).await));
            }
        }
        entries.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<ObjectInfo> {
        let abs = self.abs(path);
        let meta = fs::metadata(&abs)
            .await
            .map_err(|e| Self::not_found(path, e))?;
        if meta.is_dir() {
            return Err(Error::not_found(path));
        }
        Ok(self.object_info(path, &meta).await)
    }

    async fn open(&self, path: &str) -> Result<ObjectReader> {
        let file = fs::File::open(self.abs(path))
            .await
            .map_err(|e| Self::not_found(path, e))?;
        Ok(Box::new(file))
    }

    async fn put(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        meta: PutMeta,
    ) -> Result<ObjectInfo> {
        let abs = self.abs(path);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Upload into a uniquely named partial file, rename into place once
        // the stream completed.
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let partial = abs.with_file_name(format!(
            "{}.partial-{}",
            opath::base_name(path),
            &suffix[..8]
        ));

        let mut written: u64 = 0;
        let mut blake = blake3::Hasher::new();
        let mut sha = Sha256::new();
        let result = async {
            let mut file = fs::File::create(&partial).await?;
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                blake.update(&buf[..n]);
                sha.update(&buf[..n]);
                file.write_all(&buf[..n]).await?;
                written += n as u64;
            }
            file.flush().await?;
            Ok::<(), Error>(())
        }
        .await;

        if let Err(err) = result {
            if let Err(cleanup) = fs::remove_file(&partial).await {
                warn!(partial = %partial.display(), error = %cleanup, "failed to remove partial file");
            }
            return Err(err);
        }

        fs::rename(&partial, &abs).await?;

        if let Some(mod_time) = meta.mod_time {
            filetime::set_file_mtime(&abs, filetime::FileTime::from_system_time(mod_time))?;
        }

        let mut hashes = HashMap::new();
        hashes.insert(HashKind::Blake3, blake.finalize().to_hex().to_string());
        hashes.insert(HashKind::Sha256, format!("{:x}", sha.finalize()));

        Ok(ObjectInfo {
            path: path.to_string(),
            size: Some(written),
            mod_time: meta.mod_time.or_else(|| Some(SystemTime::now())),
            hashes,
        })
    }

    async fn hash(&self, path: &str, kind: HashKind) -> Result<Option<String>> {
        self.hash_file(&self.abs(path), kind).await.map(Some)
    }

    async fn set_mod_time(&self, path: &str, mod_time: SystemTime) -> Result<()> {
        filetime::set_file_mtime(
            self.abs(path),
            filetime::FileTime::from_system_time(mod_time),
        )?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        fs::remove_file(self.abs(path))
            .await
            .map_err(|e| Self::not_found(path, e))
    }

    async fn mkdir(&self, dir: &str) -> Result<()> {
        fs::create_dir_all(self.abs(dir)).await?;
        Ok(())
    }

    async fn rmdir(&self, dir: &str) -> Result<()> {
        fs::remove_dir(self.abs(dir)).await?;
        Ok(())
    }

    async fn purge(&self, dir: &str) -> Result<()> {
        fs::remove_dir_all(self.abs(dir)).await?;
        Ok(())
    }

    async fn copy_from(
        &self,
        src_store: &dyn ObjectStore,
        src: &ObjectInfo,
        dst_path: &str,
    ) -> Result<Option<ObjectInfo>> {
        if src_store.provider() != self.provider() {
            return Ok(None);
        }
        let src_abs = Path::new(src_store.root()).join(&src.path);
        let dst_abs = self.abs(dst_path);
        if let Some(parent) = dst_abs.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src_abs, &dst_abs).await?;

        let mod_time = match src.mod_time {
            Some(t) => Some(t),
            None => fs::metadata(&src_abs).await?.modified().ok(),
        };
        if let Some(t) = mod_time {
            filetime::set_file_mtime(&dst_abs, filetime::FileTime::from_system_time(t))?;
        }
        debug!(src = %src_abs.display(), dst = %dst_abs.display(), "server-side copy");
        self.stat(dst_path).await.map(Some)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<ObjectInfo> {
        let to_abs = self.abs(to);
        if let Some(parent) = to_abs.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(self.abs(from), &to_abs)
            .await
            .map_err(|e| Self::not_found(from, e))?;
        self.stat(to).await
    }

    async fn dir_move(
        &self,
        src_store: &dyn ObjectStore,
        src_dir: &str,
        dst_dir: &str,
    ) -> Result<()> {
        if src_store.provider() != self.provider() {
            return Err(Error::unsupported("directory move across providers"));
        }
        let src_abs = if src_dir.is_empty() {
            PathBuf::from(src_store.root())
        } else {
            Path::new(src_store.root()).join(src_dir)
        };
        let dst_abs = self.abs(dst_dir);
        if let Some(parent) = dst_abs.parent() {
            fs::create_dir_all(parent).await?;
        }
        // rename(2) refuses to replace a non-empty directory
        let _ = fs::remove_dir(&dst_abs).await;
        fs::rename(&src_abs, &dst_abs).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn epoch_plus(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_put_stat_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        let mut reader: &[u8] = b"hello world";
        let meta = PutMeta {
            size: Some(11),
            mod_time: Some(epoch_plus(1_000_000)),
            hashes: HashMap::new(),
        };
        let put = store.put("sub/hello", &mut reader, meta).await.unwrap();
        assert_eq!(put.size, Some(11));
        assert!(put.hash(HashKind::Blake3).is_some());

        let statted = store.stat("sub/hello").await.unwrap();
        assert_eq!(statted.size, Some(11));
        assert_eq!(statted.mod_time, Some(epoch_plus(1_000_000)));
    }

    #[tokio::test]
    async fn test_put_leaves_no_partial_files() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        let mut reader: &[u8] = b"data";
        store
            .put("file", &mut reader, PutMeta::default())
            .await
            .unwrap();

        let entries = store.list("").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path(), "file");
    }

    #[tokio::test]
    async fn test_list_sorted_with_dirs() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        for name in ["zebra", "apple"] {
            let mut reader: &[u8] = b"x";
            store.put(name, &mut reader, PutMeta::default()).await.unwrap();
        }
        store.mkdir("middle").await.unwrap();

        let entries = store.list("").await.unwrap();
        let paths: Vec<&str> = entries.iter().map(Entry::path).collect();
        assert_eq!(paths, vec!["apple", "middle", "zebra"]);
    }

    #[tokio::test]
    async fn test_stat_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        match store.stat("nope").await {
            Err(Error::NotFound { path }) => assert_eq!(path, "nope"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hash_on_demand() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        let mut reader: &[u8] = b"potato";
        let put = store.put("k", &mut reader, PutMeta::default()).await.unwrap();

        let computed = store.hash("k", HashKind::Blake3).await.unwrap();
        assert_eq!(computed.as_deref(), put.hash(HashKind::Blake3));
    }

    #[tokio::test]
    async fn test_server_side_copy_between_roots() {
        let tmp_a = TempDir::new().unwrap();
        let tmp_b = TempDir::new().unwrap();
        let a = LocalStore::new(tmp_a.path());
        let b = LocalStore::new(tmp_b.path());

        let mut reader: &[u8] = b"content";
        let meta = PutMeta {
            size: Some(7),
            mod_time: Some(epoch_plus(42)),
            hashes: HashMap::new(),
        };
        let obj = a.put("x", &mut reader, meta).await.unwrap();

        let copied = b.copy_from(&a, &obj, "x").await.unwrap().unwrap();
        assert_eq!(copied.size, Some(7));
        assert_eq!(copied.mod_time, Some(epoch_plus(42)));
    }

    #[tokio::test]
    async fn test_rmdir_refuses_non_empty() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        let mut reader: &[u8] = b"x";
        store
            .put("dir/file", &mut reader, PutMeta::default())
            .await
            .unwrap();
        assert!(store.rmdir("dir").await.is_err());
    }
}
