//! Object model for store listings

use nimbus_types::HashKind;
use std::collections::HashMap;
use std::time::SystemTime;

/// One object at a known path in a store
///
/// Objects are ephemeral: they are produced by listings or probes and
/// discarded once the pair they belong to has been acted upon. The hash map
/// is a cache of digests already known for the object; backends that do not
/// track digests in listings leave it empty and compute on demand through
/// [`crate::ObjectStore::hash`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// `/`-delimited path relative to the store root
    pub path: String,
    /// Size in bytes, `None` when unknown (streaming sources)
    pub size: Option<u64>,
    /// Modification time, `None` when the backend does not track one
    pub mod_time: Option<SystemTime>,
    /// Known digests, lowercase hex, keyed by hash kind
    pub hashes: HashMap<HashKind, String>,
}

impl ObjectInfo {
    /// Create an object with no known metadata beyond its path
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: None,
            mod_time: None,
            hashes: HashMap::new(),
        }
    }

    /// Look up a cached digest
    pub fn hash(&self, kind: HashKind) -> Option<&str> {
        self.hashes.get(&kind).map(String::as_str)
    }
}

/// A directory seen in a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirInfo {
    /// `/`-delimited path relative to the store root
    pub path: String,
}

/// One listing entry, either an object or a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A file-like object
    Object(ObjectInfo),
    /// A directory
    Dir(DirInfo),
}

impl Entry {
    /// Path of the entry, whichever kind it is
    pub fn path(&self) -> &str {
        match self {
            Self::Object(obj) => &obj.path,
            Self::Dir(dir) => &dir.path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_hash_lookup() {
        let mut obj = ObjectInfo::new("a/b");
        obj.hashes.insert(HashKind::Blake3, "abcd".to_string());

        assert_eq!(obj.hash(HashKind::Blake3), Some("abcd"));
        assert_eq!(obj.hash(HashKind::Sha256), None);
    }

    #[test]
    fn test_entry_path() {
        let obj = Entry::Object(ObjectInfo::new("x"));
        let dir = Entry::Dir(DirInfo { path: "y".into() });
        assert_eq!(obj.path(), "x");
        assert_eq!(dir.path(), "y");
    }
}
