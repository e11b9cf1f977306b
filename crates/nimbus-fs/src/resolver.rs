//! Remote spec resolution
//!
//! Maps a `remote:path` string from the command line to a live store
//! handle. A bare path (or a Windows drive path) is the local filesystem;
//! `mem:name` resolves to a process-wide named in-memory store, the same
//! instance for every resolution of the same name.

use crate::{LocalStore, MemoryStore, ObjectStore};
use nimbus_types::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

static MEMORY_REMOTES: Lazy<Mutex<HashMap<String, Arc<MemoryStore>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Extra knobs applied to the resolved store where they make sense
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Refuse to cross device boundaries on local stores
    pub one_file_system: bool,
}

/// Resolve a remote spec to a store handle
pub fn resolve(spec: &str) -> Result<Arc<dyn ObjectStore>> {
    resolve_with(spec, ResolveOptions::default())
}

/// Resolve a remote spec, applying the given options
pub fn resolve_with(spec: &str, options: ResolveOptions) -> Result<Arc<dyn ObjectStore>> {
    if spec.is_empty() {
        return Err(Error::usage("empty remote"));
    }

    let local = |path: &str| -> Arc<dyn ObjectStore> {
        Arc::new(LocalStore::new(path).with_one_file_system(options.one_file_system))
    };

    match spec.split_once(':') {
        Some((scheme, rest)) if scheme.len() > 1 => match scheme {
            "mem" => {
                let mut remotes = MEMORY_REMOTES.lock().unwrap();
                let store = remotes
                    .entry(rest.to_string())
                    .or_insert_with(|| Arc::new(MemoryStore::new(rest)))
                    .clone();
                Ok(store)
            }
            "local" => Ok(local(rest)),
            other => Err(Error::config(format!("unknown remote type: {}", other))),
        },
        // Bare paths and single-letter Windows drive prefixes are local.
        _ => Ok(local(spec)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_path_is_local() {
        let store = resolve("/tmp/data").unwrap();
        assert_eq!(store.provider(), "local");
    }

    #[test]
    fn test_memory_remotes_are_shared_by_name() {
        let a = resolve("mem:shared-test").unwrap();
        let b = resolve("mem:shared-test").unwrap();
        assert_eq!(a.name(), b.name());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        assert!(resolve("gopher:stuff").is_err());
    }
}
