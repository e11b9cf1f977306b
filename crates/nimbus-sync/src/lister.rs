//! Listing a store into sorted objects and directories
//!
//! Two strategies: a per-directory walk honoring `max_depth`, and a single
//! recursive traversal when the store supports it and the run opted in.
//! Either way the result is sorted by path with each path appearing once,
//! which is what the march requires.

use nimbus_filter::Filter;
use nimbus_fs::{path as opath, Entry, ObjectInfo, ObjectStore};
use nimbus_types::Result;
use std::collections::VecDeque;
use tracing::warn;

/// A store listing split into objects and directories, both sorted
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Filter-included objects, sorted by path
    pub objects: Vec<ObjectInfo>,
    /// All directories seen within the depth limit, sorted by path
    pub dirs: Vec<String>,
}

/// List a store, choosing walk or recursive traversal
pub async fn list_store(
    store: &dyn ObjectStore,
    filter: &Filter,
    fast_list: bool,
    max_depth: Option<usize>,
) -> Result<Listing> {
    let entries = if fast_list && store.features().recursive_list {
        store.list_recursive("").await?
    } else {
        walk(store, max_depth).await?
    };

    let mut listing = Listing::default();
    for entry in entries {
        match entry {
            Entry::Dir(dir) => {
                if max_depth.map_or(true, |max| opath::depth(&dir.path) <= max) {
                    listing.dirs.push(dir.path);
                }
            }
            Entry::Object(obj) => {
                if let Some(max) = max_depth {
                    if opath::depth(&obj.path) > max {
                        continue;
                    }
                }
                if filter.include_object(&obj.path, obj.size, obj.mod_time) {
                    listing.objects.push(obj);
                }
            }
        }
    }

    listing.objects.sort_by(|a, b| a.path.cmp(&b.path));
    listing.dirs.sort();
    dedupe(&mut listing, store);
    Ok(listing)
}

// A path may appear at most once; a backend breaking that invariant would
// corrupt the march, so drop duplicates loudly.
fn dedupe(listing: &mut Listing, store: &dyn ObjectStore) {
    let before = listing.objects.len();
    listing.objects.dedup_by(|a, b| a.path == b.path);
    if listing.objects.len() != before {
        warn!(
            store = %store.name(),
            dropped = before - listing.objects.len(),
            "listing contained duplicate paths"
        );
    }
    listing.dirs.dedup();
}

async fn walk(store: &dyn ObjectStore, max_depth: Option<usize>) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(String::new());

    while let Some(dir) = queue.pop_front() {
        for entry in store.list(&dir).await? {
            match &entry {
                Entry::Dir(sub) => {
                    let descend = max_depth.map_or(true, |max| opath::depth(&sub.path) < max);
                    if descend {
                        queue.push_back(sub.path.clone());
                    }
                    out.push(entry);
                }
                Entry::Object(_) => out.push(entry),
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_fs::{MemoryStore, PutMeta};

    async fn put(store: &MemoryStore, path: &str) {
        let mut reader: &[u8] = b"x";
        store.put(path, &mut reader, PutMeta::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_walk_collects_everything_sorted() {
        let store = MemoryStore::new("t");
        put(&store, "z").await;
        put(&store, "a/b/c").await;
        put(&store, "a/d").await;
        store.mkdir("empty").await.unwrap();

        let listing = list_store(&store, &Filter::new(), false, None).await.unwrap();
        let objects: Vec<&str> = listing.objects.iter().map(|o| o.path.as_str()).collect();
        assert_eq!(objects, vec!["a/b/c", "a/d", "z"]);
        assert_eq!(listing.dirs, vec!["a", "a/b", "empty"]);
    }

    #[tokio::test]
    async fn test_fast_list_matches_walk() {
        let store = MemoryStore::new("t");
        put(&store, "one").await;
        put(&store, "sub/two").await;

        let walked = list_store(&store, &Filter::new(), false, None).await.unwrap();
        let fast = list_store(&store, &Filter::new(), true, None).await.unwrap();

        let w: Vec<&str> = walked.objects.iter().map(|o| o.path.as_str()).collect();
        let f: Vec<&str> = fast.objects.iter().map(|o| o.path.as_str()).collect();
        assert_eq!(w, f);
        assert_eq!(walked.dirs, fast.dirs);
    }

    #[tokio::test]
    async fn test_max_depth_caps_traversal() {
        let store = MemoryStore::new("t");
        put(&store, "top").await;
        put(&store, "sub/mid").await;
        put(&store, "sub/deep/bottom").await;

        let listing = list_store(&store, &Filter::new(), false, Some(1))
            .await
            .unwrap();
        let objects: Vec<&str> = listing.objects.iter().map(|o| o.path.as_str()).collect();
        assert_eq!(objects, vec!["top"]);
        assert_eq!(listing.dirs, vec!["sub"]);
    }

    #[tokio::test]
    async fn test_filter_applies_during_listing() {
        let store = MemoryStore::new("t");
        put(&store, "keep.txt").await;
        put(&store, "drop.png").await;

        let mut filter = Filter::new();
        filter.add_include("*.txt").unwrap();

        let listing = list_store(&store, &filter, false, None).await.unwrap();
        let objects: Vec<&str> = listing.objects.iter().map(|o| o.path.as_str()).collect();
        assert_eq!(objects, vec!["keep.txt"]);
    }
}
