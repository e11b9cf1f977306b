//! Lock-step merge of two sorted listings
//!
//! The march pairs the source and destination listings path by path. Each
//! yielded pair carries the object from either side when present; the pair
//! kind drives the checker's decision: source-only pairs become transfers,
//! destination-only pairs become deletion candidates, and pairs present on
//! both sides go through the comparator.

use nimbus_fs::ObjectInfo;

/// One aligned pair of listings at a path
#[derive(Debug, Clone)]
pub struct Pair {
    /// The shared path
    pub path: String,
    /// Source object, when the path exists on the source
    pub src: Option<ObjectInfo>,
    /// Destination object, when the path exists on the destination
    pub dst: Option<ObjectInfo>,
}

/// Classification of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairKind {
    /// Path exists only on the source
    SrcOnly,
    /// Path exists only on the destination
    DstOnly,
    /// Path exists on both sides
    Both,
}

impl Pair {
    /// Classify the pair by which sides are present
    pub fn kind(&self) -> PairKind {
        match (&self.src, &self.dst) {
            (Some(_), None) => PairKind::SrcOnly,
            (None, Some(_)) => PairKind::DstOnly,
            _ => PairKind::Both,
        }
    }
}

/// Merge two listings, both sorted by path, into aligned pairs
///
/// The output is sorted by path and contains each path exactly once.
pub fn march(src: Vec<ObjectInfo>, dst: Vec<ObjectInfo>) -> Vec<Pair> {
    let mut pairs = Vec::with_capacity(src.len().max(dst.len()));
    let mut src_iter = src.into_iter().peekable();
    let mut dst_iter = dst.into_iter().peekable();

    loop {
        match (src_iter.peek(), dst_iter.peek()) {
            (Some(s), Some(d)) => match s.path.cmp(&d.path) {
                std::cmp::Ordering::Less => {
                    let s = src_iter.next().unwrap();
                    pairs.push(Pair {
                        path: s.path.clone(),
                        src: Some(s),
                        dst: None,
                    });
                }
                std::cmp::Ordering::Greater => {
                    let d = dst_iter.next().unwrap();
                    pairs.push(Pair {
                        path: d.path.clone(),
                        src: None,
                        dst: Some(d),
                    });
                }
                std::cmp::Ordering::Equal => {
                    let s = src_iter.next().unwrap();
                    let d = dst_iter.next().unwrap();
                    pairs.push(Pair {
                        path: s.path.clone(),
                        src: Some(s),
                        dst: Some(d),
                    });
                }
            },
            (Some(_), None) => {
                let s = src_iter.next().unwrap();
                pairs.push(Pair {
                    path: s.path.clone(),
                    src: Some(s),
                    dst: None,
                });
            }
            (None, Some(_)) => {
                let d = dst_iter.next().unwrap();
                pairs.push(Pair {
                    path: d.path.clone(),
                    src: None,
                    dst: Some(d),
                });
            }
            (None, None) => break,
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(path: &str) -> ObjectInfo {
        ObjectInfo::new(path)
    }

    #[test]
    fn test_march_classifies_sides() {
        let src = vec![obj("a"), obj("b"), obj("d")];
        let dst = vec![obj("b"), obj("c"), obj("d")];

        let pairs = march(src, dst);
        let kinds: Vec<(String, PairKind)> =
            pairs.iter().map(|p| (p.path.clone(), p.kind())).collect();

        assert_eq!(
            kinds,
            vec![
                ("a".to_string(), PairKind::SrcOnly),
                ("b".to_string(), PairKind::Both),
                ("c".to_string(), PairKind::DstOnly),
                ("d".to_string(), PairKind::Both),
            ]
        );
    }

    #[test]
    fn test_march_empty_sides() {
        assert!(march(vec![], vec![]).is_empty());

        let pairs = march(vec![obj("x")], vec![]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].kind(), PairKind::SrcOnly);

        let pairs = march(vec![], vec![obj("y")]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].kind(), PairKind::DstOnly);
    }

    #[test]
    fn test_march_preserves_order() {
        let src = vec![obj("a/1"), obj("a/2"), obj("z")];
        let dst = vec![obj("a/2"), obj("m")];

        let pairs = march(src, dst);
        let paths: Vec<&str> = pairs.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, vec!["a/1", "a/2", "m", "z"]);
    }
}
