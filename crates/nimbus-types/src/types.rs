//! Shared value types for Nimbus

use serde::{Deserialize, Serialize};

/// Unique identifier for one engine run
pub type RunId = uuid::Uuid;

/// Content hash algorithms understood by the backends
///
/// A backend advertises the kinds it can produce; the engine compares
/// digests only for kinds common to both ends of a transfer. Digests are
/// lowercase hex strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HashKind {
    /// BLAKE3, the preferred content hash
    Blake3,
    /// SHA-256, for backends that already track it
    Sha256,
}

impl HashKind {
    /// All hash kinds, in preference order
    pub const ALL: &'static [HashKind] = &[HashKind::Blake3, HashKind::Sha256];

    /// Stable lowercase name, as used in listings and messages
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
            Self::Sha256 => "sha256",
        }
    }
}

impl std::fmt::Display for HashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_kind_names() {
        assert_eq!(HashKind::Blake3.to_string(), "blake3");
        assert_eq!(HashKind::Sha256.to_string(), "sha256");
        assert_eq!(HashKind::ALL.len(), 2);
    }
}
