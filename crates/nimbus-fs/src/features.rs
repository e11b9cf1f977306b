//! Capability flags for object stores
//!
//! The engine never assumes a capability; it probes these flags and
//! degrades when a store cannot do something (for example rename tracking
//! silently falls back to copy-and-delete without server-side move).

/// Optional capabilities advertised by a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features {
    /// Can copy an object from a same-provider store without streaming
    /// the bytes through the client
    pub server_side_copy: bool,
    /// Can rename an object within the store
    pub server_side_move: bool,
    /// Can rename a whole directory subtree
    pub dir_move: bool,
    /// Supports listing all descendants in one traversal
    pub recursive_list: bool,
    /// Can set the modification time of an existing object
    pub set_mod_time: bool,
    /// Can delete a whole subtree in one call
    pub purge: bool,
    /// Can represent empty directories
    pub empty_dirs: bool,
}
