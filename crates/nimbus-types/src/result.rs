//! Result type alias for Nimbus operations

use crate::Error;

/// Result type alias for Nimbus operations
pub type Result<T> = std::result::Result<T, Error>;
