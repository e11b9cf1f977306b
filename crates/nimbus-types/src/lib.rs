//! Core type system and error handling for Nimbus
//!
//! This crate provides the foundational types shared by the Nimbus
//! workspace:
//!
//! - **Error handling**: the error taxonomy of the sync engine, with
//!   retryability and fatality classifiers
//! - **Configuration**: validated primitives for worker pools, buffers,
//!   retries and timeouts
//! - **Shared types**: hash kinds and run identifiers
//!
//! # Examples
//!
//! ```rust
//! use nimbus_types::{Error, Result, WorkerCount};
//!
//! fn pool_size(requested: usize) -> Result<usize> {
//!     let count = WorkerCount::new(requested).map_err(Error::config)?;
//!     Ok(count.get())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use config::{BufferSize, RetryPolicy, TimeoutPolicy, WorkerCount};
pub use error::{Error, ErrorKind};
pub use result::Result;
pub use types::{HashKind, RunId};
