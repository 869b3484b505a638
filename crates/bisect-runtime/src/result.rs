//! Result and error types for the coverage runtime.
//!
//! Only [`crate::OutputFileAllocator::allocate`] and
//! [`crate::dump_counters_to`] hand these to callers. Everything on the dump
//! path is converted into a diagnostic instead.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur while persisting coverage data
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The OS refused to create an output file
    #[error("{source}: {}", path.display())]
    FileCreate {
        /// Path that was attempted
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Every generated name already existed
    #[error("no free output file name for prefix {prefix:?} after {attempts} attempts")]
    RetriesExhausted {
        /// Prefix the names were generated from
        prefix: String,
        /// Number of names tried
        attempts: u32,
    },

    /// Writing the snapshot failed
    #[error("write failed: {0}")]
    FileWrite(#[from] std::io::Error),

    /// Snapshot encoding or decoding failed
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] bincode::Error),

    /// Input does not start with the snapshot magic
    #[error("not a coverage snapshot (bad magic)")]
    BadMagic,

    /// A lock the dump needs is held and the dump may not wait for it
    #[error("{0} is in use by the interrupted thread")]
    Busy(&'static str),
}
