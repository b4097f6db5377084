//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Unknown envelope kind
    #[error("unknown kind {0}")]
    Kind(u8),

    /// Malformed envelope structure
    #[error("malformed envelope")]
    Malformed,
}
