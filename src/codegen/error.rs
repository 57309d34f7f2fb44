//! Assembly error types.
//!
//! Almost everything that can go wrong is caught while compiling statements.
//! What remains is the static memory layout, which is only known once the
//! whole program has been seen.

use thiserror::Error;

/// An error that occurred while assembling the module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    /// String pool plus data table run into the reserved scratch region.
    #[error("static data too large: {needed} bytes, {available} available")]
    LayoutOverflow {
        /// Bytes the pool and data table need.
        needed: usize,
        /// Bytes below the scratch region.
        available: usize,
    },
}
