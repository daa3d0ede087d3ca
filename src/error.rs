//! Error types for the rendering core.

use thiserror::Error;

/// Errors that can occur in the rendering core.
///
/// The capacity-exhaustion variants ([`ArenaExhausted`], [`TableExhausted`],
/// [`ListFull`]) are fatal by policy: the fixed capacities are sized at
/// startup and exceeding them is a sizing bug at the call site, not a
/// runtime condition to recover from. Nothing in this crate retries.
///
/// [`ArenaExhausted`]: RenderError::ArenaExhausted
/// [`TableExhausted`]: RenderError::TableExhausted
/// [`ListFull`]: RenderError::ListFull
#[derive(Error, Debug)]
pub enum RenderError {
    /// Failed to initialize the device, queue, or backend.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// Failed to create a GPU resource (buffer, texture, table, fence, pipeline).
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// Shader compilation failed; the payload is the compiler diagnostic.
    #[error("shader compilation failed:\n{0}")]
    ShaderCompilationFailed(String),

    /// A frame's linear allocator ran out of space.
    #[error("upload arena exhausted: {requested} bytes at aligned offset {offset} exceeds capacity {capacity}")]
    ArenaExhausted {
        /// Requested allocation size in bytes.
        requested: u64,
        /// Aligned cursor position the allocation would start at.
        offset: u64,
        /// Total capacity of the arena in bytes.
        capacity: u64,
    },

    /// A descriptor table has no free slots left.
    #[error("descriptor table exhausted: all {capacity} slots allocated")]
    TableExhausted {
        /// Total slot capacity of the table.
        capacity: u32,
    },

    /// A bounded list is at capacity.
    #[error("bounded list full: capacity {capacity}")]
    ListFull {
        /// Configured capacity of the list.
        capacity: usize,
    },

    /// A fence wait itself failed (distinct from taking a long time).
    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RenderError::TableExhausted { capacity: 64 };
        assert_eq!(
            err.to_string(),
            "descriptor table exhausted: all 64 slots allocated"
        );

        let err = RenderError::InitializationFailed("no GPU found".to_string());
        assert_eq!(err.to_string(), "initialization failed: no GPU found");
    }

    #[test]
    fn test_arena_exhausted_display() {
        let err = RenderError::ArenaExhausted {
            requested: 128,
            offset: 512,
            capacity: 256,
        };
        let text = err.to_string();
        assert!(text.contains("128"));
        assert!(text.contains("256"));
    }
}
