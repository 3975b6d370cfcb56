use thiserror::Error;

/// Errors produced by value operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    /// An operation that needs a non-empty path was given the root itself.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An equality-fn derivation chain did not terminate within the depth limit.
    #[error("cyclic reference: derivation chain exceeded {depth} links")]
    CyclicReference { depth: usize },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the value crate.
pub type Result<T> = std::result::Result<T, ValueError>;
