use thiserror::Error;

/// An error reported by the external cache or mutation channel.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// The cache delivered an error status while an initial `get` waited.
    #[error("query failed: {0}")]
    Query(QueryError),

    /// The mutation channel rejected a write. Carried verbatim.
    #[error("mutation failed: {0}")]
    Mutation(QueryError),

    /// A newer `get` replaced this one as the pending initial-load waiter.
    #[error("initial load superseded by a newer get")]
    InitialLoadSuperseded,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
