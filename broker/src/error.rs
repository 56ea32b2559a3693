use model::ErrorCode;
use thiserror::Error;

use crate::shard::ShardId;

/// Errors that abort a fetch request as a whole, before any partition is read.
///
/// Per-partition failures are never represented here; they are stored as [`ErrorCode`]s in the
/// partition's response slot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Malformed fetch request: {0}")]
    InvalidRequest(String),

    #[error("Session epoch `{0}` is not valid without a session id")]
    EpochWithoutSession(i32),

    #[error("Fetch session `{0}` is not found")]
    SessionNotFound(i32),

    #[error("Fetch session `{id}` expects epoch {expected}, got {actual}")]
    InvalidSessionEpoch { id: i32, expected: i32, actual: i32 },

    #[error("Fetch session `{0}` is in use by another request")]
    SessionInUse(i32),

    #[error("Fetch session `{id}` would hold {count} partitions, the limit is {limit}")]
    TooManyPartitions { id: i32, count: usize, limit: usize },
}

impl FetchError {
    /// Top-level error code reported to the client.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FetchError::InvalidRequest(_) | FetchError::TooManyPartitions { .. } => {
                ErrorCode::InvalidRequest
            }
            FetchError::SessionNotFound(_) => ErrorCode::FetchSessionIdNotFound,
            FetchError::EpochWithoutSession(_)
            | FetchError::InvalidSessionEpoch { .. }
            | FetchError::SessionInUse(_) => ErrorCode::InvalidFetchSessionEpoch,
        }
    }
}

#[derive(Debug, Error)]
pub enum ShardError {
    #[error("Shard `{0}` does not exist")]
    NotFound(ShardId),

    #[error("Shard `{0}` is not running")]
    Stopped(ShardId),

    #[error("Failed to spawn shard thread")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("At least one shard is required")]
    NoShards,

    #[error("Failed to start shard")]
    Shard(#[from] ShardError),
}

#[cfg(test)]
mod tests {
    use model::ErrorCode;

    use super::FetchError;

    #[test]
    fn test_error_code() {
        assert_eq!(
            ErrorCode::FetchSessionIdNotFound,
            FetchError::SessionNotFound(3).error_code()
        );
        assert_eq!(
            ErrorCode::InvalidFetchSessionEpoch,
            FetchError::InvalidSessionEpoch {
                id: 3,
                expected: 2,
                actual: 5
            }
            .error_code()
        );
        assert_eq!(
            ErrorCode::InvalidFetchSessionEpoch,
            FetchError::SessionInUse(3).error_code()
        );
        assert_eq!(
            ErrorCode::InvalidRequest,
            FetchError::InvalidRequest("negative max_bytes".to_owned()).error_code()
        );
    }
}
