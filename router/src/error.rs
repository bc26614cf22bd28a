use serde::{Deserialize, Serialize};

/// Logical outcome of a router operation, as surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum RouterError {
    #[error("blob id is not valid")]
    InvalidBlobId,
    #[error("no replica has the blob")]
    BlobDoesNotExist,
    #[error("blob has been deleted")]
    BlobDeleted,
    #[error("blob has expired")]
    BlobExpired,
    #[error("caller is not authorized for the blob")]
    BlobAuthorizationFailure,
    #[error("blob exceeds the maximum allowed size")]
    BlobTooLarge,
    #[error("request body channel failed")]
    BadInputChannel,
    #[error("not enough replicas are available")]
    AmbryUnavailable,
    #[error("operation deadline passed")]
    OperationTimedOut,
    #[error("router has been closed")]
    RouterClosed,
    #[error("no writable partition can take the blob")]
    InsufficientCapacity,
    #[error("put arguments are not valid")]
    InvalidPutArgument,
    #[error("unexpected internal router error")]
    UnexpectedInternalError,
}

/// Error code a single storage replica attaches to its response.
///
/// `precedence` orders codes for resolving a failed operation: codes that
/// are positive proof about the blob outrank ambiguous server-health
/// signals, and more specific health signals outrank vaguer ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerErrorCode {
    NoError,
    BlobNotFound,
    BlobDeleted,
    BlobExpired,
    BlobAuthorizationFailure,
    DiskUnavailable,
    ReplicaUnavailable,
    PartitionUnknown,
    IoError,
    DataCorrupt,
    UnknownError,
}

impl ServerErrorCode {
    pub fn precedence(self) -> u8 {
        match self {
            ServerErrorCode::BlobAuthorizationFailure => 10,
            ServerErrorCode::BlobExpired => 9,
            ServerErrorCode::BlobDeleted => 8,
            ServerErrorCode::BlobNotFound => 7,
            ServerErrorCode::DiskUnavailable => 6,
            ServerErrorCode::ReplicaUnavailable => 5,
            ServerErrorCode::PartitionUnknown => 4,
            ServerErrorCode::IoError => 3,
            ServerErrorCode::DataCorrupt => 2,
            ServerErrorCode::UnknownError => 1,
            ServerErrorCode::NoError => 0,
        }
    }

    /// True for codes that say something about the server rather than the
    /// blob.
    pub fn is_health_code(self) -> bool {
        matches!(
            self,
            ServerErrorCode::DiskUnavailable
                | ServerErrorCode::ReplicaUnavailable
                | ServerErrorCode::PartitionUnknown
                | ServerErrorCode::IoError
                | ServerErrorCode::DataCorrupt
                | ServerErrorCode::UnknownError
        )
    }
}
