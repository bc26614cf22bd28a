use axum::http::StatusCode;
use router::RouterError;

/// Pipeline-level error taxonomy. Every request that fails, at any stage,
/// terminates with exactly one of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RestErrorKind {
    BadRequest,
    Unauthorized,
    NotFound,
    Gone,
    UnsupportedHttpMethod,
    MissingArgs,
    InvalidArgument,
    InvalidAccount,
    InvalidContainer,
    PreconditionFailed,
    RangeNotSatisfiable,
    ServiceUnavailable,
    InternalError,
}

impl RestErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            RestErrorKind::BadRequest
            | RestErrorKind::MissingArgs
            | RestErrorKind::InvalidArgument
            | RestErrorKind::InvalidAccount
            | RestErrorKind::InvalidContainer => StatusCode::BAD_REQUEST,
            RestErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            RestErrorKind::NotFound => StatusCode::NOT_FOUND,
            RestErrorKind::Gone => StatusCode::GONE,
            RestErrorKind::UnsupportedHttpMethod => StatusCode::METHOD_NOT_ALLOWED,
            RestErrorKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            RestErrorKind::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            RestErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            RestErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RestError {
    pub kind: RestErrorKind,
    pub message: String,
    /// Router code this error was mapped from, when the router produced it.
    pub router_code: Option<RouterError>,
}

impl RestError {
    pub fn new(kind: RestErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            router_code: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::BadRequest, message)
    }

    pub fn missing_args(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::MissingArgs, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::InternalError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(RestErrorKind::ServiceUnavailable, message)
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }
}

impl From<RouterError> for RestError {
    fn from(code: RouterError) -> Self {
        let kind = match code {
            RouterError::BlobDoesNotExist => RestErrorKind::NotFound,
            RouterError::BlobDeleted | RouterError::BlobExpired => RestErrorKind::Gone,
            RouterError::BlobAuthorizationFailure => RestErrorKind::Unauthorized,
            RouterError::InvalidBlobId => RestErrorKind::BadRequest,
            RouterError::AmbryUnavailable
            | RouterError::OperationTimedOut
            | RouterError::RouterClosed => RestErrorKind::ServiceUnavailable,
            RouterError::BlobTooLarge
            | RouterError::BadInputChannel
            | RouterError::InsufficientCapacity
            | RouterError::InvalidPutArgument
            | RouterError::UnexpectedInternalError => RestErrorKind::InternalError,
        };
        Self {
            kind,
            message: code.to_string(),
            router_code: Some(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_codes_map_to_statuses() {
        assert_eq!(
            RestError::from(RouterError::BlobDoesNotExist).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RestError::from(RouterError::BlobDeleted).status_code(),
            StatusCode::GONE
        );
        assert_eq!(
            RestError::from(RouterError::BlobExpired).status_code(),
            StatusCode::GONE
        );
        assert_eq!(
            RestError::from(RouterError::OperationTimedOut).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            RestError::from(RouterError::InvalidBlobId).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RestError::from(RouterError::UnexpectedInternalError).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn router_code_is_preserved_for_the_error_header() {
        let err = RestError::from(RouterError::BlobDeleted);
        assert_eq!(err.router_code, Some(RouterError::BlobDeleted));
    }
}
