use hyper::StatusCode;
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

/// Failures at the facet boundary. 'not found' is not an error: lookups return `None` or `false`.
#[derive(Debug, Error)]
pub enum RepoError {
    /// request content is malformed or inconsistent, e.g. an unparseable checksum or a checksum
    ///  that does not match the stored artifact
    #[error("{0}")]
    InvalidContent(String),

    #[error("{0}")]
    PolicyViolation(String),

    /// persisted state does not match its own invariants, e.g. an asset referencing a blob that
    ///  does not exist
    #[error("storage inconsistency: {0}")]
    StorageInconsistency(String),

    #[error("fetching {url} from remote failed: {reason}")]
    RemoteFetch { url: String, reason: String },

    /// optimistic concurrency check failed at commit
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepoError {
    pub fn invalid_content(msg: impl Into<String>) -> RepoError {
        RepoError::InvalidContent(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RepoError::InvalidContent(_) | RepoError::PolicyViolation(_) => StatusCode::BAD_REQUEST,
            RepoError::RemoteFetch { .. } => StatusCode::BAD_GATEWAY,
            RepoError::Conflict(_) => StatusCode::CONFLICT,
            RepoError::StorageInconsistency(_) | RepoError::Io(_) | RepoError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Errors caused by the request itself, as opposed to failures of this server
    pub fn is_client_error(&self) -> bool {
        matches!(self, RepoError::InvalidContent(_) | RepoError::PolicyViolation(_))
    }
}

/// Unique key and foreign key violations mean a concurrent writer got there first
impl From<rusqlite::Error> for RepoError {
    fn from(e: rusqlite::Error) -> RepoError {
        match &e {
            rusqlite::Error::SqliteFailure(failure, _) if failure.code == rusqlite::ErrorCode::ConstraintViolation => RepoError::Conflict(e.to_string()),
            _ => RepoError::Other(e.into()),
        }
    }
}
