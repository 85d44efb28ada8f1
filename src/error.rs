use std::sync::Arc;

use crate::{Environment, FlagId};

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error coming from a collaborator implementation (repository or cache).
pub type BoxedSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Enum representing possible errors of flag management and evaluation.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Malformed name, out-of-range percentage, empty required set, etc. Raised when the value
    /// is constructed, never coerced into something valid.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The requested flag does not exist.
    #[error("flag not found: {0}")]
    FlagNotFound(String),

    /// The write would overwrite an existing flag or state that the writer did not read.
    #[error(transparent)]
    Conflict(Conflict),

    /// The repository is unreachable or failed.
    #[error("repository error: {0}")]
    // Collaborator errors are not necessarily clonable, so we're wrapping them in an Arc.
    Repository(#[source] BoxedSource),

    /// The cache is unreachable or failed. The service never lets this escape an operation.
    #[error("cache error: {0}")]
    Cache(#[source] BoxedSource),
}

/// Write conflicts detected by the repository.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Conflict {
    /// A flag with the same name already exists in the environment.
    #[error("flag already exists: {name} in {environment}")]
    AlreadyExists {
        /// Name of the existing flag.
        name: String,
        /// Environment of the existing flag.
        environment: Environment,
    },

    /// Optimistic-concurrency check failed: the flag was modified since it was read.
    #[error("stale write for flag {flag_id} (expected version {expected}, found {actual})")]
    StaleVersion {
        /// The flag being written.
        flag_id: FlagId,
        /// Version the writer read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidConfiguration(message.into())
    }

    /// Wrap a repository implementation error.
    pub fn repository(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Repository(Arc::new(err))
    }

    /// Wrap a cache implementation error.
    pub fn cache(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Cache(Arc::new(err))
    }

    /// Return `true` if the error means the flag does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::FlagNotFound(_))
    }

    /// Return `true` if the error is a write conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

impl From<Conflict> for Error {
    fn from(value: Conflict) -> Self {
        Error::Conflict(value)
    }
}
