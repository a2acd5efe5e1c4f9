use thiserror::Error;

/// Errors surfaced by the repository and its node store.
#[derive(Debug, Error)]
pub enum Error {
    /// Lookup by name or UUID found nothing, or found a node of the wrong kind.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Name already taken within the registry or container.
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// A stale handle tried to advance a lineage that moved on without it.
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Mutation attempted through a handle on a frozen historical version.
    #[error("Read-only version: {0}")]
    ReadOnly(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            // Another session holds the write lock, or this session's read
            // snapshot predates a commit it would overwrite.
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Error::ConcurrentModification(err.to_string())
            }
            _ => Error::Store(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(format!("Malformed stored value: {}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Store(err.to_string())
    }
}

/// Check a node name before it becomes part of a path.
///
/// Names are path segments: `/`, newlines and tabs are reserved.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidName("name must not be empty".to_string()));
    }
    if name.contains('/') || name.contains('\n') || name.contains('\t') {
        return Err(Error::InvalidName(format!(
            "'{}' contains a reserved character",
            name.escape_default()
        )));
    }
    Ok(())
}
