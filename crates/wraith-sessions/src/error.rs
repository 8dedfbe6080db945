use thiserror::Error;

/// The session manager's matchable error taxonomy (§7).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session already exists")]
    AlreadyExists,
    #[error("too many sessions")]
    TooMany,
    #[error("session is in use, destroy will be finalized later")]
    InUse,
    #[error("session page is nil")]
    PageNil,
    #[error("session is closing, no new operations are accepted")]
    Closing,
    #[error("page has too many outstanding references")]
    TooManyRefs,
    #[error("failed to create page for session: {0}")]
    PageCreateFailed(String),
}
