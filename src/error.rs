pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid {entity} transition {from} -> {to}: {guard}")]
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
        guard: String,
    },

    #[error("Reference integrity error: {0}")]
    ReferenceIntegrity(String),

    #[error("Remote sync failure: {0}")]
    RemoteSync(String),

    #[error("Remote request timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RemoteSync(_) | Error::TimedOut(_) | Error::Reqwest(_)
        )
    }
}
