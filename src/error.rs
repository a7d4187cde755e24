use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Remote resources that came back without anything usable in them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    #[error("No enabled members in directory group {0}")]
    EmptyGroup(String),

    #[error("No blobs with prefix {prefix:?} and suffix {suffix:?} in {container}")]
    EmptyContainer {
        container: String,
        prefix: Option<String>,
        suffix: String,
    },
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{service} unavailable: {message}")]
    UpstreamUnavailable {
        service: &'static str,
        message: String,
    },

    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error("Local account {username}: {message}")]
    LocalAccount { username: String, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl SyncError {
    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        SyncError::UpstreamUnavailable {
            service,
            message: message.into(),
        }
    }

    pub fn local(username: &str, message: impl Into<String>) -> Self {
        SyncError::LocalAccount {
            username: username.to_string(),
            message: message.into(),
        }
    }

    /// Short stable identifier used as the event code suffix.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Config(_) => "config",
            SyncError::UpstreamUnavailable { .. } => "upstream_unavailable",
            SyncError::NotFound(_) => "not_found",
            SyncError::LocalAccount { .. } => "local_account",
            SyncError::Validation(_) => "validation",
        }
    }
}
