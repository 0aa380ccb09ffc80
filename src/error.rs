//! Application error types.
//!
//! Every engine and gateway operation reports failures through [`AppError`].
//! Variants are compared by value, and each carries a stable machine-readable
//! code so the transport layer can map it without inspecting messages.

use thiserror::Error;

/// Application-level errors returned by the assignment engine and gateways.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// A team with the requested name already exists.
    #[error("team already exists")]
    TeamExists,

    /// A pull request with the requested id already exists.
    #[error("pull request already exists")]
    PrExists,

    /// The pull request is merged and its reviewers can no longer change.
    #[error("cannot modify merged pull request")]
    PrMerged,

    /// The user is not currently a reviewer on the pull request.
    #[error("user is not assigned as reviewer")]
    NotAssigned,

    /// No active team member is eligible as a replacement reviewer.
    #[error("no active candidates available")]
    NoCandidate,

    /// Requested resource not found.
    #[error("{resource} not found")]
    NotFound {
        resource: String,
        id: Option<String>,
    },

    /// Invalid input provided.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        field: Option<String>,
    },

    /// The caller's cancellation signal or deadline fired before commit.
    #[error("operation cancelled")]
    Cancelled,

    /// Internal application error. The message is for logs only.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    pub fn team_not_found(name: &str) -> Self {
        Self::not_found_with_id("team", name)
    }

    pub fn user_not_found(id: &str) -> Self {
        Self::not_found_with_id("user", id)
    }

    pub fn pr_not_found(id: &str) -> Self {
        Self::not_found_with_id("pull request", id)
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TeamExists => "TEAM_EXISTS",
            Self::PrExists => "PR_EXISTS",
            Self::PrMerged => "PR_MERGED",
            Self::NotAssigned => "NOT_ASSIGNED",
            Self::NoCandidate => "NO_CANDIDATE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Cancelled => "CANCELLED",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether this is an unclassified failure that must not leak to clients.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::not_found("record"),
            other => Self::internal(format!("Database error: {}", other)),
        }
    }
}
