//! User model.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A team member who may author or review pull requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    #[serde(rename = "user_id")]
    pub id: String,
    pub username: String,
    pub team_name: String,
    pub is_active: bool,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::invalid_input_field("user_id cannot be empty", "user_id"));
        }
        if self.username.trim().is_empty() {
            return Err(AppError::invalid_input_field(
                "username cannot be empty",
                "username",
            ));
        }
        if self.team_name.trim().is_empty() {
            return Err(AppError::invalid_input_field(
                "team_name cannot be empty",
                "team_name",
            ));
        }
        Ok(())
    }

    /// Only active users are eligible for reviewer selection.
    pub fn can_be_reviewer(&self) -> bool {
        self.is_active
    }
}
