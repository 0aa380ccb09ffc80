//! Team model.

use super::User;
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A team, identified by its unique name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Team {
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            created_at,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::invalid_input_field(
                "team_name cannot be empty",
                "team_name",
            ));
        }
        Ok(())
    }
}

/// Member as listed under a team (team name is implied).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamMember {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
}

impl From<User> for TeamMember {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            is_active: user.is_active,
        }
    }
}

/// A team together with its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeamWithMembers {
    pub team_name: String,
    pub members: Vec<TeamMember>,
}

impl TeamWithMembers {
    pub fn new(team_name: impl Into<String>, members: Vec<User>) -> Self {
        Self {
            team_name: team_name.into(),
            members: members.into_iter().map(TeamMember::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_blank_name() {
        assert!(Team::new("backend", Utc::now()).validate().is_ok());
        assert!(Team::new("   ", Utc::now()).validate().is_err());
    }
}
