//! Team creation and lookup.

use super::{commit_scope, guarded};
use crate::db::Gateway;
use crate::error::AppError;
use crate::models::{timestamp_now, Team, TeamWithMembers, User};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Member entry supplied when creating a team.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMember {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
}

pub struct TeamService {
    gateway: Arc<dyn Gateway>,
}

impl TeamService {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// Create a team and upsert its members in one atomic scope.
    ///
    /// Members that already exist are moved onto the new team.
    pub async fn create_team(
        &self,
        team_name: &str,
        members: &[NewMember],
        cancel: &CancellationToken,
    ) -> Result<TeamWithMembers, AppError> {
        let now = timestamp_now();
        let team = Team::new(team_name, now);
        team.validate()?;
        let users: Vec<User> = members
            .iter()
            .map(|m| User {
                id: m.user_id.clone(),
                username: m.username.clone(),
                team_name: team_name.to_string(),
                is_active: m.is_active,
                created_at: now,
            })
            .collect();
        for user in &users {
            user.validate()?;
        }

        if guarded(cancel, self.gateway.team_exists(team_name)).await? {
            return Err(AppError::TeamExists);
        }

        let (scope, stored) = guarded(cancel, async {
            let mut scope = self.gateway.begin().await?;
            scope.create_team(&team).await?;
            for user in &users {
                scope.upsert_user(user).await?;
            }
            let stored = scope.list_users_by_team(team_name).await?;
            Ok::<_, AppError>((scope, stored))
        })
        .await?;
        commit_scope(scope, cancel).await?;

        log::info!(
            "[teams] Created team {} with {} member(s)",
            team_name,
            stored.len()
        );
        Ok(TeamWithMembers::new(team_name, stored))
    }

    /// A team with its members ordered by user id.
    pub async fn get_team(
        &self,
        team_name: &str,
        cancel: &CancellationToken,
    ) -> Result<TeamWithMembers, AppError> {
        let team = guarded(cancel, self.gateway.get_team(team_name)).await?;
        let members = guarded(cancel, self.gateway.list_users_by_team(&team.name)).await?;
        Ok(TeamWithMembers::new(team.name, members))
    }
}
