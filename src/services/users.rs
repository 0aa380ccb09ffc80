//! User activation and review listings.

use super::guarded;
use crate::db::Gateway;
use crate::error::AppError;
use crate::models::{PullRequestShort, User};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct UserService {
    gateway: Arc<dyn Gateway>,
}

impl UserService {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// Toggle a single user's active flag. Open reviews are left untouched.
    pub async fn set_user_active(
        &self,
        user_id: &str,
        is_active: bool,
        cancel: &CancellationToken,
    ) -> Result<User, AppError> {
        let user = guarded(cancel, self.gateway.set_user_active(user_id, is_active)).await?;
        log::info!("[users] Set {} active={}", user.id, user.is_active);
        Ok(user)
    }

    /// Pull requests `user_id` currently reviews, newest first.
    pub async fn get_user_reviews(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PullRequestShort>, AppError> {
        guarded(cancel, self.gateway.get_user(user_id)).await?;
        let prs = guarded(cancel, self.gateway.list_by_reviewer(user_id)).await?;
        Ok(prs.into_iter().map(PullRequestShort::from).collect())
    }
}
