//! Persistence gateway contract.
//!
//! The assignment engine never touches storage directly. It reads through
//! [`Gateway`] and performs every multi-step write through an [`AtomicScope`]
//! obtained from [`Gateway::begin`]. The scope is an explicit handle: writes
//! made through it become visible together on [`AtomicScope::commit`], and
//! dropping it without committing discards them all.

use crate::error::AppError;
use crate::models::{PrStatus, PullRequest, Team, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Read access and single-statement writes, plus the atomic-scope primitive.
///
/// "No rows" conditions come back as the matching `AppError::NotFound`
/// variant; unexpected storage failures come back as `AppError::Internal`.
#[async_trait]
pub trait Gateway: Send + Sync {
    // ── Teams ────────────────────────────────────────────────────────────

    async fn team_exists(&self, name: &str) -> Result<bool, AppError>;

    async fn get_team(&self, name: &str) -> Result<Team, AppError>;

    // ── Users ────────────────────────────────────────────────────────────

    async fn get_user(&self, id: &str) -> Result<User, AppError>;

    /// Toggle a user's active flag and return the updated record.
    async fn set_user_active(&self, id: &str, is_active: bool) -> Result<User, AppError>;

    /// Members of a team ordered by user id.
    async fn list_users_by_team(&self, team: &str) -> Result<Vec<User>, AppError>;

    /// Active members of `team` whose ids are not in `exclude`, ordered by id.
    async fn list_active_by_team_excluding(
        &self,
        team: &str,
        exclude: &[String],
    ) -> Result<Vec<User>, AppError>;

    // ── Pull requests ────────────────────────────────────────────────────

    async fn pr_exists(&self, id: &str) -> Result<bool, AppError>;

    async fn get_pull_request(&self, id: &str) -> Result<PullRequest, AppError>;

    /// Move an open pull request to `status`.
    ///
    /// Only rows still `OPEN` are touched, so a merge timestamp is never
    /// overwritten. Returns `false` when the row exists but had already left
    /// `OPEN` (a concurrent caller won).
    async fn update_status(
        &self,
        id: &str,
        status: PrStatus,
        merged_at: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError>;

    /// Pull requests on which `user_id` is currently a reviewer, newest first.
    async fn list_by_reviewer(&self, user_id: &str) -> Result<Vec<PullRequest>, AppError>;

    /// Assignment count per user over every persisted assignment.
    async fn reviewer_stats(&self) -> Result<HashMap<String, i64>, AppError>;

    /// Pull request count per status. Unseen statuses are absent.
    async fn status_stats(&self) -> Result<HashMap<PrStatus, i64>, AppError>;

    // ── Atomic scope ─────────────────────────────────────────────────────

    /// Open an atomic scope. Concurrent scopes are serialized.
    async fn begin(&self) -> Result<Box<dyn AtomicScope + '_>, AppError>;
}

/// Transactional view over the store.
///
/// Reads observe the scope's own uncommitted writes.
#[async_trait]
pub trait AtomicScope: Send {
    /// Insert a team. Fails with `TeamExists` on a duplicate name.
    async fn create_team(&mut self, team: &Team) -> Result<(), AppError>;

    /// Insert or overwrite a user by id.
    async fn upsert_user(&mut self, user: &User) -> Result<(), AppError>;

    async fn list_users_by_team(&mut self, team: &str) -> Result<Vec<User>, AppError>;

    async fn list_active_by_team_excluding(
        &mut self,
        team: &str,
        exclude: &[String],
    ) -> Result<Vec<User>, AppError>;

    /// Mark the given active members of `team` inactive.
    ///
    /// Returns how many rows actually changed.
    async fn deactivate_users(&mut self, team: &str, ids: &[String]) -> Result<u64, AppError>;

    async fn get_pull_request(&mut self, id: &str) -> Result<PullRequest, AppError>;

    /// Insert the pull request row. Reviewers are written separately with
    /// [`AtomicScope::assign_reviewers`]. Fails with `PrExists` on a duplicate id.
    async fn create_pull_request(&mut self, pr: &PullRequest) -> Result<(), AppError>;

    /// Replace the whole reviewer list of an open pull request.
    async fn assign_reviewers(&mut self, pr_id: &str, reviewer_ids: &[String])
        -> Result<(), AppError>;

    /// Swap exactly `old` for `new`, keeping its slot.
    ///
    /// Fails with `NotAssigned` if `old` is no longer a reviewer.
    async fn replace_reviewer(&mut self, pr_id: &str, old: &str, new: &str)
        -> Result<(), AppError>;

    /// Open pull requests with at least one reviewer in `reviewer_ids`,
    /// oldest first.
    async fn list_open_by_reviewers(
        &mut self,
        reviewer_ids: &[String],
    ) -> Result<Vec<PullRequest>, AppError>;

    /// Make every write in this scope visible at once.
    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}
