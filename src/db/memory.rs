//! In-memory implementation of the persistence gateway.
//!
//! All tables live behind one `tokio::sync::Mutex`. An atomic scope holds the
//! lock for its whole lifetime and works on a private copy of the tables,
//! which replaces the shared state on commit. Scopes are therefore fully
//! serialized, and dropping one leaves the shared state untouched.

use super::gateway::{AtomicScope, Gateway};
use crate::error::AppError;
use crate::models::{timestamp_now, PrStatus, PullRequest, Team, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct Tables {
    teams: HashMap<String, Team>,
    users: HashMap<String, User>,
    pull_requests: HashMap<String, PullRequest>,
    /// Every persisted (pr id, user id) assignment, replaced ones included.
    assignments: Vec<(String, String)>,
}

impl Tables {
    fn get_team(&self, name: &str) -> Result<Team, AppError> {
        self.teams
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::team_not_found(name))
    }

    fn get_user(&self, id: &str) -> Result<User, AppError> {
        self.users
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::user_not_found(id))
    }

    fn users_by_team(&self, team: &str) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .values()
            .filter(|u| u.team_name == team)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    fn active_by_team_excluding(&self, team: &str, exclude: &[String]) -> Vec<User> {
        self.users_by_team(team)
            .into_iter()
            .filter(|u| u.can_be_reviewer() && !exclude.contains(&u.id))
            .collect()
    }

    fn get_pull_request(&self, id: &str) -> Result<PullRequest, AppError> {
        self.pull_requests
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::pr_not_found(id))
    }

    fn open_pull_request_mut(&mut self, id: &str) -> Result<&mut PullRequest, AppError> {
        let pr = self
            .pull_requests
            .get_mut(id)
            .ok_or_else(|| AppError::pr_not_found(id))?;
        pr.can_modify_reviewers()?;
        Ok(pr)
    }

    fn create_team(&mut self, team: &Team) -> Result<(), AppError> {
        team.validate()?;
        if self.teams.contains_key(&team.name) {
            return Err(AppError::TeamExists);
        }
        self.teams.insert(team.name.clone(), team.clone());
        Ok(())
    }

    fn upsert_user(&mut self, user: &User) -> Result<(), AppError> {
        user.validate()?;
        if !self.teams.contains_key(&user.team_name) {
            return Err(AppError::team_not_found(&user.team_name));
        }
        match self.users.get_mut(&user.id) {
            Some(existing) => {
                existing.username = user.username.clone();
                existing.team_name = user.team_name.clone();
                existing.is_active = user.is_active;
            }
            None => {
                self.users.insert(user.id.clone(), user.clone());
            }
        }
        Ok(())
    }

    fn deactivate_users(&mut self, team: &str, ids: &[String]) -> u64 {
        let mut changed = 0;
        for user in self.users.values_mut() {
            if user.team_name == team && user.is_active && ids.contains(&user.id) {
                user.is_active = false;
                changed += 1;
            }
        }
        changed
    }

    fn create_pull_request(&mut self, pr: &PullRequest) -> Result<(), AppError> {
        pr.validate()?;
        if self.pull_requests.contains_key(&pr.id) {
            return Err(AppError::PrExists);
        }
        let mut stored = pr.clone();
        stored.reviewers.clear();
        self.pull_requests.insert(pr.id.clone(), stored);
        Ok(())
    }

    fn assign_reviewers(&mut self, pr_id: &str, reviewer_ids: &[String]) -> Result<(), AppError> {
        let pr = self.open_pull_request_mut(pr_id)?;
        let previous = std::mem::replace(&mut pr.reviewers, reviewer_ids.to_vec());
        for id in reviewer_ids {
            if !previous.contains(id) {
                self.assignments.push((pr_id.to_string(), id.clone()));
            }
        }
        Ok(())
    }

    fn replace_reviewer(&mut self, pr_id: &str, old: &str, new: &str) -> Result<(), AppError> {
        self.open_pull_request_mut(pr_id)?.replace_reviewer(old, new)?;
        self.assignments.push((pr_id.to_string(), new.to_string()));
        Ok(())
    }

    fn open_by_reviewers(&self, reviewer_ids: &[String]) -> Vec<PullRequest> {
        let mut prs: Vec<PullRequest> = self
            .pull_requests
            .values()
            .filter(|pr| !pr.is_merged() && pr.reviewers.iter().any(|r| reviewer_ids.contains(r)))
            .cloned()
            .collect();
        prs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        prs
    }
}

/// Gateway keeping all records in process memory.
///
/// An open scope holds the table lock until it commits or drops, so
/// `Gateway` reads on the same gateway block for that whole time. Inside a
/// scope, read through the scope.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pull request exactly as given, bypassing assignment rules.
    pub async fn insert_pull_request(&self, pr: PullRequest) {
        let mut tables = self.tables.lock().await;
        for reviewer in &pr.reviewers {
            tables.assignments.push((pr.id.clone(), reviewer.clone()));
        }
        tables.pull_requests.insert(pr.id.clone(), pr);
    }
}

#[async_trait]
impl Gateway for InMemoryGateway {
    async fn team_exists(&self, name: &str) -> Result<bool, AppError> {
        Ok(self.tables.lock().await.teams.contains_key(name))
    }

    async fn get_team(&self, name: &str) -> Result<Team, AppError> {
        self.tables.lock().await.get_team(name)
    }

    async fn get_user(&self, id: &str) -> Result<User, AppError> {
        self.tables.lock().await.get_user(id)
    }

    async fn set_user_active(&self, id: &str, is_active: bool) -> Result<User, AppError> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(id)
            .ok_or_else(|| AppError::user_not_found(id))?;
        user.is_active = is_active;
        Ok(user.clone())
    }

    async fn list_users_by_team(&self, team: &str) -> Result<Vec<User>, AppError> {
        Ok(self.tables.lock().await.users_by_team(team))
    }

    async fn list_active_by_team_excluding(
        &self,
        team: &str,
        exclude: &[String],
    ) -> Result<Vec<User>, AppError> {
        Ok(self.tables.lock().await.active_by_team_excluding(team, exclude))
    }

    async fn pr_exists(&self, id: &str) -> Result<bool, AppError> {
        Ok(self.tables.lock().await.pull_requests.contains_key(id))
    }

    async fn get_pull_request(&self, id: &str) -> Result<PullRequest, AppError> {
        self.tables.lock().await.get_pull_request(id)
    }

    async fn update_status(
        &self,
        id: &str,
        status: PrStatus,
        merged_at: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        let mut tables = self.tables.lock().await;
        let pr = tables
            .pull_requests
            .get_mut(id)
            .ok_or_else(|| AppError::pr_not_found(id))?;
        if pr.status != PrStatus::Open {
            return Ok(false);
        }
        pr.status = status;
        pr.merged_at = merged_at;
        Ok(true)
    }

    async fn list_by_reviewer(&self, user_id: &str) -> Result<Vec<PullRequest>, AppError> {
        let tables = self.tables.lock().await;
        let mut prs: Vec<PullRequest> = tables
            .pull_requests
            .values()
            .filter(|pr| pr.has_reviewer(user_id))
            .cloned()
            .collect();
        prs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(prs)
    }

    async fn reviewer_stats(&self) -> Result<HashMap<String, i64>, AppError> {
        let tables = self.tables.lock().await;
        let mut stats: HashMap<String, i64> = HashMap::new();
        for (_, user_id) in &tables.assignments {
            *stats.entry(user_id.clone()).or_default() += 1;
        }
        Ok(stats)
    }

    async fn status_stats(&self) -> Result<HashMap<PrStatus, i64>, AppError> {
        let tables = self.tables.lock().await;
        let mut stats: HashMap<PrStatus, i64> = HashMap::new();
        for pr in tables.pull_requests.values() {
            *stats.entry(pr.status).or_default() += 1;
        }
        Ok(stats)
    }

    async fn begin(&self) -> Result<Box<dyn AtomicScope + '_>, AppError> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(InMemoryScope { guard, work }))
    }
}

/// Atomic scope over a private copy of the tables.
pub struct InMemoryScope {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
}

#[async_trait]
impl AtomicScope for InMemoryScope {
    async fn create_team(&mut self, team: &Team) -> Result<(), AppError> {
        self.work.create_team(team)
    }

    async fn upsert_user(&mut self, user: &User) -> Result<(), AppError> {
        self.work.upsert_user(user)
    }

    async fn list_users_by_team(&mut self, team: &str) -> Result<Vec<User>, AppError> {
        Ok(self.work.users_by_team(team))
    }

    async fn list_active_by_team_excluding(
        &mut self,
        team: &str,
        exclude: &[String],
    ) -> Result<Vec<User>, AppError> {
        Ok(self.work.active_by_team_excluding(team, exclude))
    }

    async fn deactivate_users(&mut self, team: &str, ids: &[String]) -> Result<u64, AppError> {
        Ok(self.work.deactivate_users(team, ids))
    }

    async fn get_pull_request(&mut self, id: &str) -> Result<PullRequest, AppError> {
        self.work.get_pull_request(id)
    }

    async fn create_pull_request(&mut self, pr: &PullRequest) -> Result<(), AppError> {
        self.work.create_pull_request(pr)
    }

    async fn assign_reviewers(
        &mut self,
        pr_id: &str,
        reviewer_ids: &[String],
    ) -> Result<(), AppError> {
        self.work.assign_reviewers(pr_id, reviewer_ids)
    }

    async fn replace_reviewer(&mut self, pr_id: &str, old: &str, new: &str) -> Result<(), AppError> {
        self.work.replace_reviewer(pr_id, old, new)
    }

    async fn list_open_by_reviewers(
        &mut self,
        reviewer_ids: &[String],
    ) -> Result<Vec<PullRequest>, AppError> {
        Ok(self.work.open_by_reviewers(reviewer_ids))
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        let InMemoryScope { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn user(id: &str, team: &str, active: bool) -> User {
        User {
            id: id.to_string(),
            username: id.to_uppercase(),
            team_name: team.to_string(),
            is_active: active,
            created_at: timestamp_now(),
        }
    }

    async fn seeded() -> InMemoryGateway {
        let gateway = InMemoryGateway::new();
        let mut scope = gateway.begin().await.unwrap();
        scope
            .create_team(&Team::new("backend", timestamp_now()))
            .await
            .unwrap();
        for u in [user("u1", "backend", true), user("u2", "backend", true), user("u3", "backend", false)] {
            scope.upsert_user(&u).await.unwrap();
        }
        scope.commit().await.unwrap();
        gateway
    }

    #[tokio::test]
    async fn test_dropped_scope_discards_writes() {
        let gateway = seeded().await;
        {
            let mut scope = gateway.begin().await.unwrap();
            scope
                .create_team(&Team::new("frontend", timestamp_now()))
                .await
                .unwrap();
            scope.deactivate_users("backend", &["u1".to_string()]).await.unwrap();
        }
        assert!(!gateway.team_exists("frontend").await.unwrap());
        assert!(gateway.get_user("u1").await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_active_excluding_filters_and_orders() {
        let gateway = seeded().await;
        let pool = gateway
            .list_active_by_team_excluding("backend", &["u1".to_string()])
            .await
            .unwrap();
        let ids: Vec<&str> = pool.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["u2"]);
    }

    #[tokio::test]
    async fn test_deactivate_counts_only_changed_rows() {
        let gateway = seeded().await;
        let mut scope = gateway.begin().await.unwrap();
        let changed = scope
            .deactivate_users(
                "backend",
                &["u1".to_string(), "u3".to_string(), "ghost".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(changed, 1);
    }

    #[tokio::test]
    async fn test_update_status_only_moves_open_rows() {
        let gateway = seeded().await;
        gateway
            .insert_pull_request(PullRequest::open("pr-1", "Fix", "u1", vec![], timestamp_now()))
            .await;

        let first = timestamp_now();
        assert!(gateway
            .update_status("pr-1", PrStatus::Merged, Some(first))
            .await
            .unwrap());
        assert!(!gateway
            .update_status("pr-1", PrStatus::Merged, Some(timestamp_now()))
            .await
            .unwrap());
        assert_eq!(
            gateway.get_pull_request("pr-1").await.unwrap().merged_at,
            Some(first)
        );
        assert_eq!(
            gateway.update_status("nope", PrStatus::Merged, None).await,
            Err(AppError::pr_not_found("nope"))
        );
    }

    #[tokio::test]
    async fn test_reads_wait_for_open_scope() {
        let gateway = seeded().await;
        let scope = gateway.begin().await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), gateway.team_exists("backend")).await;
        assert!(blocked.is_err(), "read went through while the scope held the tables");

        drop(scope);
        let read = tokio::time::timeout(Duration::from_secs(1), gateway.team_exists("backend"))
            .await
            .expect("read still blocked after the scope was dropped");
        assert!(read.unwrap());
    }

    #[tokio::test]
    async fn test_scope_reads_see_own_writes() {
        let gateway = seeded().await;
        let mut scope = gateway.begin().await.unwrap();
        scope.deactivate_users("backend", &["u1".to_string()]).await.unwrap();
        let members = scope.list_users_by_team("backend").await.unwrap();
        let u1 = members.iter().find(|u| u.id == "u1").unwrap();
        assert!(!u1.is_active);
        scope.commit().await.unwrap();

        assert!(!gateway.get_user("u1").await.unwrap().is_active);
    }
}
