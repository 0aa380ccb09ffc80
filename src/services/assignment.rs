//! Reviewer assignment engine.
//!
//! Creates pull requests with randomly chosen reviewers, merges them, swaps
//! single reviewers, and repairs reviewer slots when team members are
//! deactivated in bulk. Multi-step writes always run inside one atomic scope.

use super::{commit_scope, guarded, ReviewerSelector};
use crate::db::Gateway;
use crate::error::AppError;
use crate::models::{timestamp_now, PrStatus, PullRequest, MAX_REVIEWERS};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of a single reviewer swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReassignOutcome {
    #[serde(rename = "pr")]
    pub pull_request: PullRequest,
    pub replaced_by: String,
}

/// Result of a bulk deactivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeactivationResult {
    pub team_name: String,
    pub deactivated_count: u64,
    pub affected_pr_count: u64,
}

impl DeactivationResult {
    fn empty(team_name: &str) -> Self {
        Self {
            team_name: team_name.to_string(),
            deactivated_count: 0,
            affected_pr_count: 0,
        }
    }
}

pub struct AssignmentEngine {
    gateway: Arc<dyn Gateway>,
    selector: ReviewerSelector,
}

impl AssignmentEngine {
    pub fn new(gateway: Arc<dyn Gateway>, selector: ReviewerSelector) -> Self {
        Self { gateway, selector }
    }

    /// Create an open pull request and assign up to two reviewers picked at
    /// random from the author's active teammates.
    pub async fn create_pr(
        &self,
        id: &str,
        name: &str,
        author_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PullRequest, AppError> {
        PullRequest::open(id, name, author_id, Vec::new(), timestamp_now()).validate()?;

        if guarded(cancel, self.gateway.pr_exists(id)).await? {
            return Err(AppError::PrExists);
        }
        let author = guarded(cancel, self.gateway.get_user(author_id)).await?;
        let pool = guarded(
            cancel,
            self.gateway
                .list_active_by_team_excluding(&author.team_name, &[author.id.clone()]),
        )
        .await?;

        let reviewers = self.selector.pick(&pool, MAX_REVIEWERS);
        let pr = PullRequest::open(id, name, author_id, reviewers, timestamp_now());
        pr.validate()?;

        let scope = guarded(cancel, async {
            let mut scope = self.gateway.begin().await?;
            scope.create_pull_request(&pr).await?;
            if !pr.reviewers.is_empty() {
                scope.assign_reviewers(&pr.id, &pr.reviewers).await?;
            }
            Ok::<_, AppError>(scope)
        })
        .await?;
        commit_scope(scope, cancel).await?;

        log::info!(
            "[engine] Created pull request {} by {} with reviewers {:?}",
            pr.id,
            pr.author_id,
            pr.reviewers
        );
        Ok(pr)
    }

    /// Merge a pull request. Merging an already merged one returns it as is.
    pub async fn merge_pr(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<PullRequest, AppError> {
        let mut pr = guarded(cancel, self.gateway.get_pull_request(id)).await?;
        if pr.is_merged() {
            return Ok(pr);
        }
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        pr.merge();
        let won = self
            .gateway
            .update_status(id, PrStatus::Merged, pr.merged_at)
            .await?;
        if !won {
            // A concurrent merge landed first; its timestamp is final.
            log::debug!("[engine] Pull request {} was merged concurrently", id);
            return self.gateway.get_pull_request(id).await;
        }

        log::info!("[engine] Merged pull request {}", id);
        Ok(pr)
    }

    /// Replace `old_user_id` on a pull request with a random active teammate
    /// of the old reviewer.
    pub async fn reassign_reviewer(
        &self,
        pr_id: &str,
        old_user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ReassignOutcome, AppError> {
        let pr = guarded(cancel, self.gateway.get_pull_request(pr_id)).await?;
        pr.can_modify_reviewers()?;
        if !pr.has_reviewer(old_user_id) {
            return Err(AppError::NotAssigned);
        }

        let old = guarded(cancel, self.gateway.get_user(old_user_id)).await?;
        let mut exclude = pr.reviewers.clone();
        exclude.push(pr.author_id.clone());
        let pool = guarded(
            cancel,
            self.gateway
                .list_active_by_team_excluding(&old.team_name, &exclude),
        )
        .await?;
        let new_id = self.selector.pick_one(&pool).ok_or(AppError::NoCandidate)?;

        let (scope, updated) = guarded(cancel, async {
            let mut scope = self.gateway.begin().await?;
            let current = scope.get_pull_request(pr_id).await?;
            current.can_modify_reviewers()?;
            if !current.has_reviewer(old_user_id) {
                return Err(AppError::NotAssigned);
            }
            if current.has_reviewer(&new_id) || current.author_id == new_id {
                return Err(AppError::NoCandidate);
            }
            scope.replace_reviewer(pr_id, old_user_id, &new_id).await?;
            let updated = scope.get_pull_request(pr_id).await?;
            Ok::<_, AppError>((scope, updated))
        })
        .await?;
        commit_scope(scope, cancel).await?;

        log::info!(
            "[engine] Reassigned pull request {}: {} -> {}",
            pr_id,
            old_user_id,
            new_id
        );
        Ok(ReassignOutcome {
            pull_request: updated,
            replaced_by: new_id,
        })
    }

    /// Deactivate members of `team_name` and repair every open pull request
    /// they were reviewing, all in one atomic scope.
    ///
    /// Each freed slot gets a random active teammate who is neither the
    /// author nor already on the pull request. Slots with no candidate are
    /// dropped.
    pub async fn deactivate_team_users(
        &self,
        team_name: &str,
        user_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<DeactivationResult, AppError> {
        if user_ids.is_empty() {
            return Ok(DeactivationResult::empty(team_name));
        }
        guarded(cancel, self.gateway.get_team(team_name)).await?;

        let mut requested: Vec<String> = Vec::with_capacity(user_ids.len());
        for id in user_ids {
            if !requested.contains(id) {
                requested.push(id.clone());
            }
        }

        let (scope, result) = guarded(cancel, async {
            let mut scope = self.gateway.begin().await?;

            let deactivated_count = scope.deactivate_users(team_name, &requested).await?;
            if deactivated_count == 0 {
                return Ok((scope, DeactivationResult::empty(team_name)));
            }

            let members = scope.list_users_by_team(team_name).await?;
            let deactivated: HashSet<String> = members
                .into_iter()
                .map(|u| u.id)
                .filter(|id| requested.contains(id))
                .collect();
            let deactivated_ids: Vec<String> = deactivated.iter().cloned().collect();

            let affected = scope.list_open_by_reviewers(&deactivated_ids).await?;
            let affected_pr_count = affected.len() as u64;

            for pr in affected {
                let mut exclude: Vec<String> = pr.reviewers.clone();
                exclude.push(pr.author_id.clone());

                let mut rebuilt = Vec::with_capacity(pr.reviewers.len());
                for reviewer in &pr.reviewers {
                    if !deactivated.contains(reviewer) {
                        rebuilt.push(reviewer.clone());
                        continue;
                    }
                    let pool = scope
                        .list_active_by_team_excluding(team_name, &exclude)
                        .await?;
                    match self.selector.pick_one(&pool) {
                        Some(replacement) => {
                            exclude.push(replacement.clone());
                            rebuilt.push(replacement);
                        }
                        None => {
                            log::warn!(
                                "[engine] No replacement for {} on pull request {}; slot dropped",
                                reviewer,
                                pr.id
                            );
                        }
                    }
                }
                scope.assign_reviewers(&pr.id, &rebuilt).await?;
            }

            Ok::<_, AppError>((
                scope,
                DeactivationResult {
                    team_name: team_name.to_string(),
                    deactivated_count,
                    affected_pr_count,
                },
            ))
        })
        .await?;
        commit_scope(scope, cancel).await?;

        log::info!(
            "[engine] Deactivated {} user(s) in team {}, repaired {} pull request(s)",
            result.deactivated_count,
            team_name,
            result.affected_pr_count
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryGateway;
    use crate::models::{Team, User};

    fn member(id: &str, team: &str, active: bool) -> User {
        User {
            id: id.to_string(),
            username: format!("user-{}", id),
            team_name: team.to_string(),
            is_active: active,
            created_at: timestamp_now(),
        }
    }

    async fn seed(gateway: &InMemoryGateway, team: &str, members: &[(&str, bool)]) {
        let exists = gateway.team_exists(team).await.unwrap();
        let mut scope = gateway.begin().await.unwrap();
        if !exists {
            scope.create_team(&Team::new(team, timestamp_now())).await.unwrap();
        }
        for (id, active) in members {
            scope.upsert_user(&member(id, team, *active)).await.unwrap();
        }
        scope.commit().await.unwrap();
    }

    fn engine(gateway: &InMemoryGateway, seed: u64) -> AssignmentEngine {
        AssignmentEngine::new(Arc::new(gateway.clone()), ReviewerSelector::seeded(seed))
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_seeding_an_existing_team_adds_members() {
        let gateway = InMemoryGateway::new();
        let seeding = async {
            seed(&gateway, "T", &[("A", true)]).await;
            seed(&gateway, "T", &[("B", true)]).await;
        };
        tokio::time::timeout(std::time::Duration::from_secs(1), seeding)
            .await
            .expect("seeding blocked on its own scope");

        let members = gateway.list_users_by_team("T").await.unwrap();
        let ids: Vec<&str> = members.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_create_pr_picks_two_active_teammates_never_author() {
        let gateway = InMemoryGateway::new();
        seed(&gateway, "T", &[("A", true), ("B", true), ("C", true), ("D", false)]).await;
        seed(&gateway, "other", &[("X", true)]).await;
        let cancel = CancellationToken::new();

        for seed_value in 0..25 {
            let engine = engine(&gateway, seed_value);
            let id = format!("pr-{}", seed_value);
            let pr = engine.create_pr(&id, "x", "A", &cancel).await.unwrap();

            assert_eq!(pr.status, PrStatus::Open);
            assert_eq!(pr.merged_at, None);
            assert_eq!(pr.reviewers.len(), 2);
            assert!(!pr.has_reviewer("A"));
            assert!(!pr.has_reviewer("D"));
            assert!(!pr.has_reviewer("X"));
            assert_ne!(pr.reviewers[0], pr.reviewers[1]);
            assert_eq!(gateway.get_pull_request(&id).await.unwrap(), pr);
        }
    }

    #[tokio::test]
    async fn test_create_pr_with_small_pools() {
        let gateway = InMemoryGateway::new();
        seed(&gateway, "solo", &[("A", true)]).await;
        seed(&gateway, "pair", &[("P", true), ("Q", true)]).await;
        let engine = engine(&gateway, 3);
        let cancel = CancellationToken::new();

        let alone = engine.create_pr("pr-1", "x", "A", &cancel).await.unwrap();
        assert!(alone.reviewers.is_empty());

        let paired = engine.create_pr("pr-2", "x", "P", &cancel).await.unwrap();
        assert_eq!(paired.reviewers, vec!["Q"]);
    }

    #[tokio::test]
    async fn test_create_pr_errors() {
        let gateway = InMemoryGateway::new();
        seed(&gateway, "T", &[("A", true), ("B", true)]).await;
        let engine = engine(&gateway, 1);
        let cancel = CancellationToken::new();

        engine.create_pr("pr-1", "x", "A", &cancel).await.unwrap();
        assert_eq!(
            engine.create_pr("pr-1", "y", "B", &cancel).await,
            Err(AppError::PrExists)
        );
        assert_eq!(
            engine.create_pr("pr-2", "x", "ghost", &cancel).await,
            Err(AppError::user_not_found("ghost"))
        );
        assert!(matches!(
            engine.create_pr(" ", "x", "A", &cancel).await,
            Err(AppError::InvalidInput { .. })
        ));
        assert!(!gateway.pr_exists("pr-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_pr_cancelled_writes_nothing() {
        let gateway = InMemoryGateway::new();
        seed(&gateway, "T", &[("A", true), ("B", true)]).await;
        let engine = engine(&gateway, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(
            engine.create_pr("pr-1", "x", "A", &cancel).await,
            Err(AppError::Cancelled)
        );
        assert!(!gateway.pr_exists("pr-1").await.unwrap());
        assert!(gateway.reviewer_stats().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_twice_keeps_first_timestamp() {
        let gateway = InMemoryGateway::new();
        seed(&gateway, "T", &[("A", true), ("B", true)]).await;
        gateway
            .insert_pull_request(PullRequest::open("pr1", "x", "A", ids(&["B"]), timestamp_now()))
            .await;
        let engine = engine(&gateway, 1);
        let cancel = CancellationToken::new();

        let first = engine.merge_pr("pr1", &cancel).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = engine.merge_pr("pr1", &cancel).await.unwrap();

        assert_eq!(first.status, PrStatus::Merged);
        assert_eq!(second.status, PrStatus::Merged);
        assert!(first.merged_at.is_some());
        assert_eq!(first.merged_at, second.merged_at);
        assert_eq!(second.reviewers, vec!["B"]);
        assert_eq!(gateway.get_pull_request("pr1").await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_merge_unknown_pr() {
        let gateway = InMemoryGateway::new();
        let engine = engine(&gateway, 1);
        assert_eq!(
            engine.merge_pr("nope", &CancellationToken::new()).await,
            Err(AppError::pr_not_found("nope"))
        );
    }

    #[tokio::test]
    async fn test_reassign_swaps_in_place() {
        let gateway = InMemoryGateway::new();
        seed(&gateway, "T", &[("A", true), ("B", true), ("C", true), ("D", true)]).await;
        gateway
            .insert_pull_request(PullRequest::open("pr1", "x", "A", ids(&["B", "C"]), timestamp_now()))
            .await;
        let engine = engine(&gateway, 9);

        let outcome = engine
            .reassign_reviewer("pr1", "B", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.replaced_by, "D");
        assert_eq!(outcome.pull_request.reviewers, vec!["D", "C"]);
        assert_eq!(
            gateway.get_pull_request("pr1").await.unwrap().reviewers,
            vec!["D", "C"]
        );
        assert_eq!(gateway.reviewer_stats().await.unwrap().get("D"), Some(&1));
    }

    #[tokio::test]
    async fn test_reassign_failures_leave_pr_unchanged() {
        let gateway = InMemoryGateway::new();
        seed(&gateway, "T", &[("A", true), ("B", true), ("C", true)]).await;
        let mut merged = PullRequest::open("merged", "x", "A", ids(&["B"]), timestamp_now());
        merged.merge();
        gateway.insert_pull_request(merged.clone()).await;
        gateway
            .insert_pull_request(PullRequest::open("full", "x", "A", ids(&["B", "C"]), timestamp_now()))
            .await;
        let engine = engine(&gateway, 2);
        let cancel = CancellationToken::new();

        assert_eq!(
            engine.reassign_reviewer("merged", "B", &cancel).await,
            Err(AppError::PrMerged)
        );
        assert_eq!(gateway.get_pull_request("merged").await.unwrap(), merged);

        assert_eq!(
            engine.reassign_reviewer("full", "A", &cancel).await,
            Err(AppError::NotAssigned)
        );
        assert_eq!(
            engine.reassign_reviewer("full", "B", &cancel).await,
            Err(AppError::NoCandidate)
        );
        assert_eq!(
            gateway.get_pull_request("full").await.unwrap().reviewers,
            vec!["B", "C"]
        );
        assert_eq!(
            engine.reassign_reviewer("missing", "B", &cancel).await,
            Err(AppError::pr_not_found("missing"))
        );
    }

    #[tokio::test]
    async fn test_reassign_uses_old_reviewers_team() {
        let gateway = InMemoryGateway::new();
        seed(&gateway, "T", &[("A", true)]).await;
        seed(&gateway, "U", &[("B", true), ("E", true)]).await;
        gateway
            .insert_pull_request(PullRequest::open("pr1", "x", "A", ids(&["B"]), timestamp_now()))
            .await;
        let engine = engine(&gateway, 4);

        let outcome = engine
            .reassign_reviewer("pr1", "B", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.replaced_by, "E");
    }

    #[tokio::test]
    async fn test_deactivate_empty_list_is_noop() {
        let gateway = InMemoryGateway::new();
        let engine = engine(&gateway, 1);
        let result = engine
            .deactivate_team_users("nowhere", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, DeactivationResult::empty("nowhere"));
    }

    #[tokio::test]
    async fn test_deactivate_unknown_team() {
        let gateway = InMemoryGateway::new();
        let engine = engine(&gateway, 1);
        assert_eq!(
            engine
                .deactivate_team_users("nowhere", &ids(&["A"]), &CancellationToken::new())
                .await,
            Err(AppError::team_not_found("nowhere"))
        );
    }

    #[tokio::test]
    async fn test_deactivate_without_candidates_drops_slot() {
        let gateway = InMemoryGateway::new();
        seed(&gateway, "T", &[("A", true), ("B", true)]).await;
        gateway
            .insert_pull_request(PullRequest::open("pr1", "x", "A", ids(&["B"]), timestamp_now()))
            .await;
        let engine = engine(&gateway, 1);

        let result = engine
            .deactivate_team_users("T", &ids(&["B"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.deactivated_count, 1);
        assert_eq!(result.affected_pr_count, 1);

        let pr = gateway.get_pull_request("pr1").await.unwrap();
        assert!(pr.reviewers.is_empty());
        assert!(!gateway.get_user("B").await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_deactivate_repairs_open_prs_only() {
        let gateway = InMemoryGateway::new();
        seed(
            &gateway,
            "T",
            &[("A", true), ("B", true), ("C", true), ("D", true), ("E", true)],
        )
        .await;
        gateway
            .insert_pull_request(PullRequest::open("open", "x", "A", ids(&["B", "C"]), timestamp_now()))
            .await;
        let mut merged = PullRequest::open("merged", "x", "A", ids(&["B"]), timestamp_now());
        merged.merge();
        gateway.insert_pull_request(merged).await;
        let engine = engine(&gateway, 11);

        let result = engine
            .deactivate_team_users("T", &ids(&["B", "C", "B"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.deactivated_count, 2);
        assert_eq!(result.affected_pr_count, 1);

        let open = gateway.get_pull_request("open").await.unwrap();
        let mut repaired = open.reviewers.clone();
        repaired.sort();
        assert_eq!(repaired, vec!["D", "E"]);

        let merged = gateway.get_pull_request("merged").await.unwrap();
        assert_eq!(merged.reviewers, vec!["B"]);
    }

    #[tokio::test]
    async fn test_deactivate_never_leaves_inactive_reviewers() {
        for seed_value in 0..10 {
            let gateway = InMemoryGateway::new();
            seed(
                &gateway,
                "T",
                &[("A", true), ("B", true), ("C", true), ("D", true), ("E", true), ("F", true)],
            )
            .await;
            let engine = engine(&gateway, seed_value);
            let cancel = CancellationToken::new();
            for n in 0..6 {
                let author = ["A", "B", "C", "D", "E", "F"][n];
                engine
                    .create_pr(&format!("pr-{}", n), "x", author, &cancel)
                    .await
                    .unwrap();
            }

            let gone = ids(&["B", "C", "D"]);
            engine.deactivate_team_users("T", &gone, &cancel).await.unwrap();

            for n in 0..6 {
                let pr = gateway.get_pull_request(&format!("pr-{}", n)).await.unwrap();
                assert!(pr.reviewers.len() <= MAX_REVIEWERS);
                assert!(!pr.has_reviewer(&pr.author_id));
                for reviewer in &pr.reviewers {
                    assert!(!gone.contains(reviewer), "{} still reviews {}", reviewer, pr.id);
                }
                if pr.reviewers.len() == 2 {
                    assert_ne!(pr.reviewers[0], pr.reviewers[1]);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_deactivate_ignores_other_teams_members() {
        let gateway = InMemoryGateway::new();
        seed(&gateway, "T", &[("A", true), ("B", true)]).await;
        seed(&gateway, "U", &[("X", true)]).await;
        let engine = engine(&gateway, 1);

        let result = engine
            .deactivate_team_users("T", &ids(&["X"]), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.deactivated_count, 0);
        assert!(gateway.get_user("X").await.unwrap().is_active);
    }
}
