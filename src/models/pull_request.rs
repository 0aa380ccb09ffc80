//! Pull request model.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of reviewers a pull request may carry.
pub const MAX_REVIEWERS: usize = 2;

/// State of a pull request. Transitions only `Open -> Merged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrStatus {
    Open,
    Merged,
}

impl PrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Merged => "MERGED",
        }
    }
}

impl std::str::FromStr for PrStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "MERGED" => Ok(Self::Merged),
            other => Err(AppError::invalid_input_field(
                format!("invalid status: {}", other),
                "status",
            )),
        }
    }
}

impl std::fmt::Display for PrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pull request and its ordered reviewer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    #[serde(rename = "pull_request_id")]
    pub id: String,

    #[serde(rename = "pull_request_name")]
    pub name: String,

    pub author_id: String,

    pub status: PrStatus,

    /// Reviewer user ids in assignment order (0..=2, distinct, never the author).
    #[serde(rename = "assigned_reviewers")]
    pub reviewers: Vec<String>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    /// Set once on the first transition to `Merged`.
    #[serde(rename = "mergedAt", skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
}

impl PullRequest {
    /// Build a fresh open pull request.
    pub fn open(
        id: impl Into<String>,
        name: impl Into<String>,
        author_id: impl Into<String>,
        reviewers: Vec<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            author_id: author_id.into(),
            status: PrStatus::Open,
            reviewers,
            created_at,
            merged_at: None,
        }
    }

    /// Check required fields and reviewer invariants.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.id.trim().is_empty() {
            return Err(AppError::invalid_input_field(
                "pull_request_id cannot be empty",
                "pull_request_id",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(AppError::invalid_input_field(
                "pull_request_name cannot be empty",
                "pull_request_name",
            ));
        }
        if self.author_id.trim().is_empty() {
            return Err(AppError::invalid_input_field(
                "author_id cannot be empty",
                "author_id",
            ));
        }
        if self.reviewers.len() > MAX_REVIEWERS {
            return Err(AppError::invalid_input_field(
                format!("cannot have more than {} reviewers", MAX_REVIEWERS),
                "assigned_reviewers",
            ));
        }
        if self.reviewers.iter().any(|r| r == &self.author_id) {
            return Err(AppError::invalid_input_field(
                "author cannot review their own pull request",
                "assigned_reviewers",
            ));
        }
        if self.reviewers.len() == MAX_REVIEWERS && self.reviewers[0] == self.reviewers[1] {
            return Err(AppError::invalid_input_field(
                "duplicate reviewer",
                "assigned_reviewers",
            ));
        }
        Ok(())
    }

    pub fn is_merged(&self) -> bool {
        self.status == PrStatus::Merged
    }

    /// Reviewers may only change while the pull request is open.
    pub fn can_modify_reviewers(&self) -> Result<(), AppError> {
        if self.is_merged() {
            return Err(AppError::PrMerged);
        }
        Ok(())
    }

    pub fn has_reviewer(&self, user_id: &str) -> bool {
        self.reviewers.iter().any(|r| r == user_id)
    }

    /// Merge now. See [`PullRequest::merge_at`].
    pub fn merge(&mut self) {
        self.merge_at(super::timestamp_now());
    }

    /// Transition to `Merged` at `now`.
    ///
    /// Idempotent: an already merged pull request keeps its original
    /// `merged_at`.
    pub fn merge_at(&mut self, now: DateTime<Utc>) {
        if self.is_merged() {
            return;
        }
        self.status = PrStatus::Merged;
        self.merged_at = Some(now);
    }

    /// Swap `old` for `new` in place, keeping its slot position.
    pub fn replace_reviewer(&mut self, old: &str, new: &str) -> Result<(), AppError> {
        self.can_modify_reviewers()?;
        let slot = self
            .reviewers
            .iter_mut()
            .find(|r| r.as_str() == old)
            .ok_or(AppError::NotAssigned)?;
        *slot = new.to_string();
        Ok(())
    }
}

/// Short listing form used by the reviews-of-user view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequestShort {
    #[serde(rename = "pull_request_id")]
    pub id: String,
    #[serde(rename = "pull_request_name")]
    pub name: String,
    pub author_id: String,
    pub status: PrStatus,
}

impl From<PullRequest> for PullRequestShort {
    fn from(pr: PullRequest) -> Self {
        Self {
            id: pr.id,
            name: pr.name,
            author_id: pr.author_id,
            status: pr.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(status: PrStatus, reviewers: &[&str]) -> PullRequest {
        PullRequest {
            id: "pr-1".to_string(),
            name: "Test PR".to_string(),
            author_id: "u1".to_string(),
            status,
            reviewers: reviewers.iter().map(|s| s.to_string()).collect(),
            created_at: Utc::now(),
            merged_at: None,
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut pr = sample(PrStatus::Open, &["u2", "u3"]);
        let first = Utc::now();
        pr.merge_at(first);
        assert_eq!(pr.status, PrStatus::Merged);
        assert_eq!(pr.merged_at, Some(first));

        pr.merge_at(first + Duration::seconds(30));
        assert_eq!(pr.status, PrStatus::Merged);
        assert_eq!(pr.merged_at, Some(first), "merged_at must never be overwritten");
        assert_eq!(pr.reviewers, vec!["u2", "u3"]);
    }

    #[test]
    fn test_can_modify_reviewers() {
        assert!(sample(PrStatus::Open, &[]).can_modify_reviewers().is_ok());
        assert_eq!(
            sample(PrStatus::Merged, &[]).can_modify_reviewers(),
            Err(AppError::PrMerged)
        );
    }

    #[test]
    fn test_has_reviewer() {
        let pr = sample(PrStatus::Open, &["u2", "u3"]);
        assert!(pr.has_reviewer("u2"));
        assert!(pr.has_reviewer("u3"));
        assert!(!pr.has_reviewer("u1"));
        assert!(!pr.has_reviewer(""));
    }

    #[test]
    fn test_validate() {
        assert!(sample(PrStatus::Open, &["u2"]).validate().is_ok());

        let mut blank_id = sample(PrStatus::Open, &[]);
        blank_id.id = "  ".to_string();
        assert!(matches!(
            blank_id.validate(),
            Err(AppError::InvalidInput { .. })
        ));

        let mut blank_name = sample(PrStatus::Open, &[]);
        blank_name.name = String::new();
        assert!(blank_name.validate().is_err());

        let mut blank_author = sample(PrStatus::Open, &[]);
        blank_author.author_id = String::new();
        assert!(blank_author.validate().is_err());

        assert!(sample(PrStatus::Open, &["u2", "u3", "u4"]).validate().is_err());
        assert!(sample(PrStatus::Open, &["u1"]).validate().is_err());
        assert!(sample(PrStatus::Open, &["u2", "u2"]).validate().is_err());
    }

    #[test]
    fn test_replace_reviewer_keeps_slot() {
        let mut pr = sample(PrStatus::Open, &["u2", "u3"]);
        pr.replace_reviewer("u2", "u4").unwrap();
        assert_eq!(pr.reviewers, vec!["u4", "u3"]);
        assert_eq!(pr.replace_reviewer("u9", "u5"), Err(AppError::NotAssigned));

        let mut merged = sample(PrStatus::Merged, &["u2"]);
        assert_eq!(merged.replace_reviewer("u2", "u4"), Err(AppError::PrMerged));
        assert_eq!(merged.reviewers, vec!["u2"]);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        assert_eq!("OPEN".parse::<PrStatus>().unwrap(), PrStatus::Open);
        assert_eq!(PrStatus::Merged.to_string(), "MERGED");
        assert!("closed".parse::<PrStatus>().is_err());
    }

    #[test]
    fn test_serializes_wire_names() {
        let json = serde_json::to_value(sample(PrStatus::Open, &["u2"])).unwrap();
        assert_eq!(json["pull_request_id"], "pr-1");
        assert_eq!(json["status"], "OPEN");
        assert_eq!(json["assigned_reviewers"][0], "u2");
        assert!(json.get("mergedAt").is_none());
    }
}
