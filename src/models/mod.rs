//! Domain models.
//!
//! Teams, users and pull requests with their validation and state-transition
//! rules. Pure data: nothing here performs I/O.

pub mod pull_request;
pub mod team;
pub mod user;

// Re-exports for convenient access
pub use pull_request::{PrStatus, PullRequest, PullRequestShort, MAX_REVIEWERS};
pub use team::{Team, TeamMember, TeamWithMembers};
pub use user::User;

use chrono::{DateTime, Utc};

/// Current time truncated to millisecond precision, the precision timestamps
/// are persisted at. Values handed back to callers then equal what a later
/// read returns.
pub fn timestamp_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
