//! Business logic services.
//!
//! The assignment engine and its companions (team, user and stats services)
//! sit between the HTTP layer and the persistence gateway. They hold no state
//! of their own beyond the gateway handle and the reviewer selector.
//!
//! Every operation takes a [`CancellationToken`]. Reads race against it, and
//! atomic scopes re-check it right before committing, so a fired token never
//! leaves partial writes behind.

pub mod api;
pub mod assignment;
pub mod selector;
pub mod server;
pub mod stats;
pub mod teams;
pub mod users;

pub use assignment::{AssignmentEngine, DeactivationResult, ReassignOutcome};
pub use selector::ReviewerSelector;
pub use stats::{PrStats, ReviewerStat, StatsAggregator};
pub use teams::{NewMember, TeamService};
pub use users::UserService;

use crate::db::AtomicScope;
use crate::error::AppError;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `fut` unless `cancel` fires first.
///
/// A future dropped here drops any scope it owns, which rolls it back.
pub(crate) async fn guarded<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        res = fut => res,
    }
}

/// Commit `scope` if the caller is still waiting for the result.
pub(crate) async fn commit_scope(
    scope: Box<dyn AtomicScope + '_>,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    scope.commit().await
}
