//! Assignment and status statistics.

use super::guarded;
use crate::db::Gateway;
use crate::error::AppError;
use crate::models::PrStatus;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewerStat {
    pub user_id: String,
    pub assignments_count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrStats {
    pub open: i64,
    pub merged: i64,
}

pub struct StatsAggregator {
    gateway: Arc<dyn Gateway>,
}

impl StatsAggregator {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// Assignment counts per reviewer, highest first.
    ///
    /// Every persisted assignment counts, including ones later replaced.
    /// Order among equal counts is unspecified.
    pub async fn reviewer_stats(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReviewerStat>, AppError> {
        let counts = guarded(cancel, self.gateway.reviewer_stats()).await?;
        let mut stats: Vec<ReviewerStat> = counts
            .into_iter()
            .map(|(user_id, assignments_count)| ReviewerStat {
                user_id,
                assignments_count,
            })
            .collect();
        stats.sort_by(|a, b| b.assignments_count.cmp(&a.assignments_count));
        Ok(stats)
    }

    pub async fn pr_stats(&self, cancel: &CancellationToken) -> Result<PrStats, AppError> {
        let counts = guarded(cancel, self.gateway.status_stats()).await?;
        Ok(PrStats {
            open: counts.get(&PrStatus::Open).copied().unwrap_or(0),
            merged: counts.get(&PrStatus::Merged).copied().unwrap_or(0),
        })
    }
}
