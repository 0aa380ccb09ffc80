//! SQLite implementation of the persistence gateway.
//!
//! Every query is written once against `&mut SqliteConnection`, so the same
//! SQL serves pooled reads and atomic scopes (a transaction derefs to its
//! connection).

use super::gateway::{AtomicScope, Gateway};
use super::pool::DbPool;
use crate::error::AppError;
use crate::models::{PrStatus, PullRequest, Team, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, Transaction};
use std::collections::HashMap;

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ── Row types ────────────────────────────────────────────────────────────────

#[derive(FromRow)]
struct TeamRow {
    team_name: String,
    created_at: i64,
}

impl From<TeamRow> for Team {
    fn from(row: TeamRow) -> Self {
        Team::new(row.team_name, from_millis(row.created_at))
    }
}

#[derive(FromRow)]
struct UserRow {
    user_id: String,
    username: String,
    team_name: String,
    is_active: bool,
    created_at: i64,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.user_id,
            username: row.username,
            team_name: row.team_name,
            is_active: row.is_active,
            created_at: from_millis(row.created_at),
        }
    }
}

#[derive(FromRow)]
struct PullRequestRow {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
    status: String,
    created_at: i64,
    merged_at: Option<i64>,
}

impl PullRequestRow {
    fn into_model(self, reviewers: Vec<String>) -> Result<PullRequest, AppError> {
        let status = self
            .status
            .parse::<PrStatus>()
            .map_err(|_| AppError::internal(format!("corrupt status '{}'", self.status)))?;
        Ok(PullRequest {
            id: self.pull_request_id,
            name: self.pull_request_name,
            author_id: self.author_id,
            status,
            reviewers,
            created_at: from_millis(self.created_at),
            merged_at: self.merged_at.map(from_millis),
        })
    }
}

const USER_COLUMNS: &str = "user_id, username, team_name, is_active, created_at";
const PR_COLUMNS: &str =
    "pull_request_id, pull_request_name, author_id, status, created_at, merged_at";

// ── Queries ──────────────────────────────────────────────────────────────────

async fn team_exists(conn: &mut SqliteConnection, name: &str) -> Result<bool, AppError> {
    let exists: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM teams WHERE team_name = ?)")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists != 0)
}

async fn get_team(conn: &mut SqliteConnection, name: &str) -> Result<Team, AppError> {
    sqlx::query_as::<_, TeamRow>("SELECT team_name, created_at FROM teams WHERE team_name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .map(Team::from)
        .ok_or_else(|| AppError::team_not_found(name))
}

async fn insert_team(conn: &mut SqliteConnection, team: &Team) -> Result<(), AppError> {
    team.validate()?;
    sqlx::query("INSERT INTO teams (team_name, created_at) VALUES (?, ?)")
        .bind(&team.name)
        .bind(to_millis(team.created_at))
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::TeamExists
            } else {
                AppError::from(e)
            }
        })?;
    Ok(())
}

async fn get_user(conn: &mut SqliteConnection, id: &str) -> Result<User, AppError> {
    sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM users WHERE user_id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(User::from)
        .ok_or_else(|| AppError::user_not_found(id))
}

async fn upsert_user(conn: &mut SqliteConnection, user: &User) -> Result<(), AppError> {
    user.validate()?;
    sqlx::query(
        r#"
        INSERT INTO users (user_id, username, team_name, is_active, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (user_id) DO UPDATE SET
            username = excluded.username,
            team_name = excluded.team_name,
            is_active = excluded.is_active
        "#,
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.team_name)
    .bind(user.is_active)
    .bind(to_millis(user.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn set_user_active(
    conn: &mut SqliteConnection,
    id: &str,
    is_active: bool,
) -> Result<User, AppError> {
    sqlx::query_as::<_, UserRow>(&format!(
        "UPDATE users SET is_active = ? WHERE user_id = ? RETURNING {}",
        USER_COLUMNS
    ))
    .bind(is_active)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .map(User::from)
    .ok_or_else(|| AppError::user_not_found(id))
}

async fn list_users_by_team(conn: &mut SqliteConnection, team: &str) -> Result<Vec<User>, AppError> {
    let rows = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {} FROM users WHERE team_name = ? ORDER BY user_id",
        USER_COLUMNS
    ))
    .bind(team)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(User::from).collect())
}

async fn list_active_by_team_excluding(
    conn: &mut SqliteConnection,
    team: &str,
    exclude: &[String],
) -> Result<Vec<User>, AppError> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {} FROM users WHERE is_active = 1 AND team_name = ",
        USER_COLUMNS
    ));
    qb.push_bind(team.to_string());
    if !exclude.is_empty() {
        qb.push(" AND user_id NOT IN (");
        let mut ids = qb.separated(", ");
        for id in exclude {
            ids.push_bind(id.clone());
        }
        ids.push_unseparated(")");
    }
    qb.push(" ORDER BY user_id");

    let rows = qb.build_query_as::<UserRow>().fetch_all(&mut *conn).await?;
    Ok(rows.into_iter().map(User::from).collect())
}

async fn deactivate_users(
    conn: &mut SqliteConnection,
    team: &str,
    ids: &[String],
) -> Result<u64, AppError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("UPDATE users SET is_active = 0 WHERE is_active = 1 AND team_name = ");
    qb.push_bind(team.to_string());
    qb.push(" AND user_id IN (");
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(id.clone());
    }
    sep.push_unseparated(")");

    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

async fn pr_exists(conn: &mut SqliteConnection, id: &str) -> Result<bool, AppError> {
    let exists: i64 = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM pull_requests WHERE pull_request_id = ?)",
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists != 0)
}

async fn load_reviewers(conn: &mut SqliteConnection, pr_id: &str) -> Result<Vec<String>, AppError> {
    let reviewers: Vec<String> =
        sqlx::query_scalar("SELECT user_id FROM pr_reviewers WHERE pr_id = ? ORDER BY position")
            .bind(pr_id)
            .fetch_all(&mut *conn)
            .await?;
    Ok(reviewers)
}

async fn hydrate(
    conn: &mut SqliteConnection,
    rows: Vec<PullRequestRow>,
) -> Result<Vec<PullRequest>, AppError> {
    let mut prs = Vec::with_capacity(rows.len());
    for row in rows {
        let reviewers = load_reviewers(conn, &row.pull_request_id).await?;
        prs.push(row.into_model(reviewers)?);
    }
    Ok(prs)
}

async fn get_pull_request(conn: &mut SqliteConnection, id: &str) -> Result<PullRequest, AppError> {
    let row = sqlx::query_as::<_, PullRequestRow>(&format!(
        "SELECT {} FROM pull_requests WHERE pull_request_id = ?",
        PR_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::pr_not_found(id))?;

    let reviewers = load_reviewers(conn, id).await?;
    row.into_model(reviewers)
}

async fn insert_pull_request(conn: &mut SqliteConnection, pr: &PullRequest) -> Result<(), AppError> {
    pr.validate()?;
    sqlx::query(
        r#"
        INSERT INTO pull_requests (pull_request_id, pull_request_name, author_id, status, created_at, merged_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&pr.id)
    .bind(&pr.name)
    .bind(&pr.author_id)
    .bind(pr.status.as_str())
    .bind(to_millis(pr.created_at))
    .bind(pr.merged_at.map(to_millis))
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::PrExists
        } else {
            AppError::from(e)
        }
    })?;
    Ok(())
}

async fn update_status(
    conn: &mut SqliteConnection,
    id: &str,
    status: PrStatus,
    merged_at: Option<DateTime<Utc>>,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        "UPDATE pull_requests SET status = ?, merged_at = ? WHERE pull_request_id = ? AND status = 'OPEN'",
    )
    .bind(status.as_str())
    .bind(merged_at.map(to_millis))
    .bind(id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        return Ok(true);
    }
    if pr_exists(conn, id).await? {
        Ok(false)
    } else {
        Err(AppError::pr_not_found(id))
    }
}

/// Fail unless the pull request exists and is still open.
async fn ensure_open(conn: &mut SqliteConnection, pr_id: &str) -> Result<(), AppError> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM pull_requests WHERE pull_request_id = ?")
            .bind(pr_id)
            .fetch_optional(&mut *conn)
            .await?;
    match status.as_deref() {
        None => Err(AppError::pr_not_found(pr_id)),
        Some("OPEN") => Ok(()),
        Some(_) => Err(AppError::PrMerged),
    }
}

async fn record_assignment(
    conn: &mut SqliteConnection,
    pr_id: &str,
    user_id: &str,
    now: i64,
) -> Result<(), AppError> {
    sqlx::query("INSERT INTO reviewer_assignments (pr_id, user_id, assigned_at) VALUES (?, ?, ?)")
        .bind(pr_id)
        .bind(user_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn assign_reviewers(
    conn: &mut SqliteConnection,
    pr_id: &str,
    reviewer_ids: &[String],
) -> Result<(), AppError> {
    ensure_open(conn, pr_id).await?;
    let previous = load_reviewers(conn, pr_id).await?;
    let now = to_millis(crate::models::timestamp_now());

    sqlx::query("DELETE FROM pr_reviewers WHERE pr_id = ?")
        .bind(pr_id)
        .execute(&mut *conn)
        .await?;

    for (position, user_id) in reviewer_ids.iter().enumerate() {
        sqlx::query(
            "INSERT INTO pr_reviewers (pr_id, user_id, position, assigned_at) VALUES (?, ?, ?, ?)",
        )
        .bind(pr_id)
        .bind(user_id)
        .bind(position as i64)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if !previous.contains(user_id) {
            record_assignment(conn, pr_id, user_id, now).await?;
        }
    }
    Ok(())
}

async fn replace_reviewer(
    conn: &mut SqliteConnection,
    pr_id: &str,
    old: &str,
    new: &str,
) -> Result<(), AppError> {
    ensure_open(conn, pr_id).await?;
    let now = to_millis(crate::models::timestamp_now());

    let result = sqlx::query(
        "UPDATE pr_reviewers SET user_id = ?, assigned_at = ? WHERE pr_id = ? AND user_id = ?",
    )
    .bind(new)
    .bind(now)
    .bind(pr_id)
    .bind(old)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotAssigned);
    }
    record_assignment(conn, pr_id, new, now).await
}

async fn list_by_reviewer(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<PullRequest>, AppError> {
    let rows = sqlx::query_as::<_, PullRequestRow>(
        r#"
        SELECT DISTINCT pr.pull_request_id, pr.pull_request_name, pr.author_id,
               pr.status, pr.created_at, pr.merged_at
        FROM pull_requests pr
        INNER JOIN pr_reviewers rev ON pr.pull_request_id = rev.pr_id
        WHERE rev.user_id = ?
        ORDER BY pr.created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    hydrate(conn, rows).await
}

async fn list_open_by_reviewers(
    conn: &mut SqliteConnection,
    reviewer_ids: &[String],
) -> Result<Vec<PullRequest>, AppError> {
    if reviewer_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
        SELECT DISTINCT pr.pull_request_id, pr.pull_request_name, pr.author_id,
               pr.status, pr.created_at, pr.merged_at
        FROM pull_requests pr
        INNER JOIN pr_reviewers rev ON pr.pull_request_id = rev.pr_id
        WHERE pr.status = 'OPEN' AND rev.user_id IN (
        "#,
    );
    let mut sep = qb.separated(", ");
    for id in reviewer_ids {
        sep.push_bind(id.clone());
    }
    sep.push_unseparated(")");
    qb.push(" ORDER BY pr.created_at, pr.pull_request_id");

    let rows = qb
        .build_query_as::<PullRequestRow>()
        .fetch_all(&mut *conn)
        .await?;
    hydrate(conn, rows).await
}

async fn reviewer_stats(conn: &mut SqliteConnection) -> Result<HashMap<String, i64>, AppError> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT user_id, COUNT(*) FROM reviewer_assignments GROUP BY user_id",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().collect())
}

async fn status_stats(conn: &mut SqliteConnection) -> Result<HashMap<PrStatus, i64>, AppError> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM pull_requests GROUP BY status")
            .fetch_all(&mut *conn)
            .await?;

    let mut stats = HashMap::new();
    for (status, count) in rows {
        let status = status
            .parse::<PrStatus>()
            .map_err(|_| AppError::internal(format!("corrupt status '{}'", status)))?;
        stats.insert(status, count);
    }
    Ok(stats)
}

// ── Gateway ──────────────────────────────────────────────────────────────────

/// Gateway over a SQLite pool.
#[derive(Clone)]
pub struct SqliteGateway {
    pool: DbPool,
}

impl SqliteGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Gateway for SqliteGateway {
    async fn team_exists(&self, name: &str) -> Result<bool, AppError> {
        let mut conn = self.pool.acquire().await?;
        team_exists(&mut conn, name).await
    }

    async fn get_team(&self, name: &str) -> Result<Team, AppError> {
        let mut conn = self.pool.acquire().await?;
        get_team(&mut conn, name).await
    }

    async fn get_user(&self, id: &str) -> Result<User, AppError> {
        let mut conn = self.pool.acquire().await?;
        get_user(&mut conn, id).await
    }

    async fn set_user_active(&self, id: &str, is_active: bool) -> Result<User, AppError> {
        let mut conn = self.pool.acquire().await?;
        set_user_active(&mut conn, id, is_active).await
    }

    async fn list_users_by_team(&self, team: &str) -> Result<Vec<User>, AppError> {
        let mut conn = self.pool.acquire().await?;
        list_users_by_team(&mut conn, team).await
    }

    async fn list_active_by_team_excluding(
        &self,
        team: &str,
        exclude: &[String],
    ) -> Result<Vec<User>, AppError> {
        let mut conn = self.pool.acquire().await?;
        list_active_by_team_excluding(&mut conn, team, exclude).await
    }

    async fn pr_exists(&self, id: &str) -> Result<bool, AppError> {
        let mut conn = self.pool.acquire().await?;
        pr_exists(&mut conn, id).await
    }

    async fn get_pull_request(&self, id: &str) -> Result<PullRequest, AppError> {
        let mut conn = self.pool.acquire().await?;
        get_pull_request(&mut conn, id).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: PrStatus,
        merged_at: Option<DateTime<Utc>>,
    ) -> Result<bool, AppError> {
        let mut conn = self.pool.acquire().await?;
        update_status(&mut conn, id, status, merged_at).await
    }

    async fn list_by_reviewer(&self, user_id: &str) -> Result<Vec<PullRequest>, AppError> {
        let mut conn = self.pool.acquire().await?;
        list_by_reviewer(&mut conn, user_id).await
    }

    async fn reviewer_stats(&self) -> Result<HashMap<String, i64>, AppError> {
        let mut conn = self.pool.acquire().await?;
        reviewer_stats(&mut conn).await
    }

    async fn status_stats(&self) -> Result<HashMap<PrStatus, i64>, AppError> {
        let mut conn = self.pool.acquire().await?;
        status_stats(&mut conn).await
    }

    async fn begin(&self) -> Result<Box<dyn AtomicScope + '_>, AppError> {
        // IMMEDIATE takes the write lock up front so reads inside the scope
        // cannot go stale before the scope writes.
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqliteScope { tx }))
    }
}

/// Atomic scope backed by a SQLite transaction. Dropping it rolls back.
pub struct SqliteScope {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl AtomicScope for SqliteScope {
    async fn create_team(&mut self, team: &Team) -> Result<(), AppError> {
        insert_team(&mut self.tx, team).await
    }

    async fn upsert_user(&mut self, user: &User) -> Result<(), AppError> {
        upsert_user(&mut self.tx, user).await
    }

    async fn list_users_by_team(&mut self, team: &str) -> Result<Vec<User>, AppError> {
        list_users_by_team(&mut self.tx, team).await
    }

    async fn list_active_by_team_excluding(
        &mut self,
        team: &str,
        exclude: &[String],
    ) -> Result<Vec<User>, AppError> {
        list_active_by_team_excluding(&mut self.tx, team, exclude).await
    }

    async fn deactivate_users(&mut self, team: &str, ids: &[String]) -> Result<u64, AppError> {
        deactivate_users(&mut self.tx, team, ids).await
    }

    async fn get_pull_request(&mut self, id: &str) -> Result<PullRequest, AppError> {
        get_pull_request(&mut self.tx, id).await
    }

    async fn create_pull_request(&mut self, pr: &PullRequest) -> Result<(), AppError> {
        insert_pull_request(&mut self.tx, pr).await
    }

    async fn assign_reviewers(
        &mut self,
        pr_id: &str,
        reviewer_ids: &[String],
    ) -> Result<(), AppError> {
        assign_reviewers(&mut self.tx, pr_id, reviewer_ids).await
    }

    async fn replace_reviewer(&mut self, pr_id: &str, old: &str, new: &str) -> Result<(), AppError> {
        replace_reviewer(&mut self.tx, pr_id, old, new).await
    }

    async fn list_open_by_reviewers(
        &mut self,
        reviewer_ids: &[String],
    ) -> Result<Vec<PullRequest>, AppError> {
        list_open_by_reviewers(&mut self.tx, reviewer_ids).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await?;
        Ok(())
    }
}
