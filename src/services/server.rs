//! HTTP server for the assignment service.
//!
//! Builds the axum router, wraps it in request tracing and panic recovery,
//! and runs it until the shutdown token fires. Every request gets a child of
//! that token plus a deadline, so in-flight work aborts cleanly on shutdown.

use crate::db::Gateway;
use crate::error::AppError;
use crate::services::api::{pull_request_routes, stats_routes, team_routes, user_routes};
use crate::services::{AssignmentEngine, ReviewerSelector, StatsAggregator, TeamService, UserService};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Shared state for the axum routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AssignmentEngine>,
    pub teams: Arc<TeamService>,
    pub users: Arc<UserService>,
    pub stats: Arc<StatsAggregator>,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        selector: ReviewerSelector,
        shutdown: CancellationToken,
        request_timeout: Duration,
    ) -> Self {
        Self {
            engine: Arc::new(AssignmentEngine::new(gateway.clone(), selector)),
            teams: Arc::new(TeamService::new(gateway.clone())),
            users: Arc::new(UserService::new(gateway.clone())),
            stats: Arc::new(StatsAggregator::new(gateway)),
            shutdown,
            request_timeout,
        }
    }

    /// Token for one request. Fires on server shutdown.
    pub fn request_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Drive `fut` under the request deadline.
    ///
    /// On expiry the future is dropped, which rolls back any open scope, and
    /// `cancel` is fired for anything else observing it.
    pub async fn within_deadline<T, F>(
        &self,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                cancel.cancel();
                log::warn!(
                    "[server] Request exceeded {:?} deadline",
                    self.request_timeout
                );
                Err(AppError::Cancelled)
            }
        }
    }
}

/// Build the full router with middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(team_routes())
        .merge(user_routes())
        .merge(pull_request_routes())
        .merge(stats_routes())
        .route("/health", get(health))
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "OK"
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    log::error!("[server] Handler panicked: {}", detail);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": { "code": "INTERNAL_ERROR", "message": "internal server error" }
        })),
    )
        .into_response()
}

/// Handle to control the running server.
pub struct ServerHandle {
    cancel_token: CancellationToken,
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn stop(self) {
        log::info!("[server] Stopping server on {}", self.addr);
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            log::error!("[server] Server task failed: {}", e);
        }
    }
}

/// Bind `addr` and serve in a background task.
///
/// The server stops when `state.shutdown` is cancelled, either directly or
/// through [`ServerHandle::stop`].
pub async fn start_server(addr: SocketAddr, state: AppState) -> Result<ServerHandle, AppError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind to {}: {}", addr, e)))?;
    let local = listener
        .local_addr()
        .map_err(|e| AppError::internal(format!("Failed to read bound address: {}", e)))?;

    let cancel_token = state.shutdown.clone();
    let cancel_clone = cancel_token.clone();
    let app = router(state);

    log::info!("[server] Listening on http://{}", local);

    let task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_clone.cancelled().await;
        });

        if let Err(e) = server.await {
            log::error!("[server] Server error: {}", e);
        }

        log::info!("[server] Server stopped");
    });

    Ok(ServerHandle {
        cancel_token,
        addr: local,
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryGateway;

    fn state(timeout: Duration) -> AppState {
        AppState::new(
            Arc::new(InMemoryGateway::new()),
            ReviewerSelector::seeded(1),
            CancellationToken::new(),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_deadline_expiry_cancels_request() {
        let state = state(Duration::from_millis(20));
        let cancel = state.request_token();
        let res: Result<(), AppError> = state
            .within_deadline(&cancel, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(res, Err(AppError::Cancelled));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_reaches_request_tokens() {
        let state = state(Duration::from_secs(1));
        let cancel = state.request_token();
        assert!(!cancel.is_cancelled());
        state.shutdown.cancel();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let handle = start_server(SocketAddr::from(([127, 0, 0, 1], 0)), state(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        handle.stop().await;
    }
}
