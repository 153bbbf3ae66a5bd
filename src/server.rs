//! JSON HTTP API over a [`Watcher`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `GET`    | `/targets` | List targets (`?active=true` for active only) |
//! | `POST`   | `/targets` | Create a target and run its baseline check |
//! | `GET`    | `/targets/{id}` | Fetch one target |
//! | `PATCH`  | `/targets/{id}` | Update fields; reschedules as needed |
//! | `DELETE` | `/targets/{id}` | Delete target, job and index |
//! | `POST`   | `/targets/{id}/check` | Check now, outside the schedule |
//! | `POST`   | `/targets/{id}/ask` | Answer a question from the index |
//! | `GET`    | `/targets/{id}/changes` | Change history, newest first (`?limit=`) |
//! | `GET`    | `/targets/{id}/stats` | Index statistics |
//! | `POST`   | `/targets/{id}/subscribers` | Subscribe an email address |
//! | `GET`    | `/jobs` | Scheduled jobs, soonest first |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "interval must be between ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `upstream` (502),
//! `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use sitewatch_core::models::{
    Answer, ChangeRecord, CheckResult, IndexStats, MonitoredTarget, NewTarget, ScheduledJob,
    Subscription, TargetUpdate,
};
use sitewatch_core::WatchError;

use crate::config::Config;
use crate::watcher::{CreatedTarget, Watcher};

const DEFAULT_HISTORY_LIMIT: usize = 20;

type AppState = Arc<Watcher>;

/// Build the watcher from `config`, start its scheduler and serve until
/// Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let watcher = Arc::new(Watcher::from_config(config).await?);
    let jobs = watcher.start().await?;

    let app = router(watcher.clone());
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!(
        "sitewatch listening on http://{} ({} jobs scheduled)",
        config.server.bind, jobs
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    watcher.stop().await;
    tracing::info!("server stopped");
    Ok(())
}

/// All routes, with CORS open to any origin.
pub fn router(watcher: Arc<Watcher>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/targets", get(handle_list_targets).post(handle_create_target))
        .route(
            "/targets/{id}",
            get(handle_get_target)
                .patch(handle_update_target)
                .delete(handle_delete_target),
        )
        .route("/targets/{id}/check", post(handle_check))
        .route("/targets/{id}/ask", post(handle_ask))
        .route("/targets/{id}/changes", get(handle_changes))
        .route("/targets/{id}/stats", get(handle_stats))
        .route("/targets/{id}/subscribers", post(handle_subscribe))
        .route("/jobs", get(handle_jobs))
        .layer(cors)
        .with_state(watcher)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(id: &str) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: format!("no target with id: {}", id),
    }
}

impl From<WatchError> for AppError {
    fn from(err: WatchError) -> Self {
        let (status, code) = match &err {
            WatchError::Validation(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            WatchError::Fetch(_) | WatchError::Completion(_) => {
                (StatusCode::BAD_GATEWAY, "upstream")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(kind = err.kind(), error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Targets ============

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    active: bool,
}

async fn handle_list_targets(
    State(w): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<MonitoredTarget>> {
    Ok(Json(w.list_targets(params.active).await?))
}

async fn handle_create_target(
    State(w): State<AppState>,
    Json(new): Json<NewTarget>,
) -> Result<(StatusCode, Json<CreatedTarget>), AppError> {
    let created = w.create_target(new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn handle_get_target(
    State(w): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<MonitoredTarget> {
    w.get_target(&id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

async fn handle_update_target(
    State(w): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<TargetUpdate>,
) -> ApiResult<MonitoredTarget> {
    w.update_target(&id, &update)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

async fn handle_delete_target(
    State(w): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if w.delete_target(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&id))
    }
}

// ============ Checks and answers ============

async fn handle_check(
    State(w): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CheckResult> {
    w.trigger_now(&id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

async fn handle_ask(
    State(w): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> ApiResult<Answer> {
    w.ask(&id, &req.question)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn handle_changes(
    State(w): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Vec<ChangeRecord>> {
    if w.get_target(&id).await?.is_none() {
        return Err(not_found(&id));
    }
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(w.history(&id, limit).await?))
}

async fn handle_stats(
    State(w): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<IndexStats> {
    if w.get_target(&id).await?.is_none() {
        return Err(not_found(&id));
    }
    Ok(Json(w.stats(&id).await?))
}

#[derive(Deserialize)]
struct SubscribeRequest {
    email: String,
}

async fn handle_subscribe(
    State(w): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    let sub = w
        .subscribe(&id, req.email.trim())
        .await?
        .ok_or_else(|| not_found(&id))?;
    Ok((StatusCode::CREATED, Json(sub)))
}

// ============ GET /jobs ============

async fn handle_jobs(State(w): State<AppState>) -> Json<Vec<ScheduledJob>> {
    Json(w.list_scheduled_jobs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use sitewatch_core::store::memory::InMemoryStore;

    use crate::testing::{KeywordEmbedder, ManualClock, MockCompletion, MockFetcher, RecordingNotifier};
    use crate::watcher::{Components, WatcherOptions};

    const URL: &str = "https://example.com/hours";

    fn app() -> Router {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.set_page(
            URL,
            &format!(
                "<html><body><main><p>{}</p></main></body></html>",
                "The library opens at nine and closes at five. ".repeat(6)
            ),
        );
        let store = Arc::new(InMemoryStore::new());
        let watcher = Watcher::new(
            Components {
                records: store.clone(),
                chunks: store,
                embedder: Arc::new(KeywordEmbedder::default()),
                fetcher,
                completion: Arc::new(MockCompletion::replying("It opens at nine.")),
                notifier: Arc::new(RecordingNotifier::new()),
                clock: Arc::new(ManualClock::default()),
            },
            WatcherOptions::default(),
        );
        router(Arc::new(watcher))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn new_target() -> serde_json::Value {
        serde_json::json!({
            "owner": { "kind": "agent", "agent_id": "agent-1" },
            "url": URL,
            "interval_secs": 3600
        })
    }

    #[tokio::test]
    async fn test_health_reports_version() {
        let (status, body) = send(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_create_then_ask() {
        let app = app();
        let (status, created) = send(&app, "POST", "/targets", Some(new_target())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["baseline"]["status"], "baseline");
        let id = created["target"]["id"].as_str().unwrap().to_string();

        let (status, answer) = send(
            &app,
            "POST",
            &format!("/targets/{}/ask", id),
            Some(serde_json::json!({ "question": "When does the library open?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(answer["text"], "It opens at nine.");
        assert_eq!(answer["source_url"], URL);

        let (_, jobs) = send(&app, "GET", "/jobs", None).await;
        assert_eq!(jobs.as_array().unwrap().len(), 1);
        assert_eq!(jobs[0]["job_key"], format!("scrape_{}", id));
    }

    #[tokio::test]
    async fn test_validation_error_is_400() {
        let mut bad = new_target();
        bad["interval_secs"] = serde_json::json!(1);
        let (status, body) = send(&app(), "POST", "/targets", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_unknown_target_is_404() {
        let app = app();
        for (method, uri) in [
            ("GET", "/targets/missing"),
            ("POST", "/targets/missing/check"),
            ("GET", "/targets/missing/stats"),
            ("DELETE", "/targets/missing"),
        ] {
            let (status, body) = send(&app, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
            assert_eq!(body["error"]["code"], "not_found");
        }
    }

    #[tokio::test]
    async fn test_delete_removes_job() {
        let app = app();
        let (_, created) = send(&app, "POST", "/targets", Some(new_target())).await;
        let id = created["target"]["id"].as_str().unwrap().to_string();

        let (status, _) = send(&app, "DELETE", &format!("/targets/{}", id), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, jobs) = send(&app, "GET", "/jobs", None).await;
        assert!(jobs.as_array().unwrap().is_empty());
        let (_, targets) = send(&app, "GET", "/targets", None).await;
        assert!(targets.as_array().unwrap().is_empty());
    }
}
