use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::database::connection::Database;
use crate::models::episode::IdleEpisode;
use crate::models::session::SessionRecord;
use crate::tracker::engine::{IdleTracker, StartOutcome, StopOutcome};
use crate::tracker::error::TrackerError;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 500;

type JsonReply = (StatusCode, Json<Value>);

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<IdleTracker>,
    /// `None` when the database was unreachable at startup.
    pub database: Option<Database>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/api/start", post(start_tracking))
        .route("/api/stop", post(stop_tracking))
        .route("/api/status", get(status))
        .route("/api/logs", get(logs))
        .route("/api/clear", post(clear_logs))
        .route("/api/config", post(configure))
        .route("/api/history", get(history))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn display_time(at: &DateTime<Local>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub threshold: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigRequest {
    pub threshold: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StatusReply {
    pub tracking_active: bool,
    pub is_idle: bool,
    pub idle_seconds: i64,
    pub last_activity: String,
    pub procrastination_score: u8,
    pub total_idle_time: f64,
    pub idle_events: usize,
    pub threshold: i64,
    pub idle_since: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EpisodeReply {
    pub start: String,
    pub end: String,
    pub duration_secs: f64,
}

impl From<&IdleEpisode> for EpisodeReply {
    fn from(episode: &IdleEpisode) -> Self {
        Self {
            start: display_time(&episode.start),
            end: display_time(&episode.end),
            duration_secs: round2(episode.duration_secs),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogsReply {
    pub logs: Vec<EpisodeReply>,
    pub total_events: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionReply {
    pub id: Option<i32>,
    pub start_time: String,
    pub stop_time: String,
    pub procrastination_score: i32,
    pub total_idle_time: f64,
    pub idle_events: i32,
}

impl From<SessionRecord> for SessionReply {
    fn from(record: SessionRecord) -> Self {
        Self {
            id: record.id,
            start_time: display_time(&record.start_time),
            stop_time: display_time(&record.stop_time),
            procrastination_score: record.procrastination_score,
            total_idle_time: round2(record.total_idle_time),
            idle_events: record.idle_events,
        }
    }
}

pub async fn home() -> Json<Value> {
    Json(json!({ "message": "Procrastination tracker running" }))
}

pub async fn start_tracking(
    State(state): State<AppState>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> JsonReply {
    // A request without a JSON content type keeps the configured threshold;
    // a JSON body that does not parse is rejected.
    let threshold = match body {
        Ok(Json(request)) => request.threshold,
        Err(JsonRejection::MissingJsonContentType(_)) => None,
        Err(rejection) => {
            log::debug!("Rejected start request: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "invalid_threshold", "message": rejection.body_text() })),
            );
        }
    };
    match state.tracker.start(threshold, Local::now()) {
        Ok(StartOutcome::Started { threshold_secs }) => (
            StatusCode::OK,
            Json(json!({
                "status": "started",
                "message": "Tracking started successfully",
                "threshold": threshold_secs,
            })),
        ),
        Ok(StartOutcome::AlreadyRunning) => (
            StatusCode::OK,
            Json(json!({
                "status": "already_running",
                "message": "Tracking is already active",
            })),
        ),
        Err(e @ TrackerError::InvalidThreshold(_)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "invalid_threshold", "message": e.to_string() })),
        ),
        Err(e) => internal_error(e),
    }
}

pub async fn stop_tracking(State(state): State<AppState>) -> JsonReply {
    match state.tracker.stop(Local::now()) {
        Ok(StopOutcome::Stopped(_)) => (
            StatusCode::OK,
            Json(json!({
                "status": "stopped",
                "message": "Tracking stopped successfully",
            })),
        ),
        Ok(StopOutcome::NotRunning) => (
            StatusCode::OK,
            Json(json!({
                "status": "not_running",
                "message": "Tracking is not active",
            })),
        ),
        Err(e) => internal_error(e),
    }
}

fn internal_error(e: TrackerError) -> JsonReply {
    log::error!("Tracker invariant violated: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "invariant_violation", "message": e.to_string() })),
    )
}

pub async fn status(State(state): State<AppState>) -> Json<StatusReply> {
    let snapshot = state.tracker.snapshot(Local::now());
    Json(StatusReply {
        tracking_active: snapshot.active,
        is_idle: snapshot.is_idle,
        idle_seconds: snapshot.idle_seconds,
        last_activity: display_time(&snapshot.last_activity_at),
        procrastination_score: snapshot.score,
        total_idle_time: round2(snapshot.total_idle_secs),
        idle_events: snapshot.episode_count,
        threshold: snapshot.threshold_secs,
        idle_since: snapshot.idle_since.as_ref().map(display_time),
    })
}

pub async fn logs(State(state): State<AppState>) -> Json<LogsReply> {
    let episodes = state.tracker.episodes();
    Json(LogsReply {
        total_events: episodes.len(),
        logs: episodes.iter().map(EpisodeReply::from).collect(),
    })
}

pub async fn clear_logs(State(state): State<AppState>) -> Json<Value> {
    state.tracker.reset();
    Json(json!({
        "status": "cleared",
        "message": "Logs cleared successfully",
    }))
}

/// Sets the idle threshold for the next session.
pub async fn configure(State(state): State<AppState>, Json(request): Json<ConfigRequest>) -> JsonReply {
    match state.tracker.configure(request.threshold) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "configured", "threshold": request.threshold })),
        ),
        Err(e @ TrackerError::InvalidThreshold(_)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "invalid_threshold", "message": e.to_string() })),
        ),
        Err(e @ TrackerError::SessionRunning) => (
            StatusCode::CONFLICT,
            Json(json!({ "status": "already_running", "message": e.to_string() })),
        ),
        Err(e) => internal_error(e),
    }
}

pub async fn history(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> JsonReply {
    let Some(database) = state.database.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable", "message": "Session history is not available without a database" })),
        );
    };

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    match database.recent_sessions(limit).await {
        Ok(records) => {
            let sessions: Vec<SessionReply> = records.into_iter().map(SessionReply::from).collect();
            (
                StatusCode::OK,
                Json(json!({ "count": sessions.len(), "sessions": sessions })),
            )
        }
        Err(e) => {
            log::error!("Failed to load session history: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": "Failed to load session history" })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::testing::CountingSource;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use chrono::{Duration, TimeZone};
    use tower::ServiceExt;

    fn state() -> AppState {
        let tracker = IdleTracker::new(20, Arc::new(CountingSource::default()), None).unwrap();
        AppState {
            tracker: Arc::new(tracker),
            database: None,
        }
    }

    fn start_body(threshold: Option<i64>) -> Result<Json<StartRequest>, JsonRejection> {
        Ok(Json(StartRequest { threshold }))
    }

    async fn post_start(state: AppState, content_type: Option<&str>, body: &'static str) -> (StatusCode, Value) {
        let mut request = Request::builder().method("POST").uri("/api/start");
        if let Some(content_type) = content_type {
            request = request.header(header::CONTENT_TYPE, content_type);
        }
        let response = router(state)
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let code = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (code, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_start_and_already_running() {
        let state = state();
        let (code, Json(body)) = start_tracking(State(state.clone()), start_body(Some(30))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "started");
        assert_eq!(body["threshold"], 30);

        let (code, Json(body)) = start_tracking(State(state.clone()), start_body(None)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "already_running");
    }

    #[tokio::test]
    async fn test_start_without_body_uses_configured_threshold() {
        let (_, Json(body)) = start_tracking(State(state()), start_body(None)).await;
        assert_eq!(body["status"], "started");
        assert_eq!(body["threshold"], 20);
    }

    #[tokio::test]
    async fn test_start_rejects_bad_threshold() {
        let state = state();
        let (code, Json(body)) = start_tracking(State(state.clone()), start_body(Some(0))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "invalid_threshold");
        assert!(!state.tracker.is_running());
    }

    #[tokio::test]
    async fn test_start_request_without_json_keeps_threshold() {
        let state = state();
        let (code, body) = post_start(state.clone(), None, "").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "started");
        assert_eq!(body["threshold"], 20);
    }

    #[tokio::test]
    async fn test_start_request_with_json_threshold() {
        let (code, body) = post_start(state(), Some("application/json"), r#"{"threshold":35}"#).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["threshold"], 35);

        let (code, body) = post_start(state(), Some("application/json"), "{}").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["threshold"], 20);
    }

    #[tokio::test]
    async fn test_start_request_with_malformed_threshold_is_rejected() {
        let bodies = vec![r#"{"threshold":"abc"}"#, r#"{"threshold":2.5}"#, r#"{"threshold":"#];
        for raw in bodies {
            let state = state();
            let (code, body) = post_start(state.clone(), Some("application/json"), raw).await;
            assert_eq!(code, StatusCode::BAD_REQUEST, "body {}", raw);
            assert_eq!(body["status"], "invalid_threshold", "body {}", raw);
            assert!(!state.tracker.is_running(), "body {} started a session", raw);
        }
    }

    #[tokio::test]
    async fn test_stop_round_trip() {
        let state = state();
        let (_, Json(body)) = stop_tracking(State(state.clone())).await;
        assert_eq!(body["status"], "not_running");

        let (_, Json(body)) = start_tracking(State(state.clone()), start_body(None)).await;
        assert_eq!(body["status"], "started");
        let (code, Json(body)) = stop_tracking(State(state.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "stopped");
    }

    #[tokio::test]
    async fn test_status_fields() {
        let state = state();
        let (_, Json(body)) = start_tracking(State(state.clone()), start_body(None)).await;
        assert_eq!(body["status"], "started");

        let Json(reply) = status(State(state.clone())).await;
        assert!(reply.tracking_active);
        assert!(!reply.is_idle);
        assert_eq!(reply.procrastination_score, 0);
        assert_eq!(reply.idle_events, 0);
        assert_eq!(reply.threshold, 20);
        assert_eq!(reply.idle_since, None);
        assert_eq!(reply.last_activity.len(), "2024-01-01 00:00:00".len());
    }

    #[tokio::test]
    async fn test_logs_and_clear() {
        let state = state();
        let t0 = Local::now() - Duration::seconds(120);
        state.tracker.start(None, t0).unwrap();
        state.tracker.tick(t0 + Duration::seconds(21));
        state.tracker.on_activity(t0 + Duration::seconds(50)).unwrap();

        let Json(reply) = logs(State(state.clone())).await;
        assert_eq!(reply.total_events, 1);
        assert_eq!(reply.logs[0].duration_secs, 30.0);
        assert_eq!(reply.logs[0].start, display_time(&(t0 + Duration::seconds(20))));

        let Json(body) = clear_logs(State(state.clone())).await;
        assert_eq!(body["status"], "cleared");
        let Json(reply) = logs(State(state.clone())).await;
        assert_eq!(reply.total_events, 0);
        assert!(state.tracker.is_running());
    }

    #[tokio::test]
    async fn test_configure_between_sessions() {
        let state = state();
        let (code, Json(body)) = configure(State(state.clone()), Json(ConfigRequest { threshold: 45 })).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["threshold"], 45);

        let (code, _) = configure(State(state.clone()), Json(ConfigRequest { threshold: -1 })).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);

        let (_, Json(body)) = start_tracking(State(state.clone()), start_body(None)).await;
        assert_eq!(body["threshold"], 45);
        let (code, Json(body)) = configure(State(state.clone()), Json(ConfigRequest { threshold: 10 })).await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert_eq!(body["status"], "already_running");
    }

    #[tokio::test]
    async fn test_history_without_database() {
        let (code, Json(body)) = history(State(state()), Query(HistoryQuery::default())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unavailable");
    }

    #[test]
    fn test_session_reply_formats_for_display() {
        let record = SessionRecord {
            id: Some(7),
            start_time: Local.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap(),
            stop_time: Local.with_ymd_and_hms(2025, 3, 4, 10, 30, 15).unwrap(),
            procrastination_score: 42,
            total_idle_time: 252.456,
            idle_events: 3,
        };
        let reply = SessionReply::from(record);
        assert_eq!(reply.start_time, "2025-03-04 09:00:00");
        assert_eq!(reply.stop_time, "2025-03-04 10:30:15");
        assert_eq!(reply.total_idle_time, 252.46);
    }
}
