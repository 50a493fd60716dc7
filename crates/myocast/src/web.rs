//! Web endpoints for myocast.
//!
//! JSON control routes for the patient registry and the capture state
//! machine, plus a WebSocket that streams every sample frame as text.
//!
//! Capture operations can block on file I/O (stop waits for the session
//! file to flush), so handlers run them on the blocking pool.

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use myocapture::{
    CaptureCore, CaptureError, ChannelMask, PatientRecord, PatientRef, PatientStore, StartCapture,
    CHANNEL_COUNT,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::live::LiveFeed;

/// Samples returned by `/capture/recent` without a `limit`.
const DEFAULT_RECENT: usize = 50;

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub core: Arc<CaptureCore>,
    pub registry: Arc<dyn PatientStore>,
    pub feed: LiveFeed,
    pub snapshots_dir: PathBuf,
    pub started: Instant,
    /// Cancelled on process shutdown; ends live viewer connections.
    pub shutdown: CancellationToken,
}

impl WebState {
    pub fn new(
        core: Arc<CaptureCore>,
        registry: Arc<dyn PatientStore>,
        feed: LiveFeed,
        snapshots_dir: PathBuf,
    ) -> Self {
        Self {
            core,
            registry,
            feed,
            snapshots_dir,
            started: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn router(state: WebState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(serve_root))
        .route("/health", get(health))
        .route("/patients", post(register_patient).get(list_patients))
        .route("/patients/{id}", get(get_patient))
        .route("/capture/start", post(start_capture))
        .route("/capture/stop", post(stop_capture))
        .route("/capture/status", get(capture_status))
        .route("/capture/recent", get(recent_samples))
        .route("/capture/snapshot", post(snapshot))
        .route("/capture/channels", get(get_channels).put(set_channels))
        .route("/stream", get(stream_ws))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Error response: `{error, message}` with a status derived from the error kind.
#[derive(Debug)]
pub enum ApiError {
    Capture(CaptureError),
    Internal(String),
}

impl From<CaptureError> for ApiError {
    fn from(e: CaptureError) -> Self {
        Self::Capture(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Capture(CaptureError::validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Capture(e) => {
                let status = match &e {
                    CaptureError::Validation(_) => StatusCode::BAD_REQUEST,
                    CaptureError::NotFound { .. } => StatusCode::NOT_FOUND,
                    CaptureError::Conflict(_) => StatusCode::CONFLICT,
                    CaptureError::ShuttingDown | CaptureError::WriterUnavailable => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    CaptureError::Io(_) | CaptureError::Csv(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.kind(), e.to_string())
            }
            ApiError::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        };

        if status.is_server_error() {
            tracing::error!(error.kind = kind, "{message}");
        }
        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

/// Run a blocking capture operation off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, CaptureError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("capture task failed: {e}")))?
        .map_err(ApiError::from)
}

fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(CaptureError::validation(format!("{field} is required")).into()),
    }
}

/// Serve root discovery endpoint
async fn serve_root() -> impl IntoResponse {
    Json(json!({
        "name": "myocast",
        "version": env!("CARGO_PKG_VERSION"),
        "links": {
            "health": "/health",
            "patients": "/patients",
            "status": "/capture/status",
            "stream": "/stream",
        }
    }))
}

async fn health(State(state): State<WebState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_secs": state.started.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "viewers": state.feed.viewers(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPatient {
    name: Option<String>,
    patient_id: Option<String>,
    affected_limb: Option<String>,
    observations: Option<String>,
}

#[tracing::instrument(name = "http.patients.register", skip(state, body))]
async fn register_patient(
    State(state): State<WebState>,
    body: Result<Json<RegisterPatient>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(body) = body?;
    let name = required("name", body.name)?;
    let patient_id = required("patientId", body.patient_id)?;
    let affected_limb = required("affectedLimb", body.affected_limb)?;
    let observations = body
        .observations
        .ok_or_else(|| ApiError::from(CaptureError::validation("observations is required")))?;

    let record = PatientRecord::new(patient_id, name, affected_limb, observations)?;
    let registry = state.registry.clone();
    blocking(move || registry.register(record)).await?;

    Ok(Json(json!({ "message": "Patient registered" })))
}

#[tracing::instrument(name = "http.patients.list", skip(state))]
async fn list_patients(
    State(state): State<WebState>,
) -> Result<Json<Vec<PatientRecord>>, ApiError> {
    let registry = state.registry.clone();
    Ok(Json(blocking(move || registry.all()).await?))
}

#[tracing::instrument(name = "http.patients.get", skip(state))]
async fn get_patient(
    State(state): State<WebState>,
    Path(id): Path<String>,
) -> Result<Json<PatientRecord>, ApiError> {
    let registry = state.registry.clone();
    Ok(Json(blocking(move || registry.find_by_id(&id)).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    patient_id: Option<String>,
    name: Option<String>,
    session_label: Option<String>,
    observations: Option<String>,
}

#[tracing::instrument(
    name = "http.capture.start",
    skip(state, body),
    fields(patient.id = tracing::field::Empty, session = tracing::field::Empty)
)]
async fn start_capture(
    State(state): State<WebState>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let patient = match (body.patient_id, body.name) {
        (Some(id), _) if !id.trim().is_empty() => PatientRef::Id(id),
        (_, Some(name)) if !name.trim().is_empty() => PatientRef::Name(name),
        _ => {
            return Err(CaptureError::validation("patientId or name is required").into());
        }
    };
    let request = StartCapture {
        patient,
        session_label: required("sessionLabel", body.session_label)?,
        observations: required("observations", body.observations)?,
    };

    let core = state.core.clone();
    match blocking(move || core.start_session(request)).await {
        Ok(info) => {
            let span = tracing::Span::current();
            span.record("patient.id", info.patient_id.as_str());
            span.record("session", info.session_label.as_str());
            Ok(Json(json!({
                "message": format!("Capture started for {}", info.patient_name),
                "exists": true,
                "session": info,
            }))
            .into_response())
        }
        Err(ApiError::Capture(CaptureError::NotFound { what })) => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({
                "message": format!("{what} is not registered"),
                "exists": false,
            })),
        )
            .into_response()),
        Err(e) => Err(e),
    }
}

#[tracing::instrument(name = "http.capture.stop", skip(state))]
async fn stop_capture(State(state): State<WebState>) -> Result<Json<serde_json::Value>, ApiError> {
    let core = state.core.clone();
    let body = match blocking(move || core.stop_session()).await? {
        Some(summary) => json!({ "message": "Capture stopped", "session": summary }),
        None => json!({ "message": "No capture in progress" }),
    };
    Ok(Json(body))
}

#[tracing::instrument(name = "http.capture.status", skip(state))]
async fn capture_status(
    State(state): State<WebState>,
) -> Result<Json<myocapture::CaptureStatus>, ApiError> {
    let core = state.core.clone();
    Ok(Json(blocking(move || Ok(core.status())).await?))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn recent_samples(
    State(state): State<WebState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<myocapture::Sample>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_RECENT);
    let core = state.core.clone();
    Ok(Json(blocking(move || Ok(core.recent(limit))).await?))
}

#[derive(Debug, Serialize)]
struct SnapshotResponse {
    path: Option<PathBuf>,
    rows: usize,
}

#[tracing::instrument(name = "http.capture.snapshot", skip(state))]
async fn snapshot(State(state): State<WebState>) -> Result<Json<SnapshotResponse>, ApiError> {
    let core = state.core.clone();
    let dir = state.snapshots_dir.clone();
    let snapshot = blocking(move || core.flush_ring(&dir)).await?;
    Ok(Json(match snapshot {
        Some(s) => SnapshotResponse {
            path: Some(s.path),
            rows: s.rows,
        },
        None => SnapshotResponse {
            path: None,
            rows: 0,
        },
    }))
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelsBody {
    mask: [bool; CHANNEL_COUNT],
}

async fn get_channels(State(state): State<WebState>) -> Result<Json<ChannelsBody>, ApiError> {
    let core = state.core.clone();
    let mask = blocking(move || Ok(core.channel_mask())).await?;
    Ok(Json(ChannelsBody { mask: mask.flags() }))
}

#[tracing::instrument(name = "http.capture.channels", skip(state, body))]
async fn set_channels(
    State(state): State<WebState>,
    body: Result<Json<ChannelsBody>, JsonRejection>,
) -> Result<Json<ChannelsBody>, ApiError> {
    let Json(body) = body?;
    let core = state.core.clone();
    let mask = ChannelMask::new(body.mask);
    blocking(move || {
        core.set_channel_mask(mask);
        Ok(())
    })
    .await?;
    Ok(Json(body))
}

/// WebSocket handler for the live sample feed
async fn stream_ws(State(state): State<WebState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state.feed, state.shutdown))
}

/// Forward frames until the viewer leaves or the feed closes.
async fn handle_stream(socket: WebSocket, feed: LiveFeed, shutdown: CancellationToken) {
    let (mut sender, mut receiver) = socket.split();
    let mut frames = feed.subscribe();
    tracing::info!(viewers = feed.viewers(), "live viewer connected");

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!("frame serialization failed: {e}");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "live viewer lagging");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            _ = shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    tracing::info!("live viewer disconnected");
}
