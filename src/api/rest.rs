use crate::config::{ApiConfig, Config};
use crate::db::models::event_models::{CallLog, Event};
use crate::db::repositories::events::EventStore;
use crate::error::Error;
use crate::hub::BroadcastHub;
use crate::stream::{StreamHandle, StreamStatus, StreamSupervisor};
use crate::workflow::plan::{Answer, PlanState, StepValue};
use crate::workflow::status::TransitionAction;
use crate::workflow::WorkflowEngine;
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use uuid::Uuid;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub supervisor: Arc<StreamSupervisor>,
    pub hub: Arc<BroadcastHub>,
    pub events: Arc<dyn EventStore>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::NotFound(_) | Error::UnknownRecipient(_) => StatusCode::NOT_FOUND,
            Error::InvalidStep(_) | Error::StaleState(_) => StatusCode::CONFLICT,
            Error::NoSource(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::WebhookFailure(_) => StatusCode::BAD_GATEWAY,
            Error::Api(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        ApiError {
            message: err.to_string(),
            status: status.as_u16(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return err.clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

/// Implement IntoResponse for ApiError
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

pub struct RestApi {
    config: Config,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &Config, state: AppState) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            state,
        })
    }

    pub async fn run(&self) -> Result<()> {
        use std::time::Duration;
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(false)
            .max_age(Duration::from_secs(3600));

        let app = Router::new()
            // Event routes
            .route("/api/events/:id", get(get_event))
            .route("/api/events/:id/plan", get(get_plan))
            .route("/api/events/:id/transition", post(transition))
            .route("/api/events/:id/plan/answer", post(apply_answer))
            .route("/api/events/:id/plan/toggle", post(toggle_step))
            .route("/api/events/:id/plan/webhook", post(trigger_webhook))
            .route("/api/events/:id/calls", post(log_call))
            .route("/api/events/:id/notes", post(set_notes))
            // Stream routes
            .route("/api/cameras/:id/stream/acquire", post(acquire_stream))
            .route("/api/cameras/:id/stream/release", post(release_stream))
            .route("/api/cameras/:id/stream/restart", post(restart_stream))
            .route("/api/cameras/:id/stream/status", get(stream_status))
            // Per-account operator channel
            .route("/api/accounts/:id/channel", get(super::websocket::account_channel))
            .with_state(self.state.clone())
            // Media store, read-only
            .nest_service(
                "/media/streams",
                ServeDir::new(&self.config.streaming.streams_dir),
            )
            .nest_service(
                "/media/uploads",
                ServeDir::new(&self.config.media.uploads_dir),
            )
            .layer(cors);

        let ApiConfig { address, port } = &self.config.api;
        let addr: SocketAddr = format!("{}:{}", address, port).parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }
}

async fn get_event(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Event>> {
    let event = state
        .events
        .get(&id)
        .await?
        .ok_or(Error::NotFound(format!("Event not found: {}", id)))?;

    Ok(Json(event))
}

async fn get_plan(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PlanState>> {
    let plan = state.engine.plan_state(&id).await?;
    Ok(Json(plan))
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub action: TransitionAction,
    pub reason: Option<String>,
}

async fn transition(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TransitionRequest>,
) -> ApiResult<Json<Event>> {
    let event = state
        .engine
        .transition(&id, req.action, req.reason.as_deref())
        .await?;

    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub step_id: String,
    pub answer: Answer,
}

#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub step_id: String,
    pub value: StepValue,
}

async fn apply_answer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AnswerRequest>,
) -> ApiResult<Json<StepResponse>> {
    let value = state
        .engine
        .apply_answer(&id, &req.step_id, req.answer)
        .await?;

    Ok(Json(StepResponse {
        step_id: req.step_id,
        value,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StepRequest {
    pub step_id: String,
}

async fn toggle_step(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StepRequest>,
) -> ApiResult<Json<StepResponse>> {
    let value = state.engine.toggle_step(&id, &req.step_id).await?;

    Ok(Json(StepResponse {
        step_id: req.step_id,
        value,
    }))
}

async fn trigger_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StepRequest>,
) -> ApiResult<Json<StepResponse>> {
    let value = state.engine.trigger_webhook(&id, &req.step_id).await?;

    Ok(Json(StepResponse {
        step_id: req.step_id,
        value,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CallLogRequest {
    pub contact_name: String,
    pub phone: String,
    pub outcome: String,
    #[serde(default)]
    pub note: String,
}

async fn log_call(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CallLogRequest>,
) -> ApiResult<Json<Event>> {
    let entry = CallLog {
        contact_name: req.contact_name,
        phone: req.phone,
        outcome: req.outcome,
        note: req.note,
        logged_at: Utc::now(),
    };

    let event = state.engine.log_call(&id, entry).await?;
    Ok(Json(event))
}

#[derive(Debug, Deserialize)]
pub struct NotesRequest {
    pub notes: String,
}

async fn set_notes(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<NotesRequest>,
) -> ApiResult<Json<Event>> {
    let event = state.engine.set_notes(&id, &req.notes).await?;
    Ok(Json(event))
}

#[derive(Debug, Serialize)]
pub struct AcquireResponse {
    pub camera_id: Uuid,
    pub manifest_url: String,
    pub status: Option<StreamStatus>,
}

async fn acquire_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AcquireResponse>> {
    let handle = state.supervisor.acquire(&id).await?;
    let status = state.supervisor.status(&id).await;

    Ok(Json(AcquireResponse {
        camera_id: handle.camera_id,
        manifest_url: format!("/media/streams/{}/manifest.m3u8", id),
        status,
    }))
}

async fn release_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Option<StreamStatus>>> {
    // The API maps one release request to one viewer reference.
    let handle = StreamHandle {
        camera_id: id,
        manifest: std::path::PathBuf::new(),
    };
    state.supervisor.release(handle).await;

    Ok(Json(state.supervisor.status(&id).await))
}

async fn restart_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StreamStatus>> {
    let status = state.supervisor.force_restart(&id).await?;
    Ok(Json(status))
}

async fn stream_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<StreamStatus>> {
    let status = state
        .supervisor
        .status(&id)
        .await
        .ok_or(Error::NotFound(format!("No session for camera {}", id)))?;

    Ok(Json(status))
}
