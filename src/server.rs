// ADSMITH Control Server - Stage Endpoints & Asset Streaming
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Thin HTTP boundary over the orchestrator. Stage endpoints verify the
// approval gate synchronously (409 on mismatch), then run the stage in a
// background task and answer 202. Re-posting while a stage runs returns
// the current state without launching a second run.

use axum::{
    extract::{Path as AxumPath, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt; // for oneshot
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::config::ProjectConfig;
use crate::error::PipelineError;
use crate::executor::CancelToken;
use crate::orchestrator::{Orchestrator, RemixOptions};
use crate::project::{ProjectState, ProjectStatus, Script, ScriptLine, Strategy};

/// Live handle per project: one stage at a time, cooperatively cancellable.
struct ProjectHandle {
    running: Arc<AtomicBool>,
    cancel: CancelToken,
}

pub struct ServerState {
    orchestrator: Arc<Orchestrator>,
    registry: Mutex<HashMap<String, Arc<ProjectHandle>>>,
}

impl ServerState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    fn handle_for(&self, id: &str) -> Arc<ProjectHandle> {
        let mut registry = self.registry.lock().unwrap();
        registry
            .entry(id.to_string())
            .or_insert_with(|| {
                Arc::new(ProjectHandle {
                    running: Arc::new(AtomicBool::new(false)),
                    cancel: CancelToken::new(),
                })
            })
            .clone()
    }

    /// Swap in an unsignalled cancel token before a stage (re)starts.
    fn fresh_cancel(&self, id: &str) -> CancelToken {
        let mut registry = self.registry.lock().unwrap();
        let token = CancelToken::new();
        let running = registry
            .get(id)
            .map(|h| h.running.clone())
            .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
        registry.insert(
            id.to_string(),
            Arc::new(ProjectHandle {
                running,
                cancel: token.clone(),
            }),
        );
        token
    }
}

pub type AppState = Arc<ServerState>;

struct ApiError(PipelineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError(e)
    }
}

async fn auth_middleware(req: Request, next: Next) -> Result<Response, StatusCode> {
    // No configured key means an open instance (local use).
    let Ok(api_key) = std::env::var("ADSMITH_API_KEY") else {
        return Ok(next.run(req).await);
    };

    let bearer = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));
    let x_api_key = req.headers().get("X-API-Key").and_then(|h| h.to_str().ok());
    let query_api_key = req.uri().query().and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(key, _)| key == "api_key")
            .map(|(_, value)| value.into_owned())
    });

    if let Some(key) = bearer.or(x_api_key).or(query_api_key.as_deref()) {
        if key == api_key {
            return Ok(next.run(req).await);
        }
    }

    error!("Unauthorized access attempt to API");
    Err(StatusCode::UNAUTHORIZED)
}

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/plan", post(plan))
        .route("/generate/images", post(generate_images))
        .route("/generate/videos", post(generate_videos))
        .route("/generate/assemble", post(generate_assemble))
        .route("/remix", post(remix))
        .route("/cancel", post(cancel))
        .route("/edit", post(edit_script))
        .route("/regenerate/images", post(regenerate_images))
        .route("/regenerate/videos", post(regenerate_videos))
        .route("/reset", post(reset))
        .route("/status/:project_id", get(status))
        .route("/assets/*path", get(stream_asset))
        .layer(middleware::from_fn(auth_middleware));

    Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn start_server(port: u16, state: AppState) {
    if std::env::var("ADSMITH_API_KEY").is_err() {
        info!("ADSMITH_API_KEY not set; API runs open (local mode)");
    }

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("🚀 ADSMITH control server on http://127.0.0.1:{}", port);

    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind failed");
    axum::serve(listener, app).await.expect("server crashed");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct PlanRequest {
    #[serde(flatten)]
    config: ProjectConfig,
}

async fn plan(
    State(state): State<AppState>,
    Json(req): Json<PlanRequest>,
) -> Result<Json<ProjectState>, ApiError> {
    // Planning is synchronous end-to-end; the caller gets `planned` back.
    let project = state.orchestrator.plan(req.config).await?;
    Ok(Json(project))
}

#[derive(Deserialize)]
struct ProjectRequest {
    project_id: String,
}

/// Shared driver for the stage endpoints: gate pre-check, duplicate
/// suppression, background run, 202.
fn launch_stage<F, Fut>(
    state: &AppState,
    project_id: &str,
    allowed: &[ProjectStatus],
    run: F,
) -> Result<(StatusCode, Json<ProjectState>), ApiError>
where
    F: FnOnce(Arc<Orchestrator>, String, CancelToken) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let current = state.orchestrator.status(project_id)?;

    let handle = state.handle_for(project_id);
    if handle.running.load(Ordering::SeqCst) {
        // Idempotence: an in-flight stage is reported, never duplicated.
        return Ok((StatusCode::OK, Json(current)));
    }
    if !allowed.contains(&current.status) {
        return Err(ApiError(PipelineError::Conflict(format!(
            "endpoint requires status {:?}, project is {}",
            allowed.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            current.status.as_str()
        ))));
    }

    let cancel = state.fresh_cancel(project_id);
    let running = state.handle_for(project_id).running.clone();
    running.store(true, Ordering::SeqCst);

    let orchestrator = state.orchestrator.clone();
    let id = project_id.to_string();
    tokio::spawn(async move {
        run(orchestrator, id, cancel).await;
        running.store(false, Ordering::SeqCst);
    });

    Ok((StatusCode::ACCEPTED, Json(current)))
}

async fn generate_images(
    State(state): State<AppState>,
    Json(req): Json<ProjectRequest>,
) -> Result<(StatusCode, Json<ProjectState>), ApiError> {
    launch_stage(
        &state,
        &req.project_id,
        &[ProjectStatus::Planned],
        |orchestrator, id, cancel| async move {
            if let Err(e) = orchestrator.run_images(&id, cancel).await {
                error!("[SERVER] image stage for {} failed: {}", id, e);
            }
        },
    )
}

async fn generate_videos(
    State(state): State<AppState>,
    Json(req): Json<ProjectRequest>,
) -> Result<(StatusCode, Json<ProjectState>), ApiError> {
    launch_stage(
        &state,
        &req.project_id,
        &[ProjectStatus::ImagesComplete, ProjectStatus::GeneratingVideos],
        |orchestrator, id, cancel| async move {
            if let Err(e) = orchestrator.run_videos(&id, cancel).await {
                error!("[SERVER] motion stage for {} failed: {}", id, e);
            }
        },
    )
}

async fn generate_assemble(
    State(state): State<AppState>,
    Json(req): Json<ProjectRequest>,
) -> Result<(StatusCode, Json<ProjectState>), ApiError> {
    launch_stage(
        &state,
        &req.project_id,
        &[ProjectStatus::VideosComplete],
        |orchestrator, id, _cancel| async move {
            if let Err(e) = orchestrator.run_assembly(&id).await {
                error!("[SERVER] assembly for {} failed: {}", id, e);
            }
        },
    )
}

#[derive(Deserialize)]
struct RemixRequest {
    project_id: String,
    lines: Vec<ScriptLine>,
    #[serde(default)]
    options: RemixOptions,
}

async fn remix(
    State(state): State<AppState>,
    Json(req): Json<RemixRequest>,
) -> Result<(StatusCode, Json<ProjectState>), ApiError> {
    let RemixRequest {
        project_id,
        lines,
        options,
    } = req;
    launch_stage(
        &state,
        &project_id,
        &[ProjectStatus::Completed],
        move |orchestrator, id, _cancel| async move {
            if let Err(e) = orchestrator.remix(&id, lines, options).await {
                error!("[SERVER] remix for {} failed: {}", id, e);
            }
        },
    )
}

async fn cancel(
    State(state): State<AppState>,
    Json(req): Json<ProjectRequest>,
) -> Result<Json<ProjectState>, ApiError> {
    let handle = state.handle_for(&req.project_id);
    handle.cancel.cancel();
    info!("[SERVER] Cancel signalled for {}", req.project_id);
    Ok(Json(state.orchestrator.status(&req.project_id)?))
}

#[derive(Deserialize)]
struct EditRequest {
    project_id: String,
    script: Script,
    #[serde(default)]
    strategy: Option<Strategy>,
}

async fn edit_script(
    State(state): State<AppState>,
    Json(req): Json<EditRequest>,
) -> Result<Json<ProjectState>, ApiError> {
    Ok(Json(state.orchestrator.edit_script(
        &req.project_id,
        req.script,
        req.strategy,
    )?))
}

#[derive(Deserialize)]
struct RegenerateRequest {
    project_id: String,
    #[serde(default)]
    scene_ids: Option<Vec<u32>>,
}

async fn regenerate_images(
    State(state): State<AppState>,
    Json(req): Json<RegenerateRequest>,
) -> Result<Json<ProjectState>, ApiError> {
    Ok(Json(
        state
            .orchestrator
            .regenerate_images(&req.project_id, req.scene_ids)?,
    ))
}

async fn regenerate_videos(
    State(state): State<AppState>,
    Json(req): Json<RegenerateRequest>,
) -> Result<Json<ProjectState>, ApiError> {
    Ok(Json(
        state
            .orchestrator
            .regenerate_videos(&req.project_id, req.scene_ids)?,
    ))
}

async fn reset(
    State(state): State<AppState>,
    Json(req): Json<ProjectRequest>,
) -> Result<Json<ProjectState>, ApiError> {
    Ok(Json(state.orchestrator.reset(&req.project_id)?))
}

async fn status(
    State(state): State<AppState>,
    AxumPath(project_id): AxumPath<String>,
) -> Result<Json<ProjectState>, ApiError> {
    Ok(Json(state.orchestrator.status(&project_id)?))
}

/// Stream an artifact from the projects tree. Paths resolve inside the
/// root; traversal outside it is rejected.
async fn stream_asset(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
    req: Request,
) -> Response {
    let root = match state.orchestrator.projects_root().canonicalize() {
        Ok(r) => r,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    let full = root.join(path.trim_start_matches('/'));
    let resolved = match full.canonicalize() {
        Ok(p) => p,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    if !resolved.starts_with(&root) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let service = tower_http::services::ServeFile::new(resolved);
    match service.oneshot(req).await {
        Ok(res) => res.into_response(),
        Err(err) => {
            error!("ServeFile error: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
