use std::path::PathBuf;

use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    app_state::AppState,
    config::{QueryDefaults, SearchMode},
    resolver::MatchTier,
    session::{QuerySettings, SessionError, SessionSnapshot},
};

/// Número de PDF listados en la información de depuración.
const DEBUG_DOCUMENT_SAMPLE: usize = 5;

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct QueryPayload {
    query: String,
    #[serde(flatten)]
    settings: QuerySettings,
}

#[derive(Deserialize)]
pub struct CitationPayload {
    citation: String,
}

#[derive(Deserialize)]
pub struct InspectPayload {
    text: String,
}

#[derive(Serialize)]
pub struct ConfigResponse {
    app_title: String,
    api_base_url: String,
    api_timeout_secs: u64,
    api_max_retries: u32,
    documents_path: String,
    viewer_enabled: bool,
    defaults: QueryDefaults,
    mode_options: Vec<&'static str>,
}

#[derive(Serialize)]
pub struct CitationResolution {
    citation: String,
    path: Option<PathBuf>,
    tier: Option<MatchTier>,
}

#[derive(Serialize)]
pub struct InspectResponse {
    citations: Vec<String>,
    documents_root: Option<PathBuf>,
    available_documents: Vec<String>,
    resolutions: Vec<CitationResolution>,
}

// --- Errores ---

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match err {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::Busy => StatusCode::CONFLICT,
            SessionError::EmptyQuery => StatusCode::BAD_REQUEST,
            SessionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{}", self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/config", get(config_handler))
        .route("/api/sessions", post(create_session_handler))
        .route(
            "/api/sessions/:id",
            get(session_handler).delete(delete_session_handler),
        )
        .route("/api/sessions/:id/query", post(query_handler))
        .route("/api/sessions/:id/viewer/open", post(open_viewer_handler))
        .route("/api/sessions/:id/viewer/close", post(close_viewer_handler))
        .route("/api/sessions/:id/reset", post(reset_handler))
        .route("/api/documents", get(document_handler))
        .route("/api/citations/inspect", post(inspect_handler))
        .with_state(app_state)
}

/// Router completo: API, frontend estático y capas HTTP.
pub fn create_app(app_state: AppState, frontend_dir: &str) -> Router {
    create_router(app_state)
        .fallback_service(ServeDir::new(frontend_dir))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

// --- Handlers ---

#[axum::debug_handler]
async fn config_handler(State(state): State<AppState>) -> Json<ConfigResponse> {
    let cfg = &state.config;
    Json(ConfigResponse {
        app_title: cfg.app_title.clone(),
        api_base_url: cfg.api_base_url.clone(),
        api_timeout_secs: cfg.api_timeout.as_secs(),
        api_max_retries: cfg.api_max_retries,
        documents_path: cfg.viewer.documents_path.display().to_string(),
        viewer_enabled: cfg.viewer.enabled,
        defaults: cfg.defaults.clone(),
        mode_options: SearchMode::ALL.iter().map(|m| m.as_str()).collect(),
    })
}

#[axum::debug_handler]
async fn create_session_handler(
    State(state): State<AppState>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let store = state.controller.store();
    let id = store.create()?;
    Ok(Json(store.snapshot(id)?))
}

#[axum::debug_handler]
async fn session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.controller.store().snapshot(id)?))
}

#[axum::debug_handler]
async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.controller.store().remove(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<QueryPayload>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let snapshot = state
        .controller
        .submit(id, &payload.query, &payload.settings)
        .await?;
    Ok(Json(snapshot))
}

#[axum::debug_handler]
async fn open_viewer_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CitationPayload>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let store = state.controller.store();
    store.with_session(id, |s| s.open_viewer(payload.citation))?;
    Ok(Json(store.snapshot(id)?))
}

#[axum::debug_handler]
async fn close_viewer_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let store = state.controller.store();
    store.with_session(id, |s| s.close_viewer())?;
    Ok(Json(store.snapshot(id)?))
}

#[axum::debug_handler]
async fn reset_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let store = state.controller.store();
    store.with_session(id, |s| s.reset())?;
    info!("Historial de la sesión {id} borrado.");
    Ok(Json(store.snapshot(id)?))
}

/// Sirve el PDF de una cita para el visor integrado.
#[axum::debug_handler]
async fn document_handler(
    State(state): State<AppState>,
    Query(payload): Query<CitationPayload>,
) -> Result<Response, ApiError> {
    let annotator = state.controller.annotator().clone();
    let citation = payload.citation.clone();
    let path = tokio::task::spawn_blocking(move || annotator.resolver().resolve(&citation))
        .await
        .map_err(|e| anyhow::anyhow!("Fallo resolviendo la cita: {e}"))?
        .ok_or_else(|| ApiError::not_found(format!("Documento no encontrado: {}", payload.citation)))?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| anyhow::anyhow!("Error al leer {}: {e}", path.display()))?;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', ""))
        .unwrap_or_default();

    Ok((
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// Información de depuración sobre las citas de un texto.
#[axum::debug_handler]
async fn inspect_handler(
    State(state): State<AppState>,
    Json(payload): Json<InspectPayload>,
) -> Result<Json<InspectResponse>, ApiError> {
    let annotator = state.controller.annotator().clone();
    let response = tokio::task::spawn_blocking(move || {
        let resolver = annotator.resolver();
        let citations = annotator.extractor().extract(&payload.text);
        let resolutions = citations
            .iter()
            .map(|citation| {
                let hit = resolver.resolve_with_tier(citation);
                CitationResolution {
                    citation: citation.clone(),
                    path: hit.as_ref().map(|(p, _)| p.clone()),
                    tier: hit.map(|(_, t)| t),
                }
            })
            .collect();
        InspectResponse {
            citations,
            documents_root: resolver.resolution_root(),
            available_documents: resolver.available_documents(DEBUG_DOCUMENT_SAMPLE),
            resolutions,
        }
    })
    .await
    .map_err(|e| anyhow::anyhow!("Fallo inspeccionando citas: {e}"))?;

    Ok(Json(response))
}
