//! HTTP server for the two-phase import.
//!
//! # API Endpoints
//!
//! | Method | Path                                   | Description                      |
//! |--------|----------------------------------------|----------------------------------|
//! | GET    | `/health`                              | Health check                     |
//! | GET    | `/api/templates/{entity}`              | Header-only CSV template         |
//! | POST   | `/api/imports/{entity}/preview`        | Upload a file, open a session    |
//! | GET    | `/api/imports/sessions/{id}`           | Current session state            |
//! | GET    | `/api/imports/sessions/{id}/rows`      | Previewed rows (`?status=`)      |
//! | POST   | `/api/imports/sessions/{id}/confirm`   | Commit the selected rows         |
//! | DELETE | `/api/imports/sessions/{id}`           | Close and discard a session      |
//! | GET    | `/api/logs`                            | SSE stream of import progress    |
//!
//! Sessions live in memory only; a restart between preview and confirm means
//! uploading again. Sessions older than the configured TTL are swept whenever
//! a new one is stored. A session is taken out of the map while its commit
//! runs, so other requests for it see `404` until the commit returns.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Sse},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

use super::logs::{log_info, LOG_BROADCASTER};
use super::types::{RowsQuery, RowsResponse, SessionView};
use crate::config::{AppConfig, DEFAULT_SESSION_TTL_SECS};
use crate::error::{ServerError, ServerResult};
use crate::models::{CommitSelection, EntityKind, ImportRowStatus};
use crate::pipeline::{ImportContext, PipelineOptions};
use crate::schema::{EntitySchema, ReportingPeriod};
use crate::session::{ImportSession, ImportState};
use crate::store::RecordStore;
use crate::validation::parse_date;

/// Store shared by every request.
pub type SharedStore = Box<dyn RecordStore + Send>;

/// Server state. Never hold `sessions` while waiting on `store`.
pub struct AppState {
    store: Mutex<SharedStore>,
    sessions: Mutex<HashMap<Uuid, ImportSession>>,
    schemas: BTreeMap<EntityKind, EntitySchema>,
    options: PipelineOptions,
    session_ttl: Duration,
}

impl AppState {
    pub fn new(store: SharedStore, options: PipelineOptions) -> Self {
        Self {
            store: Mutex::new(store),
            sessions: Mutex::new(HashMap::new()),
            schemas: EntityKind::ALL
                .into_iter()
                .map(|entity| (entity, EntitySchema::builtin(entity)))
                .collect(),
            options,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
        }
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Replace the built-in schema of the entity the given schema describes.
    pub fn with_schema(mut self, schema: EntitySchema) -> Self {
        self.schemas.insert(schema.entity, schema);
        self
    }

    pub fn schema_for(&self, entity: EntityKind) -> EntitySchema {
        self.schemas
            .get(&entity)
            .cloned()
            .unwrap_or_else(|| EntitySchema::builtin(entity))
    }
}

type SharedState = Arc<AppState>;

/// Drop sessions created more than `ttl` before `now`. Returns how many went.
fn evict_expired(sessions: &mut HashMap<Uuid, ImportSession>, now: DateTime<Utc>, ttl: Duration) -> usize {
    let before = sessions.len();
    sessions.retain(|_, session| {
        (now - session.created_at())
            .to_std()
            .map_or(true, |age| age < ttl)
    });
    before - sessions.len()
}

/// Build the router around a state.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/templates/{entity}", get(download_template))
        .route("/api/imports/{entity}/preview", post(preview_upload))
        .route(
            "/api/imports/sessions/{id}",
            get(get_session).delete(close_session),
        )
        .route("/api/imports/sessions/{id}/rows", get(session_rows))
        .route("/api/imports/sessions/{id}/confirm", post(confirm_session))
        .route("/api/logs", get(sse_logs))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(cors)
        .with_state(Arc::new(state))
}

/// Start the HTTP server
pub async fn start_server(config: &AppConfig, state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(state, config.max_upload_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    log::info!("🚀 Rosterload server running on http://localhost:{}", config.port);
    log::info!("   POST /api/imports/{{entity}}/preview - Upload a CSV file");
    log::info!("   POST /api/imports/sessions/{{id}}/confirm - Commit a preview");
    log::info!("   GET  /api/templates/{{entity}} - CSV template");
    log::info!("   GET  /api/logs - SSE progress stream");
    log::info!("   Duplicate matching: {}", config.match_strategy);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "rosterload",
        "version": env!("CARGO_PKG_VERSION"),
        "entities": EntityKind::ALL.iter().map(EntityKind::as_str).collect::<Vec<_>>(),
    }))
}

/// SSE endpoint for real-time progress streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn download_template(
    State(state): State<SharedState>,
    Path(entity): Path<String>,
) -> ServerResult<impl IntoResponse> {
    let entity = parse_entity(&entity)?;
    let body = state.schema_for(entity).template_csv();

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, template_disposition(entity)),
        ],
        body,
    ))
}

/// Fields of the preview multipart form.
#[derive(Debug, Default)]
struct UploadForm {
    file_name: Option<String>,
    bytes: Option<Vec<u8>>,
    scope: Option<String>,
    period_start: Option<String>,
    period_end: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> ServerResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                form.file_name = field.file_name().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?;
                form.bytes = Some(bytes.to_vec());
            }
            "scope" | "periodStart" | "periodEnd" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Read error: {}", e)))?;
                let slot = match name.as_str() {
                    "scope" => &mut form.scope,
                    "periodStart" => &mut form.period_start,
                    _ => &mut form.period_end,
                };
                *slot = Some(text);
            }
            _ => {}
        }
    }

    Ok(form)
}

async fn preview_upload(
    State(state): State<SharedState>,
    Path(entity): Path<String>,
    multipart: Multipart,
) -> ServerResult<(StatusCode, Json<SessionView>)> {
    let entity = parse_entity(&entity)?;
    let form = read_upload(multipart).await?;

    let bytes = form
        .bytes
        .ok_or_else(|| ServerError::BadRequest("No file provided".to_string()))?;
    let file_name = form.file_name.unwrap_or_else(|| "upload.csv".to_string());
    let period = parse_period(form.period_start.as_deref(), form.period_end.as_deref())?;

    let mut context = ImportContext::new(entity, form.scope.unwrap_or_default());
    context.period = period;

    log_info(format!("📄 New upload: {} ({} bytes)", file_name, bytes.len()));

    let mut session = ImportSession::new(state.schema_for(entity), state.options);
    {
        let store = state.store.lock().await;
        session.submit(&file_name, &bytes, context, &**store)?;
    }

    let view = SessionView::from_session(&session, true);
    if !matches!(session.state(), ImportState::Preview { .. }) {
        // Rejected uploads leave nothing to confirm
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(view)));
    }
    let mut sessions = state.sessions.lock().await;
    let evicted = evict_expired(&mut sessions, Utc::now(), state.session_ttl);
    if evicted > 0 {
        log::info!("Dropped {} expired import sessions", evicted);
    }
    sessions.insert(session.id(), session);
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> ServerResult<Json<SessionView>> {
    let sessions = state.sessions.lock().await;
    let session = sessions
        .get(&id)
        .ok_or_else(|| ServerError::NotFound(format!("session {}", id)))?;
    Ok(Json(SessionView::from_session(session, true)))
}

async fn session_rows(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(query): Query<RowsQuery>,
) -> ServerResult<Json<RowsResponse>> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty() && *s != "all")
        .map(str::parse::<ImportRowStatus>)
        .transpose()
        .map_err(ServerError::BadRequest)?;

    let sessions = state.sessions.lock().await;
    let session = sessions
        .get(&id)
        .ok_or_else(|| ServerError::NotFound(format!("session {}", id)))?;
    let preview = session
        .state()
        .preview()
        .ok_or_else(|| ServerError::BadRequest(format!("session is in '{}' state", session.state().name())))?;

    Ok(Json(RowsResponse::filtered(id.to_string(), preview, status)))
}

async fn confirm_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(selection): Json<CommitSelection>,
) -> ServerResult<Json<SessionView>> {
    let mut session = state
        .sessions
        .lock()
        .await
        .remove(&id)
        .ok_or_else(|| ServerError::NotFound(format!("session {}", id)))?;

    // Store I/O blocks
    let shared = Arc::clone(&state);
    let (session, outcome) = tokio::task::spawn_blocking(move || {
        let mut store = shared.store.blocking_lock();
        let outcome = session.confirm(selection, &mut **store).map(|_| ());
        (session, outcome)
    })
    .await
    .map_err(|e| ServerError::Internal(format!("commit task failed: {}", e)))?;

    let view = SessionView::from_session(&session, false);
    if !session.is_complete() {
        state.sessions.lock().await.insert(id, session);
    }
    outcome?;
    Ok(Json(view))
}

async fn close_session(State(state): State<SharedState>, Path(id): Path<Uuid>) -> ServerResult<StatusCode> {
    let mut sessions = state.sessions.lock().await;
    let mut session = sessions
        .remove(&id)
        .ok_or_else(|| ServerError::NotFound(format!("session {}", id)))?;
    session.close()?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_entity(raw: &str) -> ServerResult<EntityKind> {
    raw.parse::<EntityKind>().map_err(ServerError::NotFound)
}

fn template_disposition(entity: EntityKind) -> String {
    format!("attachment; filename=\"{}-template.csv\"", entity)
}

/// Both bounds or neither; each accepts the same formats as row dates.
fn parse_period(start: Option<&str>, end: Option<&str>) -> ServerResult<Option<ReportingPeriod>> {
    let start = start.map(str::trim).filter(|s| !s.is_empty());
    let end = end.map(str::trim).filter(|s| !s.is_empty());

    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => {
            let start = parse_date(start).map_err(|e| ServerError::BadRequest(format!("periodStart: {}", e)))?;
            let end = parse_date(end).map_err(|e| ServerError::BadRequest(format!("periodEnd: {}", e)))?;
            ReportingPeriod::new(start, end)
                .map(Some)
                .map_err(ServerError::BadRequest)
        }
        _ => Err(ServerError::BadRequest(
            "periodStart and periodEnd must be given together".to_string(),
        )),
    }
}
