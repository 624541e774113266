//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/documents` | Ingest an inline text document |
//! | `GET`  | `/api/documents` | List documents, optionally `?owner_id=` |
//! | `GET`  | `/api/documents/{id}` | Document with its chunks |
//! | `DELETE` | `/api/documents/{id}` | Delete a document and everything derived from it |
//! | `POST` | `/api/search/semantic` | Ranked document search |
//! | `GET`  | `/api/knowledge-graph` | Graph merged across documents |
//! | `GET`  | `/api/knowledge-graph/{id}` | Graph of one document |
//! | `POST` | `/api/chat/ask` | Synthesized answer with citations |
//! | `GET`/`PUT` | `/api/users/{id}/profile` | Read or patch a profile |
//! | `GET`  | `/api/users/{id}/memory` | Conversation memory |
//!
//! Errors are `{"detail": "..."}` with 400 for invalid input, 404 for
//! unknown ids, and 500 otherwise.

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

use hierarag_core::graph::KnowledgeGraph;
use hierarag_core::profile::UserProfile;
use hierarag_core::retrieve::SearchResultItem;
use hierarag_core::store::{DocumentResponse, DocumentSummary};
use hierarag_core::synthesize::Answer;
use hierarag_core::RagError;

use crate::ask::{ask, AskRequest};
use crate::config::Config;
use crate::db;
use crate::extract::{content_type_for, MIME_MARKDOWN, MIME_TEXT};
use crate::get::{delete_document, get_document, list_documents};
use crate::graph_cmd::load_graph;
use crate::ingest::{IngestOutcome, IngestRequest, Ingestor};
use crate::migrate::migrate;
use crate::profile_cmd::{get_memory, get_profile, update_profile, MemoryView, ProfileUpdate};
use crate::search::{search, SearchRequest};
use crate::sqlite_store::SqliteStore;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<SqliteStore>,
}

impl AppState {
    pub fn new(config: Config, store: SqliteStore) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
        }
    }
}

/// Build the application router. Exposed so tests can drive it without a socket.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/api/documents",
            post(handle_create_document).get(handle_list_documents),
        )
        .route(
            "/api/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/api/search/semantic", post(handle_search))
        .route("/api/knowledge-graph", get(handle_graph_all))
        .route("/api/knowledge-graph/{id}", get(handle_graph_document))
        .route("/api/chat/ask", post(handle_ask))
        .route(
            "/api/users/{id}/profile",
            get(handle_get_profile).put(handle_put_profile),
        )
        .route("/api/users/{id}/memory", get(handle_get_memory))
        .layer(cors)
        .with_state(state)
}

/// Open the database, apply migrations, and serve until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    let state = AppState::new(config.clone(), SqliteStore::new(pool));

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("hierarag listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

/// Error type that converts into an HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

fn bad_request(detail: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        detail: detail.into(),
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let status = match err.downcast_ref::<RagError>() {
            Some(RagError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(RagError::InvalidInput(_))
            | Some(RagError::InvalidTransition { .. })
            | Some(RagError::DanglingRelationship { .. })
            | Some(RagError::EmbeddingsDisabled) => StatusCode::BAD_REQUEST,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %format!("{:#}", err), "request failed");
        }
        AppError {
            status,
            detail: format!("{:#}", err),
        }
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        anyhow::Error::new(err).into()
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

// ============ /api/documents ============

#[derive(Debug, Deserialize)]
struct CreateDocumentBody {
    #[serde(default)]
    owner_id: Option<String>,
    filename: String,
    #[serde(default)]
    content_type: Option<String>,
    text: String,
    #[serde(default)]
    tags: Vec<String>,
}

async fn handle_create_document(
    State(state): State<AppState>,
    Json(body): Json<CreateDocumentBody>,
) -> Result<(StatusCode, Json<IngestOutcome>), AppError> {
    if body.filename.trim().is_empty() {
        return Err(bad_request("filename must not be empty"));
    }
    let content_type = match body.content_type {
        Some(ct) => ct,
        None => content_type_for(std::path::Path::new(&body.filename))
            .unwrap_or(MIME_TEXT)
            .to_string(),
    };
    if content_type != MIME_TEXT && content_type != MIME_MARKDOWN {
        return Err(bad_request(format!(
            "inline documents must be {} or {}, got {}",
            MIME_TEXT, MIME_MARKDOWN, content_type
        )));
    }

    let ingestor = Ingestor::new(Arc::clone(&state.store), Arc::clone(&state.config))?;
    let outcome = ingestor
        .ingest(IngestRequest {
            owner_id: body
                .owner_id
                .unwrap_or_else(|| state.config.ingest.default_owner.clone()),
            filename: body.filename,
            content_type,
            data: body.text.into_bytes(),
            tags: body.tags,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    owner_id: Option<String>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<DocumentSummary>> {
    Ok(Json(
        list_documents(state.store.as_ref(), query.owner_id.as_deref()).await?,
    ))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DocumentResponse> {
    Ok(Json(get_document(state.store.as_ref(), &id).await?))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    delete_document(state.store.as_ref(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /api/search/semantic ============

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResultItem>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<SearchResponse> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let results = search(state.store.as_ref(), &state.config, &req).await?;
    Ok(Json(SearchResponse { results }))
}

// ============ /api/knowledge-graph ============

async fn handle_graph_all(State(state): State<AppState>) -> ApiResult<KnowledgeGraph> {
    Ok(Json(load_graph(state.store.as_ref(), None).await?))
}

async fn handle_graph_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<KnowledgeGraph> {
    Ok(Json(load_graph(state.store.as_ref(), Some(&id)).await?))
}

// ============ POST /api/chat/ask ============

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> ApiResult<Answer> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    Ok(Json(ask(state.store.as_ref(), &state.config, &req).await?))
}

// ============ /api/users/{id} ============

async fn handle_get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<UserProfile> {
    Ok(Json(get_profile(state.store.as_ref(), &id).await?))
}

async fn handle_put_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<UserProfile> {
    Ok(Json(update_profile(state.store.as_ref(), &id, &update).await?))
}

async fn handle_get_memory(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<MemoryView> {
    Ok(Json(get_memory(state.store.as_ref(), &id).await?))
}
