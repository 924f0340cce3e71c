// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::core::index::{IndexError, IndexStats, VectorIndex};
use crate::core::types::Metadata;
use crate::replication::{
    ClusterHealth, ReplicationError, ReplicationManager, ReplicationTask, TaskStatus,
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size: usize,
    pub timeout: Duration,
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_request_size: 10 * 1024 * 1024, // 10MB
            timeout: Duration::from_secs(30),
            cors_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("VECTOR_STORE_HOST").unwrap_or(defaults.host),
            port: env::var("VECTOR_STORE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            max_request_size: env::var("VECTOR_STORE_MAX_REQUEST_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_request_size),
            timeout: env::var("VECTOR_STORE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            cors_origins: env::var("VECTOR_STORE_CORS_ORIGINS")
                .ok()
                .map(|origins| origins.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub index: Arc<VectorIndex>,
    pub manager: Arc<ReplicationManager>,
}

// Request/Response types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertVectorRequest {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InsertVectorResponse {
    pub id: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchInsertRequest {
    pub vectors: Vec<InsertVectorRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchInsertResponse {
    pub inserted: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VectorResponse {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
    pub timestamp: f64,
    /// "hot" when served from memory, "cold" when read from durable storage
    pub tier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchIdsRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchIdsResult {
    pub id: String,
    pub vector: Option<Vec<f32>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchIdsResponse {
    pub results: Vec<SearchIdsResult>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistResponse {
    pub persisted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNodeRequest {
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleReplicationRequest {
    pub source: String,
    pub targets: Vec<String>,
    pub vector_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceReplicationRequest {
    pub source: String,
    pub vector_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleReplicationResponse {
    pub task_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub node_id: String,
    pub index: IndexStats,
    pub cluster: ClusterHealth,
}

// Error handling
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip)]
    pub status_code: StatusCode,
}

impl ErrorResponse {
    pub fn bad_request(error: String) -> Self {
        Self {
            error,
            status_code: StatusCode::BAD_REQUEST,
        }
    }

    pub fn not_found(error: String) -> Self {
        Self {
            error,
            status_code: StatusCode::NOT_FOUND,
        }
    }
}

impl From<IndexError> for ErrorResponse {
    fn from(err: IndexError) -> Self {
        let status_code = match err {
            IndexError::Validation(_) => StatusCode::BAD_REQUEST,
            IndexError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            IndexError::Storage(_) | IndexError::Codec(_) => {
                error!("Vector index failure: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            error: err.to_string(),
            status_code,
        }
    }
}

impl From<ReplicationError> for ErrorResponse {
    fn from(err: ReplicationError) -> Self {
        let status_code = match err {
            ReplicationError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            ReplicationError::NotRetryable { .. } | ReplicationError::RetryLimitExceeded { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            error: err.to_string(),
            status_code,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status_code, Json(self)).into_response()
    }
}

/// `"*"` anywhere in the list allows every origin; unparsable entries are skipped
fn allowed_origins(origins: &[String]) -> AllowOrigin {
    if origins.iter().any(|origin| origin == "*") {
        return AllowOrigin::any();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    AllowOrigin::list(parsed)
}

pub fn create_app(config: &ApiConfig, state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&config.cors_origins))
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        .route("/health", get(health_handler))
        // Vectors
        .route("/vectors", post(insert_vector))
        .route("/vectors/batch", post(batch_insert))
        .route("/vectors/search", post(search_ids))
        .route("/vectors/persist", post(persist_all))
        .route("/vectors/:id", get(get_vector).delete(delete_vector))
        // Membership
        .route("/nodes", get(list_nodes).post(add_node))
        .route("/nodes/:id", delete(remove_node))
        .route("/nodes/:id/heartbeat", post(heartbeat))
        // Replication
        .route("/replications", get(list_tasks).post(schedule_replication))
        .route("/replications/place", post(place_replication))
        .route("/replications/:task_id", get(get_task))
        .route("/replications/:task_id/retry", post(retry_task))
        .route("/cluster/health", get(cluster_health))
        .route("/snapshot", get(snapshot));

    Router::new()
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.timeout))
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(config.max_request_size))
        .with_state(state)
}

// Handler implementations
async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, ErrorResponse> {
    let index = state.index.stats().await?;
    let cluster = state.manager.get_cluster_health().await;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        node_id: state.manager.node_id().to_string(),
        index,
        cluster,
    }))
}

async fn insert_vector(
    State(state): State<AppState>,
    Json(request): Json<InsertVectorRequest>,
) -> Result<(StatusCode, Json<InsertVectorResponse>), ErrorResponse> {
    let dimension = request.vector.len();
    state
        .index
        .add(vec![request.id.clone()], vec![request.vector], Some(vec![request.metadata]))
        .await?;

    info!("Stored vector {} with {} dimensions", request.id, dimension);
    Ok((
        StatusCode::CREATED,
        Json(InsertVectorResponse {
            id: request.id,
            dimension,
        }),
    ))
}

async fn batch_insert(
    State(state): State<AppState>,
    Json(request): Json<BatchInsertRequest>,
) -> Result<(StatusCode, Json<BatchInsertResponse>), ErrorResponse> {
    let inserted = request.vectors.len();
    let mut ids = Vec::with_capacity(inserted);
    let mut vectors = Vec::with_capacity(inserted);
    let mut metadata = Vec::with_capacity(inserted);
    for item in request.vectors {
        ids.push(item.id);
        vectors.push(item.vector);
        metadata.push(item.metadata);
    }

    state.index.add(ids, vectors, Some(metadata)).await?;
    Ok((StatusCode::CREATED, Json(BatchInsertResponse { inserted })))
}

async fn get_vector(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VectorResponse>, ErrorResponse> {
    let (record, tier) = match state.index.get_record(&id).await? {
        Some(record) => (record, "hot"),
        None => match state.index.load_from_cold(&id).await? {
            Some(record) => (record, "cold"),
            None => return Err(ErrorResponse::not_found(format!("Vector {} not found", id))),
        },
    };

    Ok(Json(VectorResponse {
        id: record.id,
        vector: record.vector,
        metadata: record.metadata,
        timestamp: record.timestamp,
        tier: tier.to_string(),
    }))
}

async fn delete_vector(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ErrorResponse> {
    if state.index.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ErrorResponse::not_found(format!("Vector {} not found", id)))
    }
}

async fn search_ids(
    State(state): State<AppState>,
    Json(request): Json<SearchIdsRequest>,
) -> Result<Json<SearchIdsResponse>, ErrorResponse> {
    let vectors = state.index.search_ids(&request.ids).await?;
    let results = request
        .ids
        .into_iter()
        .zip(vectors)
        .map(|(id, vector)| SearchIdsResult { id, vector })
        .collect();
    Ok(Json(SearchIdsResponse { results }))
}

async fn persist_all(
    State(state): State<AppState>,
) -> Result<Json<PersistResponse>, ErrorResponse> {
    let persisted = state.index.persist_all().await?;
    Ok(Json(PersistResponse { persisted }))
}

async fn list_nodes(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "nodes": state.manager.node_health().await }))
}

async fn add_node(
    State(state): State<AppState>,
    Json(request): Json<AddNodeRequest>,
) -> Result<StatusCode, ErrorResponse> {
    if request.node_id.trim().is_empty() {
        return Err(ErrorResponse::bad_request("node_id must not be empty".to_string()));
    }
    state.manager.add_node(request.node_id).await;
    Ok(StatusCode::CREATED)
}

async fn remove_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ErrorResponse> {
    if state.manager.remove_node(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ErrorResponse::not_found(format!("Node {} not found", id)))
    }
}

async fn heartbeat(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    state.manager.update_heartbeat(&id).await;
    StatusCode::NO_CONTENT
}

async fn schedule_replication(
    State(state): State<AppState>,
    Json(request): Json<ScheduleReplicationRequest>,
) -> Result<(StatusCode, Json<ScheduleReplicationResponse>), ErrorResponse> {
    let task_id = state
        .manager
        .schedule_replication(request.source, request.targets, request.vector_ids)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ScheduleReplicationResponse {
            task_ids: vec![task_id],
        }),
    ))
}

async fn place_replication(
    State(state): State<AppState>,
    Json(request): Json<PlaceReplicationRequest>,
) -> Result<(StatusCode, Json<ScheduleReplicationResponse>), ErrorResponse> {
    let task_ids = state
        .manager
        .replicate_vectors(&request.source, request.vector_ids)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ScheduleReplicationResponse { task_ids })))
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Json<Vec<ReplicationTask>> {
    Json(state.manager.list_tasks(query.status).await)
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ReplicationTask>, ErrorResponse> {
    state
        .manager
        .get_task(&task_id)
        .await
        .map(Json)
        .ok_or_else(|| ReplicationError::TaskNotFound(task_id).into())
}

async fn retry_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<(StatusCode, Json<ScheduleReplicationResponse>), ErrorResponse> {
    let retry_id = state.manager.retry_task(&task_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ScheduleReplicationResponse {
            task_ids: vec![retry_id],
        }),
    ))
}

async fn cluster_health(State(state): State<AppState>) -> Json<ClusterHealth> {
    Json(state.manager.get_cluster_health().await)
}

async fn snapshot(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ErrorResponse> {
    Ok(Json(state.manager.to_dict().await?))
}
