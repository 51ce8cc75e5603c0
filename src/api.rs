use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{
    CreateNodeRequest, CreateNoteRequest, CreatePromptRequest, HealthResponse, ImportTreeRequest, MessageResponse,
    Node, NodePatch, Note, Prompt, PromptPatch, SaveTreeRequest, SavedTreeListResponse, Tree, UpdateNoteRequest,
};
use crate::notifier::ChangeEvent;
use crate::service::PromptService;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

const SSE_KEEPALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct AppState {
    pub service: PromptService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(service: PromptService, config: AppConfig) -> Self {
        Self {
            service,
            config: Arc::new(config),
        }
    }
}

/// Error body returned to clients as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<AppError> for ApiError {
    fn from(error: AppError) -> Self {
        let status = match &error {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => {
                tracing::error!(error = %error, "request failed");
                return Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
            }
        };
        Self::new(status, error.message())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let status = match &rejection {
            JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => StatusCode::BAD_REQUEST,
            other => other.status(),
        };
        Self::new(status, rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, format!("invalid path parameter: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health))
        .route("/tree", get(get_tree))
        .route("/tree/export", get(get_tree))
        .route("/tree/import", post(import_tree))
        .route("/tree/save", post(save_tree))
        .route("/tree/saves", get(list_saved_trees))
        .route("/tree/saves/:name", axum::routing::delete(delete_saved_tree))
        .route("/tree/load/:name", post(load_tree))
        .route(
            "/prompts/:id",
            get(get_prompt).post(create_prompt).put(update_prompt).delete(delete_prompt),
        )
        .route("/prompts/:id/nodes", get(get_prompt_nodes).post(create_node))
        .route("/prompts/:id/nodes/:node_id", put(update_node).delete(delete_node))
        .route("/prompts/:id/notes", get(get_notes).post(create_note))
        .route("/prompts/:id/notes/:note_id", put(update_note).delete(delete_note))
        .route("/events", get(events))
        .method_not_allowed_fallback(method_not_allowed)
        .fallback(route_not_found)
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring allowed origin that is not a valid header value");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Static bearer token check. Disabled when no key is configured; requests
/// from an allowed browser origin and health probes pass through.
async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.config.api_key.as_deref() else {
        return next.run(request).await;
    };
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }
    let trusted_origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(|origin| state.config.is_allowed_origin(origin))
        .unwrap_or(false);
    if trusted_origin {
        return next.run(request).await;
    }

    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let rejection = match authorization.as_deref() {
        None => "API key required. Use Authorization: Bearer <your-api-key>",
        Some(value) => match value.strip_prefix("Bearer ") {
            None => "Invalid authorization format. Use: Bearer <your-api-key>",
            Some(token) if token == expected => return next.run(request).await,
            Some(_) => "Invalid API key",
        },
    };
    tracing::warn!(path = %request.uri().path(), reason = rejection, "rejected unauthenticated request");
    ApiError::new(StatusCode::UNAUTHORIZED, rejection).into_response()
}

/// Runs a store-bound service call off the async workers.
async fn blocking<T, F>(state: &AppState, call: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&PromptService) -> AppResult<T> + Send + 'static,
{
    let service = state.service.clone();
    let result = tokio::task::spawn_blocking(move || call(&service))
        .await
        .map_err(AppError::from)?;
    result.map_err(ApiError::from)
}

async fn route_not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "route not found")
}

async fn method_not_allowed() -> ApiError {
    ApiError::new(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "Prompt Tree API is running".to_string(),
    })
}

async fn get_tree(State(state): State<AppState>) -> ApiResult<Json<Tree>> {
    blocking(&state, |service| service.get_tree()).await.map(Json)
}

async fn import_tree(
    State(state): State<AppState>,
    body: Result<Json<ImportTreeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    let Json(request) = body?;
    blocking(&state, move |service| service.import_tree(&request.tree)).await?;
    Ok((StatusCode::CREATED, Json(MessageResponse::new("Tree imported successfully"))))
}

async fn save_tree(
    State(state): State<AppState>,
    body: Result<Json<SaveTreeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    let Json(request) = body?;
    blocking(&state, move |service| service.save_tree(&request.name)).await?;
    Ok((StatusCode::CREATED, Json(MessageResponse::new("Tree saved successfully"))))
}

async fn list_saved_trees(State(state): State<AppState>) -> ApiResult<Json<SavedTreeListResponse>> {
    let trees = blocking(&state, |service| service.list_saved_trees()).await?;
    Ok(Json(SavedTreeListResponse { trees }))
}

async fn load_tree(
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    let Path(name) = name?;
    blocking(&state, move |service| service.load_tree(&name)).await?;
    Ok((StatusCode::CREATED, Json(MessageResponse::new("Tree loaded successfully"))))
}

async fn delete_saved_tree(
    State(state): State<AppState>,
    name: Result<Path<String>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path(name) = name?;
    blocking(&state, move |service| service.delete_saved_tree(&name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_prompt(State(state): State<AppState>, id: Result<Path<i64>, PathRejection>) -> ApiResult<Json<Prompt>> {
    let Path(id) = id?;
    blocking(&state, move |service| service.get_prompt(id)).await.map(Json)
}

/// The path id is not used; prompts always receive a fresh id.
async fn create_prompt(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<CreatePromptRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Prompt>)> {
    let Path(_) = id?;
    let Json(request) = body?;
    let prompt = blocking(&state, move |service| service.create_prompt(&request)).await?;
    Ok((StatusCode::CREATED, Json(prompt)))
}

async fn update_prompt(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<PromptPatch>, JsonRejection>,
) -> ApiResult<Json<Prompt>> {
    let Path(id) = id?;
    let Json(patch) = body?;
    blocking(&state, move |service| service.update_prompt(id, &patch)).await.map(Json)
}

async fn delete_prompt(State(state): State<AppState>, id: Result<Path<i64>, PathRejection>) -> ApiResult<StatusCode> {
    let Path(id) = id?;
    blocking(&state, move |service| service.delete_prompt(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_prompt_nodes(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Vec<Node>>> {
    let Path(id) = id?;
    blocking(&state, move |service| service.get_prompt_nodes(id)).await.map(Json)
}

async fn create_node(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<CreateNodeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    let Path(id) = id?;
    let Json(request) = body?;
    let node = blocking(&state, move |service| service.create_node(id, &request)).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn update_node(
    State(state): State<AppState>,
    ids: Result<Path<(i64, i64)>, PathRejection>,
    body: Result<Json<NodePatch>, JsonRejection>,
) -> ApiResult<Json<Node>> {
    let Path((prompt_id, node_id)) = ids?;
    let Json(patch) = body?;
    blocking(&state, move |service| service.update_node(prompt_id, node_id, &patch))
        .await
        .map(Json)
}

async fn delete_node(
    State(state): State<AppState>,
    ids: Result<Path<(i64, i64)>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path((prompt_id, node_id)) = ids?;
    blocking(&state, move |service| service.delete_node(prompt_id, node_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_notes(State(state): State<AppState>, id: Result<Path<i64>, PathRejection>) -> ApiResult<Json<Vec<Note>>> {
    let Path(id) = id?;
    blocking(&state, move |service| service.get_notes(id)).await.map(Json)
}

async fn create_note(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<CreateNoteRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Note>)> {
    let Path(id) = id?;
    let Json(request) = body?;
    let note = blocking(&state, move |service| service.create_note(id, &request)).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

async fn update_note(
    State(state): State<AppState>,
    ids: Result<Path<(i64, i64)>, PathRejection>,
    body: Result<Json<UpdateNoteRequest>, JsonRejection>,
) -> ApiResult<Json<Note>> {
    let Path((prompt_id, note_id)) = ids?;
    let Json(request) = body?;
    blocking(&state, move |service| service.update_note(prompt_id, note_id, &request))
        .await
        .map(Json)
}

async fn delete_note(
    State(state): State<AppState>,
    ids: Result<Path<(i64, i64)>, PathRejection>,
) -> ApiResult<StatusCode> {
    let Path((prompt_id, note_id)) = ids?;
    blocking(&state, move |service| service.delete_note(prompt_id, note_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Server-sent change events. Each connection registers its own subscriber;
/// the stream ends once that subscriber falls behind, and dropping the stream
/// unregisters it.
async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscriber_id = Uuid::new_v4().to_string();
    let subscription = state.service.notifier().register(subscriber_id.clone());
    tracing::info!(
        subscriber = %subscriber_id,
        subscribers = state.service.notifier().subscriber_count(),
        "event stream opened"
    );

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        Some((sse_event(&event), subscription))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEPALIVE).text("keepalive"))
}

fn sse_event(event: &ChangeEvent) -> Result<Event, axum::Error> {
    Event::default().event(event.kind.as_str()).json_data(event)
}
