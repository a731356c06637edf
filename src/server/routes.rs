//! HTTP route handlers for the document API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tower_http::services::ServeDir;
use tracing::warn;

use crate::document::core::block::{Author, Block};
use crate::document::core::conversation::Conversation;
use crate::document::core::ids::{BlockId, ConversationId, ModelId, ProviderId, StreamId, UserId};
use crate::document::core::rich::RichDocument;
use crate::document::engine::{Change, GenerationHandle, ModelSelection};
use crate::document::tokens::ContextUsage;

use super::error::ApiError;
use super::state::AppState;

/// Header carrying the authenticated user id, set by the upstream proxy.
pub const USER_HEADER: &str = "x-user-id";

type ApiResult<T> = Result<T, ApiError>;

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/messages", post(send_message))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            get(get_conversation)
                .patch(rename_conversation)
                .delete(delete_conversation),
        )
        .route(
            "/api/conversations/{id}/blocks",
            get(list_blocks).post(create_block),
        )
        .route("/api/conversations/{id}/generate", post(generate))
        .route("/api/conversations/{id}/tokens", get(context_usage))
        .route("/api/conversations/{id}/markdown", get(export_markdown))
        .route("/api/conversations/{id}/events", get(change_events))
        .route("/api/blocks/{id}", get(get_block).delete(delete_block))
        .route("/api/blocks/{id}/content", put(update_block_content))
        .route("/api/blocks/{id}/exclusion", put(toggle_block_exclusion))
        .fallback_service(ServeDir::new("static"))
        .with_state(state)
}

/// Acting user, from the `x-user-id` header.
#[derive(Clone, Copy, Debug)]
pub struct Actor(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .map(Self)
            .ok_or(ApiError::Unauthenticated)
    }
}

fn selection(
    state: &AppState,
    provider: Option<String>,
    model: Option<String>,
) -> ApiResult<ModelSelection> {
    let provider = provider.unwrap_or_else(|| state.config.llm.default_provider.clone());
    let model = model.unwrap_or_else(|| state.config.llm.default_model.clone());
    Ok(ModelSelection {
        provider: ProviderId::new(provider).map_err(|err| ApiError::BadRequest(err.to_string()))?,
        model: ModelId::new(model).map_err(|err| ApiError::BadRequest(err.to_string()))?,
    })
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "livedoc",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ----- conversations ---------------------------------------------------------

/// Conversation creation request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    /// Optional title.
    pub title: Option<String>,
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(request): Json<CreateConversationRequest>,
) -> ApiResult<(StatusCode, Json<Conversation>)> {
    let conversation = state
        .service
        .create_conversation(actor, request.title)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
) -> ApiResult<Json<Vec<Conversation>>> {
    Ok(Json(state.service.list_conversations(actor).await?))
}

async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.service.get_conversation(actor, id).await?))
}

/// Rename request.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    /// New title.
    pub title: String,
}

async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(
        state
            .service
            .rename_conversation(actor, id, &request.title)
            .await?,
    ))
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> ApiResult<StatusCode> {
    state.service.delete_conversation(actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ----- blocks ----------------------------------------------------------------

/// Block listing filter.
#[derive(Debug, Default, Deserialize)]
pub struct ListBlocksQuery {
    /// Only blocks that feed the model context.
    #[serde(default)]
    pub included: bool,
}

async fn list_blocks(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
    Query(query): Query<ListBlocksQuery>,
) -> ApiResult<Json<Vec<Block>>> {
    let blocks = if query.included {
        state.service.list_included_ordered(actor, id).await?
    } else {
        state.service.list_ordered(actor, id).await?
    };
    Ok(Json(blocks))
}

/// Block creation request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBlockRequest {
    /// Author of the new block.
    pub author: Author,
    /// Insert after the block with this order; end of document when absent.
    pub after_order: Option<f64>,
    /// Model recorded on assistant placeholders.
    pub model: Option<String>,
}

async fn create_block(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
    Json(request): Json<CreateBlockRequest>,
) -> ApiResult<(StatusCode, Json<Block>)> {
    let block = match request.author {
        Author::User => {
            state
                .service
                .create_user_block(actor, id, request.after_order)
                .await?
        }
        Author::Assistant => {
            let model = selection(&state, None, request.model)?.model;
            state
                .service
                .create_assistant_placeholder(actor, id, request.after_order, &model)
                .await?
        }
    };
    Ok((StatusCode::CREATED, Json(block)))
}

async fn get_block(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<BlockId>,
) -> ApiResult<Json<Block>> {
    Ok(Json(state.service.get_block(actor, id).await?))
}

/// Content replacement request.
#[derive(Debug, Deserialize)]
pub struct UpdateContentRequest {
    /// Rich document JSON.
    pub content: serde_json::Value,
}

async fn update_block_content(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<BlockId>,
    Json(request): Json<UpdateContentRequest>,
) -> ApiResult<Json<Block>> {
    let content = RichDocument::from_value(request.content)?;
    Ok(Json(state.service.update_content(actor, id, content).await?))
}

/// Exclusion toggle request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusionRequest {
    /// New flag value.
    pub is_excluded: bool,
}

async fn toggle_block_exclusion(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<BlockId>,
    Json(request): Json<ExclusionRequest>,
) -> ApiResult<Json<Block>> {
    Ok(Json(
        state
            .service
            .toggle_exclusion(actor, id, request.is_excluded)
            .await?,
    ))
}

async fn delete_block(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<BlockId>,
) -> ApiResult<StatusCode> {
    state.service.delete_block(actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ----- generation ------------------------------------------------------------

/// Message send request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Existing conversation; a new one is created when absent.
    pub conversation_id: Option<ConversationId>,
    /// Markdown text of the user turn.
    pub text: String,
    /// Model override.
    pub model: Option<String>,
    /// Provider override.
    pub provider: Option<String>,
}

/// Generation continuation request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Model override.
    pub model: Option<String>,
    /// Provider override.
    pub provider: Option<String>,
    /// Insert the response after this order; end of document when absent.
    pub after_order: Option<f64>,
}

/// A started generation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStarted {
    /// Conversation being written.
    pub conversation_id: ConversationId,
    /// Placeholder block.
    pub block_id: BlockId,
    /// Stream correlation id.
    pub stream_id: StreamId,
}

impl From<GenerationHandle> for GenerationStarted {
    fn from(handle: GenerationHandle) -> Self {
        // The task keeps running after its handle is dropped.
        Self {
            conversation_id: handle.conversation_id,
            block_id: handle.block_id,
            stream_id: handle.stream_id,
        }
    }
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<GenerationStarted>)> {
    let selection = selection(&state, request.provider, request.model)?;
    let handle = state
        .coordinator
        .send_message(actor, request.conversation_id, &request.text, selection)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(handle.into())))
}

async fn generate(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<(StatusCode, Json<GenerationStarted>)> {
    let selection = selection(&state, request.provider, request.model)?;
    let handle = state
        .coordinator
        .generate_block_response(actor, id, selection, request.after_order)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(handle.into())))
}

// ----- derived views ---------------------------------------------------------

/// Token usage query.
#[derive(Debug, Default, Deserialize)]
pub struct TokensQuery {
    /// Model whose window applies; the default model when absent.
    pub model: Option<String>,
}

async fn context_usage(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
    Query(query): Query<TokensQuery>,
) -> ApiResult<Json<ContextUsage>> {
    let model = selection(&state, None, query.model)?.model;
    Ok(Json(
        state
            .service
            .context_usage(actor, id, &model, &state.config.tokens)
            .await?,
    ))
}

async fn export_markdown(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> ApiResult<impl IntoResponse> {
    let markdown = state.service.export_markdown(actor, id).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        markdown,
    ))
}

async fn change_events(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    state.service.get_conversation(actor, id).await?;
    let receiver = state.service.changes().subscribe();
    Ok(Sse::new(conversation_events(receiver, id)).keep_alive(KeepAlive::default()))
}

fn conversation_events(
    receiver: broadcast::Receiver<Change>,
    conversation_id: ConversationId,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(receiver, move |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(change) if change.conversation_id() == conversation_id => {
                    match serde_json::to_string(&change) {
                        Ok(data) => {
                            return Some((Ok(Event::default().event("change").data(data)), receiver));
                        }
                        Err(err) => warn!(error = %err, "unserializable change skipped"),
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%conversation_id, skipped, "change subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::document::access::InMemoryApiKeyStore;
    use crate::document::core::config::AppConfig;
    use crate::document::storage::Database;
    use crate::llm::scripted::ScriptedProvider;
    use crate::llm::stream::StreamEvent;

    async fn app() -> Router {
        let db = Database::open_in_memory().await.unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![
            StreamEvent::delta("Hi"),
            StreamEvent::Finish {
                finish_reason: None,
                usage: None,
            },
        ]));
        let state = AppState::from_parts(
            AppConfig::default(),
            &db,
            provider,
            Arc::new(InMemoryApiKeyStore::new()),
        );
        create_router(state)
    }

    fn request(method: &str, uri: &str, user: Option<UserId>, body: Option<serde_json::Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_HEADER, user.to_string());
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .await
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_user_is_unauthorized() {
        let response = app()
            .await
            .oneshot(request("GET", "/api/conversations", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_block_lifecycle_over_http() {
        let app = app().await;
        let user = UserId::new();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/conversations",
                Some(user),
                Some(serde_json::json!({ "title": "Doc" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let conversation_id = json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/conversations/{conversation_id}/blocks"),
                Some(user),
                Some(serde_json::json!({ "author": "user" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let block = json(response).await;
        assert_eq!(block["order"], 1.0);
        let block_id = block["id"].as_str().unwrap().to_string();

        let content = serde_json::json!({
            "type": "doc",
            "content": [{ "type": "heading", "attrs": { "level": 1 },
                          "content": [{ "type": "text", "text": "Plan" }] }]
        });
        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/api/blocks/{block_id}/content"),
                Some(user),
                Some(serde_json::json!({ "content": content })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/conversations/{conversation_id}/markdown"),
                Some(user),
                None,
            ))
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"# Plan");

        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                &format!("/api/blocks/{block_id}/exclusion"),
                Some(user),
                Some(serde_json::json!({ "isExcluded": true })),
            ))
            .await
            .unwrap();
        assert_eq!(json(response).await["isExcluded"], true);

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/conversations/{conversation_id}/blocks?included=true"),
                Some(user),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(json(response).await, serde_json::json!([]));

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/api/blocks/{block_id}"),
                Some(user),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_foreign_user_forbidden_and_unknown_not_found() {
        let app = app().await;
        let owner = UserId::new();
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/conversations",
                Some(owner),
                Some(serde_json::json!({})),
            ))
            .await
            .unwrap();
        let conversation_id = json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/conversations/{conversation_id}/blocks"),
                Some(UserId::new()),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/conversations/{}/blocks", ConversationId::new()),
                Some(owner),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_content_is_bad_request() {
        let app = app().await;
        let user = UserId::new();
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/conversations",
                Some(user),
                Some(serde_json::json!({})),
            ))
            .await
            .unwrap();
        let conversation_id = json(response).await["id"].as_str().unwrap().to_string();
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                &format!("/api/conversations/{conversation_id}/blocks"),
                Some(user),
                Some(serde_json::json!({ "author": "user" })),
            ))
            .await
            .unwrap();
        let block_id = json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(request(
                "PUT",
                &format!("/api/blocks/{block_id}/content"),
                Some(user),
                Some(serde_json::json!({ "content": { "type": "doc", "content": [{ "type": "nope" }] } })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_message_creates_conversation() {
        let app = app().await;
        let user = UserId::new();
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/messages",
                Some(user),
                Some(serde_json::json!({ "text": "Plan a trip\nto Lisbon" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let started = json(response).await;
        let conversation_id = started["conversationId"].as_str().unwrap().to_string();
        assert!(started["blockId"].is_string());

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/conversations/{conversation_id}"),
                Some(user),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(json(response).await["title"], "Plan a trip");

        let response = app
            .oneshot(request(
                "GET",
                &format!("/api/conversations/{conversation_id}/blocks"),
                Some(user),
                None,
            ))
            .await
            .unwrap();
        let blocks = json(response).await;
        let blocks = blocks.as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["author"], "user");
        assert_eq!(blocks[1]["author"], "assistant");
    }

    #[tokio::test]
    async fn test_unknown_provider_is_bad_request() {
        let app = app().await;
        let response = app
            .oneshot(request(
                "POST",
                "/api/messages",
                Some(UserId::new()),
                Some(serde_json::json!({ "text": "hello", "provider": "mystery" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"], "unsupported provider: mystery");
    }
}
