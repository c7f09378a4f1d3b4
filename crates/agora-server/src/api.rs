use std::sync::Arc;

use agora_ai::summarizer::MAX_SUMMARY_MESSAGES;
use agora_ai::{SummaryMessage, Summarizer};
use agora_shared::protocol::{Actor, InboundEvent};
use agora_shared::{
    LinkKind, ReminderId, ReminderStatus, RoomId, RoomKind, RoomLinkId, WorkspaceId,
};
use agora_store::{Message, NewReminder, Reminder, Room, RoomLink};
use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::admin;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::ingest::{IngestResult, IngestService};
use crate::store::Store;

const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub ingest: Arc<IngestService>,
    /// `None` when no AI routing file was loaded.
    pub summarizer: Option<Arc<Summarizer>>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/events", post(post_event))
        .route("/workspaces/:ws/rooms/:room/kind", put(put_room_kind))
        .route("/workspaces/:ws/rooms/:room/summary", post(post_summary))
        .route("/workspaces/:ws/room-links", post(post_room_link))
        .route("/workspaces/:ws/room-links/:id", delete(delete_room_link))
        .route("/workspaces/:ws/messages/search", get(search_messages))
        .route(
            "/workspaces/:ws/reminders",
            post(post_reminder).get(list_reminders),
        )
        .route("/workspaces/:ws/reminders/:id/status", put(put_reminder_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_gateway_token,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

async fn require_gateway_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(expected) = &state.config.gateway_token {
        verify_bearer(request.headers(), expected)?;
    }
    Ok(next.run(request).await)
}

fn verify_bearer(headers: &HeaderMap, expected: &str) -> Result<(), ServerError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or("");

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Unauthorized);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct RoomKindRequest {
    actor: Actor,
    kind: RoomKind,
}

#[derive(Deserialize)]
struct CreateLinkRequest {
    actor: Actor,
    source_room_id: RoomId,
    target_room_id: RoomId,
    kind: LinkKind,
}

#[derive(Deserialize)]
struct ActorRequest {
    actor: Actor,
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct StatusRequest {
    status: ReminderStatus,
}

#[derive(Deserialize)]
struct SummaryRequest {
    #[serde(default)]
    days: Option<u32>,
}

#[derive(Serialize)]
struct SummaryResponse {
    summary: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn post_event(
    State(state): State<AppState>,
    Json(event): Json<InboundEvent>,
) -> Result<Json<IngestResult>, ServerError> {
    Ok(Json(state.ingest.handle_event(event).await?))
}

async fn put_room_kind(
    State(state): State<AppState>,
    Path((ws, room)): Path<(WorkspaceId, RoomId)>,
    Json(req): Json<RoomKindRequest>,
) -> Result<Json<Room>, ServerError> {
    let room = admin::set_room_kind(&state.store, &req.actor, ws, room, req.kind)?;
    Ok(Json(room))
}

async fn post_room_link(
    State(state): State<AppState>,
    Path(ws): Path<WorkspaceId>,
    Json(req): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<RoomLink>), ServerError> {
    let link = admin::create_room_link(
        &state.store,
        &req.actor,
        ws,
        req.source_room_id,
        req.target_room_id,
        req.kind,
    )?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn delete_room_link(
    State(state): State<AppState>,
    Path((ws, id)): Path<(WorkspaceId, RoomLinkId)>,
    Json(req): Json<ActorRequest>,
) -> Result<StatusCode, ServerError> {
    admin::delete_room_link(&state.store, &req.actor, ws, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn search_messages(
    State(state): State<AppState>,
    Path(ws): Path<WorkspaceId>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let keyword = params.q.trim();
    if keyword.is_empty() {
        return Err(ServerError::BadRequest("q must not be empty".into()));
    }
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_SEARCH_LIMIT);

    let messages = state.store.with(|db| db.search_messages(ws, keyword, limit))?;
    Ok(Json(messages))
}

async fn post_reminder(
    State(state): State<AppState>,
    Path(ws): Path<WorkspaceId>,
    Json(req): Json<NewReminder>,
) -> Result<(StatusCode, Json<Reminder>), ServerError> {
    if req.title.trim().is_empty() {
        return Err(ServerError::BadRequest("title must not be empty".into()));
    }
    let reminder = state.store.with(|db| {
        db.get_workspace(ws)?;
        db.create_reminder(ws, req)
    })?;
    info!(reminder = %reminder.id, workspace = %ws, due = %reminder.due_at, "Reminder created");
    Ok((StatusCode::CREATED, Json(reminder)))
}

async fn list_reminders(
    State(state): State<AppState>,
    Path(ws): Path<WorkspaceId>,
) -> Result<Json<Vec<Reminder>>, ServerError> {
    Ok(Json(state.store.with(|db| db.list_reminders(ws))?))
}

async fn put_reminder_status(
    State(state): State<AppState>,
    Path((ws, id)): Path<(WorkspaceId, ReminderId)>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Reminder>, ServerError> {
    let reminder = state
        .store
        .with(|db| db.update_reminder_status(ws, id, req.status))?;
    Ok(Json(reminder))
}

async fn post_summary(
    State(state): State<AppState>,
    Path((ws, room_id)): Path<(WorkspaceId, RoomId)>,
    body: Option<Json<SummaryRequest>>,
) -> Result<Json<SummaryResponse>, ServerError> {
    let Some(summarizer) = state.summarizer.clone() else {
        return Err(ServerError::AiUnavailable("no AI routing loaded".into()));
    };
    let days = body.and_then(|Json(req)| req.days);

    let messages = state.store.with(|db| {
        db.get_room(ws, room_id)?;
        db.messages_for_room(ws, room_id, MAX_SUMMARY_MESSAGES)
    })?;
    let messages = messages
        .into_iter()
        .map(|m| SummaryMessage {
            sender_name: m.sender_name,
            content: m.body,
            timestamp: m.timestamp,
        })
        .collect();

    let summary = summarizer
        .summarize(messages, days, ws, Some(room_id))
        .await?;
    Ok(Json(SummaryResponse { summary }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
