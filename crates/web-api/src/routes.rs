use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use application::{ApplicationError, GroupSummaryDto, HubStats, RegisterUserRequest, UserDto};
use domain::UserId;

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPayload {
    user_id: String,
    display_name: Option<String>,
    public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    tag: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    stats: HubStats,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register_user))
        .route("/auth/token", post(issue_token))
        .route("/groups/search", get(search_groups))
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let stats = state.hub.stats().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        stats,
    }))
}

async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<Json<UserDto>, ApiError> {
    let user = state
        .user_service
        .register(RegisterUserRequest {
            user_id: payload.user_id,
            display_name: payload.display_name,
            public_key: payload.public_key,
        })
        .await?;

    Ok(Json(UserDto::from(&user)))
}

/// 为已注册用户签发访问令牌
async fn issue_token(
    State(state): State<AppState>,
    Json(payload): Json<TokenPayload>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user_id = UserId::parse(payload.user_id).map_err(ApplicationError::from)?;
    let user = state.user_service.get_user(&user_id).await?;
    let token = state
        .token_service
        .issue(&user.id)
        .map_err(|err| ApplicationError::infrastructure_with_source("failed to issue token", err))?;

    Ok(Json(TokenResponse { token }))
}

/// 按加入标签搜索群组，只返回摘要，不含成员列表
async fn search_groups(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<GroupSummaryDto>>, ApiError> {
    let tag = query
        .tag
        .filter(|tag| !tag.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("query parameter `tag` is required"))?;

    let groups = state.group_service.find_by_tag(&tag).await?;
    Ok(Json(groups.iter().map(GroupSummaryDto::from).collect()))
}

async fn websocket_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| WebSocketConnection::new(socket, hub).run())
}
