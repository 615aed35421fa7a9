use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{Request, header::AUTHORIZATION},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::{
        game::QuestionPayload,
        query::{ActiveSessionSummary, BadgesResponse, DashboardStats, HistoryPage, HistoryQuery},
    },
    error::AppError,
    services::{game_service, query_service},
    state::SharedState,
};

/// User resolved from the bearer credential of the request.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Uuid);

/// Player-facing read endpoints, all behind bearer authentication.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/api/game/active", get(active_session))
        .route("/api/game/history", get(history))
        .route("/api/game/stats", get(stats))
        .route("/api/game/badges", get(badges))
        .route(
            "/api/game/{session_id}/current-question",
            get(current_question),
        )
        .route_layer(middleware::from_fn_with_state(state, require_bearer))
}

/// Summary of the couple's running session.
#[utoipa::path(
    get,
    path = "/api/game/active",
    tag = "game",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Running session", body = ActiveSessionSummary),
        (status = 404, description = "No active game session"),
    )
)]
pub async fn active_session(
    State(state): State<SharedState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> Result<Json<ActiveSessionSummary>, AppError> {
    query_service::active_session_summary(&state, user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No active game session".into()))
}

/// Completed games of the couple, paginated.
#[utoipa::path(
    get,
    path = "/api/game/history",
    tag = "game",
    security(("bearer" = [])),
    params(HistoryQuery),
    responses((status = 200, description = "History page", body = HistoryPage))
)]
pub async fn history(
    State(state): State<SharedState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, AppError> {
    Ok(Json(query_service::history(&state, user_id, query).await?))
}

/// Aggregate statistics of the couple.
#[utoipa::path(
    get,
    path = "/api/game/stats",
    tag = "game",
    security(("bearer" = [])),
    responses((status = 200, description = "Dashboard statistics", body = DashboardStats))
)]
pub async fn stats(
    State(state): State<SharedState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> Result<Json<DashboardStats>, AppError> {
    Ok(Json(query_service::dashboard_stats(&state, user_id).await?))
}

/// Badges earned by the couple.
#[utoipa::path(
    get,
    path = "/api/game/badges",
    tag = "game",
    security(("bearer" = [])),
    responses((status = 200, description = "Earned badges", body = BadgesResponse))
)]
pub async fn badges(
    State(state): State<SharedState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> Result<Json<BadgesResponse>, AppError> {
    let badges = query_service::badges(&state, user_id).await?;
    Ok(Json(BadgesResponse { badges }))
}

/// Question the caller should be looking at, used to resume a game.
#[utoipa::path(
    get,
    path = "/api/game/{session_id}/current-question",
    tag = "game",
    security(("bearer" = [])),
    params(("session_id" = Uuid, Path, description = "Game session")),
    responses(
        (status = 200, description = "Current question", body = QuestionPayload),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "No question in the current session state"),
        (status = 410, description = "Session expired"),
    )
)]
pub async fn current_question(
    State(state): State<SharedState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<QuestionPayload>, AppError> {
    game_service::get_current_question(&state, session_id, user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::conflict("No current question available for this session state"))
}

async fn require_bearer(
    State(state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;

    let user_id = state
        .directory()
        .resolve_token(token)
        .await
        .map_err(|err| AppError::ServiceUnavailable(err.to_string()))?
        .ok_or_else(|| AppError::Unauthorized("invalid bearer token".into()))?;

    req.extensions_mut().insert(AuthenticatedUser(user_id));
    Ok(next.run(req).await)
}
