use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Couple Quiz Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
        crate::routes::game::active_session,
        crate::routes::game::history,
        crate::routes::game::stats,
        crate::routes::game::badges,
        crate::routes::game::current_question,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::ws::InboundMessage,
            crate::dto::ws::OutboundEvent,
            crate::dto::game::InvitationPayload,
            crate::dto::game::StatusPayload,
            crate::dto::game::StatusKind,
            crate::dto::game::QuestionPayload,
            crate::dto::game::GuessResultPayload,
            crate::dto::game::GameResultsPayload,
            crate::dto::game::ErrorPayload,
            crate::dto::query::ActiveSessionSummary,
            crate::dto::query::HistoryPage,
            crate::dto::query::HistoryItem,
            crate::dto::query::DashboardStats,
            crate::dto::query::BadgesResponse,
            crate::state::state_machine::SessionStatus,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "game", description = "Session summaries, history and analytics"),
        (name = "players", description = "WebSocket channel for game actions and events"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}
