use serde::Serialize;
use utoipa::ToSchema;

/// Body of the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok" while a session store is installed, "degraded" otherwise.
    pub status: &'static str,
}

impl HealthResponse {
    /// Map the degraded flag onto the reported status.
    pub fn from_degraded(degraded: bool) -> Self {
        let status = if degraded { "degraded" } else { "ok" };
        Self { status }
    }
}
