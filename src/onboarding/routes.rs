//! REST endpoints for onboarding session status.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tracing::warn;

use super::session::SessionStatus;
use crate::gateway::MemberId;
use crate::store::Database;

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub store: Arc<dyn Database>,
}

fn internal_error(e: impl std::fmt::Display) -> axum::response::Response {
    warn!(error = %e, "Onboarding status query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": "Failed to read sessions"})),
    )
        .into_response()
}

/// GET /api/onboarding/sessions
///
/// Returns every active onboarding session, oldest first.
async fn list_sessions(State(state): State<OnboardingRouteState>) -> impl IntoResponse {
    match state.store.list_sessions(SessionStatus::Active).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/onboarding/sessions/{member_id}
///
/// Returns one member's session, or 404 if they never started onboarding.
async fn get_session(
    State(state): State<OnboardingRouteState>,
    Path(member_id): Path<u64>,
) -> impl IntoResponse {
    match state.store.get_session(MemberId(member_id)).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No onboarding session for this member"})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/api/onboarding/sessions", get(list_sessions))
        .route("/api/onboarding/sessions/{member_id}", get(get_session))
        .with_state(state)
}
