//! Sync endpoint routes.

use axum::{extract::State, routing::post, Json, Router};
use hearth_engine::config::{DEFAULT_LWW_PATH, DEFAULT_VALIDATE_PATH};
use hearth_engine::{LwwResponse, ValidateRequest, ValidateResponse};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{handle_lww, handle_validate, LwwBody};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(DEFAULT_VALIDATE_PATH, post(validate_handler))
        .route(DEFAULT_LWW_PATH, post(lww_handler))
}

/// POST /api/apps/db/sync/validate - Report ids the client must drop.
async fn validate_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>> {
    let response = handle_validate(state.repo.as_ref(), request).await?;
    Ok(Json(response))
}

/// POST /api/apps/db/sync/lww - Exchange uploads for server changes.
async fn lww_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(body): Json<LwwBody>,
) -> Result<Json<LwwResponse>> {
    let response = handle_lww(state.repo.as_ref(), body).await?;
    Ok(Json(response))
}
