//! `GET /api/v1/sessions/{session_id}/history`: a session's recorded turns, for diagnostics.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn session_history(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    let turns = state.sessions().history(&session_id).await;

    if turns.is_empty() {
        return Err(AppError::NotFound(format!("Session '{}' has no history", session_id)));
    }

    Ok(HttpResponse::Ok().json(json!({
        "session_id": session_id,
        "turn_count": turns.len(),
        "turns": turns,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
