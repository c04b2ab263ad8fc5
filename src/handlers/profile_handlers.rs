use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::json;

use crate::intelligence::profile_analyzer;
use crate::AppState;

type HandlerError = (StatusCode, Json<serde_json::Value>);

fn internal_error(e: impl std::fmt::Display) -> HandlerError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": format!("Database error: {}", e)})),
    )
}

#[derive(Deserialize)]
pub struct AnalysisRequest {
    pub email: String,
}

/// Kicks off profile analysis in a detached task. Starting while one is
/// already running is refused; restarting after completed/failed is fine.
pub async fn start_analysis(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), HandlerError> {
    let status = state
        .user_core
        .get_analysis_status(&req.email)
        .map_err(internal_error)?
        .ok_or((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "User not found"})),
        ))?;

    if status == "analyzing" {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "Analysis already running"})),
        ));
    }

    let task_state = state.clone();
    let email = req.email.clone();
    tokio::spawn(async move {
        // Failures are already recorded on the user row; just log here.
        if let Err(e) = profile_analyzer::run_profile_analysis(task_state, email).await {
            tracing::error!("Detached profile analysis failed: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "analyzing"})),
    ))
}

/// Cancel request: flips the status away from `analyzing`; the running job
/// notices on its next progress checkpoint and exits cleanly.
pub async fn stop_analysis(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalysisRequest>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let status = state
        .user_core
        .get_analysis_status(&req.email)
        .map_err(internal_error)?;

    if status.as_deref() == Some("analyzing") {
        state
            .user_core
            .set_analysis_status(&req.email, "failed")
            .map_err(internal_error)?;
        tracing::info!("Analysis cancel requested for {}", req.email);
    }
    Ok(Json(json!({"success": true})))
}

pub async fn analysis_status(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalysisRequest>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let user = state
        .user_core
        .find_by_email(&req.email)
        .map_err(internal_error)?
        .ok_or((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "User not found"})),
        ))?;
    let profile = state
        .briefing_repository
        .get_profile(&req.email)
        .map_err(internal_error)?;

    Ok(Json(json!({
        "status": user.profile_analysis_status,
        "count": user.profile_analysis_count,
        "total": user.profile_analysis_total,
        "profile": profile,
    })))
}
