use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::Error;
use crate::jobs::{pipeline, trigger};
use crate::models::briefing_models::NewRun;
use crate::AppState;

type HandlerError = (StatusCode, Json<serde_json::Value>);

fn internal_error(e: impl std::fmt::Display) -> HandlerError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": format!("Database error: {}", e)})),
    )
}

#[derive(Deserialize)]
pub struct TriggerNowRequest {
    pub email: String,
}

/// Creates an ad-hoc run outside any schedule and dispatches it.
pub async fn trigger_now(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TriggerNowRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), HandlerError> {
    if state
        .user_core
        .find_by_email(&req.email)
        .map_err(internal_error)?
        .is_none()
    {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": "User not found"})),
        ));
    }

    let run_id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp() as i32;
    state
        .briefing_repository
        .create_run(NewRun {
            id: run_id.clone(),
            schedule_id: None,
            user_email: req.email.clone(),
            scheduled_for: now,
            status: "pending".to_string(),
            created_at: now,
        })
        .map_err(internal_error)?;

    let task_state = state.clone();
    let task_run_id = run_id.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline::process_run(task_state, &task_run_id).await {
            tracing::error!("Manual run {} failed: {}", task_run_id, e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({"run_id": run_id}))))
}

#[derive(Deserialize)]
pub struct RunPipelineRequest {
    pub run_id: String,
}

/// Executes one pending run synchronously. A run that already left pending
/// is refused rather than re-executed.
pub async fn run_pipeline(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunPipelineRequest>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    match pipeline::process_run(state, &req.run_id).await {
        Ok(()) => Ok(Json(json!({"success": true}))),
        Err(Error::NotFound(what)) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Not found: {}", what)})),
        )),
        Err(e @ Error::InvalidRunState(_)) => Err((
            StatusCode::CONFLICT,
            Json(json!({"error": e.to_string()})),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )),
    }
}

/// Cron entrypoint: fires due schedules. Guarded by CRON_SECRET when set.
pub async fn cron_process(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, HandlerError> {
    if let Ok(secret) = std::env::var("CRON_SECRET") {
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == format!("Bearer {}", secret))
            .unwrap_or(false);
        if !authorized {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Unauthorized"})),
            ));
        }
    }

    let fired = trigger::run_due_schedules(&state, Utc::now().timestamp() as i32).await;
    Ok(Json(json!({"triggered": fired})))
}

/// Stable per-run audio link shared over WhatsApp. Clicking it counts as an
/// interaction, so the 24h window is renewed before redirecting to the
/// signed storage URL.
pub async fn audio_redirect(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Response {
    let output = match state.briefing_repository.get_output_by_run(&run_id) {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("Audio lookup failed for run {}: {}", run_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Lookup failed").into_response();
        }
    };
    let Some(output) = output else {
        return (StatusCode::NOT_FOUND, "Audio not found").into_response();
    };
    let Some(audio_url) = output.audio_url else {
        return (StatusCode::NOT_FOUND, "Audio not found").into_response();
    };

    let now = Utc::now().timestamp() as i32;
    if let Err(e) = state.user_core.open_whatsapp_window(&output.user_email, now) {
        // The redirect still goes through; the window renewal is a bonus.
        tracing::error!(
            "Could not extend WhatsApp window for {}: {}",
            output.user_email,
            e
        );
    } else {
        tracing::info!("Audio click renewed WhatsApp window for {}", output.user_email);
        if let Err(e) = state.briefing_repository.log_whatsapp_message(
            crate::models::briefing_models::NewWhatsappMessage {
                user_email: output.user_email.clone(),
                direction: "inbound".to_string(),
                message_type: "text".to_string(),
                content: format!("audio click for run {}", run_id),
                twilio_message_sid: None,
                triggered_by: "audio_link".to_string(),
                created_at: now,
            },
        ) {
            tracing::error!("Could not log audio click: {}", e);
        }
    }

    Redirect::temporary(&audio_url).into_response()
}

#[derive(Deserialize)]
pub struct SignedUrlQuery {
    pub exp: i64,
    pub sig: String,
}

/// Serves stored audio blobs behind the signed-URL check.
pub async fn serve_upload(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(query): Query<SignedUrlQuery>,
) -> Response {
    if !state.blob_storage.verify(&key, query.exp, &query.sig) {
        return (StatusCode::FORBIDDEN, "Invalid or expired link").into_response();
    }
    match state.blob_storage.read(&key).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "audio/mpeg")],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Upload read failed for {}: {}", key, e);
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
    }
}
