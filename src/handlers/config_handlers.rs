use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;

use crate::jobs::next_run::compute_next_run;
use crate::models::briefing_models::NewUser;
use crate::AppState;

const DEFAULT_TIMEZONE: &str = "America/Argentina/Buenos_Aires";
const DEFAULT_TIME_LOCAL: &str = "07:00";
const DEFAULT_DAYS: [u8; 5] = [1, 2, 3, 4, 5]; // Monday through Friday

#[derive(Deserialize)]
pub struct SaveConfigRequest {
    pub email: String,
    pub time_local: String,
    pub timezone: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub days_of_week: Option<Vec<u8>>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Deserialize)]
pub struct ConfigQuery {
    pub email: String,
}

fn valid_time_local(time: &str) -> bool {
    let Some((h, m)) = time.split_once(':') else {
        return false;
    };
    let (Ok(h), Ok(m)) = (h.parse::<u32>(), m.parse::<u32>()) else {
        return false;
    };
    time.len() == 5 && h < 24 && m < 60
}

// E.164: leading +, then 2-15 digits starting with a nonzero.
fn valid_phone(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    digits.len() >= 2
        && digits.len() <= 15
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0')
}

/// An omitted phone keeps whatever is stored; an empty string clears it.
fn effective_phone<'a>(
    requested: Option<&'a str>,
    stored: Option<&'a str>,
) -> Result<Option<&'a str>, &'static str> {
    match requested {
        None => Ok(stored),
        Some("") => Ok(None),
        Some(phone) if valid_phone(phone) => Ok(Some(phone)),
        Some(_) => Err("Invalid phone format (E.164)"),
    }
}

type HandlerError = (StatusCode, Json<serde_json::Value>);

fn bad_request(message: &str) -> HandlerError {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message})))
}

fn internal_error(e: impl std::fmt::Display) -> HandlerError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": format!("Database error: {}", e)})),
    )
}

/// Saves the user's briefing configuration: contact settings plus the
/// schedule, whose next_run_at is recomputed from now.
pub async fn save_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveConfigRequest>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    if !valid_time_local(&req.time_local) {
        return Err(bad_request("Invalid time format (HH:MM)"));
    }
    if req.timezone.parse::<Tz>().is_err() {
        return Err(bad_request("Invalid timezone"));
    }
    let days = req.days_of_week.unwrap_or_else(|| DEFAULT_DAYS.to_vec());
    if days.iter().any(|d| *d > 6) {
        return Err(bad_request("Invalid weekday (0-6, 0=Sunday)"));
    }

    let next_run_at = compute_next_run(&req.time_local, &req.timezone, &days, Utc::now())
        .map_err(|e| bad_request(&e.to_string()))?;

    let user = state
        .user_core
        .find_by_email(&req.email)
        .map_err(internal_error)?;
    let phone = effective_phone(
        req.phone.as_deref(),
        user.as_ref().and_then(|u| u.phone_whatsapp.as_deref()),
    )
    .map_err(bad_request)?;

    if user.is_none() {
        state
            .user_core
            .create_user(NewUser {
                email: req.email.clone(),
                name: None,
                phone_whatsapp: None,
                timezone: DEFAULT_TIMEZONE.to_string(),
                onboarding_completed: false,
                profile_analysis_status: "pending".to_string(),
                profile_analysis_count: 0,
                profile_analysis_total: 0,
                whatsapp_status: "pending".to_string(),
                whatsapp_window_expires_at: None,
                whatsapp_last_interaction_at: None,
                created_at: Utc::now().timestamp() as i32,
            })
            .map_err(internal_error)?;
    }

    state
        .user_core
        .update_contact_settings(&req.email, phone, &req.timezone)
        .map_err(internal_error)?;
    state
        .briefing_repository
        .upsert_schedule(
            &req.email,
            &req.time_local,
            &req.timezone,
            &days,
            req.enabled,
            next_run_at.timestamp() as i32,
        )
        .map_err(internal_error)?;

    tracing::info!(
        "Saved config for {}: {} {} (next run {})",
        req.email,
        req.time_local,
        req.timezone,
        next_run_at
    );
    Ok(Json(json!({
        "success": true,
        "next_run_at": next_run_at.timestamp(),
    })))
}

pub async fn get_config(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConfigQuery>,
) -> Result<Json<serde_json::Value>, HandlerError> {
    let user = state
        .user_core
        .find_by_email(&query.email)
        .map_err(internal_error)?;
    let schedule = state
        .briefing_repository
        .get_schedule(&query.email)
        .map_err(internal_error)?;

    let days: Vec<u8> = schedule
        .as_ref()
        .and_then(|s| serde_json::from_str(&s.days_of_week).ok())
        .unwrap_or_else(|| DEFAULT_DAYS.to_vec());

    Ok(Json(json!({
        "phone": user.as_ref().and_then(|u| u.phone_whatsapp.clone()).unwrap_or_default(),
        "timezone": user
            .map(|u| u.timezone)
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
        "time_local": schedule
            .as_ref()
            .map(|s| s.time_local.clone())
            .unwrap_or_else(|| DEFAULT_TIME_LOCAL.to_string()),
        "enabled": schedule.as_ref().map(|s| s.enabled).unwrap_or(true),
        "days_of_week": days,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_times() {
        assert!(valid_time_local("07:00"));
        assert!(valid_time_local("23:59"));
        assert!(valid_time_local("00:00"));
    }

    #[test]
    fn rejects_malformed_times() {
        assert!(!valid_time_local("24:00"));
        assert!(!valid_time_local("07:60"));
        assert!(!valid_time_local("7:00"));
        assert!(!valid_time_local("0700"));
        assert!(!valid_time_local("mañana"));
    }

    #[test]
    fn accepts_e164_phones() {
        assert!(valid_phone("+5491112345678"));
        assert!(valid_phone("+14155552671"));
    }

    #[test]
    fn rejects_malformed_phones() {
        assert!(!valid_phone("5491112345678"));
        assert!(!valid_phone("+0123"));
        assert!(!valid_phone("+54 9 11 1234"));
        assert!(!valid_phone("+"));
    }

    #[test]
    fn omitted_phone_keeps_stored_value() {
        assert_eq!(
            effective_phone(None, Some("+5491112345678")),
            Ok(Some("+5491112345678"))
        );
        assert_eq!(effective_phone(None, None), Ok(None));
    }

    #[test]
    fn empty_phone_clears_stored_value() {
        assert_eq!(effective_phone(Some(""), Some("+5491112345678")), Ok(None));
    }

    #[test]
    fn replacement_phone_is_validated() {
        assert_eq!(
            effective_phone(Some("+14155552671"), Some("+5491112345678")),
            Ok(Some("+14155552671"))
        );
        assert!(effective_phone(Some("nope"), Some("+5491112345678")).is_err());
    }
}
