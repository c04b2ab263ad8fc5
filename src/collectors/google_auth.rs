use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::error::Error;
use crate::AppState;

// Refresh when this close to expiry, matching Google's guidance.
const REFRESH_MARGIN_SECS: i32 = 5 * 60;

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
    // Google may rotate the refresh token; keep the old one otherwise.
    refresh_token: Option<String>,
}

/// Returns a usable Google access token for the user, refreshing it through
/// the token endpoint when it is within five minutes of expiry. A user with
/// no stored tokens is a credential error, distinguishable from transient
/// upstream failures.
pub async fn get_valid_access_token(
    state: &Arc<AppState>,
    user_email: &str,
) -> Result<String, Error> {
    let (access_token, refresh_token, expires_at) = state
        .briefing_repository
        .get_oauth_tokens(user_email)?
        .ok_or_else(|| Error::Credential(format!("No Google tokens stored for {}", user_email)))?;

    let now = Utc::now().timestamp() as i32;
    if now < expires_at - REFRESH_MARGIN_SECS {
        return Ok(access_token);
    }

    tracing::info!("Access token for {} near expiry, refreshing", user_email);

    let client_id = std::env::var("GOOGLE_CLIENT_ID")
        .map_err(|_| Error::Config("GOOGLE_CLIENT_ID not set".to_string()))?;
    let client_secret = std::env::var("GOOGLE_CLIENT_SECRET")
        .map_err(|_| Error::Config("GOOGLE_CLIENT_SECRET not set".to_string()))?;

    let response = reqwest::Client::new()
        .post("https://oauth2.googleapis.com/token")
        .form(&[
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Credential(format!(
            "Token refresh failed for {} ({}): {}",
            user_email, status, body
        )));
    }

    let refreshed: RefreshResponse = response
        .json()
        .await
        .map_err(|e| Error::Credential(format!("Malformed token refresh response: {}", e)))?;

    let new_expires_at = now + refreshed.expires_in as i32;
    match refreshed.refresh_token {
        Some(rotated) => state.briefing_repository.store_oauth_tokens(
            user_email,
            &refreshed.access_token,
            &rotated,
            new_expires_at,
        )?,
        None => state.briefing_repository.update_access_token(
            user_email,
            &refreshed.access_token,
            new_expires_at,
        )?,
    }

    Ok(refreshed.access_token)
}
