use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::delivery::window;
use crate::error::Error;
use crate::models::briefing_models::NewWhatsappMessage;
use crate::AppState;

// Reply CTA keeps tomorrow's window open.
const REPLY_CTA: &str = "\n\n¿Mañana igual? Respondé 'Si' para confirmar.";

#[derive(Debug)]
pub enum DeliveryOutcome {
    Sent { message_sid: String },
    WindowClosed,
    Failed(String),
}

#[derive(Deserialize)]
struct TwilioMessageResponse {
    sid: String,
}

fn whatsapp_address(number: &str) -> String {
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{}", number)
    }
}

async fn send_twilio_message(to: &str, body: &str) -> Result<String, Error> {
    let account_sid = std::env::var("TWILIO_ACCOUNT_SID")
        .map_err(|_| Error::Config("TWILIO_ACCOUNT_SID not set".to_string()))?;
    let auth_token = std::env::var("TWILIO_AUTH_TOKEN")
        .map_err(|_| Error::Config("TWILIO_AUTH_TOKEN not set".to_string()))?;
    let from_number = std::env::var("TWILIO_WHATSAPP_NUMBER")
        .map_err(|_| Error::Config("TWILIO_WHATSAPP_NUMBER not set".to_string()))?;

    let response = reqwest::Client::new()
        .post(format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            account_sid
        ))
        .basic_auth(&account_sid, Some(&auth_token))
        .form(&[
            ("From", whatsapp_address(&from_number)),
            ("To", whatsapp_address(to)),
            ("Body", body.to_string()),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Delivery(format!(
            "Twilio send failed ({}): {}",
            status, body
        )));
    }

    let message: TwilioMessageResponse = response
        .json()
        .await
        .map_err(|e| Error::Delivery(format!("Malformed Twilio response: {}", e)))?;
    Ok(message.sid)
}

/// Delivers the briefing over WhatsApp: an audio link when synthesis
/// succeeded, otherwise the script text. The service window is checked
/// first; a closed window is a typed outcome so the pipeline can fall back
/// to email instead of treating it as an error.
pub async fn send_briefing(
    state: &Arc<AppState>,
    user_email: &str,
    phone: &str,
    audio_url: Option<&str>,
    script: &str,
) -> Result<DeliveryOutcome, Error> {
    let now = Utc::now().timestamp() as i32;
    if !window::can_send_to_user(state, user_email, now)? {
        tracing::info!("WhatsApp window closed for {}, skipping send", user_email);
        return Ok(DeliveryOutcome::WindowClosed);
    }

    let body = match audio_url {
        Some(url) => format!(
            "🌅 *Tu briefing de hoy está listo*\n\n🎧 Escuchalo acá:\n{}{}",
            url, REPLY_CTA
        ),
        None => format!("🌅 Tu briefing:\n\n{}{}", script, REPLY_CTA),
    };

    let message_sid = match send_twilio_message(phone, &body).await {
        Ok(sid) => sid,
        Err(Error::Config(msg)) => return Err(Error::Config(msg)),
        Err(e) => {
            tracing::error!("WhatsApp delivery failed for {}: {}", user_email, e);
            return Ok(DeliveryOutcome::Failed(e.to_string()));
        }
    };
    tracing::info!("WhatsApp message sent to {}. SID: {}", user_email, message_sid);

    state
        .briefing_repository
        .log_whatsapp_message(NewWhatsappMessage {
            user_email: user_email.to_string(),
            direction: "outbound".to_string(),
            message_type: if audio_url.is_some() { "audio" } else { "text" }.to_string(),
            content: audio_url.map(str::to_string).unwrap_or_else(|| script.to_string()),
            twilio_message_sid: Some(message_sid.clone()),
            triggered_by: "daily_briefing".to_string(),
            created_at: now,
        })?;

    Ok(DeliveryOutcome::Sent { message_sid })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_whatsapp_prefix_once() {
        assert_eq!(whatsapp_address("+5491112345678"), "whatsapp:+5491112345678");
        assert_eq!(
            whatsapp_address("whatsapp:+5491112345678"),
            "whatsapp:+5491112345678"
        );
    }
}
