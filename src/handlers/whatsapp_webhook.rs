use std::sync::Arc;

use axum::{
    extract::{Form, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;

use crate::models::briefing_models::NewWhatsappMessage;
use crate::AppState;

#[derive(Deserialize)]
pub struct TwilioInboundForm {
    #[serde(rename = "From", default)]
    pub from: Option<String>,
    #[serde(rename = "Body", default)]
    pub body: Option<String>,
    #[serde(rename = "MessageSid", default)]
    pub message_sid: Option<String>,
}

fn twiml(message: &str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Message>{}</Message></Response>",
        message
    );
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

fn empty_twiml() -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], "<Response/>").into_response()
}

fn reply_text(body: &str, user_name: &str) -> String {
    let lower = body.to_lowercase();
    let lower = lower.trim();
    if lower == "si" || lower == "sí" {
        format!(
            "¡Confirmado {}! Mañana te mando tu briefing a la hora de siempre. ☀️",
            user_name
        )
    } else if lower.contains("hola") || lower.contains("despertate") {
        "¡Hola! A partir de ahora vas a recibir tus briefings diarios por acá.".to_string()
    } else {
        "¡Recibido! Tu ventana de WhatsApp está activa por 24 horas más. Mañana seguimos."
            .to_string()
    }
}

/// Inbound WhatsApp webhook. Every message from a known user opens or
/// extends the 24h service window; unknown numbers get an empty TwiML so
/// Twilio does not retry.
pub async fn inbound_message(
    State(state): State<Arc<AppState>>,
    Form(form): Form<TwilioInboundForm>,
) -> Response {
    let Some(from) = form.from.as_deref().filter(|f| !f.is_empty()) else {
        tracing::error!("Inbound WhatsApp message without From number");
        return (StatusCode::BAD_REQUEST, "Missing From").into_response();
    };
    let body = form.body.unwrap_or_default();
    let clean_number = from.trim_start_matches("whatsapp:").trim();

    let user = match state.user_core.find_by_whatsapp_number(clean_number) {
        Ok(user) => user,
        Err(e) => {
            tracing::error!("User lookup failed for {}: {}", clean_number, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Lookup failed").into_response();
        }
    };
    let Some(user) = user else {
        tracing::warn!("WhatsApp message from unknown number {}: {}", from, body);
        return empty_twiml();
    };

    let now = Utc::now().timestamp() as i32;
    if let Err(e) = state.user_core.open_whatsapp_window(&user.email, now) {
        tracing::error!("Could not open window for {}: {}", user.email, e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "Update failed").into_response();
    }
    tracing::info!("24h window activated for {}", user.email);

    if let Err(e) = state
        .briefing_repository
        .log_whatsapp_message(NewWhatsappMessage {
            user_email: user.email.clone(),
            direction: "inbound".to_string(),
            message_type: "text".to_string(),
            content: body.clone(),
            twilio_message_sid: form.message_sid,
            triggered_by: "user_reply".to_string(),
            created_at: now,
        })
    {
        tracing::error!("Could not log inbound message: {}", e);
    }

    let name = user.name.as_deref().unwrap_or("");
    twiml(&reply_text(&body, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_reply_uses_name() {
        let reply = reply_text("Si", "Gonza");
        assert!(reply.contains("¡Confirmado Gonza!"));
        assert!(reply_text(" sí ", "Gonza").contains("¡Confirmado Gonza!"));
    }

    #[test]
    fn greeting_gets_onboarding_reply() {
        assert!(reply_text("Hola, qué es esto?", "Gonza").contains("¡Hola!"));
        assert!(reply_text("despertate", "Gonza").contains("¡Hola!"));
    }

    #[test]
    fn anything_else_gets_generic_reply() {
        assert!(reply_text("gracias", "Gonza").contains("¡Recibido!"));
    }
}
