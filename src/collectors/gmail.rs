use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;

use crate::error::Error;

const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1";

// Chunk sizes keep individual bursts below Gmail's per-user rate limits
// while still letting progress move visibly.
const SUMMARY_CHUNK: usize = 15;
const PROFILE_CHUNK: usize = 25;

/// Progress callback: (fetched so far, total). Returning an error aborts the
/// fetch; the profile analyzer uses this for cooperative cancellation.
pub type Progress<'a> = &'a mut (dyn FnMut(usize, usize) -> Result<(), Error> + Send);

#[derive(Debug, Clone)]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub from_email: String,
    pub subject: String,
    pub snippet: String,
    pub timestamp: i64, // unix seconds
    pub has_attachments: bool,
    pub is_unread: bool,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

/// Full-content message used only by the profile analyzer.
#[derive(Debug, Clone)]
pub struct ProfileMessage {
    pub direction: Direction,
    pub from: String,
    pub from_email: String,
    pub to_emails: Vec<String>,
    pub subject: String,
    pub timestamp: i64,
    pub body_preview: String, // first 500 chars of text/plain, snippet fallback
}

#[derive(Deserialize)]
struct MessageListResponse {
    messages: Option<Vec<MessageRef>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    thread_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    snippet: Option<String>,
    internal_date: Option<String>,
    label_ids: Option<Vec<String>>,
    payload: Option<MessagePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    mime_type: Option<String>,
    filename: Option<String>,
    headers: Option<Vec<Header>>,
    body: Option<PartBody>,
    parts: Option<Vec<MessagePart>>,
}

#[derive(Deserialize)]
struct Header {
    name: Option<String>,
    value: Option<String>,
}

#[derive(Deserialize)]
struct PartBody {
    data: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailProfile {
    email_address: String,
}

fn header_value<'a>(payload: &'a MessagePart, name: &str) -> &'a str {
    payload
        .headers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|h| {
            h.name
                .as_deref()
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
        .and_then(|h| h.value.as_deref())
        .unwrap_or("")
}

/// Splits a From header into display name and bare address.
/// `"Ana García" <ana@acme.com>` becomes `("Ana García", "ana@acme.com")`;
/// a bare address is used for both.
fn parse_from_header(from: &str) -> (String, String) {
    if let (Some(open), Some(close)) = (from.find('<'), from.rfind('>')) {
        if open < close {
            let email = from[open + 1..close].trim().to_string();
            let name = from[..open].trim().trim_matches('"').trim().to_string();
            if name.is_empty() {
                return (email.clone(), email);
            }
            return (name, email);
        }
    }
    let bare = from.trim().to_string();
    (
        if bare.is_empty() {
            "Unknown".to_string()
        } else {
            bare.clone()
        },
        bare,
    )
}

fn parse_address_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|part| parse_from_header(part).1)
        .filter(|addr| !addr.is_empty())
        .collect()
}

fn timestamp_from_internal_date(internal_date: Option<&str>) -> i64 {
    internal_date
        .and_then(|ms| ms.parse::<i64>().ok())
        .map(|ms| ms / 1000)
        .unwrap_or(0)
}

/// Depth-first search for the first text/plain body in a MIME tree.
fn find_plain_text(part: &MessagePart) -> Option<String> {
    if part.mime_type.as_deref() == Some("text/plain") {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            if let Ok(bytes) = URL_SAFE_NO_PAD.decode(data) {
                return Some(String::from_utf8_lossy(&bytes).into_owned());
            }
        }
    }
    for child in part.parts.as_deref().unwrap_or_default() {
        if let Some(text) = find_plain_text(child) {
            return Some(text);
        }
    }
    None
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

async fn list_message_ids(
    client: &reqwest::Client,
    access_token: &str,
    query: &str,
    max_results: u32,
) -> Result<Vec<MessageRef>, Error> {
    let response = client
        .get(format!("{}/users/me/messages", GMAIL_API))
        .bearer_auth(access_token)
        .query(&[("q", query), ("maxResults", &max_results.to_string())])
        .send()
        .await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Upstream(format!(
            "Gmail list failed ({}): {}",
            status, body
        )));
    }
    let list: MessageListResponse = response
        .json()
        .await
        .map_err(|e| Error::Upstream(format!("Malformed Gmail list response: {}", e)))?;
    Ok(list.messages.unwrap_or_default())
}

async fn get_message(
    client: &reqwest::Client,
    access_token: &str,
    id: &str,
    format: &str,
) -> Result<MessageDetail, Error> {
    let response = client
        .get(format!("{}/users/me/messages/{}", GMAIL_API, id))
        .bearer_auth(access_token)
        .query(&[("format", format)])
        .send()
        .await?;
    if !response.status().is_success() {
        let status = response.status();
        return Err(Error::Upstream(format!(
            "Gmail message {} fetch failed ({})",
            id, status
        )));
    }
    response
        .json()
        .await
        .map_err(|e| Error::Upstream(format!("Malformed Gmail message {}: {}", id, e)))
}

/// Fetches inbox messages from the last `hours_back` hours as lightweight
/// summaries. Details are pulled in chunks; a single message failing is
/// logged and dropped rather than failing the whole fetch.
pub async fn fetch_recent_messages(
    access_token: &str,
    hours_back: i64,
    max_results: u32,
    mut progress: Option<Progress<'_>>,
) -> Result<Vec<MessageSummary>, Error> {
    let client = reqwest::Client::new();
    let after = Utc::now().timestamp() - hours_back * 3600;
    let query = format!("in:inbox after:{}", after);
    tracing::debug!("Listing Gmail messages with query: {}", query);

    let refs = list_message_ids(&client, access_token, &query, max_results).await?;
    let total = refs.len();
    let mut results = Vec::with_capacity(total);

    for chunk in refs.chunks(SUMMARY_CHUNK) {
        let details = join_all(chunk.iter().map(|msg| {
            let client = &client;
            async move {
                (
                    msg,
                    get_message(client, access_token, &msg.id, "metadata").await,
                )
            }
        }))
        .await;

        for (msg, detail) in details {
            let detail = match detail {
                Ok(detail) => detail,
                Err(e) => {
                    tracing::warn!("Dropping message {}: {}", msg.id, e);
                    continue;
                }
            };
            let payload = match detail.payload {
                Some(payload) => payload,
                None => continue,
            };
            let (from, from_email) = parse_from_header(header_value(&payload, "From"));
            let subject = match header_value(&payload, "Subject") {
                "" => "(No Subject)".to_string(),
                s => s.to_string(),
            };
            let labels = detail.label_ids.unwrap_or_default();
            results.push(MessageSummary {
                id: msg.id.clone(),
                thread_id: msg.thread_id.clone(),
                from,
                from_email,
                subject,
                snippet: detail.snippet.unwrap_or_default(),
                timestamp: timestamp_from_internal_date(detail.internal_date.as_deref()),
                has_attachments: payload
                    .parts
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .any(|p| p.filename.as_deref().map(|f| !f.is_empty()).unwrap_or(false)),
                is_unread: labels.iter().any(|l| l == "UNREAD"),
                labels,
            });
        }

        if let Some(report) = progress.as_mut() {
            report(results.len(), total)?;
        }
    }

    Ok(results)
}

/// Bulk fetch for profile analysis: both directions over the last
/// `days_back` days, full content, classified sent/received against the
/// account's own address. Progress is reported after every chunk so the
/// caller can surface it and abort on cancel.
pub async fn fetch_messages_for_profile(
    access_token: &str,
    days_back: i64,
    max_results: u32,
    progress: Progress<'_>,
) -> Result<Vec<ProfileMessage>, Error> {
    let client = reqwest::Client::new();

    let own_address = {
        let response = client
            .get(format!("{}/users/me/profile", GMAIL_API))
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "Gmail profile fetch failed ({})",
                response.status()
            )));
        }
        let profile: GmailProfile = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("Malformed Gmail profile: {}", e)))?;
        profile.email_address.to_lowercase()
    };

    let after = Utc::now().timestamp() - days_back * 24 * 3600;
    let query = format!("after:{}", after);
    let refs = list_message_ids(&client, access_token, &query, max_results).await?;
    let total = refs.len();
    let mut results = Vec::with_capacity(total);

    for chunk in refs.chunks(PROFILE_CHUNK) {
        let details = join_all(chunk.iter().map(|msg| {
            let client = &client;
            async move {
                (
                    msg,
                    get_message(client, access_token, &msg.id, "full").await,
                )
            }
        }))
        .await;

        for (msg, detail) in details {
            let detail = match detail {
                Ok(detail) => detail,
                Err(e) => {
                    tracing::warn!("Dropping message {}: {}", msg.id, e);
                    continue;
                }
            };
            let payload = match detail.payload {
                Some(payload) => payload,
                None => continue,
            };
            let (from, from_email) = parse_from_header(header_value(&payload, "From"));
            let labels = detail.label_ids.unwrap_or_default();
            let direction = if labels.iter().any(|l| l == "SENT")
                || from_email.to_lowercase() == own_address
            {
                Direction::Sent
            } else {
                Direction::Received
            };
            let body_preview = match find_plain_text(&payload) {
                Some(text) => truncate_chars(text.trim(), 500),
                None => detail.snippet.clone().unwrap_or_default(),
            };
            results.push(ProfileMessage {
                direction,
                from,
                from_email,
                to_emails: parse_address_list(header_value(&payload, "To")),
                subject: header_value(&payload, "Subject").to_string(),
                timestamp: timestamp_from_internal_date(detail.internal_date.as_deref()),
                body_preview,
            });
        }

        progress(results.len(), total)?;
    }

    Ok(results)
}

/// Sends a plain-text email from the user's own account. Used as the
/// delivery fallback when the WhatsApp window is closed.
pub async fn send_email(
    access_token: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> Result<(), Error> {
    let message = format!(
        "To: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
        to, subject, body
    );
    let raw = URL_SAFE_NO_PAD.encode(message.as_bytes());

    let response = reqwest::Client::new()
        .post(format!("{}/users/me/messages/send", GMAIL_API))
        .bearer_auth(access_token)
        .json(&json!({ "raw": raw }))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Delivery(format!(
            "Gmail send failed ({}): {}",
            status, body
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_display_name_and_address() {
        let (name, email) = parse_from_header("\"Ana García\" <ana@acme.com>");
        assert_eq!(name, "Ana García");
        assert_eq!(email, "ana@acme.com");
    }

    #[test]
    fn bare_address_fills_both_fields() {
        let (name, email) = parse_from_header("bot@robot.io");
        assert_eq!(name, "bot@robot.io");
        assert_eq!(email, "bot@robot.io");
    }

    #[test]
    fn empty_from_is_unknown() {
        let (name, email) = parse_from_header("");
        assert_eq!(name, "Unknown");
        assert_eq!(email, "");
    }

    #[test]
    fn splits_recipient_list() {
        let addrs = parse_address_list("Ana <ana@acme.com>, beto@acme.com");
        assert_eq!(addrs, vec!["ana@acme.com", "beto@acme.com"]);
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let text = "á".repeat(600);
        assert_eq!(truncate_chars(&text, 500).chars().count(), 500);
    }
}
