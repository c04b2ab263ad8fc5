use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::error::Error;

const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";
const MAX_EVENTS: u32 = 20;

#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start_time: i64, // unix seconds
    pub end_time: i64,
    pub is_all_day: bool,
    pub attendees: Vec<String>,
    pub has_external_attendees: bool,
    pub meeting_link: Option<String>,
    pub status: String,
}

#[derive(Deserialize)]
struct EventListResponse {
    items: Option<Vec<ApiEvent>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: String,
    summary: Option<String>,
    status: Option<String>,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
    attendees: Option<Vec<ApiAttendee>>,
    hangout_link: Option<String>,
    conference_data: Option<ApiConferenceData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Deserialize)]
struct ApiAttendee {
    email: Option<String>,
    #[serde(rename = "self", default)]
    is_self: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiConferenceData {
    entry_points: Option<Vec<ApiEntryPoint>>,
}

#[derive(Deserialize)]
struct ApiEntryPoint {
    uri: Option<String>,
}

fn parse_event_time(time: Option<&ApiEventTime>, tz: &Tz) -> (i64, bool) {
    let Some(time) = time else { return (0, false) };
    if let Some(dt) = time.date_time.as_deref() {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(dt) {
            return (parsed.timestamp(), false);
        }
    }
    if let Some(date) = time.date.as_deref() {
        if let Ok(parsed) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            if let Some(local) = tz
                .from_local_datetime(&parsed.and_hms_opt(0, 0, 0).unwrap_or_default())
                .earliest()
            {
                return (local.timestamp(), true);
            }
        }
    }
    (0, false)
}

/// Fetches today's primary-calendar events, bounded to the user's local
/// calendar day. Recurring events come pre-expanded and ordered by start.
pub async fn fetch_today_events(
    access_token: &str,
    timezone: &str,
) -> Result<Vec<CalendarEvent>, Error> {
    let tz: Tz = timezone
        .parse()
        .map_err(|_| Error::Config(format!("Invalid timezone: {}", timezone)))?;

    let today = Utc::now().with_timezone(&tz).date_naive();
    let start_of_day = tz
        .from_local_datetime(&today.and_hms_opt(0, 0, 0).unwrap_or_default())
        .earliest()
        .ok_or_else(|| Error::Upstream(format!("Cannot resolve midnight in {}", timezone)))?;
    let end_of_day = start_of_day + Duration::days(1);

    let response = reqwest::Client::new()
        .get(format!("{}/calendars/primary/events", CALENDAR_API))
        .bearer_auth(access_token)
        .query(&[
            ("timeMin", start_of_day.to_rfc3339()),
            ("timeMax", end_of_day.to_rfc3339()),
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
            ("maxResults", MAX_EVENTS.to_string()),
        ])
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Upstream(format!(
            "Calendar list failed ({}): {}",
            status, body
        )));
    }

    let list: EventListResponse = response
        .json()
        .await
        .map_err(|e| Error::Upstream(format!("Malformed calendar response: {}", e)))?;

    let events = list
        .items
        .unwrap_or_default()
        .into_iter()
        .map(|event| {
            let attendees = event.attendees.unwrap_or_default();
            let user_domain = attendees
                .iter()
                .find(|a| a.is_self)
                .and_then(|a| a.email.as_deref())
                .and_then(|e| e.split('@').nth(1))
                .unwrap_or("")
                .to_string();
            let has_external_attendees = attendees.iter().any(|a| {
                if a.is_self {
                    return false;
                }
                match a.email.as_deref().and_then(|e| e.split('@').nth(1)) {
                    Some(domain) => !domain.is_empty() && domain != user_domain,
                    None => false,
                }
            });
            let meeting_link = event.hangout_link.or_else(|| {
                event
                    .conference_data
                    .and_then(|c| c.entry_points)
                    .and_then(|points| points.into_iter().next())
                    .and_then(|p| p.uri)
            });
            let (start_time, is_all_day) = parse_event_time(event.start.as_ref(), &tz);
            let (end_time, _) = parse_event_time(event.end.as_ref(), &tz);

            CalendarEvent {
                id: event.id,
                title: event.summary.unwrap_or_else(|| "(Sin título)".to_string()),
                start_time,
                end_time,
                is_all_day,
                attendees: attendees
                    .into_iter()
                    .filter_map(|a| a.email)
                    .collect(),
                has_external_attendees,
                meeting_link,
                status: event.status.unwrap_or_else(|| "confirmed".to_string()),
            }
        })
        .collect();

    Ok(events)
}
