use diesel::prelude::*;
use serde::Serialize;
use crate::schema::users;
use crate::schema::schedules;
use crate::schema::runs;
use crate::schema::outputs;
use crate::schema::user_profiles;
use crate::schema::oauth_tokens;
use crate::schema::whatsapp_messages;

#[derive(Queryable, Selectable, Insertable, Clone)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub id: Option<i32>,
    pub email: String,
    pub name: Option<String>,
    pub phone_whatsapp: Option<String>, // E.164, no "whatsapp:" prefix
    pub timezone: String, // IANA name
    pub onboarding_completed: bool,
    pub profile_analysis_status: String, // pending, analyzing, completed, failed
    pub profile_analysis_count: i32,
    pub profile_analysis_total: i32,
    pub whatsapp_status: String, // pending, active, expired, failed
    pub whatsapp_window_expires_at: Option<i32>, // unix seconds, strictly-future means window open
    pub whatsapp_last_interaction_at: Option<i32>,
    pub created_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub phone_whatsapp: Option<String>,
    pub timezone: String,
    pub onboarding_completed: bool,
    pub profile_analysis_status: String,
    pub profile_analysis_count: i32,
    pub profile_analysis_total: i32,
    pub whatsapp_status: String,
    pub whatsapp_window_expires_at: Option<i32>,
    pub whatsapp_last_interaction_at: Option<i32>,
    pub created_at: i32,
}

#[derive(Queryable, Selectable, Insertable, Clone)]
#[diesel(table_name = schedules)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Schedule {
    pub id: Option<i32>,
    pub user_email: String,
    pub time_local: String, // "HH:MM" in the user's timezone
    pub timezone: String,
    pub days_of_week: String, // JSON array of 0-6, 0=Sunday
    pub enabled: bool,
    pub next_run_at: i32, // unix seconds, UTC
    pub updated_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = schedules)]
pub struct NewSchedule {
    pub user_email: String,
    pub time_local: String,
    pub timezone: String,
    pub days_of_week: String,
    pub enabled: bool,
    pub next_run_at: i32,
    pub updated_at: i32,
}

#[derive(Queryable, Selectable, Insertable, Clone)]
#[diesel(table_name = runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Run {
    pub id: String, // uuid v4
    pub schedule_id: Option<i32>, // None for ad-hoc/manual runs
    pub user_email: String,
    pub scheduled_for: i32,
    pub status: String, // pending -> running -> completed | failed, never deleted
    pub started_at: Option<i32>,
    pub finished_at: Option<i32>,
    pub error_message: Option<String>,
    pub created_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = runs)]
pub struct NewRun {
    pub id: String,
    pub schedule_id: Option<i32>,
    pub user_email: String,
    pub scheduled_for: i32,
    pub status: String,
    pub created_at: i32,
}

#[derive(Queryable, Selectable, Insertable, Clone)]
#[diesel(table_name = outputs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Output {
    pub id: Option<i32>,
    pub run_id: String,
    pub user_email: String,
    pub text_content: String,
    pub audio_url: Option<String>, // signed blob URL, null when synthesis failed
    pub delivery_status: String, // pending, delivered_whatsapp, delivered_email, failed
    pub created_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = outputs)]
pub struct NewOutput {
    pub run_id: String,
    pub user_email: String,
    pub text_content: String,
    pub audio_url: Option<String>,
    pub delivery_status: String,
    pub created_at: i32,
}

/// Inferred persona, upserted by the profile analysis job and read-only to
/// everything else. Bounded lists are stored as JSON text columns.
#[derive(Queryable, Selectable, Insertable, Clone, Serialize)]
#[diesel(table_name = user_profiles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserProfileRecord {
    pub user_email: String,
    pub inferred_role: Option<String>,
    pub inferred_title: Option<String>,
    pub inferred_company: Option<String>,
    pub inferred_industry: Option<String>,
    pub inferred_seniority: Option<String>, // founder, c-level, executive, manager, individual_contributor
    pub is_founder: bool,
    pub company_size_hint: Option<String>,
    pub inferred_tone: Option<String>, // formal, casual, mixed
    pub communication_style: Option<String>,
    pub preferred_greeting: Option<String>,
    pub personality_hints: Option<String>,
    pub recurring_topics: String, // JSON array, max 7
    pub current_focus: Option<String>,
    pub active_projects: String, // JSON array
    pub stress_level: Option<String>, // low, medium, high
    pub stress_reasons: String, // JSON array
    pub vip_contacts: String, // JSON array of VipContact, max 15
    pub vip_domains: String, // JSON array
    pub team_size_hint: Option<i32>,
    pub persona_description: Option<String>,
    pub one_liner: Option<String>,
    pub confidence_score: i32, // 0-100
    pub personal_interests: String, // JSON array
    pub emails_analyzed: i32,
    pub emails_sent_analyzed: i32,
    pub emails_received_analyzed: i32,
    pub last_analysis_at: i32,
    pub analysis_version: i32,
    pub updated_at: i32,
}

#[derive(Queryable, Selectable, Insertable, Clone)]
#[diesel(table_name = oauth_tokens)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OauthToken {
    pub user_email: String,
    pub access_token_enc: String, // AES-GCM, base64
    pub refresh_token_enc: String,
    pub expires_at: i32,
    pub updated_at: i32,
}

#[derive(Queryable, Selectable, Insertable, Clone)]
#[diesel(table_name = whatsapp_messages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WhatsappMessage {
    pub id: Option<i32>,
    pub user_email: String,
    pub direction: String, // inbound, outbound
    pub message_type: String, // audio, text
    pub content: String,
    pub twilio_message_sid: Option<String>,
    pub triggered_by: String, // daily_briefing, user_reply, audio_link
    pub created_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = whatsapp_messages)]
pub struct NewWhatsappMessage {
    pub user_email: String,
    pub direction: String,
    pub message_type: String,
    pub content: String,
    pub twilio_message_sid: Option<String>,
    pub triggered_by: String,
    pub created_at: i32,
}
