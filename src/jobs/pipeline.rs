use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rand::thread_rng;

use crate::audio::tts;
use crate::collectors::{calendar, gmail, google_auth, news};
use crate::delivery::whatsapp::{self, DeliveryOutcome};
use crate::error::Error;
use crate::intelligence::{briefing, heuristics};
use crate::models::briefing_models::{NewOutput, Run, User, UserProfileRecord};
use crate::AppState;

/// Runs the full briefing pipeline for one pending run. Any error after the
/// run went `running` marks it failed and propagates; a run that is not
/// pending is refused without touching its state.
pub async fn process_run(state: Arc<AppState>, run_id: &str) -> Result<(), Error> {
    let run = state
        .briefing_repository
        .get_run(run_id)?
        .ok_or_else(|| Error::NotFound(format!("run {}", run_id)))?;

    // The status filter in the update is the guard: a second dispatch of
    // the same run id finds nothing to flip and stops here.
    if !state.briefing_repository.mark_run_running(run_id)? {
        return Err(Error::InvalidRunState(run_id.to_string()));
    }

    match execute(&state, &run).await {
        Ok(()) => {
            state.briefing_repository.mark_run_completed(run_id)?;
            tracing::info!("Run {} completed", run_id);
            Ok(())
        }
        Err(e) => {
            if let Err(store_err) = state
                .briefing_repository
                .mark_run_failed(run_id, &e.to_string())
            {
                tracing::error!("Could not record failure for run {}: {}", run_id, store_err);
            }
            Err(e)
        }
    }
}

async fn execute(state: &Arc<AppState>, run: &Run) -> Result<(), Error> {
    let user = state
        .user_core
        .find_by_email(&run.user_email)?
        .ok_or_else(|| Error::NotFound(format!("user {}", run.user_email)))?;
    // Absence of a profile is normal for a fresh user.
    let profile = state.briefing_repository.get_profile(&user.email)?;

    let access_token = google_auth::get_valid_access_token(state, &user.email).await?;

    // Each fetch degrades to empty on failure so one flaky provider cannot
    // starve the briefing of the other sources.
    let news_query = news_query_for(profile.as_ref());
    let (messages, events, news_items) = tokio::join!(
        gmail::fetch_recent_messages(&access_token, 24, 100, None),
        calendar::fetch_today_events(&access_token, &user.timezone),
        news::fetch_relevant_news(&news_query),
    );
    let messages = fetched_or_empty(messages, "Gmail");
    let events = fetched_or_empty(events, "Calendar");
    let news_items = fetched_or_empty(news_items, "News");

    let vip_list = assemble_vip_list(profile.as_ref());
    let owner_domain = user.email.split('@').nth(1).unwrap_or("");
    let top_messages = heuristics::top_important(&messages, owner_domain, &vip_list, 5);
    let categorized_events = heuristics::categorize_events(&events);

    let timezone: Tz = user
        .timezone
        .parse()
        .map_err(|_| Error::Config(format!("Invalid timezone: {}", user.timezone)))?;
    let scheduled_for = DateTime::from_timestamp(run.scheduled_for as i64, 0)
        .unwrap_or_else(Utc::now);

    let prompt = briefing::build_prompt(
        &briefing::BriefingInput {
            user_name: user.name.as_deref().unwrap_or("Usuario"),
            date: scheduled_for,
            timezone,
            events: &categorized_events,
            messages: &top_messages,
            news: &news_items,
            profile: profile.as_ref(),
        },
        &mut thread_rng(),
    );
    let generated = briefing::generate_script(&prompt).await?;
    tracing::debug!(
        "Script generated for run {} ({} tokens)",
        run.id,
        generated.tokens_used
    );

    let audio_url = match tts::synthesize_audio(&state.blob_storage, &generated.script, &user.email)
        .await
    {
        Ok(audio) => {
            tracing::info!(
                "Audio ready for run {} (~{}s)",
                run.id,
                audio.duration_seconds
            );
            Some(audio.url)
        }
        Err(e) => {
            tracing::error!("TTS failed for run {}, continuing text-only: {}", run.id, e);
            None
        }
    };

    state.briefing_repository.insert_output(NewOutput {
        run_id: run.id.clone(),
        user_email: user.email.clone(),
        text_content: generated.script.clone(),
        audio_url: audio_url.clone(),
        delivery_status: "pending".to_string(),
        created_at: Utc::now().timestamp() as i32,
    })?;

    deliver(state, run, &user, &access_token, audio_url.is_some(), &generated.script).await;
    Ok(())
}

/// Delivery is best-effort: WhatsApp first when a phone is configured,
/// email fallback otherwise or when the window is closed. Total delivery
/// failure is recorded on the output but does not fail the run.
async fn deliver(
    state: &Arc<AppState>,
    run: &Run,
    user: &User,
    access_token: &str,
    has_audio: bool,
    script: &str,
) {
    // The shared link goes through the run-scoped redirect so the signed
    // storage URL stays private and the link in the chat stays stable.
    let short_audio_url = if has_audio {
        std::env::var("SERVER_URL")
            .ok()
            .map(|base| format!("{}/api/audio/{}", base.trim_end_matches('/'), run.id))
    } else {
        None
    };

    let mut delivered = false;
    if let Some(phone) = user.phone_whatsapp.as_deref() {
        match whatsapp::send_briefing(state, &user.email, phone, short_audio_url.as_deref(), script)
            .await
        {
            Ok(DeliveryOutcome::Sent { .. }) => {
                delivered = true;
                if let Err(e) = state
                    .briefing_repository
                    .update_delivery_status(&run.id, "delivered_whatsapp")
                {
                    tracing::error!("Could not record delivery for run {}: {}", run.id, e);
                }
            }
            Ok(DeliveryOutcome::WindowClosed) => {
                tracing::info!("Falling back to email for {}", user.email);
            }
            Ok(DeliveryOutcome::Failed(reason)) => {
                tracing::error!("WhatsApp delivery failed for {}: {}", user.email, reason);
            }
            Err(e) => {
                tracing::error!("WhatsApp delivery errored for {}: {}", user.email, e);
            }
        }
    }

    if !delivered {
        let status = match gmail::send_email(
            access_token,
            &user.email,
            "Tu briefing de hoy",
            script,
        )
        .await
        {
            Ok(()) => "delivered_email",
            Err(e) => {
                tracing::error!("Email fallback failed for {}: {}", user.email, e);
                "failed"
            }
        };
        if let Err(e) = state
            .briefing_repository
            .update_delivery_status(&run.id, status)
        {
            tracing::error!("Could not record delivery for run {}: {}", run.id, e);
        }
    }
}

/// One flaky source degrades to an empty section; the run itself goes on.
fn fetched_or_empty<T>(result: Result<Vec<T>, Error>, source: &str) -> Vec<T> {
    result.unwrap_or_else(|e| {
        tracing::error!("{} fetch failed: {}", source, e);
        Vec::new()
    })
}

fn news_query_for(profile: Option<&UserProfileRecord>) -> String {
    profile
        .and_then(|p| {
            p.inferred_industry.clone().or_else(|| {
                serde_json::from_str::<Vec<String>>(&p.recurring_topics)
                    .ok()
                    .and_then(|topics| topics.into_iter().next())
            })
        })
        .unwrap_or_else(|| "negocio y tecnologia".to_string())
}

/// VIP list for message scoring: lowercased contact addresses plus the
/// profile's VIP domains.
fn assemble_vip_list(profile: Option<&UserProfileRecord>) -> Vec<String> {
    let Some(profile) = profile else {
        return Vec::new();
    };
    let mut list: Vec<String> = serde_json::from_str::<Vec<serde_json::Value>>(&profile.vip_contacts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|c| c.get("email").and_then(|e| e.as_str()).map(|e| e.to_lowercase()))
        .collect();
    let domains: Vec<String> = serde_json::from_str(&profile.vip_domains).unwrap_or_default();
    list.extend(domains);
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(industry: Option<&str>, topics: &str, contacts: &str, domains: &str) -> UserProfileRecord {
        UserProfileRecord {
            user_email: "gonza@acme.com".to_string(),
            inferred_role: None,
            inferred_title: None,
            inferred_company: None,
            inferred_industry: industry.map(str::to_string),
            inferred_seniority: None,
            is_founder: false,
            company_size_hint: None,
            inferred_tone: None,
            communication_style: None,
            preferred_greeting: None,
            personality_hints: None,
            recurring_topics: topics.to_string(),
            current_focus: None,
            active_projects: "[]".to_string(),
            stress_level: None,
            stress_reasons: "[]".to_string(),
            vip_contacts: contacts.to_string(),
            vip_domains: domains.to_string(),
            team_size_hint: None,
            persona_description: None,
            one_liner: None,
            confidence_score: 0,
            personal_interests: "[]".to_string(),
            emails_analyzed: 0,
            emails_sent_analyzed: 0,
            emails_received_analyzed: 0,
            last_analysis_at: 0,
            analysis_version: 3,
            updated_at: 0,
        }
    }

    #[test]
    fn failed_fetch_degrades_to_empty_section() {
        let events: Vec<i32> =
            fetched_or_empty(Err(Error::Upstream("calendar 503".to_string())), "Calendar");
        assert!(events.is_empty());
        assert_eq!(fetched_or_empty(Ok(vec![1, 2]), "Calendar"), vec![1, 2]);
    }

    #[test]
    fn news_query_prefers_industry_then_topics() {
        let p = profile(Some("fintech"), r#"["pagos"]"#, "[]", "[]");
        assert_eq!(news_query_for(Some(&p)), "fintech");

        let p = profile(None, r#"["pagos","ventas"]"#, "[]", "[]");
        assert_eq!(news_query_for(Some(&p)), "pagos");

        let p = profile(None, "[]", "[]", "[]");
        assert_eq!(news_query_for(Some(&p)), "negocio y tecnologia");
        assert_eq!(news_query_for(None), "negocio y tecnologia");
    }

    #[test]
    fn vip_list_combines_contacts_and_domains() {
        let p = profile(
            None,
            "[]",
            r#"[{"email":"Maria@Inversora.com","name":"Maria","relationship":"investor","frequency":9,"importance":"critical","context":null}]"#,
            r#"["inversora.com"]"#,
        );
        let list = assemble_vip_list(Some(&p));
        assert_eq!(list, vec!["maria@inversora.com", "inversora.com"]);
    }

    #[test]
    fn malformed_profile_json_degrades_to_empty() {
        let p = profile(None, "[]", "not json", "also not");
        assert!(assemble_vip_list(Some(&p)).is_empty());
        assert!(assemble_vip_list(None).is_empty());
    }
}
