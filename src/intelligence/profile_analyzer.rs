use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::collectors::gmail::{self, Direction, ProfileMessage};
use crate::collectors::google_auth;
use crate::error::Error;
use crate::intelligence::llm;
use crate::models::briefing_models::UserProfileRecord;
use crate::AppState;

const MIN_MESSAGES: usize = 10;
const FETCH_DAYS_BACK: i64 = 60;
const FETCH_MAX_RESULTS: u32 = 500;
const ANALYSIS_VERSION: i32 = 3;

#[derive(Debug, serde::Serialize, Deserialize)]
pub struct VipContact {
    pub email: String,
    pub name: String,
    pub relationship: String,
    pub frequency: i64,
    pub importance: String,
    pub context: Option<String>,
}

/// The JSON shape the model is asked to return.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InferredProfile {
    pub inferred_role: Option<String>,
    pub inferred_title: Option<String>,
    pub inferred_company: Option<String>,
    pub inferred_industry: Option<String>,
    pub inferred_seniority: Option<String>,
    pub is_founder: bool,
    pub company_size_hint: Option<String>,
    pub inferred_tone: Option<String>,
    pub communication_style: Option<String>,
    pub preferred_greeting: Option<String>,
    pub personality_hints: Option<String>,
    pub recurring_topics: Vec<String>,
    pub current_focus: Option<String>,
    pub active_projects: Vec<String>,
    pub stress_level: Option<String>,
    pub stress_reasons: Vec<String>,
    pub vip_contacts: Vec<VipContact>,
    pub vip_domains: Vec<String>,
    pub team_size_hint: Option<i32>,
    pub persona_description: Option<String>,
    pub one_liner: Option<String>,
    pub confidence_score: i32,
    pub personal_interests: Vec<String>,
}

fn date_str(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "????-??-??".to_string())
}

fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Builds the evidence prompt: communication stats, top bidirectional
/// contacts, bounded samples of sent and received mail, distinct subjects,
/// and the required JSON output shape.
pub fn build_analysis_prompt(
    messages: &[ProfileMessage],
    user_name: &str,
    user_email: &str,
) -> String {
    let sent: Vec<&ProfileMessage> = messages
        .iter()
        .filter(|m| m.direction == Direction::Sent)
        .collect();
    let received: Vec<&ProfileMessage> = messages
        .iter()
        .filter(|m| m.direction == Direction::Received)
        .collect();

    // name, sent count, received count per correspondent
    let mut frequency: HashMap<String, (String, usize, usize)> = HashMap::new();
    for message in messages {
        match message.direction {
            Direction::Received => {
                let key = message.from_email.to_lowercase();
                let entry = frequency
                    .entry(key)
                    .or_insert_with(|| (message.from.clone(), 0, 0));
                entry.2 += 1;
            }
            Direction::Sent => {
                for to in &message.to_emails {
                    let key = to.to_lowercase();
                    let entry = frequency.entry(key).or_insert_with(|| (to.clone(), 0, 0));
                    entry.1 += 1;
                }
            }
        }
    }
    let mut contacts: Vec<(String, (String, usize, usize))> = frequency
        .into_iter()
        .filter(|(email, _)| !email.contains("noreply") && !email.contains("notification"))
        .collect();
    contacts.sort_by(|a, b| (b.1 .1 + b.1 .2).cmp(&(a.1 .1 + a.1 .2)).then(a.0.cmp(&b.0)));
    let top_contacts = contacts
        .iter()
        .take(30)
        .map(|(email, (name, sent, received))| {
            format!("{} <{}> - Le escribió {}x, Recibió {}x", name, email, sent, received)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let sent_sample = sent
        .iter()
        .take(50)
        .map(|m| {
            format!(
                "[ENVIADO {}] Para: {} | Asunto: {} | Preview: {}",
                date_str(m.timestamp),
                m.to_emails.join(", "),
                m.subject,
                preview(&m.body_preview, 200)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let received_sample = received
        .iter()
        .take(50)
        .map(|m| {
            format!(
                "[RECIBIDO {}] De: {} <{}> | Asunto: {} | Preview: {}",
                date_str(m.timestamp),
                m.from,
                m.from_email,
                m.subject,
                preview(&m.body_preview, 200)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut seen = std::collections::HashSet::new();
    let subjects = messages
        .iter()
        .filter(|m| seen.insert(m.subject.clone()))
        .take(100)
        .map(|m| m.subject.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Sos un analista experto en perfiles profesionales. Tu tarea es crear un perfil PRECISO de {name} ({email}) basándote ÚNICAMENTE en la evidencia de sus emails.

ESTADÍSTICAS DE COMUNICACIÓN
- Total emails analizados: {total}
- Emails ENVIADOS por {name}: {sent_count}
- Emails RECIBIDOS por {name}: {received_count}

TOP CONTACTOS (con dirección de comunicación)
{top_contacts}

EMAILS ENVIADOS POR {name} (muestra)
IMPORTANTE: Estos emails muestran cómo {name} se comunica, qué decide, qué delega, a quién lidera.
{sent_sample}

EMAILS RECIBIDOS POR {name} (muestra)
{received_sample}

TODOS LOS ASUNTOS (para detectar temas recurrentes)
{subjects}

INSTRUCCIONES DE ANÁLISIS
1. DETECTAR ROL Y SENIORITY: ¿da órdenes o las recibe? ¿aprueba o pide aprobación? ¿menciona "mi empresa", "fundé"?
2. DETECTAR SI ES FUNDADOR/DUEÑO: si aprueba gastos, contrata o decide estrategia es probablemente fundador o C-level.
3. CLASIFICAR CONTACTOS: investor, client, direct_report, boss, partner, vendor.
4. DETECTAR PROYECTOS ACTIVOS Y GUSTOS: qué construye, qué lidera, y si hay intereses personales fuera del trabajo.
5. INFERIR ESTRÉS Y CAUSAS: volumen de urgencias, threads sin resolver, palabras como "urgente", "deadline", "ASAP".

OUTPUT REQUERIDO (JSON válido, sin markdown)
{{
  "inferred_role": "título específico o null",
  "inferred_title": "título formal o null",
  "inferred_company": "nombre de la empresa o null",
  "inferred_industry": "industria o null",
  "inferred_seniority": "founder" | "c-level" | "executive" | "manager" | "individual_contributor" | null,
  "is_founder": true | false,
  "company_size_hint": "startup" | "small" | "medium" | "enterprise" | null,
  "inferred_tone": "formal" | "casual" | "mixed",
  "communication_style": "descripción breve del estilo",
  "preferred_greeting": "nombre o apodo que prefiere",
  "personality_hints": "cómo comunicarse mejor con esta persona",
  "recurring_topics": ["máximo 7 temas"],
  "current_focus": "en qué está enfocado esta semana",
  "active_projects": ["proyectos que lidera"],
  "stress_level": "low" | "medium" | "high",
  "stress_reasons": ["razones específicas"],
  "personal_interests": ["hobbies o gustos detectados"],
  "vip_contacts": [{{"email": "...", "name": "...", "relationship": "...", "frequency": 0, "importance": "critical" | "high" | "medium" | "low", "context": "..."}}],
  "vip_domains": ["dominios importantes excluyendo gmail, outlook, etc"],
  "team_size_hint": número_o_null,
  "persona_description": "bio profesional de 3-4 frases, específica",
  "one_liner": "descripción en UNA sola línea",
  "confidence_score": número_0_a_100
}}

REGLAS CRÍTICAS:
- Si no hay evidencia suficiente, usa null (el valor JSON null, NUNCA el string "null")
- Los vip_contacts deben tener máximo 15 personas, ordenados por importancia
- Arrays vacíos deben ser [] y no null

Solo responde con el JSON, sin explicaciones ni markdown.
"#,
        name = user_name,
        email = user_email,
        total = messages.len(),
        sent_count = sent.len(),
        received_count = received.len(),
        top_contacts = top_contacts,
        sent_sample = if sent_sample.is_empty() {
            "No hay emails enviados disponibles"
        } else {
            &sent_sample
        },
        received_sample = if received_sample.is_empty() {
            "No hay emails recibidos disponibles"
        } else {
            &received_sample
        },
        subjects = subjects,
    )
}

fn strip_json_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// Models sometimes emit the quoted string "null" instead of a JSON null;
/// coerce those at the top level before typed deserialization.
fn coerce_null_strings(value: &mut Value) {
    if let Value::Object(map) = value {
        for field in map.values_mut() {
            if field.as_str() == Some("null") {
                *field = Value::Null;
            }
        }
    }
}

fn apply_narrative_fallbacks(profile: &mut InferredProfile, user_name: &str) {
    if profile.persona_description.as_deref().unwrap_or("").is_empty() {
        profile.persona_description = Some(format!(
            "{} trabaja en {}. Basado en sus comunicaciones, parece enfocado en {}.",
            user_name,
            profile.inferred_company.as_deref().unwrap_or("una empresa"),
            profile
                .current_focus
                .as_deref()
                .unwrap_or("sus responsabilidades diarias")
        ));
    }
    if profile.one_liner.as_deref().unwrap_or("").is_empty() {
        profile.one_liner = Some(format!(
            "{} en {}",
            profile.inferred_role.as_deref().unwrap_or("Profesional"),
            profile.inferred_company.as_deref().unwrap_or("su empresa")
        ));
    }
}

pub fn parse_profile_response(raw: &str, user_name: &str) -> Result<InferredProfile, Error> {
    let cleaned = strip_json_fences(raw);
    let mut value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| Error::Generation(format!("Profile analysis returned invalid JSON: {}", e)))?;
    coerce_null_strings(&mut value);
    let mut profile: InferredProfile = serde_json::from_value(value)
        .map_err(|e| Error::Generation(format!("Profile JSON has unexpected shape: {}", e)))?;
    apply_narrative_fallbacks(&mut profile, user_name);
    Ok(profile)
}

/// A progress checkpoint continues only while the stored status still says
/// `analyzing`; any other value means the user canceled (or the row is gone)
/// and the job must stop before the next batch.
fn cancellation_check(status: Option<&str>) -> Result<(), Error> {
    if status != Some("analyzing") {
        return Err(Error::Canceled);
    }
    Ok(())
}

fn json_string(value: &impl serde::Serialize) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

/// Runs the full profile analysis for one user. Intended to be spawned
/// detached; progress and cancellation go through the user record. A
/// cooperative cancel exits cleanly without touching the status the
/// canceller already wrote.
pub async fn run_profile_analysis(state: Arc<AppState>, user_email: String) -> Result<(), Error> {
    tracing::info!("Starting profile analysis for {}", user_email);
    state.user_core.set_analysis_status(&user_email, "analyzing")?;
    state.user_core.set_analysis_progress(&user_email, 0, 0)?;

    match analyze(&state, &user_email).await {
        Ok(()) => Ok(()),
        Err(Error::Canceled) => {
            tracing::info!("Profile analysis for {} canceled by user", user_email);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Profile analysis for {} failed: {}", user_email, e);
            if let Err(store_err) = state.user_core.set_analysis_status(&user_email, "failed") {
                tracing::error!("Could not record analysis failure: {}", store_err);
            }
            Err(e)
        }
    }
}

async fn analyze(state: &Arc<AppState>, user_email: &str) -> Result<(), Error> {
    let user = state.user_core.find_by_email(user_email)?;
    let user_name = user
        .and_then(|u| u.name)
        .unwrap_or_else(|| "Usuario".to_string());

    let access_token = google_auth::get_valid_access_token(state, user_email).await?;

    let progress_state = state.clone();
    let progress_email = user_email.to_string();
    let mut on_progress = move |count: usize, total: usize| -> Result<(), Error> {
        tracing::debug!("Profile analysis progress: {}/{}", count, total);
        progress_state
            .user_core
            .set_analysis_progress(&progress_email, count as i32, total as i32)?;
        let status = progress_state
            .user_core
            .get_analysis_status(&progress_email)?;
        cancellation_check(status.as_deref())
    };

    let messages = gmail::fetch_messages_for_profile(
        &access_token,
        FETCH_DAYS_BACK,
        FETCH_MAX_RESULTS,
        &mut on_progress,
    )
    .await?;

    tracing::info!("Fetched {} messages for {}", messages.len(), user_email);
    if messages.len() < MIN_MESSAGES {
        return Err(Error::NotEnoughData {
            found: messages.len(),
            needed: MIN_MESSAGES,
        });
    }

    let prompt = build_analysis_prompt(&messages, &user_name, user_email);
    let completion = llm::complete_text(&prompt, 0.2, 2000).await?;
    let profile = parse_profile_response(&completion.text, &user_name)?;
    tracing::info!(
        "Analysis complete for {}. Confidence: {}%",
        user_email,
        profile.confidence_score
    );

    let now = Utc::now().timestamp() as i32;
    let sent_count = messages
        .iter()
        .filter(|m| m.direction == Direction::Sent)
        .count() as i32;
    state.briefing_repository.upsert_profile(&UserProfileRecord {
        user_email: user_email.to_string(),
        inferred_role: profile.inferred_role,
        inferred_title: profile.inferred_title,
        inferred_company: profile.inferred_company,
        inferred_industry: profile.inferred_industry,
        inferred_seniority: profile.inferred_seniority,
        is_founder: profile.is_founder,
        company_size_hint: profile.company_size_hint,
        inferred_tone: profile.inferred_tone,
        communication_style: profile.communication_style,
        preferred_greeting: profile.preferred_greeting,
        personality_hints: profile.personality_hints,
        recurring_topics: json_string(&profile.recurring_topics),
        current_focus: profile.current_focus,
        active_projects: json_string(&profile.active_projects),
        stress_level: profile.stress_level,
        stress_reasons: json_string(&profile.stress_reasons),
        vip_contacts: json_string(&profile.vip_contacts),
        vip_domains: json_string(&profile.vip_domains),
        team_size_hint: profile.team_size_hint,
        persona_description: profile.persona_description,
        one_liner: profile.one_liner,
        confidence_score: profile.confidence_score,
        personal_interests: json_string(&profile.personal_interests),
        emails_analyzed: messages.len() as i32,
        emails_sent_analyzed: sent_count,
        emails_received_analyzed: messages.len() as i32 - sent_count,
        last_analysis_at: now,
        analysis_version: ANALYSIS_VERSION,
        updated_at: now,
    })?;

    state.user_core.set_analysis_status(user_email, "completed")?;
    state.user_core.set_onboarding_completed(user_email)?;
    tracing::info!("Profile saved for {}", user_email);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_quoted_null_strings() {
        let raw = r#"{"inferred_role": "null", "inferred_company": "Adhoc", "is_founder": true, "confidence_score": 80}"#;
        let profile = parse_profile_response(raw, "Gonza").unwrap();
        assert_eq!(profile.inferred_role, None);
        assert_eq!(profile.inferred_company.as_deref(), Some("Adhoc"));
        assert!(profile.is_founder);
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n{\"inferred_role\": \"CEO\", \"confidence_score\": 90}\n```";
        let profile = parse_profile_response(raw, "Gonza").unwrap();
        assert_eq!(profile.inferred_role.as_deref(), Some("CEO"));
        assert_eq!(profile.confidence_score, 90);
    }

    #[test]
    fn synthesizes_narrative_fallbacks() {
        let raw = r#"{"inferred_role": "CTO", "inferred_company": "Acme", "persona_description": "null", "one_liner": null, "confidence_score": 60}"#;
        let profile = parse_profile_response(raw, "Gonza").unwrap();
        assert_eq!(
            profile.one_liner.as_deref(),
            Some("CTO en Acme")
        );
        assert!(profile
            .persona_description
            .as_deref()
            .unwrap()
            .starts_with("Gonza trabaja en Acme"));
    }

    #[test]
    fn fallbacks_without_structured_fields() {
        let profile = parse_profile_response(r#"{"confidence_score": 10}"#, "Gonza").unwrap();
        assert_eq!(profile.one_liner.as_deref(), Some("Profesional en su empresa"));
    }

    #[test]
    fn invalid_json_is_a_generation_error() {
        assert!(matches!(
            parse_profile_response("no es json", "Gonza"),
            Err(Error::Generation(_))
        ));
    }

    fn profile_message(direction: Direction, from: &str, to: &str, subject: &str) -> ProfileMessage {
        ProfileMessage {
            direction,
            from: from.to_string(),
            from_email: format!("{}@x.com", from),
            to_emails: vec![to.to_string()],
            subject: subject.to_string(),
            timestamp: 1709553600,
            body_preview: "hola".to_string(),
        }
    }

    #[test]
    fn status_flip_between_batches_cancels() {
        assert!(matches!(
            cancellation_check(Some("failed")),
            Err(Error::Canceled)
        ));
        assert!(matches!(
            cancellation_check(Some("completed")),
            Err(Error::Canceled)
        ));
        assert!(matches!(cancellation_check(None), Err(Error::Canceled)));
        assert!(cancellation_check(Some("analyzing")).is_ok());
    }

    #[test]
    fn prompt_filters_automated_senders_from_contacts() {
        let messages = vec![
            profile_message(Direction::Received, "noreply", "me@x.com", "alerta"),
            profile_message(Direction::Received, "maria", "me@x.com", "propuesta"),
        ];
        let prompt = build_analysis_prompt(&messages, "Gonza", "me@x.com");
        assert!(prompt.contains("maria@x.com> - Le escribió 0x, Recibió 1x"));
        assert!(!prompt.contains("noreply@x.com> - Le escribió"));
    }

    #[test]
    fn prompt_counts_directions() {
        let messages = vec![
            profile_message(Direction::Sent, "me", "maria@x.com", "re: propuesta"),
            profile_message(Direction::Received, "maria", "me@x.com", "propuesta"),
        ];
        let prompt = build_analysis_prompt(&messages, "Gonza", "me@x.com");
        assert!(prompt.contains("Total emails analizados: 2"));
        assert!(prompt.contains("ENVIADOS por Gonza: 1"));
        assert!(prompt.contains("RECIBIDOS por Gonza: 1"));
    }
}
