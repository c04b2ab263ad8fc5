use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::collectors::news::NewsItem;
use crate::error::Error;
use crate::intelligence::heuristics::{CategorizedEvent, EventPriority, ScoredMessage};
use crate::intelligence::llm;
use crate::models::briefing_models::UserProfileRecord;

const MAX_EVENTS_IN_PROMPT: usize = 5;
const MAX_MESSAGES_IN_PROMPT: usize = 5;

const MONDAY_CLOSINGS: &[&str] = &[
    "Arrancá la semana con todo.",
    "Lunes a fondo, que la semana es tuya.",
    "Semana nueva, página en blanco. Dale para adelante.",
];

const FRIDAY_CLOSINGS: &[&str] = &[
    "Último empujón y a disfrutar el finde.",
    "Cerrá la semana bien arriba.",
    "Viernes al fin. Rematala con estilo.",
];

const GENERIC_CLOSINGS: &[&str] = &[
    "Que tengas un gran día.",
    "A romperla hoy.",
    "Éxitos con todo lo de hoy.",
    "Vamos que se puede.",
];

const SURPRISE_CLOSINGS: &[&str] = &[
    "Cerrá con un dato curioso relacionado a sus intereses.",
    "Tirá una perlita: un hecho sorprendente y breve sobre algo que le guste.",
];

// Odds of closing with a surprise fact on an ordinary weekday.
const SURPRISE_PROBABILITY: f64 = 0.4;

const SPANISH_WEEKDAYS: [&str; 7] = [
    "lunes", "martes", "miércoles", "jueves", "viernes", "sábado", "domingo",
];
const SPANISH_MONTHS: [&str; 12] = [
    "enero", "febrero", "marzo", "abril", "mayo", "junio",
    "julio", "agosto", "septiembre", "octubre", "noviembre", "diciembre",
];

pub struct BriefingInput<'a> {
    pub user_name: &'a str,
    pub date: DateTime<Utc>,
    pub timezone: Tz,
    pub events: &'a [CategorizedEvent],
    pub messages: &'a [ScoredMessage],
    pub news: &'a [NewsItem],
    pub profile: Option<&'a UserProfileRecord>,
}

fn spanish_date(date: &DateTime<Tz>) -> String {
    format!(
        "{}, {} de {} de {}",
        SPANISH_WEEKDAYS[date.weekday().num_days_from_monday() as usize],
        date.day(),
        SPANISH_MONTHS[date.month0() as usize],
        date.year()
    )
}

fn local_time(timestamp: i64, tz: &Tz) -> String {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(dt) => {
            let local = dt.with_timezone(tz);
            format!("{:02}:{:02}", local.hour(), local.minute())
        }
        None => "??:??".to_string(),
    }
}

fn json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn pick_closing(weekday: Weekday, rng: &mut impl Rng) -> &'static str {
    let pool = match weekday {
        Weekday::Mon => MONDAY_CLOSINGS,
        Weekday::Fri => FRIDAY_CLOSINGS,
        _ => {
            if rng.gen_bool(SURPRISE_PROBABILITY) {
                SURPRISE_CLOSINGS
            } else {
                GENERIC_CLOSINGS
            }
        }
    };
    pool.choose(rng).copied().unwrap_or(GENERIC_CLOSINGS[0])
}

/// Builds the briefing prompt. Everything except the closing phrase is a
/// deterministic function of the input; the closing is picked from a
/// weekday-dependent pool through the injected random source.
pub fn build_prompt(input: &BriefingInput, rng: &mut impl Rng) -> String {
    let local_date = input.date.with_timezone(&input.timezone);

    let events_section = input
        .events
        .iter()
        .take(MAX_EVENTS_IN_PROMPT)
        .map(|e| {
            let marker = if e.priority == EventPriority::High {
                " [IMPORTANTE]"
            } else {
                ""
            };
            format!(
                "- {}: {}{}",
                local_time(e.event.start_time, &input.timezone),
                e.event.title,
                marker
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let messages_section = input
        .messages
        .iter()
        .take(MAX_MESSAGES_IN_PROMPT)
        .map(|m| {
            let marker = if m.reasons.contains(&"VIP sender") {
                " [VIP]"
            } else {
                ""
            };
            format!(
                "- De: {}{} | Asunto: {}",
                m.message.from, marker, m.message.subject
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let news_section = input
        .news
        .iter()
        .map(|n| format!("- {}: {}", n.title, n.content))
        .collect::<Vec<_>>()
        .join("\n");

    let profile_section = input.profile.map(|p| {
        let mut lines = Vec::new();
        if let Some(role) = &p.inferred_role {
            let company = p.inferred_company.as_deref().unwrap_or("su empresa");
            lines.push(format!("- Rol: {} en {}", role, company));
        }
        let topics = json_list(&p.recurring_topics);
        if !topics.is_empty() {
            lines.push(format!("- Temas recurrentes: {}", topics.join(", ")));
        }
        if let Some(focus) = &p.current_focus {
            lines.push(format!("- Foco actual: {}", focus));
        }
        if let Some(tone) = &p.inferred_tone {
            lines.push(format!("- Tono preferido: {}", tone));
        }
        if let Some(greeting) = &p.preferred_greeting {
            lines.push(format!("- Le gusta que le digan: {}", greeting));
        }
        let interests = json_list(&p.personal_interests);
        if !interests.is_empty() {
            lines.push(format!("- Intereses personales: {}", interests.join(", ")));
        }
        lines.join("\n")
    });

    let has_interests = input
        .profile
        .map(|p| !json_list(&p.personal_interests).is_empty())
        .unwrap_or(false);

    let closing = pick_closing(local_date.weekday(), rng);

    let mut prompt = format!(
        "Sos un asistente personal que prepara un briefing matutino para {name}.\n\
         Generá un SCRIPT DE AUDIO de 60-90 segundos (150-180 palabras).\n\n\
         FECHA: {date}\n\n\
         REUNIONES DE HOY:\n{events}\n\n\
         EMAILS IMPORTANTES:\n{messages}\n",
        name = input.user_name,
        date = spanish_date(&local_date),
        events = if events_section.is_empty() {
            "No hay reuniones programadas."
        } else {
            &events_section
        },
        messages = if messages_section.is_empty() {
            "No hay emails destacados."
        } else {
            &messages_section
        },
    );

    if !news_section.is_empty() {
        prompt.push_str(&format!("\nNOTICIAS RELEVANTES:\n{}\n", news_section));
    }
    if let Some(profile_section) = profile_section.filter(|s| !s.is_empty()) {
        prompt.push_str(&format!("\nSOBRE {}:\n{}\n", input.user_name, profile_section));
    }

    prompt.push_str(&format!(
        "\nINSTRUCCIONES:\n\
         1. Tono NATURAL y CONVERSACIONAL (será hablado)\n\
         2. Saludo breve con nombre y fecha\n\
         3. Máximo 3-4 reuniones, 2-3 emails\n\
         4. Resaltá lo urgente y lo marcado como [IMPORTANTE] o [VIP]\n\
         5. Cierre en esta línea: {closing}\n\
         6. Español argentino (vos, conjugaciones argentinas)\n\
         7. NO uses bullets - es para ser HABLADO\n\
         8. NO saludes con \"Hola soy tu asistente\", andá directo al grano: \"Buen día {name}, hoy tenés...\"\n",
        closing = closing,
        name = input.user_name,
    ));

    if has_interests {
        prompt.push_str(
            "9. Terminá con EXACTAMENTE una frase sorpresa relacionada a sus intereses personales\n",
        );
    }

    prompt.push_str("\nGenerá el script ahora:\n");
    prompt
}

/// Markdown sneaks into model output even when told not to; emphasis marks
/// and bullet prefixes sound wrong when synthesized, so they get stripped.
fn strip_markdown(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let without_bullet = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
                .or_else(|| trimmed.strip_prefix("• "))
                .unwrap_or(trimmed);
            without_bullet.replace(['*', '_', '#'], "")
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

pub struct GeneratedScript {
    pub script: String,
    pub tokens_used: i64,
}

pub async fn generate_script(prompt: &str) -> Result<GeneratedScript, Error> {
    let completion = llm::complete_text(prompt, 0.7, 600).await?;
    Ok(GeneratedScript {
        script: strip_markdown(&completion.text),
        tokens_used: completion.tokens_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::calendar::CalendarEvent;
    use crate::collectors::gmail::MessageSummary;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn event(title: &str, priority: EventPriority, start: i64) -> CategorizedEvent {
        CategorizedEvent {
            event: CalendarEvent {
                id: title.to_string(),
                title: title.to_string(),
                start_time: start,
                end_time: start + 3600,
                is_all_day: false,
                attendees: vec![],
                has_external_attendees: false,
                meeting_link: None,
                status: "confirmed".to_string(),
            },
            priority,
            reasons: vec![],
        }
    }

    fn scored(from: &str, subject: &str, vip: bool) -> ScoredMessage {
        ScoredMessage {
            message: MessageSummary {
                id: "m".to_string(),
                thread_id: "t".to_string(),
                from: from.to_string(),
                from_email: format!("{}@x.com", from),
                subject: subject.to_string(),
                snippet: String::new(),
                timestamp: 0,
                has_attachments: false,
                is_unread: false,
                labels: vec![],
            },
            score: if vip { 50 } else { 15 },
            reasons: if vip {
                vec!["VIP sender"]
            } else {
                vec!["External sender"]
            },
        }
    }

    fn tz() -> Tz {
        "America/Argentina/Buenos_Aires".parse().unwrap()
    }

    fn input<'a>(
        date: &str,
        events: &'a [CategorizedEvent],
        messages: &'a [ScoredMessage],
    ) -> BriefingInput<'a> {
        BriefingInput {
            user_name: "Gonza",
            date: date.parse().unwrap(),
            timezone: tz(),
            events,
            messages,
            news: &[],
            profile: None,
        }
    }

    #[test]
    fn localizes_date_and_times() {
        // 2024-03-04T10:00Z is Monday 07:00 in Buenos Aires.
        let events = vec![event("Standup", EventPriority::Low, 1709553600)]; // 2024-03-04T12:00Z
        let mut rng = StdRng::seed_from_u64(7);
        let prompt = build_prompt(&input("2024-03-04T10:00:00Z", &events, &[]), &mut rng);
        assert!(prompt.contains("lunes, 4 de marzo de 2024"));
        assert!(prompt.contains("- 09:00: Standup"));
    }

    #[test]
    fn annotates_high_priority_and_vip() {
        let events = vec![
            event("Entrevista", EventPriority::High, 1709553600),
            event("Standup", EventPriority::Low, 1709557200),
        ];
        let messages = vec![
            scored("Maria", "term sheet", true),
            scored("Bot", "newsletter", false),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let prompt = build_prompt(&input("2024-03-04T10:00:00Z", &events, &messages), &mut rng);
        assert!(prompt.contains("Entrevista [IMPORTANTE]"));
        assert!(!prompt.contains("Standup [IMPORTANTE]"));
        assert!(prompt.contains("De: Maria [VIP]"));
        assert!(!prompt.contains("De: Bot [VIP]"));
    }

    #[test]
    fn caps_events_and_messages_at_five() {
        let events: Vec<_> = (0..8)
            .map(|i| event(&format!("Evento{}", i), EventPriority::Low, 1709553600 + i))
            .collect();
        let messages: Vec<_> = (0..8)
            .map(|i| scored(&format!("Persona{}", i), "asunto", false))
            .collect();
        let mut rng = StdRng::seed_from_u64(7);
        let prompt = build_prompt(&input("2024-03-06T10:00:00Z", &events, &messages), &mut rng);
        assert!(prompt.contains("Evento4"));
        assert!(!prompt.contains("Evento5"));
        assert!(prompt.contains("Persona4"));
        assert!(!prompt.contains("Persona5"));
    }

    #[test]
    fn empty_sections_get_placeholders() {
        let mut rng = StdRng::seed_from_u64(7);
        let prompt = build_prompt(&input("2024-03-06T10:00:00Z", &[], &[]), &mut rng);
        assert!(prompt.contains("No hay reuniones programadas."));
        assert!(prompt.contains("No hay emails destacados."));
        assert!(!prompt.contains("NOTICIAS RELEVANTES"));
        assert!(!prompt.contains("SOBRE Gonza"));
    }

    #[test]
    fn monday_closing_comes_from_monday_pool() {
        let mut rng = StdRng::seed_from_u64(7);
        let prompt = build_prompt(&input("2024-03-04T10:00:00Z", &[], &[]), &mut rng);
        assert!(MONDAY_CLOSINGS.iter().any(|c| prompt.contains(c)));
    }

    #[test]
    fn friday_closing_comes_from_friday_pool() {
        let mut rng = StdRng::seed_from_u64(7);
        let prompt = build_prompt(&input("2024-03-08T10:00:00Z", &[], &[]), &mut rng);
        assert!(FRIDAY_CLOSINGS.iter().any(|c| prompt.contains(c)));
    }

    #[test]
    fn midweek_closing_comes_from_generic_or_surprise_pool() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let prompt = build_prompt(&input("2024-03-06T10:00:00Z", &[], &[]), &mut rng);
            assert!(
                GENERIC_CLOSINGS
                    .iter()
                    .chain(SURPRISE_CLOSINGS)
                    .any(|c| prompt.contains(c)),
                "seed {} picked a closing outside the midweek pools",
                seed
            );
        }
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        let p1 = build_prompt(&input("2024-03-06T10:00:00Z", &[], &[]), &mut a);
        let p2 = build_prompt(&input("2024-03-06T10:00:00Z", &[], &[]), &mut b);
        assert_eq!(p1, p2);
    }

    #[test]
    fn strips_markdown_for_speech() {
        let raw = "**Buen día Gonza!**\n- Primero: la *reunión* de las 9\n• Después el _informe_";
        let clean = strip_markdown(raw);
        assert_eq!(
            clean,
            "Buen día Gonza!\nPrimero: la reunión de las 9\nDespués el informe"
        );
    }
}
