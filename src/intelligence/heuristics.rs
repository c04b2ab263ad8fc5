use crate::collectors::calendar::CalendarEvent;
use crate::collectors::gmail::MessageSummary;

const URGENCY_KEYWORDS: &[&str] = &[
    "urgent", "urgente", "asap", "immediate", "today", "hoy",
    "deadline", "vence", "overdue", "vencido", "important", "importante",
    "action required", "acción requerida", "reminder", "recordatorio",
];

const BUSINESS_KEYWORDS: &[&str] = &[
    "invoice", "factura", "payment", "pago", "contract", "contrato",
    "proposal", "propuesta", "meeting", "reunión", "call", "llamada",
];

#[derive(Debug, Clone)]
pub struct ScoredMessage {
    pub message: MessageSummary,
    pub score: u32,
    pub reasons: Vec<&'static str>,
}

/// Additive importance score for one inbox message. Each signal contributes
/// independently; a message with none of them scores zero.
pub fn score_message_importance(
    message: &MessageSummary,
    user_domain: &str,
    vip_list: &[String],
) -> (u32, Vec<&'static str>) {
    let mut score = 0;
    let mut reasons = Vec::new();

    let from_lower = message.from_email.to_lowercase();
    if vip_list
        .iter()
        .any(|vip| !vip.is_empty() && from_lower.contains(&vip.to_lowercase()))
    {
        score += 50;
        reasons.push("VIP sender");
    }

    let user_domain = user_domain.to_lowercase();
    let sender_domain = from_lower.split('@').nth(1).unwrap_or("");
    let is_external = !sender_domain.is_empty() && sender_domain != user_domain;
    if is_external {
        score += 15;
        reasons.push("External sender");
    }

    if message.has_attachments && is_external {
        score += 10;
        reasons.push("External with attachments");
    }

    let subject_lower = message.subject.to_lowercase();
    if URGENCY_KEYWORDS.iter().any(|kw| subject_lower.contains(kw)) {
        score += 30;
        reasons.push("Urgency keywords");
    }

    if BUSINESS_KEYWORDS.iter().any(|kw| subject_lower.contains(kw)) {
        score += 15;
        reasons.push("Business keywords");
    }

    if message.labels.iter().any(|l| l == "IMPORTANT") {
        score += 20;
        reasons.push("Gmail marked important");
    }

    (score, reasons)
}

/// Scores every message, drops zero-signal ones, and keeps the top
/// `max_results` by score. The sort is stable, so equal scores keep their
/// fetch order.
pub fn top_important(
    messages: &[MessageSummary],
    user_domain: &str,
    vip_list: &[String],
    max_results: usize,
) -> Vec<ScoredMessage> {
    let mut scored: Vec<ScoredMessage> = messages
        .iter()
        .map(|m| {
            let (score, reasons) = score_message_importance(m, user_domain, vip_list);
            ScoredMessage {
                message: m.clone(),
                score,
                reasons,
            }
        })
        .filter(|s| s.score > 0)
        .collect();
    scored.sort_by(|a, b| b.score.cmp(&a.score));
    scored.truncate(max_results);
    scored
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone)]
pub struct CategorizedEvent {
    pub event: CalendarEvent,
    pub priority: EventPriority,
    pub reasons: Vec<&'static str>,
}

/// Prioritizes today's events. Cancelled events are dropped; the rest come
/// back ordered by priority, then start time.
pub fn categorize_events(events: &[CalendarEvent]) -> Vec<CategorizedEvent> {
    let mut categorized: Vec<CategorizedEvent> = events
        .iter()
        .filter(|e| e.status != "cancelled")
        .map(|event| {
            let mut priority = EventPriority::Low;
            let mut reasons = Vec::new();

            if event.has_external_attendees {
                priority = EventPriority::High;
                reasons.push("External attendees");
            }

            let title_lower = event.title.to_lowercase();
            if ["interview", "entrevista", "client", "cliente"]
                .iter()
                .any(|kw| title_lower.contains(kw))
            {
                priority = EventPriority::High;
                reasons.push("Important meeting");
            }

            if event.attendees.len() > 5 && priority == EventPriority::Low {
                priority = EventPriority::Medium;
                reasons.push("Large meeting");
            }

            CategorizedEvent {
                event: event.clone(),
                priority,
                reasons,
            }
        })
        .collect();

    categorized.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.event.start_time.cmp(&b.event.start_time))
    });
    categorized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(from_email: &str, subject: &str) -> MessageSummary {
        MessageSummary {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            from: "Sender".to_string(),
            from_email: from_email.to_string(),
            subject: subject.to_string(),
            snippet: String::new(),
            timestamp: 0,
            has_attachments: false,
            is_unread: false,
            labels: Vec::new(),
        }
    }

    fn event(title: &str, external: bool, attendee_count: usize, start: i64) -> CalendarEvent {
        CalendarEvent {
            id: title.to_string(),
            title: title.to_string(),
            start_time: start,
            end_time: start + 3600,
            is_all_day: false,
            attendees: vec!["a@x.com".to_string(); attendee_count],
            has_external_attendees: external,
            meeting_link: None,
            status: "confirmed".to_string(),
        }
    }

    #[test]
    fn signals_are_additive() {
        // VIP (+50) + external (+15) + urgency (+30) + business (+15).
        let msg = message("maria@inversora.com", "Urgente: factura vencida");
        let vips = vec!["maria@inversora.com".to_string()];
        let (score, reasons) = score_message_importance(&msg, "acme.com", &vips);
        assert_eq!(score, 50 + 15 + 30 + 15);
        assert_eq!(
            reasons,
            vec![
                "VIP sender",
                "External sender",
                "Urgency keywords",
                "Business keywords"
            ]
        );
    }

    #[test]
    fn vip_plus_urgency_scores_eighty() {
        // Internal VIP (+50) with an urgent subject (+30), nothing else.
        let msg = message("maria@acme.com", "Urgente: revisar hoy");
        let vips = vec!["maria@acme.com".to_string()];
        let (score, reasons) = score_message_importance(&msg, "acme.com", &vips);
        assert_eq!(score, 80);
        assert_eq!(reasons, vec!["VIP sender", "Urgency keywords"]);
    }

    #[test]
    fn internal_quiet_message_scores_zero() {
        let msg = message("colega@acme.com", "lunch?");
        let (score, _) = score_message_importance(&msg, "acme.com", &[]);
        assert_eq!(score, 0);
    }

    #[test]
    fn important_label_counts() {
        let mut msg = message("colega@acme.com", "notas");
        msg.labels = vec!["IMPORTANT".to_string()];
        let (score, _) = score_message_importance(&msg, "acme.com", &[]);
        assert_eq!(score, 20);
    }

    #[test]
    fn attachment_bonus_requires_external_sender() {
        let mut internal = message("colega@acme.com", "adjunto");
        internal.has_attachments = true;
        let (score, _) = score_message_importance(&internal, "acme.com", &[]);
        assert_eq!(score, 0);

        let mut external = message("ext@other.com", "adjunto");
        external.has_attachments = true;
        let (score, _) = score_message_importance(&external, "acme.com", &[]);
        assert_eq!(score, 15 + 10);
    }

    #[test]
    fn zero_score_messages_are_excluded() {
        let quiet = message("colega@acme.com", "hola");
        let loud = message("ext@other.com", "urgente");
        let top = top_important(&[quiet, loud], "acme.com", &[], 5);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].message.from_email, "ext@other.com");
    }

    #[test]
    fn ties_keep_fetch_order() {
        let a = message("uno@other.com", "nada");
        let b = message("dos@other.com", "nada");
        let top = top_important(&[a, b], "acme.com", &[], 5);
        assert_eq!(top[0].message.from_email, "uno@other.com");
        assert_eq!(top[1].message.from_email, "dos@other.com");
    }

    #[test]
    fn events_order_by_priority_then_start() {
        let events = vec![
            event("Standup", false, 2, 300),
            event("Entrevista candidata", false, 1, 500),
            event("All hands", false, 9, 100),
        ];
        let categorized = categorize_events(&events);
        assert_eq!(categorized[0].event.title, "Entrevista candidata");
        assert_eq!(categorized[0].priority, EventPriority::High);
        assert_eq!(categorized[1].event.title, "All hands");
        assert_eq!(categorized[1].priority, EventPriority::Medium);
        assert_eq!(categorized[2].event.title, "Standup");
        assert_eq!(categorized[2].priority, EventPriority::Low);
    }

    #[test]
    fn cancelled_events_are_dropped() {
        let mut cancelled = event("Cancelada", true, 3, 100);
        cancelled.status = "cancelled".to_string();
        let categorized = categorize_events(&[cancelled]);
        assert!(categorized.is_empty());
    }
}
