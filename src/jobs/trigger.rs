use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::jobs::next_run::compute_next_run;
use crate::jobs::pipeline;
use crate::models::briefing_models::{NewRun, Schedule};
use crate::AppState;

/// Starts the minute poller that fires due schedules and sweeps expired
/// WhatsApp windows. Poll cadence comes from TRIGGER_POLL_SECONDS.
pub async fn start_trigger(state: Arc<AppState>) {
    let poll_secs: u64 = std::env::var("TRIGGER_POLL_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);

    let scheduler = match JobScheduler::new().await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to create trigger scheduler: {}", e);
            return;
        }
    };

    let job = match Job::new_repeated_async(Duration::from_secs(poll_secs), move |_id, _lock| {
        let state = state.clone();
        Box::pin(async move {
            tick(&state).await;
        })
    }) {
        Ok(j) => j,
        Err(e) => {
            tracing::error!("Failed to build trigger job: {}", e);
            return;
        }
    };

    if let Err(e) = scheduler.add(job).await {
        tracing::error!("Failed to register trigger job: {}", e);
        return;
    }
    if let Err(e) = scheduler.start().await {
        tracing::error!("Failed to start trigger scheduler: {}", e);
        return;
    }
    tracing::info!("Trigger poller started (every {}s)", poll_secs);

    // Keep the scheduler alive for the process lifetime.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

async fn tick(state: &Arc<AppState>) {
    let now = Utc::now().timestamp() as i32;

    match state.user_core.expire_whatsapp_windows(now) {
        Ok(0) => {}
        Ok(n) => tracing::info!("Expired {} stale WhatsApp windows", n),
        Err(e) => tracing::error!("WhatsApp window sweep failed: {}", e),
    }

    run_due_schedules(state, now).await;
}

/// Fires every due schedule: inserts a pending run, dispatches the pipeline
/// in a detached task, and reseeds next_run_at from the value that just
/// fired. One schedule failing never blocks the rest. Returns how many
/// schedules fired.
pub async fn run_due_schedules(state: &Arc<AppState>, now: i32) -> usize {
    let due = match state.briefing_repository.due_schedules(now) {
        Ok(due) => due,
        Err(e) => {
            tracing::error!("Failed to load due schedules: {}", e);
            return 0;
        }
    };
    if due.is_empty() {
        return 0;
    }
    tracing::info!("Processing {} due schedule(s)", due.len());

    let mut fired = 0;
    for schedule in due {
        match fire_schedule(state, &schedule, now).await {
            Ok(()) => fired += 1,
            Err(e) => tracing::error!(
                "Failed to fire schedule for {}: {}",
                schedule.user_email,
                e
            ),
        }
    }
    fired
}

async fn fire_schedule(
    state: &Arc<AppState>,
    schedule: &Schedule,
    now: i32,
) -> Result<(), crate::error::Error> {
    let run_id = Uuid::new_v4().to_string();
    state.briefing_repository.create_run(NewRun {
        id: run_id.clone(),
        schedule_id: schedule.id,
        user_email: schedule.user_email.clone(),
        scheduled_for: schedule.next_run_at,
        status: "pending".to_string(),
        created_at: now,
    })?;

    // Reseed before dispatch so a pipeline crash cannot leave the schedule
    // hot and refiring every poll.
    let fired_at = DateTime::from_timestamp(schedule.next_run_at as i64, 0)
        .unwrap_or_else(Utc::now);
    let next = match next_fire_after(schedule, fired_at) {
        Ok(next) => next.timestamp() as i32,
        Err(e) => {
            tracing::error!(
                "Cannot reseed schedule for {}: {}; pushing back a day",
                schedule.user_email,
                e
            );
            now + 24 * 60 * 60
        }
    };
    if let Some(schedule_id) = schedule.id {
        state.briefing_repository.advance_schedule(schedule_id, next)?;
    }

    tracing::info!(
        "Dispatching run {} for {} (next fire at {})",
        run_id,
        schedule.user_email,
        next
    );
    let state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline::process_run(state, &run_id).await {
            tracing::error!("Run {} failed: {}", run_id, e);
        }
    });

    Ok(())
}

/// Next fire instant strictly after `from`, per the schedule's local time,
/// timezone and allowed weekdays.
fn next_fire_after(
    schedule: &Schedule,
    from: DateTime<Utc>,
) -> Result<DateTime<Utc>, crate::jobs::next_run::NextRunError> {
    let days: Vec<u8> = serde_json::from_str(&schedule.days_of_week).unwrap_or_default();
    compute_next_run(&schedule.time_local, &schedule.timezone, &days, from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(days: &str) -> Schedule {
        Schedule {
            id: Some(1),
            user_email: "ana@example.com".to_string(),
            time_local: "07:00".to_string(),
            timezone: "America/Argentina/Buenos_Aires".to_string(),
            days_of_week: days.to_string(),
            enabled: true,
            next_run_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn reseed_lands_on_next_allowed_day() {
        // Monday 2024-03-04 07:00 Buenos Aires just fired (10:00Z).
        let fired = "2024-03-04T10:00:00Z".parse().unwrap();
        let next = next_fire_after(&schedule("[1,2,3,4,5]"), fired).unwrap();
        assert_eq!(next, "2024-03-05T10:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn reseed_from_friday_skips_weekend() {
        // Friday 2024-03-08 fired; weekdays-only jumps to Monday.
        let fired = "2024-03-08T10:00:00Z".parse().unwrap();
        let next = next_fire_after(&schedule("[1,2,3,4,5]"), fired).unwrap();
        assert_eq!(next, "2024-03-11T10:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn malformed_days_json_yields_error() {
        let fired = "2024-03-04T10:00:00Z".parse().unwrap();
        assert!(next_fire_after(&schedule("not json"), fired).is_err());
    }
}
