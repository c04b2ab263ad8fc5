use diesel::prelude::*;
use diesel::result::Error as DieselError;
use crate::{
    models::briefing_models::{
        Schedule, NewSchedule, Run, NewRun, Output, NewOutput, UserProfileRecord, OauthToken,
        NewWhatsappMessage,
    },
    schema::{schedules, runs, outputs, user_profiles, oauth_tokens, whatsapp_messages},
    utils::encryption::{encrypt, decrypt},
    DbPool,
};

use std::time::{SystemTime, UNIX_EPOCH};

pub struct BriefingRepository {
    pool: DbPool,
}

impl BriefingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn now() -> i32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i32)
            .unwrap_or(0)
    }

    // Schedules

    pub fn upsert_schedule(
        &self,
        user_email: &str,
        time_local: &str,
        timezone: &str,
        days_of_week: &[u8],
        enabled: bool,
        next_run_at: i32,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let days_json = serde_json::to_string(days_of_week).unwrap_or_else(|_| "[]".to_string());
        let existing: Option<Schedule> = schedules::table
            .filter(schedules::user_email.eq(user_email))
            .first::<Schedule>(&mut conn)
            .optional()?;
        match existing {
            Some(_) => {
                diesel::update(schedules::table.filter(schedules::user_email.eq(user_email)))
                    .set((
                        schedules::time_local.eq(time_local),
                        schedules::timezone.eq(timezone),
                        schedules::days_of_week.eq(&days_json),
                        schedules::enabled.eq(enabled),
                        schedules::next_run_at.eq(next_run_at),
                        schedules::updated_at.eq(Self::now()),
                    ))
                    .execute(&mut conn)?;
            }
            None => {
                diesel::insert_into(schedules::table)
                    .values(&NewSchedule {
                        user_email: user_email.to_string(),
                        time_local: time_local.to_string(),
                        timezone: timezone.to_string(),
                        days_of_week: days_json,
                        enabled,
                        next_run_at,
                        updated_at: Self::now(),
                    })
                    .execute(&mut conn)?;
            }
        }
        Ok(())
    }

    pub fn get_schedule(&self, user_email: &str) -> Result<Option<Schedule>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let schedule = schedules::table
            .filter(schedules::user_email.eq(user_email))
            .first::<Schedule>(&mut conn)
            .optional()?;
        Ok(schedule)
    }

    /// Enabled schedules whose next_run_at has come due.
    pub fn due_schedules(&self, now: i32) -> Result<Vec<Schedule>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        schedules::table
            .filter(schedules::enabled.eq(true))
            .filter(schedules::next_run_at.le(now))
            .load::<Schedule>(&mut conn)
    }

    pub fn advance_schedule(&self, schedule_id: i32, next_run_at: i32) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(schedules::table.filter(schedules::id.eq(Some(schedule_id))))
            .set((
                schedules::next_run_at.eq(next_run_at),
                schedules::updated_at.eq(Self::now()),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    // Runs. Status only moves forward; failed and completed runs stay as an
    // audit trail.

    pub fn create_run(&self, new_run: NewRun) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(runs::table)
            .values(&new_run)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<Run>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let run = runs::table
            .find(run_id)
            .first::<Run>(&mut conn)
            .optional()?;
        Ok(run)
    }

    /// Moves a run from pending to running. Returns false when the run was
    /// not pending, so a second dispatch of the same run is a no-op upstream.
    pub fn mark_run_running(&self, run_id: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let updated = diesel::update(
            runs::table
                .find(run_id)
                .filter(runs::status.eq("pending")),
        )
        .set((
            runs::status.eq("running"),
            runs::started_at.eq(Some(Self::now())),
        ))
        .execute(&mut conn)?;
        Ok(updated == 1)
    }

    pub fn mark_run_completed(&self, run_id: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(runs::table.find(run_id))
            .set((
                runs::status.eq("completed"),
                runs::finished_at.eq(Some(Self::now())),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn mark_run_failed(&self, run_id: &str, error_message: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(runs::table.find(run_id))
            .set((
                runs::status.eq("failed"),
                runs::finished_at.eq(Some(Self::now())),
                runs::error_message.eq(Some(error_message)),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    // Outputs

    pub fn insert_output(&self, new_output: NewOutput) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(outputs::table)
            .values(&new_output)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn update_delivery_status(&self, run_id: &str, status: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(outputs::table.filter(outputs::run_id.eq(run_id)))
            .set(outputs::delivery_status.eq(status))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_output_by_run(&self, run_id: &str) -> Result<Option<Output>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let output = outputs::table
            .filter(outputs::run_id.eq(run_id))
            .first::<Output>(&mut conn)
            .optional()?;
        Ok(output)
    }

    // User profiles

    pub fn upsert_profile(&self, record: &UserProfileRecord) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::replace_into(user_profiles::table)
            .values(record)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_profile(&self, user_email: &str) -> Result<Option<UserProfileRecord>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let profile = user_profiles::table
            .find(user_email)
            .first::<UserProfileRecord>(&mut conn)
            .optional()?;
        Ok(profile)
    }

    // OAuth tokens, AES-GCM encrypted at rest. Encryption failures surface
    // as a rollback error since they never come from the database itself.

    pub fn get_oauth_tokens(
        &self,
        user_email: &str,
    ) -> Result<Option<(String, String, i32)>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let row: Option<OauthToken> = oauth_tokens::table
            .find(user_email)
            .first::<OauthToken>(&mut conn)
            .optional()?;
        match row {
            Some(row) => {
                let access = decrypt(&row.access_token_enc)
                    .map_err(|e| DieselError::QueryBuilderError(e.to_string().into()))?;
                let refresh = decrypt(&row.refresh_token_enc)
                    .map_err(|e| DieselError::QueryBuilderError(e.to_string().into()))?;
                Ok(Some((access, refresh, row.expires_at)))
            }
            None => Ok(None),
        }
    }

    pub fn store_oauth_tokens(
        &self,
        user_email: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: i32,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let access_enc = encrypt(access_token)
            .map_err(|e| DieselError::QueryBuilderError(e.to_string().into()))?;
        let refresh_enc = encrypt(refresh_token)
            .map_err(|e| DieselError::QueryBuilderError(e.to_string().into()))?;
        diesel::replace_into(oauth_tokens::table)
            .values(&OauthToken {
                user_email: user_email.to_string(),
                access_token_enc: access_enc,
                refresh_token_enc: refresh_enc,
                expires_at,
                updated_at: Self::now(),
            })
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn update_access_token(
        &self,
        user_email: &str,
        access_token: &str,
        expires_at: i32,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let access_enc = encrypt(access_token)
            .map_err(|e| DieselError::QueryBuilderError(e.to_string().into()))?;
        diesel::update(oauth_tokens::table.find(user_email))
            .set((
                oauth_tokens::access_token_enc.eq(access_enc),
                oauth_tokens::expires_at.eq(expires_at),
                oauth_tokens::updated_at.eq(Self::now()),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    // WhatsApp message audit log

    pub fn log_whatsapp_message(&self, message: NewWhatsappMessage) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(whatsapp_messages::table)
            .values(&message)
            .execute(&mut conn)?;
        Ok(())
    }
}
