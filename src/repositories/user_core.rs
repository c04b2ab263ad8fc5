use diesel::prelude::*;
use diesel::result::Error as DieselError;
use crate::{
    models::briefing_models::{User, NewUser},
    schema::users,
    DbPool,
};

const WHATSAPP_WINDOW_SECS: i32 = 24 * 60 * 60;

pub struct UserCore {
    pool: DbPool,
}

impl UserCore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn create_user(&self, new_user: NewUser) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(users::table)
            .values(&new_user)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn find_by_email(&self, search_email: &str) -> Result<Option<User>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let user = users::table
            .filter(users::email.eq(search_email))
            .first::<User>(&mut conn)
            .optional()?;
        Ok(user)
    }

    pub fn find_by_whatsapp_number(&self, phone_number: &str) -> Result<Option<User>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let cleaned_phone = phone_number
            .chars()
            .filter(|c| c.is_digit(10) || *c == '+')
            .collect::<String>();
        let user = users::table
            .filter(users::phone_whatsapp.eq(cleaned_phone))
            .first::<User>(&mut conn)
            .optional()?;
        Ok(user)
    }

    pub fn update_contact_settings(
        &self,
        user_email: &str,
        phone_whatsapp: Option<&str>,
        timezone: &str,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(users::table.filter(users::email.eq(user_email)))
            .set((
                users::phone_whatsapp.eq(phone_whatsapp),
                users::timezone.eq(timezone),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn set_onboarding_completed(&self, user_email: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(users::table.filter(users::email.eq(user_email)))
            .set(users::onboarding_completed.eq(true))
            .execute(&mut conn)?;
        Ok(())
    }

    // Profile analysis bookkeeping. The analysis job writes progress through
    // these and re-reads the status to notice a cancel request.

    pub fn set_analysis_status(&self, user_email: &str, status: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(users::table.filter(users::email.eq(user_email)))
            .set(users::profile_analysis_status.eq(status))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn get_analysis_status(&self, user_email: &str) -> Result<Option<String>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let status = users::table
            .filter(users::email.eq(user_email))
            .select(users::profile_analysis_status)
            .first::<String>(&mut conn)
            .optional()?;
        Ok(status)
    }

    pub fn set_analysis_progress(
        &self,
        user_email: &str,
        count: i32,
        total: i32,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(users::table.filter(users::email.eq(user_email)))
            .set((
                users::profile_analysis_count.eq(count),
                users::profile_analysis_total.eq(total),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    // WhatsApp 24h messaging window. Both inbound replies and audio-link
    // clicks renew it through here.

    pub fn open_whatsapp_window(&self, user_email: &str, now: i32) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(users::table.filter(users::email.eq(user_email)))
            .set((
                users::whatsapp_status.eq("active"),
                users::whatsapp_window_expires_at.eq(Some(now + WHATSAPP_WINDOW_SECS)),
                users::whatsapp_last_interaction_at.eq(Some(now)),
            ))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn whatsapp_window_state(
        &self,
        user_email: &str,
    ) -> Result<Option<(String, Option<i32>)>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let state = users::table
            .filter(users::email.eq(user_email))
            .select((users::whatsapp_status, users::whatsapp_window_expires_at))
            .first::<(String, Option<i32>)>(&mut conn)
            .optional()?;
        Ok(state)
    }

    /// Marks every active window whose expiry has passed as expired.
    /// Returns how many rows were flipped.
    pub fn expire_whatsapp_windows(&self, now: i32) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let flipped = diesel::update(
            users::table
                .filter(users::whatsapp_status.eq("active"))
                .filter(users::whatsapp_window_expires_at.le(Some(now))),
        )
        .set(users::whatsapp_status.eq("expired"))
        .execute(&mut conn)?;
        Ok(flipped)
    }
}
