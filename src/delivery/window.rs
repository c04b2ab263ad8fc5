use std::sync::Arc;

use crate::error::Error;
use crate::AppState;

/// Pure gate for the 24h WhatsApp service window: only an `active` window
/// with a strictly-future expiry allows an outbound send.
pub fn window_allows_send(status: &str, expires_at: Option<i32>, now: i32) -> bool {
    status == "active" && expires_at.map(|exp| exp > now).unwrap_or(false)
}

pub fn can_send_to_user(
    state: &Arc<AppState>,
    user_email: &str,
    now: i32,
) -> Result<bool, Error> {
    let Some((status, expires_at)) = state.user_core.whatsapp_window_state(user_email)? else {
        return Ok(false);
    };
    Ok(window_allows_send(&status, expires_at, now))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_future_window_allows_send() {
        assert!(window_allows_send("active", Some(1000), 999));
    }

    #[test]
    fn expired_window_blocks_send() {
        assert!(!window_allows_send("active", Some(1000), 1000));
        assert!(!window_allows_send("active", Some(1000), 1001));
    }

    #[test]
    fn inactive_statuses_block_send() {
        for status in ["pending", "expired", "failed"] {
            assert!(!window_allows_send(status, Some(i32::MAX), 0));
        }
    }

    #[test]
    fn missing_expiry_blocks_send() {
        assert!(!window_allows_send("active", None, 0));
    }
}
