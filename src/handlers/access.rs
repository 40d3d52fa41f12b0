use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use teloxide::prelude::*;
use tracing::warn;

use crate::config::CONFIG;
use crate::utils::telegram::user_id_of;

static RATE_LIMITS: Lazy<Mutex<HashMap<i64, Instant>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn is_limited_at(
    limits: &mut HashMap<i64, Instant>,
    user_id: i64,
    now: Instant,
    window: Duration,
) -> bool {
    if let Some(last) = limits.get(&user_id) {
        if now.duration_since(*last) < window {
            return true;
        }
    }
    limits.insert(user_id, now);
    false
}

/// Throttles generation dispatches per user. A free slot is claimed by the caller.
pub fn is_rate_limited(user_id: i64) -> bool {
    if CONFIG.rate_limit_seconds == 0 {
        return false;
    }
    let mut limits = RATE_LIMITS.lock();
    is_limited_at(
        &mut limits,
        user_id,
        Instant::now(),
        Duration::from_secs(CONFIG.rate_limit_seconds),
    )
}

pub async fn check_admin_access(bot: &Bot, message: &Message, command: &str) -> bool {
    let user_id = message.from.as_ref().map(user_id_of).unwrap_or_default();
    if CONFIG.is_admin(user_id) {
        return true;
    }

    warn!(user_id, command, "Rejected admin command");
    let _ = bot.send_message(message.chat.id, "⛔ Нет прав доступа").await;
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_request_inside_window_is_limited() {
        let mut limits = HashMap::new();
        let start = Instant::now();
        let window = Duration::from_secs(5);

        assert!(!is_limited_at(&mut limits, 1, start, window));
        assert!(is_limited_at(&mut limits, 1, start + Duration::from_secs(2), window));
        assert!(!is_limited_at(&mut limits, 2, start + Duration::from_secs(2), window));
        assert!(!is_limited_at(&mut limits, 1, start + Duration::from_secs(6), window));
    }
}
