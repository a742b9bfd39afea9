use serde::{Deserialize, Serialize};

const MS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Anti-abuse suppression of positive awards, stored on the account itself.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CooldownState {
    pub active: bool,
    pub expires_at_ms: Option<i64>,
    pub reason: Option<String>,
}

impl CooldownState {
    pub fn started(now_ms: i64, duration_hours: u32, reason: impl Into<String>) -> Self {
        Self {
            active: true,
            expires_at_ms: Some(now_ms + i64::from(duration_hours) * MS_PER_HOUR),
            reason: Some(reason.into()),
        }
    }

    /// A stale `active` flag with a past expiry is inactive for every reader.
    pub fn is_active(&self, now_ms: i64) -> bool {
        match (self.active, self.expires_at_ms) {
            (false, _) => false,
            (true, Some(expires_at_ms)) => now_ms <= expires_at_ms,
            (true, None) => true,
        }
    }

    /// Lazily clears an expired cooldown. Returns `true` when still active.
    pub fn refresh(&mut self, now_ms: i64) -> bool {
        if self.active && !self.is_active(now_ms) {
            self.active = false;
        }
        self.active
    }

    pub fn expires_at_if_active(&self, now_ms: i64) -> Option<i64> {
        if self.is_active(now_ms) {
            self.expires_at_ms
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_inactive() {
        assert!(!CooldownState::default().is_active(0));
    }

    #[test]
    fn started_cooldown_expires_after_duration() {
        let start = 1_700_000_000_000;
        let state = CooldownState::started(start, 24, "spam");
        assert!(state.is_active(start));
        assert!(state.is_active(start + 24 * MS_PER_HOUR));
        assert!(!state.is_active(start + 24 * MS_PER_HOUR + 1));
    }

    #[test]
    fn refresh_clears_stale_flag() {
        let mut state = CooldownState::started(0, 1, "spam");
        assert!(state.refresh(10));
        assert!(!state.refresh(MS_PER_HOUR + 1));
        assert!(!state.active);
        assert_eq!(state.reason.as_deref(), Some("spam"));
    }

    #[test]
    fn expiry_is_hidden_once_inactive() {
        let state = CooldownState::started(0, 1, "spam");
        assert_eq!(state.expires_at_if_active(5), Some(MS_PER_HOUR));
        assert_eq!(state.expires_at_if_active(MS_PER_HOUR + 5), None);
    }
}
