// src/notify/antiflutter.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Cooldown gate for heartbeat posts.
/// - First post always allowed.
/// - Inside cooldown, posts are skipped.
/// - State is updated explicitly via `record` once a post has been scheduled.
#[derive(Debug, Clone, Default)]
pub struct Cooldown {
    cooldown: ChronoDuration,
    last_fired: Option<DateTime<Utc>>,
}

impl Cooldown {
    /// `cooldown_secs` < 0 is treated as 0 (no cooldown).
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown: ChronoDuration::seconds(cooldown_secs.max(0)),
            last_fired: None,
        }
    }

    /// Does NOT mutate state.
    pub fn should_fire(&self, now: DateTime<Utc>) -> bool {
        match self.last_fired {
            None => true,
            Some(ts) => now.signed_duration_since(ts) >= self.cooldown,
        }
    }

    pub fn record(&mut self, now: DateTime<Utc>) {
        self.last_fired = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn first_post_passes() {
        let cd = Cooldown::new(20);
        let now = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        assert!(cd.should_fire(now));
    }

    #[test]
    fn inside_cooldown_blocked() {
        let mut cd = Cooldown::new(20);
        let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        cd.record(t0);
        assert!(!cd.should_fire(t0 + ChronoDuration::seconds(19)));
        assert!(cd.should_fire(t0 + ChronoDuration::seconds(20)));
    }

    #[test]
    fn negative_cooldown_never_blocks() {
        let mut cd = Cooldown::new(-5);
        let t0 = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        cd.record(t0);
        assert!(cd.should_fire(t0));
    }
}
