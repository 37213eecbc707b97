//! Error hysteresis for a source loop: a source has to fail several polls in a
//! row before anyone is told it is down, and is only announced as up again
//! after it was announced as down.

pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

/// What the loop should do after a failed poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureAction {
    /// The message differs from the last one logged.
    pub new_message: bool,
    /// The consecutive count just reached the threshold.
    pub report_down: bool,
}

#[derive(Debug, Clone)]
pub struct AntiFlutter {
    threshold: u32,
    consecutive: u32,
    last_message: Option<String>,
}

impl Default for AntiFlutter {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_THRESHOLD)
    }
}

impl AntiFlutter {
    /// A threshold of 0 is treated as 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
            last_message: None,
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive
    }

    pub fn is_down(&self) -> bool {
        self.consecutive >= self.threshold
    }

    pub fn record_failure(&mut self, message: &str) -> FailureAction {
        self.consecutive = self.consecutive.saturating_add(1);
        let new_message = self.last_message.as_deref() != Some(message);
        if new_message {
            self.last_message = Some(message.to_string());
        }
        FailureAction {
            new_message,
            report_down: self.consecutive == self.threshold,
        }
    }

    /// Reset after a successful poll. Returns true when the source had been
    /// reported down.
    pub fn record_success(&mut self) -> bool {
        let recovered = self.is_down();
        self.consecutive = 0;
        self.last_message = None;
        recovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_failures_then_success_is_silent() {
        let mut af = AntiFlutter::default();
        for _ in 0..4 {
            assert!(!af.record_failure("timeout").report_down);
        }
        assert!(!af.record_success());
        assert_eq!(af.consecutive_errors(), 0);
    }

    #[test]
    fn down_is_reported_once_and_up_once() {
        let mut af = AntiFlutter::default();
        let downs = (0..8)
            .filter(|_| af.record_failure("timeout").report_down)
            .count();
        assert_eq!(downs, 1);
        assert!(af.record_success());
        assert!(!af.record_success());
    }

    #[test]
    fn repeated_message_is_not_new() {
        let mut af = AntiFlutter::new(3);
        assert!(af.record_failure("a").new_message);
        assert!(!af.record_failure("a").new_message);
        assert!(af.record_failure("b").new_message);
    }
}
