//! Caller inactivity: one reminder per idle window, then a hard timeout.

use crate::audio::vad::Clock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleConfig {
    /// Silence before the single reminder of an idle window.
    pub reminder_after: Duration,
    /// Silence after which the call ends.
    pub max_silence: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleDecision {
    None,
    Remind,
    Timeout,
}

/// Tracks how long the line has been quiet.
///
/// The idle clock restarts on caller speech and while the assistant speaks
/// anything but a reminder, so a long answer never counts against the caller.
/// The reminder flag clears only on caller speech. The timeout fires once.
pub struct IdlePolicy<C: Clock> {
    config: IdleConfig,
    clock: C,
    last_activity: Instant,
    reminder_sent: bool,
    timed_out: bool,
}

impl<C: Clock> IdlePolicy<C> {
    pub fn new(config: IdleConfig, clock: C) -> Self {
        let last_activity = clock.now();
        Self {
            config,
            clock,
            last_activity,
            reminder_sent: false,
            timed_out: false,
        }
    }

    /// The caller is talking.
    pub fn user_activity(&mut self) {
        self.last_activity = self.clock.now();
        self.reminder_sent = false;
    }

    /// The assistant is talking.
    pub fn assistant_activity(&mut self) {
        self.last_activity = self.clock.now();
    }

    /// Decide what the silence so far calls for.
    ///
    /// A reminder is never issued while `speaking`.
    pub fn poll(&mut self, speaking: bool) -> IdleDecision {
        if self.timed_out {
            return IdleDecision::None;
        }
        let silence = self.silence();
        if silence > self.config.max_silence {
            self.timed_out = true;
            tracing::info!(silence_secs = silence.as_secs(), "Caller inactive, ending call");
            return IdleDecision::Timeout;
        }
        if silence > self.config.reminder_after && !self.reminder_sent && !speaking {
            self.reminder_sent = true;
            tracing::info!(silence_secs = silence.as_secs(), "Caller silent, sending reminder");
            return IdleDecision::Remind;
        }
        IdleDecision::None
    }

    pub fn silence(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.last_activity)
    }

    pub fn reminder_sent(&self) -> bool {
        self.reminder_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::vad::ManualClock;

    fn policy() -> (IdlePolicy<ManualClock>, ManualClock) {
        let clock = ManualClock::new();
        let config = IdleConfig {
            reminder_after: Duration::from_secs(12),
            max_silence: Duration::from_secs(40),
        };
        (IdlePolicy::new(config, clock.clone()), clock)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_single_reminder_per_idle_window() {
        let (mut idle, clock) = policy();
        clock.advance(secs(12));
        assert_eq!(idle.poll(false), IdleDecision::None);
        clock.advance(Duration::from_millis(1));
        assert_eq!(idle.poll(false), IdleDecision::Remind);
        clock.advance(secs(5));
        assert_eq!(idle.poll(false), IdleDecision::None);
        assert!(idle.reminder_sent());
    }

    #[test]
    fn test_no_reminder_while_speaking() {
        let (mut idle, clock) = policy();
        clock.advance(secs(20));
        assert_eq!(idle.poll(true), IdleDecision::None);
        assert_eq!(idle.poll(false), IdleDecision::Remind);
    }

    #[test]
    fn test_user_speech_rearms_reminder() {
        let (mut idle, clock) = policy();
        clock.advance(secs(13));
        assert_eq!(idle.poll(false), IdleDecision::Remind);
        idle.user_activity();
        clock.advance(secs(13));
        assert_eq!(idle.poll(false), IdleDecision::Remind);
    }

    #[test]
    fn test_assistant_speech_keeps_reminder_flag() {
        let (mut idle, clock) = policy();
        clock.advance(secs(13));
        assert_eq!(idle.poll(false), IdleDecision::Remind);
        idle.assistant_activity();
        assert_eq!(idle.silence(), Duration::ZERO);
        clock.advance(secs(13));
        assert_eq!(idle.poll(false), IdleDecision::None);
    }

    #[test]
    fn test_timeout_fires_once() {
        let (mut idle, clock) = policy();
        let mut decisions = Vec::new();
        // 45 s of silence polled every 500 ms
        for _ in 0..90 {
            clock.advance(Duration::from_millis(500));
            decisions.push(idle.poll(false));
        }
        let reminders = decisions.iter().filter(|d| **d == IdleDecision::Remind).count();
        let timeouts = decisions.iter().filter(|d| **d == IdleDecision::Timeout).count();
        assert_eq!(reminders, 1);
        assert_eq!(timeouts, 1);
    }
}
