//! Reconnect bookkeeping.

use std::time::Duration;

/// What to do after a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Try again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted.
    GiveUp,
}

/// Counts reconnect attempts since the last successful open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempts: u32,
    pub max_attempts: u32,
}

impl ReconnectState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
        }
    }

    /// Records a failure and decides whether another attempt is allowed.
    ///
    /// The delay grows linearly: `base_delay * attempt`.
    pub fn on_failure(&mut self, base_delay: Duration) -> ReconnectDecision {
        if self.attempts >= self.max_attempts {
            return ReconnectDecision::GiveUp;
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: base_delay.saturating_mul(self.attempts),
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_delays_then_give_up() {
        let base = Duration::from_secs(2);
        let mut state = ReconnectState::new(3);
        assert_eq!(
            state.on_failure(base),
            ReconnectDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(
            state.on_failure(base),
            ReconnectDecision::Retry {
                attempt: 2,
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(
            state.on_failure(base),
            ReconnectDecision::Retry {
                attempt: 3,
                delay: Duration::from_secs(6)
            }
        );
        assert_eq!(state.on_failure(base), ReconnectDecision::GiveUp);
        assert_eq!(state.on_failure(base), ReconnectDecision::GiveUp);
        assert_eq!(state.attempts, 3);
    }

    #[test]
    fn reset_restores_attempts() {
        let mut state = ReconnectState::new(1);
        state.on_failure(Duration::from_secs(1));
        assert_eq!(state.on_failure(Duration::from_secs(1)), ReconnectDecision::GiveUp);
        state.reset();
        assert!(matches!(
            state.on_failure(Duration::from_secs(1)),
            ReconnectDecision::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn zero_attempts_never_retries() {
        let mut state = ReconnectState::new(0);
        assert_eq!(state.on_failure(Duration::from_secs(1)), ReconnectDecision::GiveUp);
    }
}
