use std::time::Duration;

/// What the connection worker does after the transport fails.
///
/// The default never retries: a failed connection stays failed until the host
/// builds a new manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    #[default]
    Never,
    Backoff {
        initial: Duration,
        max: Duration,
        /// `None` retries forever.
        max_attempts: Option<u32>,
    },
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based), or `None` to give up.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match *self {
            Self::Never => None,
            Self::Backoff {
                initial,
                max,
                max_attempts,
            } => {
                if attempt == 0 || max_attempts.is_some_and(|limit| attempt > limit) {
                    return None;
                }

                let mut delay = initial;
                for _ in 1..attempt {
                    delay = next_backoff(delay, max);
                    if delay >= max {
                        break;
                    }
                }
                Some(delay.min(max))
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_policy_gives_up_immediately() {
        assert_eq!(ReconnectPolicy::Never.delay_for(1), None);
    }

    #[test]
    fn backoff_doubles_until_capped_and_respects_attempt_limit() {
        let policy = ReconnectPolicy::Backoff {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(1),
            max_attempts: Some(4),
        };

        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(250)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(5), None);
    }
}
