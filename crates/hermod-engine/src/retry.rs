use std::time::Duration;

/// Exponential backoff with jitter (spec §4.3: "exponential backoff with
/// jitter, capped"). The `[0.9, 1.1)` jitter band matches the dequeue
/// loop elsewhere in this stack, spreading concurrent retries away from
/// a thundering-herd tick.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry attempt `attempt` (1-indexed). Returns `None`
    /// once `max_retries` is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_retries {
            return None;
        }
        let exp = self.retry_interval.saturating_mul(1u32.checked_shl(attempt.min(20)).unwrap_or(u32::MAX));
        let capped = exp.min(self.max_interval);
        let jitter = 0.9 + rand::random::<f64>() * 0.2;
        Some(capped.mul_f64(jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempt_number_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            retry_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(50),
        };
        let early = policy.delay_for(1).unwrap();
        let late = policy.delay_for(8).unwrap();
        assert!(early <= Duration::from_millis(11) * 2);
        assert!(late <= Duration::from_millis(55));
    }

    #[test]
    fn exhausted_after_max_retries() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..Default::default()
        };
        assert!(policy.delay_for(2).is_some());
        assert!(policy.delay_for(3).is_none());
    }
}
