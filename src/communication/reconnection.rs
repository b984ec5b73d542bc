use std::{sync::Arc, time::Duration};

use crate::error::HubError;

/// What a policy knows when asked for the next delay.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempts already made in this reconnect cycle.
    pub previous_retry_count: u32,
    /// Time since the connection was lost.
    pub elapsed: Duration,
    /// The error that closed the connection, if there was one.
    pub retry_reason: Option<HubError>,
}

/// Decides whether and when a lost connection is started again.
pub trait ReconnectionPolicy: Send + Sync {
    /// Returns the delay before the next attempt, or `None` to give up.
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration>;
}

fn exhausted(max_attempts: Option<u32>, context: &RetryContext) -> bool {
    matches!(max_attempts, Some(max) if context.previous_retry_count >= max)
}

/// Never retries.
pub struct NoReconnectPolicy;

impl ReconnectionPolicy for NoReconnectPolicy {
    fn next_retry_delay(&self, _context: &RetryContext) -> Option<Duration> {
        None
    }
}

/// Waits 0, 2, 10 and 30 seconds, then stops, or walks a caller supplied list of delays.
pub struct DefaultReconnectPolicy {
    delays: Vec<Duration>,
}

impl DefaultReconnectPolicy {
    pub fn new() -> Self {
        Self::with_delays(vec![
            Duration::ZERO,
            Duration::from_secs(2),
            Duration::from_secs(10),
            Duration::from_secs(30),
        ])
    }

    pub fn with_delays(delays: Vec<Duration>) -> Self {
        Self { delays }
    }
}

impl Default for DefaultReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectionPolicy for DefaultReconnectPolicy {
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        self.delays.get(context.previous_retry_count as usize).copied()
    }
}

/// Retries with a constant delay.
pub struct ConstantDelayPolicy {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl ConstantDelayPolicy {
    pub fn new(delay: Duration, max_attempts: Option<u32>) -> Self {
        Self { delay, max_attempts }
    }
}

impl ReconnectionPolicy for ConstantDelayPolicy {
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        if exhausted(self.max_attempts, context) {
            return None;
        }

        Some(self.delay)
    }
}

/// Retries with a linearly growing delay.
pub struct LinearBackoffPolicy {
    initial_delay: Duration,
    increment: Duration,
    max_delay: Option<Duration>,
    max_attempts: Option<u32>,
}

impl LinearBackoffPolicy {
    pub fn new(initial_delay: Duration, increment: Duration, max_delay: Option<Duration>, max_attempts: Option<u32>) -> Self {
        Self {
            initial_delay,
            increment,
            max_delay,
            max_attempts,
        }
    }
}

impl ReconnectionPolicy for LinearBackoffPolicy {
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        if exhausted(self.max_attempts, context) {
            return None;
        }

        let delay = self.initial_delay + self.increment * context.previous_retry_count;

        Some(match self.max_delay {
            Some(max_delay) => delay.min(max_delay),
            None => delay,
        })
    }
}

/// Retries with an exponentially growing delay.
pub struct ExponentialBackoffPolicy {
    initial_delay: Duration,
    factor: f64,
    max_delay: Option<Duration>,
    max_attempts: Option<u32>,
}

impl ExponentialBackoffPolicy {
    pub fn new(initial_delay: Duration, factor: f64, max_delay: Option<Duration>, max_attempts: Option<u32>) -> Self {
        Self {
            initial_delay,
            factor,
            max_delay,
            max_attempts,
        }
    }
}

impl ReconnectionPolicy for ExponentialBackoffPolicy {
    fn next_retry_delay(&self, context: &RetryContext) -> Option<Duration> {
        if exhausted(self.max_attempts, context) {
            return None;
        }

        let exponent = i32::try_from(context.previous_retry_count).unwrap_or(i32::MAX);
        let seconds = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        let delay = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);

        Some(match self.max_delay {
            Some(max_delay) => delay.min(max_delay),
            None => delay,
        })
    }
}

/// Reconnection settings of a hub connection. Without a policy a lost connection stays closed.
#[derive(Clone, Default)]
pub struct ReconnectionConfig {
    pub policy: Option<Arc<dyn ReconnectionPolicy>>,
}

impl ReconnectionConfig {
    pub fn with_policy(policy: impl ReconnectionPolicy + 'static) -> Self {
        Self { policy: Some(Arc::new(policy)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(previous_retry_count: u32) -> RetryContext {
        RetryContext {
            previous_retry_count,
            elapsed: Duration::ZERO,
            retry_reason: None,
        }
    }

    #[test]
    fn test_default_policy_delays() {
        let policy = DefaultReconnectPolicy::new();
        let delays: Vec<Option<Duration>> = (0..5).map(|i| policy.next_retry_delay(&attempt(i))).collect();

        assert_eq!(
            delays,
            vec![
                Some(Duration::ZERO),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(10)),
                Some(Duration::from_secs(30)),
                None,
            ]
        );
    }

    #[test]
    fn test_constant_policy_respects_max_attempts() {
        let policy = ConstantDelayPolicy::new(Duration::from_secs(1), Some(2));
        assert_eq!(policy.next_retry_delay(&attempt(1)), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_retry_delay(&attempt(2)), None);
        assert_eq!(NoReconnectPolicy.next_retry_delay(&attempt(0)), None);
    }

    #[test]
    fn test_linear_policy_is_capped() {
        let policy = LinearBackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(2), Some(Duration::from_secs(4)), None);
        assert_eq!(policy.next_retry_delay(&attempt(0)), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_retry_delay(&attempt(1)), Some(Duration::from_secs(3)));
        assert_eq!(policy.next_retry_delay(&attempt(5)), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_exponential_policy_is_capped() {
        let policy = ExponentialBackoffPolicy::new(Duration::from_secs(1), 2.0, Some(Duration::from_secs(30)), Some(10));
        assert_eq!(policy.next_retry_delay(&attempt(0)), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_retry_delay(&attempt(3)), Some(Duration::from_secs(8)));
        assert_eq!(policy.next_retry_delay(&attempt(9)), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_retry_delay(&attempt(10)), None);
    }
}
