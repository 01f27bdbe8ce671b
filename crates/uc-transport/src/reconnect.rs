//! Reconnection policy with capped exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;
use universal_client_core::ReconnectOptions;

/// Configuration for reconnect behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Whether to reconnect after an unexpected disconnect.
    pub enabled: bool,
    /// Maximum number of consecutive reconnect attempts.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Backoff strategy to use.
    pub backoff: BackoffStrategy,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ReconnectOptions::default())
    }
}

impl From<&ReconnectOptions> for ReconnectConfig {
    fn from(options: &ReconnectOptions) -> Self {
        Self {
            enabled: options.enabled,
            max_attempts: options.max_attempts,
            initial_delay: Duration::from_millis(options.initial_delay_ms),
            max_delay: Duration::from_millis(options.max_delay_ms),
            backoff: BackoffStrategy::ExponentialWithJitter { factor: 2.0 },
        }
    }
}

impl ReconnectConfig {
    /// Set the maximum number of consecutive reconnect attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay before the first reconnect attempt.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the upper bound for any single delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff strategy.
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_attempts: 0,
            ..Default::default()
        }
    }
}

/// Backoff strategy for determining reconnect delays.
#[derive(Debug, Clone, Copy)]
pub enum BackoffStrategy {
    /// Constant delay between attempts.
    Constant,
    /// Exponential increase in delay (delay * factor^attempt).
    Exponential { factor: f64 },
    /// Exponential with random jitter so clients do not reconnect in lockstep.
    ExponentialWithJitter { factor: f64 },
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay(&self, attempt: u32, initial_delay: Duration, max_delay: Duration) -> Duration {
        let delay = match self {
            BackoffStrategy::Constant => initial_delay,
            BackoffStrategy::Exponential { factor } => {
                let multiplier = factor.powi(attempt as i32);
                Duration::from_secs_f64(initial_delay.as_secs_f64() * multiplier)
            }
            BackoffStrategy::ExponentialWithJitter { factor } => {
                let base_delay = initial_delay.as_secs_f64() * factor.powi(attempt as i32);
                let jitter = rand::rng().random::<f64>() * base_delay;
                Duration::from_secs_f64(base_delay + jitter)
            }
        };

        std::cmp::min(delay, max_delay)
    }
}

/// Tracks consecutive reconnect attempts for one connection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Returns the current attempt number (0-indexed).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Returns true if another attempt is allowed.
    pub fn should_reconnect(&self) -> bool {
        self.config.enabled && self.attempt < self.config.max_attempts
    }

    /// Record an attempt and return the delay before it.
    ///
    /// A server-supplied `hint` replaces the computed backoff. Returns `None`
    /// once attempts are exhausted.
    pub fn next_delay(&mut self, hint: Option<Duration>) -> Option<Duration> {
        if !self.should_reconnect() {
            return None;
        }

        let delay = hint.unwrap_or_else(|| {
            self.config
                .backoff
                .delay(self.attempt, self.config.initial_delay, self.config.max_delay)
        });

        self.attempt += 1;
        Some(delay)
    }

    /// Start counting again after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
