use moorage_schema::{BackoffStrategy, RetryConfig};
use std::time::Duration;

/// Backoff schedule between attempts of one task.
///
/// Attempts are numbered from 1. `delay(n)` is the pause after attempt `n`
/// failed and before attempt `n + 1`; it never exceeds `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_range: f64,
    /// Seed of the deterministic jitter sequence.
    pub seed: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            strategy: config.strategy,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
            jitter_range: config.jitter_range,
            seed: 0,
        }
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The same schedule with the jitter seed mixed with `key`, so tasks
    /// retrying side by side do not wake up in lockstep.
    #[must_use]
    pub fn for_key(&self, key: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(key.as_bytes());
        let mut bytes = [0_u8; 8];
        bytes.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
        self.clone().with_seed(u64::from_le_bytes(bytes))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_ms = self.base_delay.as_nanos() as f64 / 1e6;
        let exponential = || {
            let exp = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
            base_ms * self.backoff_factor.powi(exp)
        };
        let raw_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Linear => base_ms * f64::from(attempt),
            BackoffStrategy::Exponential => exponential(),
            BackoffStrategy::Jittered => {
                let spread = (2.0 * self.jitter_fraction(attempt) - 1.0) * self.jitter_range;
                exponential() * (1.0 + spread)
            }
        };
        let max_ms = self.max_delay.as_nanos() as f64 / 1e6;
        let ms = if raw_ms.is_finite() {
            raw_ms.clamp(0.0, max_ms)
        } else {
            max_ms
        };
        Duration::from_nanos((ms * 1e6).round() as u64)
    }

    /// Uniform value in `[0, 1)` derived from `(seed, attempt)`.
    fn jitter_fraction(&self, attempt: u32) -> f64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(&attempt.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0_u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_le_bytes(bytes) >> 11) as f64 / (1_u64 << 53) as f64
    }
}
