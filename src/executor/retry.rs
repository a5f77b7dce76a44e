// Back-off between status polls
//
// The poller waits `calculate_delay(strategy, attempt)` before each request
// after the first. `attempt` counts polls since the output last changed (or
// consecutive failures), so an active job is polled at the base rate and an
// idle or unreachable one slows down to the cap.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How the wait between polls grows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelayStrategy {
    Fixed(Duration),
    Exponential {
        base: Duration,
        max: Duration,
        jitter: bool,
    },
    Linear {
        base: Duration,
        increment: Duration,
        max: Duration,
    },
}

impl Default for DelayStrategy {
    fn default() -> Self {
        DelayStrategy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(5),
            jitter: false,
        }
    }
}

/// Strategy names accepted in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
    Linear,
}

/// Calculate delay for a retry attempt
pub fn calculate_delay(strategy: &DelayStrategy, attempt: u32) -> Duration {
    match strategy {
        DelayStrategy::Fixed(duration) => *duration,
        DelayStrategy::Exponential { base, max, jitter } => {
            // delay = base * 2^attempt
            let multiplier = 2u64.saturating_pow(attempt);
            let delay = (base.as_millis() as u64).saturating_mul(multiplier);
            let delay = Duration::from_millis(delay.min(max.as_millis() as u64));

            if *jitter {
                // Add 0-25% jitter
                let jitter_ms = rand::thread_rng().gen_range(0..=(delay.as_millis() as u64 / 4));
                (delay + Duration::from_millis(jitter_ms)).min(*max)
            } else {
                delay
            }
        }
        DelayStrategy::Linear {
            base,
            increment,
            max,
        } => {
            // delay = base + (increment * attempt)
            let delay_ms = (base.as_millis() as u64)
                .saturating_add((increment.as_millis() as u64).saturating_mul(attempt as u64));
            Duration::from_millis(delay_ms.min(max.as_millis() as u64))
        }
    }
}
