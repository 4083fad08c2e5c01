//! Delay between a failed attempt and the next one

use std::time::Duration;

use serde::{Deserialize, Serialize};

mod defaults {
    pub const fn delay_secs() -> u64 {
        300 // 5 minutes
    }

    pub const fn base_delay_secs() -> u64 {
        60
    }

    pub const fn max_delay_secs() -> u64 {
        86400 // 24 hours
    }
}

/// Backoff schedule
///
/// Both variants are non-decreasing in the retry count. There is no random
/// jitter, since jitter could make a later delay shorter than an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// The same delay after every failure
    Fixed {
        #[serde(default = "defaults::delay_secs")]
        delay_secs: u64,
    },

    /// `min(base * 2^retry_count, max)`
    Exponential {
        #[serde(default = "defaults::base_delay_secs")]
        base_delay_secs: u64,
        #[serde(default = "defaults::max_delay_secs")]
        max_delay_secs: u64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Fixed {
            delay_secs: defaults::delay_secs(),
        }
    }
}

impl Backoff {
    /// Delay before the next attempt of a message that has already been
    /// retried `retry_count` times
    #[must_use]
    pub fn delay(&self, retry_count: u32) -> Duration {
        let secs = match *self {
            Self::Fixed { delay_secs } => delay_secs,
            Self::Exponential {
                base_delay_secs,
                max_delay_secs,
            } => {
                // 2^63 would overflow
                if retry_count >= 63 {
                    max_delay_secs
                } else {
                    base_delay_secs
                        .saturating_mul(1u64 << retry_count)
                        .min(max_delay_secs)
                }
            }
        };

        Duration::from_secs(secs)
    }
}
