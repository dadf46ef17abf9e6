//! Send-time jitter.
//!
//! With traffic scrambling on, senders sleep a random interval before every
//! transmission so that message timing is decorrelated from user activity.

use rand::Rng;
use std::time::Duration;

pub const JITTER_MIN_MS: u64 = 100;
pub const JITTER_MAX_MS: u64 = 3000;

/// Delay to apply before transmitting a user message.
///
/// Uniform in `[JITTER_MIN_MS, JITTER_MAX_MS)` when scrambling is enabled,
/// zero otherwise.
pub fn random_delay(scramble: bool) -> Duration {
    if !scramble {
        return Duration::ZERO;
    }
    let ms = rand::thread_rng().gen_range(JITTER_MIN_MS..JITTER_MAX_MS);
    Duration::from_millis(ms)
}
