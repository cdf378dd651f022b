/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Connection retry with randomized backoff, and failover ordering.
//!
//! Pauses between open attempts are drawn uniformly from
//! `[0, connection_retry_delay_spread_ms)` so that many clients losing the
//! same destination do not reconnect in lockstep. Both the pauses and the
//! failover shuffle come from a [`RandomSource`], which tests replace with a
//! seeded or scripted one.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::common::BrokerConfig;
use crate::message::BrokerError;
use crate::traits::{ChannelId, ChannelOverrides, Transport};

/// Randomness used by the retry and failover policies.
pub trait RandomSource: Send + Sync {
    /// Uniform value in `[0, bound)`. `bound` is never zero.
    fn below(&self, bound: u64) -> u64;

    /// Uniform random permutation of `items`.
    fn shuffle(&self, items: &mut [String]);
}

/// [`RandomSource`] backed by a [`StdRng`].
pub struct StdRandom {
    rng: Mutex<StdRng>,
}

impl fmt::Debug for StdRandom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRandom").finish_non_exhaustive()
    }
}

impl Default for StdRandom {
    fn default() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }
}

impl StdRandom {
    /// Seeded from the operating system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic sequence for a given seed.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for StdRandom {
    fn below(&self, bound: u64) -> u64 {
        self.rng.lock().random_range(0..bound)
    }

    fn shuffle(&self, items: &mut [String]) {
        items.shuffle(&mut *self.rng.lock());
    }
}

/// Bounded retry of channel opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total open attempts, at least one.
    pub attempts: u32,
    /// Exclusive upper bound of the pause between attempts.
    pub delay_spread: Duration,
}

impl RetryPolicy {
    /// Policy described by `connection_retries` and
    /// `connection_retry_delay_spread_ms`.
    #[must_use]
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            attempts: config.connection_retries.max(1),
            delay_spread: Duration::from_millis(config.connection_retry_delay_spread_ms),
        }
    }

    /// Draws the pause before the next attempt.
    #[must_use]
    pub fn next_delay(&self, rng: &dyn RandomSource) -> Duration {
        let spread = u64::try_from(self.delay_spread.as_millis()).unwrap_or(u64::MAX);
        if spread == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.below(spread))
        }
    }
}

/// Finds or opens the channel to `target`.
///
/// Without `auto_connect` only an existing channel is accepted and failure is
/// immediate. Otherwise `open` is attempted up to `policy.attempts` times with
/// a random pause between failures (none after the last).
pub(crate) async fn ensure_channel(
    transport: &dyn Transport,
    target: &str,
    auto_connect: bool,
    overrides: &ChannelOverrides,
    policy: RetryPolicy,
    rng: &dyn RandomSource,
) -> Result<(ChannelId, bool), BrokerError> {
    if !auto_connect {
        return transport
            .is_open(target)
            .map(|channel| (channel, false))
            .ok_or_else(|| BrokerError::ChannelUnavailable {
                target: target.to_string(),
                attempts: 0,
            });
    }

    for attempt in 1..=policy.attempts {
        match transport.open(target, overrides).await {
            Ok(opened) => return Ok(opened),
            Err(e) => {
                warn!(endpoint = target, attempt, max = policy.attempts, error = %e, "channel open failed");
                if attempt < policy.attempts {
                    let delay = policy.next_delay(rng);
                    debug!(endpoint = target, ?delay, "backing off before reconnect");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(BrokerError::ChannelUnavailable {
        target: target.to_string(),
        attempts: policy.attempts,
    })
}

/// Returns the members of a failover group in the order they will be tried.
pub(crate) fn failover_order(mut targets: Vec<String>, rng: &dyn RandomSource) -> Vec<String> {
    rng.shuffle(&mut targets);
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_stays_within_spread() {
        let rng = StdRandom::seeded(11);
        let policy = RetryPolicy {
            attempts: 3,
            delay_spread: Duration::from_millis(25),
        };
        for _ in 0..1000 {
            assert!(policy.next_delay(&rng) < Duration::from_millis(25));
        }
    }

    #[test]
    fn test_zero_spread_means_no_delay() {
        let rng = StdRandom::seeded(1);
        let policy = RetryPolicy {
            attempts: 3,
            delay_spread: Duration::ZERO,
        };
        assert_eq!(policy.next_delay(&rng), Duration::ZERO);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from_config(&BrokerConfig::default());
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.delay_spread, Duration::from_millis(100));
    }

    #[test]
    fn test_failover_order_is_a_permutation() {
        let rng = StdRandom::seeded(3);
        let members = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut ordered = failover_order(members.clone(), &rng);
        ordered.sort();
        assert_eq!(ordered, members);
    }

    #[test]
    fn test_seeded_sources_repeat() {
        let a = StdRandom::seeded(99);
        let b = StdRandom::seeded(99);
        for _ in 0..10 {
            assert_eq!(a.below(1000), b.below(1000));
        }
    }
}
