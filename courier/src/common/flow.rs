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

//! Water-mark flow control.
//!
//! [`WaterFlowManager`] is the bare threshold state machine. [`FlowGate`]
//! puts a suppression flag on top of it that tasks can wait on; the agent
//! keeps one gate for outbound traffic (suspending senders) and one for
//! inbound traffic (pausing transport reads).

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use crate::message::BrokerError;

/// Outcome of a level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSignal {
    /// The level dropped below the low water mark.
    Allow,
    /// The level reached the high water mark.
    Suppress,
    /// Nothing to report.
    NoChange,
}

#[derive(Debug)]
struct Levels {
    current: u64,
    high: u64,
    low: u64,
}

/// Counts outstanding items against a high and a low water mark.
#[derive(Debug)]
pub struct WaterFlowManager {
    levels: Mutex<Levels>,
}

impl WaterFlowManager {
    /// Creates a manager at level zero.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Configuration`] if `high` is zero or `low > high`.
    pub fn new(high: u64, low: u64) -> Result<Self, BrokerError> {
        if high == 0 {
            return Err(BrokerError::Configuration("high water mark must be at least 1".into()));
        }
        if low > high {
            return Err(BrokerError::Configuration(format!(
                "low water mark {low} exceeds high water mark {high}"
            )));
        }
        Ok(Self {
            levels: Mutex::new(Levels { current: 0, high, low }),
        })
    }

    /// Adds one item. Returns [`FlowSignal::Suppress`] iff the new level is at
    /// or above the high water mark.
    pub fn increase(&self) -> FlowSignal {
        let mut levels = self.levels.lock();
        levels.current += 1;
        if levels.current >= levels.high {
            FlowSignal::Suppress
        } else {
            FlowSignal::NoChange
        }
    }

    /// Removes one item. Returns [`FlowSignal::Allow`] iff the new level is
    /// below the low water mark.
    ///
    /// # Panics
    ///
    /// Panics if the level is already zero: every decrease must pair with an
    /// earlier increase.
    pub fn decrease(&self) -> FlowSignal {
        let mut levels = self.levels.lock();
        assert!(levels.current > 0, "flow level released below zero (double release)");
        levels.current -= 1;
        if levels.current < levels.low {
            FlowSignal::Allow
        } else {
            FlowSignal::NoChange
        }
    }

    /// Current level.
    pub fn level(&self) -> u64 {
        self.levels.lock().current
    }
}

/// A [`WaterFlowManager`] with a waitable suppression flag.
#[derive(Debug)]
pub struct FlowGate {
    name: &'static str,
    flow: WaterFlowManager,
    suppressed: watch::Sender<bool>,
}

impl FlowGate {
    /// Creates an open gate.
    ///
    /// # Errors
    ///
    /// See [`WaterFlowManager::new`].
    pub fn new(name: &'static str, high: u64, low: u64) -> Result<Self, BrokerError> {
        let (suppressed, _) = watch::channel(false);
        Ok(Self {
            name,
            flow: WaterFlowManager::new(high, low)?,
            suppressed,
        })
    }

    /// Waits until the gate is open, then counts one item in.
    ///
    /// The suppression check and the increase happen under the same lock, so
    /// a woken waiter cannot slip past a gate another waiter just closed.
    pub async fn acquire(&self) {
        let mut rx = self.suppressed.subscribe();
        loop {
            if self.try_acquire() {
                return;
            }
            trace!(gate = self.name, level = self.level(), "waiting for flow gate to reopen");
            // The sender lives as long as `self`, so this cannot fail while we wait.
            if rx.wait_for(|suppressed| !*suppressed).await.is_err() {
                return;
            }
        }
    }

    /// Counts one item in if the gate is open. Returns whether it did.
    pub fn try_acquire(&self) -> bool {
        let mut acquired = false;
        self.suppressed.send_if_modified(|suppressed| {
            if *suppressed {
                return false;
            }
            acquired = true;
            self.close_on_suppress(suppressed)
        });
        acquired
    }

    /// Counts one item in regardless of the gate state.
    pub fn enter(&self) {
        self.suppressed.send_if_modified(|suppressed| self.close_on_suppress(suppressed));
    }

    /// Counts one item out, reopening the gate on [`FlowSignal::Allow`].
    pub fn release(&self) {
        self.suppressed.send_if_modified(|suppressed| {
            if self.flow.decrease() == FlowSignal::Allow && *suppressed {
                *suppressed = false;
                trace!(gate = self.name, level = self.flow.level(), "flow gate reopened");
                true
            } else {
                false
            }
        });
    }

    /// `true` while new items should be held back.
    pub fn is_suppressed(&self) -> bool {
        *self.suppressed.borrow()
    }

    /// Current level.
    pub fn level(&self) -> u64 {
        self.flow.level()
    }

    fn close_on_suppress(&self, suppressed: &mut bool) -> bool {
        if self.flow.increase() == FlowSignal::Suppress && !*suppressed {
            *suppressed = true;
            trace!(gate = self.name, level = self.flow.level(), "flow gate suppressed");
            true
        } else {
            false
        }
    }
}
