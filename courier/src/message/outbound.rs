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

use std::time::Duration;

use crate::message::{Body, Priority};
use crate::traits::ChannelOverrides;

/// A message prepared for [`BrokerAgent::send`](crate::common::BrokerAgent::send)
/// or [`BrokerAgent::send_one_way`](crate::common::BrokerAgent::send_one_way).
///
/// Built with [`OutboundMessage::new`] and the `with_*` methods:
///
/// ```rust,ignore
/// let msg = OutboundMessage::new("node-a|node-b", "inventory", "reserve")
///     .with_body(json!({ "sku": "A-1", "qty": 2 }))
///     .with_priority(Priority::HIGH)
///     .with_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Destination endpoint, or a `|`-separated failover group.
    pub target: String,
    /// Object registered on the destination agent.
    pub object_name: String,
    /// Operation name within the object.
    pub message_name: String,
    /// Payload.
    pub body: Body,
    /// Transmission priority.
    pub priority: Priority,
    /// Whether a missing channel may be opened on demand.
    pub auto_connect: bool,
    /// Per-connection options handed to the transport on open.
    pub overrides: ChannelOverrides,
    /// Bound on each failover wait. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl OutboundMessage {
    /// Creates a message with an empty body, normal priority and auto-connect on.
    #[must_use]
    pub fn new(
        target: impl Into<String>,
        object_name: impl Into<String>,
        message_name: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            object_name: object_name.into(),
            message_name: message_name.into(),
            body: Body::default(),
            priority: Priority::NORMAL,
            auto_connect: true,
            overrides: ChannelOverrides::default(),
            timeout: None,
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the transmission priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Enables or disables opening a channel on demand.
    #[must_use]
    pub const fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Sets connection overrides used if a channel has to be opened.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ChannelOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Bounds the wait on each failover branch.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Splits the target into its failover members.
    ///
    /// A plain target yields a single member. Blank members are skipped.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        self.target
            .split('|')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    /// `true` when the target names more than one destination.
    #[must_use]
    pub fn is_failover_group(&self) -> bool {
        self.targets().len() > 1
    }

    /// Copy of this message addressed to a single member of its group.
    pub(crate) fn retarget(&self, target: &str) -> Self {
        let mut single = self.clone();
        single.target = target.to_string();
        single
    }
}
