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

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a message on the wire carries: a request, or the answer to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// A request addressed to an object (two-way or one-way).
    Message,
    /// A successful answer correlated by `message_id`.
    Reply,
    /// A rejection correlated by `message_id`; the body carries the reason.
    Exception,
}

/// Logical header handed to the transport with every post.
///
/// The transport frames it however it likes; the broker only relies on the
/// fields coming back intact on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Request, reply, or rejection.
    pub kind: MessageKind,
    /// Logical destination object on the receiving agent.
    pub object_name: String,
    /// Operation name within the object.
    pub message_name: String,
    /// Correlation id; `0` marks a one-way message.
    pub message_id: u64,
}

impl MessageHeader {
    /// Header for a request. Pass `0` as `message_id` for one-way messages.
    #[must_use]
    pub fn message(object_name: impl Into<String>, message_name: impl Into<String>, message_id: u64) -> Self {
        Self {
            kind: MessageKind::Message,
            object_name: object_name.into(),
            message_name: message_name.into(),
            message_id,
        }
    }

    /// Header answering `request`, with the given kind.
    #[must_use]
    pub fn answer(request: &Self, kind: MessageKind) -> Self {
        Self {
            kind,
            object_name: request.object_name.clone(),
            message_name: request.message_name.clone(),
            message_id: request.message_id,
        }
    }

    /// `true` when no reply is expected.
    #[must_use]
    pub const fn is_one_way(&self) -> bool {
        self.message_id == 0
    }
}

/// Transmission priority of a posted message.
///
/// Higher values are transmitted first. Closing a channel with priority `P`
/// keeps queued messages whose priority is at least `P`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Priority(pub u8);

impl Priority {
    /// Background traffic.
    pub const LOW: Self = Self(0);
    /// Default priority for application messages.
    pub const NORMAL: Self = Self(64);
    /// Latency-sensitive traffic.
    pub const HIGH: Self = Self(128);
    /// Traffic that must survive any graceful close.
    pub const CRITICAL: Self = Self(255);
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self(value)
    }
}
