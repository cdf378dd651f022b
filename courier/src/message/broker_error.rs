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

//! Error types surfaced by the broker agent and its transport collaborator.

use std::fmt;

/// Errors reported by a [`Transport`](crate::traits::Transport) implementation.
///
/// The broker never inspects these beyond logging them; they are wrapped in
/// [`BrokerError::Transport`] when they reach a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The target could not be reached or refused the connection.
    Unreachable(String),
    /// The channel was closed before or during the operation.
    ChannelClosed,
    /// The transport has been shut down.
    Shutdown,
    /// Any other I/O failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(target) => write!(f, "target unreachable: {target}"),
            Self::ChannelClosed => write!(f, "channel closed"),
            Self::Shutdown => write!(f, "transport shut down"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors returned by [`BrokerAgent`](crate::common::BrokerAgent) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Invalid configuration detected at construction time.
    Configuration(String),

    /// No channel could be acquired for the target.
    ///
    /// Raised after `attempts` failed opens, or immediately (`attempts == 0`)
    /// when auto-connect was disabled and no channel exists.
    ChannelUnavailable {
        /// The target that could not be reached.
        target: String,
        /// Number of open attempts made.
        attempts: u32,
    },

    /// The transport failed while posting or opening.
    Transport(TransportError),

    /// A failover send exhausted every member of the group.
    FailoverExhausted {
        /// The group as it was written by the caller.
        group: String,
        /// The error from the last member tried.
        last: Box<BrokerError>,
    },

    /// A message was abandoned before it completed.
    Abandoned(u64),

    /// The remote side rejected a request.
    Rejected {
        /// Id of the rejected request.
        message_id: u64,
        /// Reason sent by the remote side.
        reason: String,
    },

    /// A bounded wait expired.
    Timeout,

    /// A body could not be encoded or decoded.
    Codec(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => write!(f, "configuration error: {e}"),
            Self::ChannelUnavailable { target, attempts } => {
                write!(f, "no channel to {target} after {attempts} attempt(s)")
            }
            Self::Transport(e) => write!(f, "communication error: {e}"),
            Self::FailoverExhausted { group, last } => {
                write!(f, "all failover targets in '{group}' failed, last error: {last}")
            }
            Self::Abandoned(id) => write!(f, "message {id} was abandoned"),
            Self::Rejected { message_id, reason } => write!(f, "message {message_id} rejected: {reason}"),
            Self::Timeout => write!(f, "timed out"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
        }
    }
}

impl std::error::Error for BrokerError {}

impl BrokerError {
    /// Returns `true` for errors caused by the network rather than by the caller.
    #[must_use]
    pub const fn is_communication(&self) -> bool {
        matches!(
            self,
            Self::ChannelUnavailable { .. }
                | Self::Transport(_)
                | Self::FailoverExhausted { .. }
                | Self::Abandoned(_)
        )
    }
}

impl From<TransportError> for BrokerError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
