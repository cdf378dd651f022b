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

//! The transport collaborator contract.
//!
//! The broker never touches sockets. Everything below the logical channel
//! (framing, byte I/O, connection bookkeeping) is provided by an implementation
//! of [`Transport`]; the broker hands it a [`TransportSink`] through which
//! inbound traffic and connection events flow back.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::message::{MessageHeader, Priority, TransportError};

/// Opaque descriptor of a transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// Per-connection options passed to [`Transport::open`].
///
/// Keys and values are interpreted by the transport alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelOverrides(BTreeMap<String, String>);

impl ChannelOverrides {
    /// Creates an empty set of overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an option.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Looks up an option.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterates options in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `true` when no options are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Where a posted message stands in its transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    /// Some bytes are on the wire, more to come.
    InFlight,
    /// Every byte was handed to the network.
    Transmitted,
    /// The message was dropped before it was fully sent.
    Abandoned,
}

impl ProgressStatus {
    /// `true` for the two final statuses.
    #[must_use]
    pub const fn is_final(self) -> bool {
        !matches!(self, Self::InFlight)
    }
}

/// A progress report for one posted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes sent so far.
    pub sent_bytes: u64,
    /// Total bytes of header and body.
    pub total_bytes: u64,
    /// Transmission status.
    pub status: ProgressStatus,
}

/// Called by the transport as a posted message makes progress.
///
/// The transport must invoke it with a final status
/// ([`ProgressStatus::Transmitted`] or [`ProgressStatus::Abandoned`]) exactly
/// once, including when the channel is closed or the transport shuts down.
pub type ProgressCallback = Box<dyn FnMut(Progress) + Send>;

/// Advisory information accompanying a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostHint {
    /// The sender is waiting for a reply to this message.
    pub expects_reply: bool,
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// We opened a new outbound channel.
    Opened {
        /// Remote endpoint.
        target: String,
        /// Descriptor of the channel.
        channel: ChannelId,
    },
    /// A remote endpoint connected to us.
    Incoming {
        /// Remote endpoint.
        source: String,
    },
    /// A channel was closed, explicitly or after an I/O failure.
    Closed {
        /// Remote endpoint.
        target: String,
        /// Descriptor of the channel.
        channel: ChannelId,
    },
}

/// Receives inbound traffic from the transport. Implemented by the agent.
pub trait TransportSink: Send + Sync {
    /// A complete message arrived from `source`.
    fn deliver(&self, source: &str, header: MessageHeader, body: Vec<u8>);

    /// A connection changed state.
    fn connection_event(&self, event: ConnectionEvent);
}

/// The physical transport consumed by the broker.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Installs the sink for inbound messages and connection events.
    ///
    /// Called once, from [`BrokerAgent::start`](crate::common::BrokerAgent::start).
    fn attach(&self, sink: Arc<dyn TransportSink>);

    /// Opens (or reuses) a channel to `target`.
    ///
    /// Returns the channel and `true` if it was newly created.
    async fn open(&self, target: &str, overrides: &ChannelOverrides) -> Result<(ChannelId, bool), TransportError>;

    /// Returns the open channel to `target`, without creating one.
    fn is_open(&self, target: &str) -> Option<ChannelId>;

    /// Closes a channel, keeping queued messages with priority `>= priority`
    /// and abandoning the rest.
    async fn close(&self, channel: ChannelId, priority: Priority) -> Result<(), TransportError>;

    /// Queues a message for transmission. Never blocks on the network.
    ///
    /// When `post` returns an error the progress callback is dropped without
    /// being called; the caller cleans up on its own.
    fn post(
        &self,
        channel: ChannelId,
        header: MessageHeader,
        body: Vec<u8>,
        priority: Priority,
        progress: ProgressCallback,
        hint: PostHint,
    ) -> Result<(), TransportError>;

    /// Performs pending I/O for at most `timeout`.
    ///
    /// `allow_out` / `allow_in` gate transmission and reception respectively.
    /// Returns `true` if any work was done.
    async fn do_some_work(&self, timeout: Duration, allow_out: bool, allow_in: bool) -> bool;

    /// Tears down every channel, abandoning whatever is still queued.
    async fn shutdown(&self);
}
