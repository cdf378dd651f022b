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
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::common::outgoing::{MessageState, OutgoingMessageInfo, OutgoingMessageManager, Record};
use crate::message::{Body, BrokerError};

/// Caller-side handle to a two-way message returned by
/// [`BrokerAgent::send`](super::BrokerAgent::send).
///
/// Cheap to clone; every clone observes the same message. When the last
/// clone returned by the agent is dropped before an answer arrived, the
/// message stops being tracked and a late answer is discarded. Messages sent
/// with a completion callback stay tracked until the callback has run.
///
/// ```rust,ignore
/// let handle = agent.send(OutboundMessage::new("peer", "echo", "say").with_body(json!("hi"))).await?;
/// let state = handle.wait_for_completion().await;
/// assert_eq!(state, MessageState::Replied);
/// println!("{:?}", handle.reply());
/// ```
#[derive(Clone)]
pub struct OutgoingMessage {
    info: Arc<OutgoingMessageInfo>,
    _tracking: Option<Arc<Tracking>>,
}

/// Shared by the handles given to the caller; untracks the record when the
/// last of them goes away.
struct Tracking {
    info: Arc<OutgoingMessageInfo>,
    manager: Weak<OutgoingMessageManager>,
}

impl Drop for Tracking {
    fn drop(&mut self) {
        if self.info.state().is_terminal() || self.info.has_callback() {
            return;
        }
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        if manager.forget(&self.info) {
            trace!(message_id = self.info.message_id(), "last handle dropped, message no longer tracked");
        }
    }
}

impl fmt::Debug for OutgoingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingMessage")
            .field("message_id", &self.message_id())
            .field("target", &self.target())
            .field("state", &self.state())
            .finish()
    }
}

impl OutgoingMessage {
    pub(crate) fn from_info(info: Arc<OutgoingMessageInfo>) -> Self {
        Self { info, _tracking: None }
    }

    /// A caller-facing handle that untracks `info` from `manager` once every
    /// clone has been dropped.
    pub(crate) fn tracked(info: Arc<OutgoingMessageInfo>, manager: &Arc<OutgoingMessageManager>) -> Self {
        let tracking = Tracking {
            info: info.clone(),
            manager: Arc::downgrade(manager),
        };
        Self {
            info,
            _tracking: Some(Arc::new(tracking)),
        }
    }

    /// Correlation id assigned at send time.
    #[must_use]
    pub fn message_id(&self) -> u64 {
        self.info.message_id()
    }

    /// The endpoint this message was posted to.
    #[must_use]
    pub fn target(&self) -> &str {
        self.info.target()
    }

    /// Destination object name.
    #[must_use]
    pub fn object_name(&self) -> &str {
        self.info.object_name()
    }

    /// Operation name.
    #[must_use]
    pub fn message_name(&self) -> &str {
        self.info.message_name()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MessageState {
        self.info.state()
    }

    /// Bytes handed to the network so far.
    #[must_use]
    pub fn sent_bytes(&self) -> u64 {
        self.info.snapshot().sent_bytes
    }

    /// Total size reported by the transport, `0` until the first report.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.info.snapshot().total_bytes
    }

    /// The reply body, once the state is `Replied`.
    #[must_use]
    pub fn reply(&self) -> Option<Body> {
        self.info.snapshot().reply
    }

    /// The rejection reason, once the state is `Rejected`.
    #[must_use]
    pub fn exception(&self) -> Option<String> {
        self.info.snapshot().exception
    }

    /// `true` once transmission ended, successfully or not.
    #[must_use]
    pub fn is_transmitted(&self) -> bool {
        self.state().is_transmission_done()
    }

    /// `true` once the state is terminal.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state().is_terminal()
    }

    /// Waits until transmission ends and returns the state at that point.
    pub async fn wait_for_transmission(&self) -> MessageState {
        self.wait(MessageState::is_transmission_done).await
    }

    /// [`wait_for_transmission`](Self::wait_for_transmission) bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Timeout`] if transmission has not ended in time.
    pub async fn wait_for_transmission_timeout(&self, timeout: Duration) -> Result<MessageState, BrokerError> {
        tokio::time::timeout(timeout, self.wait_for_transmission())
            .await
            .map_err(|_| BrokerError::Timeout)
    }

    /// [`wait_for_transmission`](Self::wait_for_transmission) bounded by a deadline.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Timeout`] if the deadline passes first.
    pub async fn wait_for_transmission_until(&self, deadline: Instant) -> Result<MessageState, BrokerError> {
        tokio::time::timeout_at(deadline, self.wait_for_transmission())
            .await
            .map_err(|_| BrokerError::Timeout)
    }

    /// Waits until the message is replied, rejected or abandoned.
    pub async fn wait_for_completion(&self) -> MessageState {
        self.wait(MessageState::is_terminal).await
    }

    /// [`wait_for_completion`](Self::wait_for_completion) bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Timeout`] if the message is still pending.
    pub async fn wait_for_completion_timeout(&self, timeout: Duration) -> Result<MessageState, BrokerError> {
        tokio::time::timeout(timeout, self.wait_for_completion())
            .await
            .map_err(|_| BrokerError::Timeout)
    }

    /// [`wait_for_completion`](Self::wait_for_completion) bounded by a deadline.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Timeout`] if the deadline passes first.
    pub async fn wait_for_completion_until(&self, deadline: Instant) -> Result<MessageState, BrokerError> {
        tokio::time::timeout_at(deadline, self.wait_for_completion())
            .await
            .map_err(|_| BrokerError::Timeout)
    }

    /// Waits for completion and converts the outcome into a `Result`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Rejected`] or [`BrokerError::Abandoned`] for the
    /// respective outcomes.
    pub async fn response(&self) -> Result<Body, BrokerError> {
        self.wait_for_completion().await;
        let Record {
            state, reply, exception, ..
        } = self.info.snapshot();
        match state {
            MessageState::Replied => Ok(reply.unwrap_or_default()),
            MessageState::Rejected => Err(BrokerError::Rejected {
                message_id: self.message_id(),
                reason: exception.unwrap_or_default(),
            }),
            _ => Err(BrokerError::Abandoned(self.message_id())),
        }
    }

    async fn wait(&self, done: fn(MessageState) -> bool) -> MessageState {
        let mut rx = self.info.subscribe();
        // The sender is owned by the record we hold, so it cannot close under us.
        let state = match rx.wait_for(|record| done(record.state)).await {
            Ok(record) => record.state,
            Err(_) => self.info.state(),
        };
        state
    }
}
