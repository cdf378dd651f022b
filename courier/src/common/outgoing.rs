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

//! Outgoing message records and the table correlating replies with them.
//!
//! An [`OutgoingMessageInfo`] is shared through `Arc` by everyone with an
//! interest in the message: the [`OutgoingMessageManager`] table, the
//! transport progress callback, user handles, and the completion callback.
//! It lives until the last of them lets go.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::common::OutgoingMessage;
use crate::message::Body;
use crate::traits::{Progress, ProgressStatus};

/// Lifecycle of an outgoing two-way message.
///
/// ```text
/// Posted ──► Transmitted ──► Replied | Rejected
///   │             │
///   └─────────────┴────────► Abandoned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageState {
    /// Handed to the transport, not yet fully sent.
    Posted,
    /// Fully sent, waiting for an answer.
    Transmitted,
    /// Dropped before an answer arrived.
    Abandoned,
    /// Answered with a reply.
    Replied,
    /// Answered with a rejection.
    Rejected,
}

impl MessageState {
    /// `true` for `Abandoned`, `Replied` and `Rejected`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Abandoned | Self::Replied | Self::Rejected)
    }

    /// `true` once the message has left `Posted`.
    #[must_use]
    pub const fn is_transmission_done(self) -> bool {
        !matches!(self, Self::Posted)
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Posted => "posted",
            Self::Transmitted => "transmitted",
            Self::Abandoned => "abandoned",
            Self::Replied => "replied",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Called once when a message reaches a terminal state.
pub type MessageCallback = Box<dyn FnOnce(OutgoingMessage) + Send>;

/// How a record ends.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    Replied(Body),
    Rejected(String),
    Abandoned,
}

/// Snapshot of a record's mutable state, published through a `watch` channel.
#[derive(Debug, Clone)]
pub(crate) struct Record {
    pub(crate) state: MessageState,
    pub(crate) sent_bytes: u64,
    pub(crate) total_bytes: u64,
    pub(crate) reply: Option<Body>,
    pub(crate) exception: Option<String>,
}

/// Shared state of one outgoing two-way message.
pub struct OutgoingMessageInfo {
    message_id: u64,
    target: String,
    object_name: String,
    message_name: String,
    record: watch::Sender<Record>,
    callback: Mutex<Option<MessageCallback>>,
}

impl fmt::Debug for OutgoingMessageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingMessageInfo")
            .field("message_id", &self.message_id)
            .field("target", &self.target)
            .field("object_name", &self.object_name)
            .field("message_name", &self.message_name)
            .field("state", &self.record.borrow().state)
            .finish_non_exhaustive()
    }
}

impl OutgoingMessageInfo {
    /// Creates a record in state `Posted`.
    pub(crate) fn new(
        message_id: u64,
        target: impl Into<String>,
        object_name: impl Into<String>,
        message_name: impl Into<String>,
    ) -> Arc<Self> {
        let (record, _) = watch::channel(Record {
            state: MessageState::Posted,
            sent_bytes: 0,
            total_bytes: 0,
            reply: None,
            exception: None,
        });
        Arc::new(Self {
            message_id,
            target: target.into(),
            object_name: object_name.into(),
            message_name: message_name.into(),
            record,
            callback: Mutex::new(None),
        })
    }

    pub(crate) const fn message_id(&self) -> u64 {
        self.message_id
    }

    pub(crate) fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn object_name(&self) -> &str {
        &self.object_name
    }

    pub(crate) fn message_name(&self) -> &str {
        &self.message_name
    }

    pub(crate) fn snapshot(&self) -> Record {
        self.record.borrow().clone()
    }

    pub(crate) fn state(&self) -> MessageState {
        self.record.borrow().state
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Record> {
        self.record.subscribe()
    }

    /// Installs the completion callback. Must happen before the message is posted.
    pub(crate) fn set_callback(&self, callback: MessageCallback) {
        *self.callback.lock() = Some(callback);
    }

    /// `true` while a completion callback is waiting to run.
    pub(crate) fn has_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Applies a transport progress report.
    ///
    /// Returns `true` if the report moved the record to `Abandoned`.
    pub(crate) fn on_progress(self: &Arc<Self>, progress: Progress) -> bool {
        match progress.status {
            ProgressStatus::Abandoned => self.finish(Outcome::Abandoned),
            ProgressStatus::InFlight | ProgressStatus::Transmitted => {
                self.record.send_if_modified(|record| {
                    if record.state.is_terminal() {
                        return false;
                    }
                    record.sent_bytes = progress.sent_bytes;
                    record.total_bytes = progress.total_bytes;
                    if progress.status == ProgressStatus::Transmitted {
                        record.state = MessageState::Transmitted;
                        record.sent_bytes = progress.total_bytes;
                    }
                    true
                });
                false
            }
        }
    }

    /// Moves the record to a terminal state unless it is already in one.
    ///
    /// Both latches fire as part of the transition. The completion callback
    /// runs afterwards with no lock held; a panic inside it is logged and
    /// discarded. Returns whether this call performed the transition.
    pub(crate) fn finish(self: &Arc<Self>, outcome: Outcome) -> bool {
        let transitioned = self.record.send_if_modified(|record| {
            if record.state.is_terminal() {
                return false;
            }
            match outcome {
                Outcome::Replied(body) => {
                    record.state = MessageState::Replied;
                    record.reply = Some(body);
                }
                Outcome::Rejected(reason) => {
                    record.state = MessageState::Rejected;
                    record.exception = Some(reason);
                }
                Outcome::Abandoned => record.state = MessageState::Abandoned,
            }
            true
        });
        if !transitioned {
            trace!(message_id = self.message_id, "ignoring report for completed message");
            return false;
        }
        trace!(message_id = self.message_id, state = %self.state(), "message completed");

        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            let handle = OutgoingMessage::from_info(self.clone());
            if catch_unwind(AssertUnwindSafe(|| callback(handle))).is_err() {
                warn!(message_id = self.message_id, "completion callback panicked");
            }
        }
        true
    }
}

/// Correlation table from message id to outgoing record.
#[derive(Debug, Default)]
pub struct OutgoingMessageManager {
    table: DashMap<u64, Arc<OutgoingMessageInfo>>,
}

impl OutgoingMessageManager {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `info` under `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already tracked: ids come from one
    /// [`IdGenerator`](super::IdGenerator) and never repeat while live.
    pub fn put(&self, id: u64, info: Arc<OutgoingMessageInfo>) {
        match self.table.entry(id) {
            Entry::Occupied(_) => panic!("message id {id} is already tracked"),
            Entry::Vacant(slot) => {
                slot.insert(info);
            }
        }
    }

    /// Stops tracking `id`. Removing an unknown id is fine.
    pub fn remove(&self, id: u64) -> Option<Arc<OutgoingMessageInfo>> {
        self.table.remove(&id).map(|(_, info)| info)
    }

    /// Stops tracking `info`, unless its id has since been reused.
    pub(crate) fn forget(&self, info: &Arc<OutgoingMessageInfo>) -> bool {
        self.table
            .remove_if(&info.message_id(), |_, tracked| Arc::ptr_eq(tracked, info))
            .is_some()
    }

    /// Looks up a tracked record.
    pub fn get(&self, id: u64) -> Option<Arc<OutgoingMessageInfo>> {
        self.table.get(&id).map(|entry| entry.value().clone())
    }

    /// Completes `id` with a reply. Unknown or completed ids are ignored.
    pub fn report_replied(&self, id: u64, body: Body) -> bool {
        self.report(id, Outcome::Replied(body))
    }

    /// Completes `id` with a rejection. Unknown or completed ids are ignored.
    pub fn report_rejected(&self, id: u64, reason: impl Into<String>) -> bool {
        self.report(id, Outcome::Rejected(reason.into()))
    }

    /// Abandons every tracked record and empties the table.
    pub fn abandon_all(&self) -> usize {
        let ids: Vec<u64> = self.table.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.report(*id, Outcome::Abandoned))
            .count()
    }

    /// Number of tracked records.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// `true` when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn report(&self, id: u64, outcome: Outcome) -> bool {
        // Clone out of the shard so no map lock is held across the callback.
        let Some(info) = self.get(id) else {
            trace!(message_id = id, "ignoring report for unknown message");
            return false;
        };
        let transitioned = info.finish(outcome);
        self.table.remove_if(&id, |_, tracked| Arc::ptr_eq(tracked, &info));
        transitioned
    }
}
