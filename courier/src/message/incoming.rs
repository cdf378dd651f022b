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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::message::{Body, BrokerError, MessageHeader, MessageKind};

/// Posts replies and rejections back to the originator of a request.
#[async_trait]
pub(crate) trait AnswerSink: Send + Sync {
    async fn answer(&self, source: &str, header: MessageHeader, body: Body) -> Result<(), BrokerError>;
}

/// A request received from the network and queued for dispatch.
#[derive(Clone)]
pub struct IncomingMessage {
    /// Endpoint name the message arrived from.
    pub source: String,
    /// Object the message is addressed to.
    pub object_name: String,
    /// Operation name within the object.
    pub message_name: String,
    /// Correlation id, `0` for one-way messages.
    pub message_id: u64,
    /// Payload, raw or structured depending on the agent's delivery mode.
    pub body: Body,
    replier: Option<Replier>,
}

impl fmt::Debug for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingMessage")
            .field("source", &self.source)
            .field("object_name", &self.object_name)
            .field("message_name", &self.message_name)
            .field("message_id", &self.message_id)
            .finish_non_exhaustive()
    }
}

impl IncomingMessage {
    pub(crate) fn new(source: String, header: &MessageHeader, body: Body, sink: Arc<dyn AnswerSink>) -> Self {
        let replier = (!header.is_one_way()).then(|| Replier {
            inner: Arc::new(ReplierInner {
                answered: AtomicBool::new(false),
                source: source.clone(),
                header: header.clone(),
                sink,
            }),
        });
        Self {
            source,
            object_name: header.object_name.clone(),
            message_name: header.message_name.clone(),
            message_id: header.message_id,
            body,
            replier,
        }
    }

    /// `true` when the sender does not expect an answer.
    #[must_use]
    pub const fn is_one_way(&self) -> bool {
        self.message_id == 0
    }

    /// Handle for answering later, outside the handler call.
    ///
    /// Returns `None` for one-way messages. When the handler answers through
    /// the replier it should return `Ok(None)`.
    #[must_use]
    pub fn replier(&self) -> Option<Replier> {
        self.replier.clone()
    }
}

/// One-shot answer channel for a two-way request.
///
/// Only the first of [`Replier::reply`] / [`Replier::reject`] (or the
/// dispatcher's own answer) is sent; later answers are dropped.
#[derive(Clone)]
pub struct Replier {
    inner: Arc<ReplierInner>,
}

struct ReplierInner {
    answered: AtomicBool,
    source: String,
    header: MessageHeader,
    sink: Arc<dyn AnswerSink>,
}

impl fmt::Debug for Replier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replier")
            .field("source", &self.inner.source)
            .field("message_id", &self.inner.header.message_id)
            .field("answered", &self.is_answered())
            .finish()
    }
}

impl Replier {
    /// Sends a reply carrying `body`.
    ///
    /// # Errors
    ///
    /// Returns the communication error if the answer could not be posted.
    pub async fn reply(&self, body: impl Into<Body>) -> Result<(), BrokerError> {
        self.answer(MessageKind::Reply, body.into()).await
    }

    /// Sends a rejection carrying `reason`.
    ///
    /// # Errors
    ///
    /// Returns the communication error if the answer could not be posted.
    pub async fn reject(&self, reason: impl Into<String>) -> Result<(), BrokerError> {
        self.answer(MessageKind::Exception, Body::reason(reason)).await
    }

    /// `true` once an answer has been claimed by any holder.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.inner.answered.load(Ordering::Acquire)
    }

    async fn answer(&self, kind: MessageKind, body: Body) -> Result<(), BrokerError> {
        if self.inner.answered.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let header = MessageHeader::answer(&self.inner.header, kind);
        self.inner.sink.answer(&self.inner.source, header, body).await
    }
}
