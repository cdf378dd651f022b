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

// --- Public Re-exports ---
pub use body::Body;
pub use broker_error::{BrokerError, TransportError};
pub use header::{MessageHeader, MessageKind, Priority};
pub use incoming::{IncomingMessage, Replier};
pub use outbound::OutboundMessage;

pub(crate) use incoming::AnswerSink;

// --- Submodules ---

/// Structured and raw message bodies.
mod body;
/// Broker and transport error types.
mod broker_error;
/// Logical message header and priority.
mod header;
/// Received requests and the one-shot [`Replier`].
mod incoming;
/// Builder for messages handed to the agent.
mod outbound;
