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

#![forbid(unsafe_code)]
//! Courier
//!
//! A process-local message broker agent. Courier sends request/reply and
//! one-way messages to named objects on remote endpoints over a pluggable
//! [`Transport`](prelude::Transport), dispatches inbound requests to locally
//! registered handlers on a pool of dispatcher tasks, and applies water-mark
//! flow control in both directions. Connections are opened on demand with
//! randomized retry, and a target may name a failover group (`"a|b|c"`).

/// Agent, flow control, correlation and configuration.
pub(crate) mod common;
/// Message headers, bodies, errors and the outbound builder.
pub(crate) mod message;
/// Contracts for object handlers and transports.
pub(crate) mod traits;
/// Bundled transports.
pub(crate) mod transport;

/// Prelude module for convenient imports.
///
/// Re-exports everything needed to configure an agent, register handlers,
/// send messages and implement a transport, along with the `async_trait` crate.
pub mod prelude {
    pub use async_trait;

    pub use crate::common::{
        BrokerAgent, BrokerConfig, ConnectionMonitor, FlowGate, FlowSignal, HandlerRef, Idle, IdGenerator,
        IncomingMessageQueue, MessageCallback, MessageState, NameResolver, OutgoingMessage, OutgoingMessageManager,
        RandomSource, RetryPolicy, Started, StdRandom, WaterFlowManager, WILDCARD,
    };
    pub use crate::message::{
        Body, BrokerError, IncomingMessage, MessageHeader, MessageKind, OutboundMessage, Priority, Replier,
        TransportError,
    };
    pub use crate::traits::{
        ChannelId, ChannelOverrides, ConnectionEvent, ObjectHandler, PostHint, Progress, ProgressCallback,
        ProgressStatus, Transport, TransportSink,
    };
    pub use crate::transport::{LoopbackNetwork, LoopbackTransport};
}
