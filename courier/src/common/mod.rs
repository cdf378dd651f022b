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

pub use broker_agent::{BrokerAgent, ConnectionMonitor, Idle, Started};
pub use config::BrokerConfig;
pub use flow::{FlowGate, FlowSignal, WaterFlowManager};
pub use id_generator::IdGenerator;
pub use incoming_queue::IncomingMessageQueue;
pub use name_resolver::{HandlerRef, NameResolver, WILDCARD};
pub use outgoing::{MessageCallback, MessageState, OutgoingMessageInfo, OutgoingMessageManager};
pub use outgoing_message::OutgoingMessage;
pub use retry::{RandomSource, RetryPolicy, StdRandom};

mod broker_agent;
mod config;
mod flow;
mod id_generator;
mod incoming_queue;
mod name_resolver;
mod outgoing;
mod outgoing_message;
mod retry;
