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

//! The broker agent: owns the I/O worker, the dispatcher pool, both flow
//! gates, the correlation table, the incoming queue and the name resolver.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, instrument, trace, warn};

use crate::common::outgoing::{MessageCallback, MessageState, OutgoingMessageInfo};
use crate::common::retry::{ensure_channel, failover_order};
use crate::common::{
    BrokerConfig, FlowGate, HandlerRef, IdGenerator, IncomingMessageQueue, NameResolver, OutgoingMessage,
    OutgoingMessageManager, RandomSource, RetryPolicy, StdRandom,
};
use crate::message::{
    AnswerSink, Body, BrokerError, IncomingMessage, MessageHeader, MessageKind, OutboundMessage, Priority,
};
use crate::traits::{
    ChannelId, ChannelOverrides, ConnectionEvent, ObjectHandler, PostHint, Progress, ProgressCallback,
    ProgressStatus, Transport, TransportSink,
};

/// Type-state marker for an agent that has been configured but not started.
///
/// Objects can be registered; nothing runs and nothing is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Idle;

/// Type-state marker for a running agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Started;

/// Observer of connection events. Panics are caught and discarded.
pub type ConnectionMonitor = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// A message broker agent.
///
/// Created idle with [`BrokerAgent::new`], which has no side effects. Calling
/// [`start`](BrokerAgent::start) attaches to the transport and spawns the I/O
/// worker and dispatcher tasks; [`stop`](BrokerAgent::stop) tears them down.
/// A started agent is cheap to clone and safe to share between tasks.
///
/// ```rust,ignore
/// let network = LoopbackNetwork::new();
/// let agent = BrokerAgent::new(BrokerConfig::default(), network.endpoint("server"))?;
/// agent.register_object("echo", |msg: IncomingMessage| async move { Ok(Some(msg.body)) });
/// let agent = agent.start().await;
/// ```
pub struct BrokerAgent<State> {
    core: Arc<AgentCore>,
    _state: PhantomData<State>,
}

impl Clone for BrokerAgent<Started> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _state: PhantomData,
        }
    }
}

impl<State> fmt::Debug for BrokerAgent<State> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerAgent")
            .field("name", &self.core.config.name)
            .field("state", &std::any::type_name::<State>())
            .field("outgoing_level", &self.core.outbound_gate.level())
            .field("incoming_level", &self.core.inbound_gate.level())
            .field("pending_replies", &self.core.outgoing.len())
            .finish()
    }
}

pub(crate) struct AgentCore {
    config: BrokerConfig,
    transport: Arc<dyn Transport>,
    ids: IdGenerator,
    outgoing: Arc<OutgoingMessageManager>,
    outbound_gate: Arc<FlowGate>,
    inbound_gate: Arc<FlowGate>,
    incoming: IncomingMessageQueue<IncomingMessage>,
    resolver: NameResolver,
    retry: RetryPolicy,
    rng: Arc<dyn RandomSource>,
    monitor: RwLock<Option<ConnectionMonitor>>,
    runtime: OnceLock<Handle>,
    cancellation_token: CancellationToken,
    worker: TaskTracker,
    dispatchers: TaskTracker,
}

impl<State> BrokerAgent<State> {
    /// Binds `handler` to `name`, replacing any previous binding.
    ///
    /// `"*"` registers the fallback for names with no exact binding.
    pub fn register_object<H: ObjectHandler>(&self, name: &str, handler: H) {
        self.register_object_ref(name, Arc::new(handler));
    }

    /// Same as [`register_object`](Self::register_object) for an already shared handler.
    pub fn register_object_ref(&self, name: &str, handler: HandlerRef) {
        debug!(agent = %self.core.config.name, object = name, "registering object");
        self.core.resolver.register(name, handler);
    }

    /// Removes the binding for `name`, if any.
    ///
    /// Messages already dequeued may still reach the removed handler.
    pub fn unregister_object(&self, name: &str) {
        debug!(agent = %self.core.config.name, object = name, "unregistering object");
        self.core.resolver.unregister(name);
    }

    /// Installs an observer for connection events, replacing any previous one.
    pub fn set_connection_monitor<F>(&self, monitor: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        *self.core.monitor.write() = Some(Arc::new(monitor));
    }

    /// The validated configuration in effect.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.core.config
    }

    /// Outbound messages currently counted against the outgoing water marks.
    #[must_use]
    pub fn outgoing_level(&self) -> u64 {
        self.core.outbound_gate.level()
    }

    /// Inbound messages queued or being dispatched.
    #[must_use]
    pub fn incoming_level(&self) -> u64 {
        self.core.inbound_gate.level()
    }

    /// Two-way messages still waiting for an answer.
    #[must_use]
    pub fn pending_replies(&self) -> usize {
        self.core.outgoing.len()
    }

    /// `true` while senders are being held back.
    #[must_use]
    pub fn is_outgoing_suppressed(&self) -> bool {
        self.core.outbound_gate.is_suppressed()
    }

    /// `true` while the transport is told to stop reading.
    #[must_use]
    pub fn is_incoming_suppressed(&self) -> bool {
        self.core.inbound_gate.is_suppressed()
    }
}

impl BrokerAgent<Idle> {
    /// Creates an idle agent on top of `transport`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Configuration`] if the configuration is invalid.
    pub fn new<T: Transport>(config: BrokerConfig, transport: Arc<T>) -> Result<Self, BrokerError> {
        Self::with_random_source(config, transport, Arc::new(StdRandom::new()))
    }

    /// Like [`new`](Self::new), drawing backoff delays and failover order
    /// from `rng`.
    ///
    /// # Errors
    ///
    /// [`BrokerError::Configuration`] if the configuration is invalid.
    pub fn with_random_source<T: Transport>(
        config: BrokerConfig,
        transport: Arc<T>,
        rng: Arc<dyn RandomSource>,
    ) -> Result<Self, BrokerError> {
        let config = config.validated()?;
        let core = AgentCore {
            outbound_gate: Arc::new(FlowGate::new(
                "outgoing",
                config.outgoing_high_water_mark,
                config.outgoing_low_water_mark,
            )?),
            inbound_gate: Arc::new(FlowGate::new(
                "incoming",
                config.incoming_high_water_mark,
                config.incoming_low_water_mark,
            )?),
            retry: RetryPolicy::from_config(&config),
            transport,
            ids: IdGenerator::new(),
            outgoing: Arc::new(OutgoingMessageManager::new()),
            incoming: IncomingMessageQueue::new(),
            resolver: NameResolver::new(),
            rng,
            monitor: RwLock::new(None),
            runtime: OnceLock::new(),
            cancellation_token: CancellationToken::new(),
            worker: TaskTracker::new(),
            dispatchers: TaskTracker::new(),
            config,
        };
        Ok(Self {
            core: Arc::new(core),
            _state: PhantomData,
        })
    }

    /// Attaches to the transport and starts the worker and dispatcher tasks.
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip(self), fields(agent = %self.core.config.name))]
    pub async fn start(self) -> BrokerAgent<Started> {
        let core = self.core;
        let _ = core.runtime.set(Handle::current());
        core.transport.attach(Arc::new(InboundSink {
            core: Arc::downgrade(&core),
        }));

        core.worker.spawn(io_worker(core.clone()));
        for index in 0..core.config.dispatcher_threads {
            core.dispatchers.spawn(dispatch_loop(core.clone(), index));
        }
        trace!(dispatchers = core.config.dispatcher_threads, "broker agent started");

        BrokerAgent {
            core,
            _state: PhantomData,
        }
    }
}

impl BrokerAgent<Started> {
    /// Sends a two-way message and returns a handle to track it.
    ///
    /// Waits while the outgoing gate is suppressed. For a failover group the
    /// call also waits for the winning member to complete (see
    /// [`OutboundMessage::targets`]).
    ///
    /// # Errors
    ///
    /// A communication error if no channel could be acquired or the transport
    /// refused the post; [`BrokerError::FailoverExhausted`] when every member
    /// of a group failed; [`BrokerError::Configuration`] when the target
    /// names no endpoint at all.
    ///
    /// Dropping every clone of the returned handle before an answer arrives
    /// stops tracking the message.
    #[instrument(skip(self, message), fields(endpoint = %message.target, object = %message.object_name))]
    pub async fn send(&self, message: OutboundMessage) -> Result<OutgoingMessage, BrokerError> {
        if message.is_failover_group() {
            return self.core.failover_send(&message).await;
        }
        self.core.send_single(&single_target(&message)?, None).await
    }

    /// Like [`send`](Self::send), invoking `callback` once the message
    /// reaches a terminal state.
    ///
    /// The callback runs on whichever task completes the message, with no
    /// broker lock held. It is not called if this method returns an error.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    #[instrument(skip(self, message, callback), fields(endpoint = %message.target, object = %message.object_name))]
    pub async fn send_with_callback<F>(&self, message: OutboundMessage, callback: F) -> Result<OutgoingMessage, BrokerError>
    where
        F: FnOnce(OutgoingMessage) + Send + 'static,
    {
        if message.is_failover_group() {
            let handle = self.core.failover_send(&message).await?;
            // The winner already completed; deliver the notification now.
            let notified = handle.clone();
            if catch_unwind(AssertUnwindSafe(|| callback(notified))).is_err() {
                warn!(message_id = handle.message_id(), "completion callback panicked");
            }
            return Ok(handle);
        }
        self.core
            .send_single(&single_target(&message)?, Some(Box::new(callback)))
            .await
    }

    /// Sends a message that expects no reply.
    ///
    /// Returns once the message is queued with the transport. For a failover
    /// group it returns once a member has fully transmitted it.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    #[instrument(skip(self, message), fields(endpoint = %message.target, object = %message.object_name))]
    pub async fn send_one_way(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        if message.is_failover_group() {
            return self.core.failover_send_one_way(&message).await;
        }
        self.core.post_one_way(&single_target(&message)?, None).await
    }

    /// Opens (or reuses) the channel to `target`, retrying per configuration.
    ///
    /// # Errors
    ///
    /// [`BrokerError::ChannelUnavailable`] when retries are exhausted.
    #[instrument(skip(self, overrides))]
    pub async fn open_connection(&self, target: &str, overrides: &ChannelOverrides) -> Result<ChannelId, BrokerError> {
        self.core.channel_for(target, true, overrides).await
    }

    /// Closes the channel to `target`, if one is open.
    ///
    /// Queued messages with priority `>= priority` are still transmitted;
    /// the others are abandoned at once.
    ///
    /// # Errors
    ///
    /// A communication error reported by the transport.
    #[instrument(skip(self))]
    pub async fn close_connection(&self, target: &str, priority: Priority) -> Result<(), BrokerError> {
        let Some(channel) = self.core.transport.is_open(target) else {
            trace!(endpoint = target, "no channel to close");
            return Ok(());
        };
        self.core.transport.close(channel, priority).await?;
        Ok(())
    }

    /// Stops the agent.
    ///
    /// The worker is stopped first, then every dispatcher is released and
    /// joined, then the transport is shut down. Messages still pending end up
    /// `Abandoned`. Calling `stop` again is a no-op.
    #[instrument(skip(self), fields(agent = %self.core.config.name))]
    pub async fn stop(&self) {
        let core = &self.core;
        if core.cancellation_token.is_cancelled() {
            return;
        }
        core.cancellation_token.cancel();
        core.worker.close();
        core.worker.wait().await;
        trace!("I/O worker joined");

        for _ in 0..core.config.dispatcher_threads {
            core.incoming.push(None);
        }
        core.dispatchers.close();
        core.dispatchers.wait().await;
        trace!("dispatchers joined");

        core.transport.shutdown().await;
        let abandoned = core.outgoing.abandon_all();
        debug!(abandoned, "broker agent stopped");
    }
}

impl AgentCore {
    async fn channel_for(
        &self,
        target: &str,
        auto_connect: bool,
        overrides: &ChannelOverrides,
    ) -> Result<ChannelId, BrokerError> {
        let (channel, created) = ensure_channel(
            self.transport.as_ref(),
            target,
            auto_connect,
            overrides,
            self.retry,
            self.rng.as_ref(),
        )
        .await?;
        if created {
            debug!(endpoint = target, %channel, "opened channel");
        }
        Ok(channel)
    }

    async fn send_single(
        &self,
        message: &OutboundMessage,
        callback: Option<MessageCallback>,
    ) -> Result<OutgoingMessage, BrokerError> {
        let body = message.body.encode()?;
        self.outbound_gate.acquire().await;
        let channel = match self.channel_for(&message.target, message.auto_connect, &message.overrides).await {
            Ok(channel) => channel,
            Err(e) => {
                self.outbound_gate.release();
                return Err(e);
            }
        };

        let id = self.ids.next_id();
        let info = OutgoingMessageInfo::new(id, &message.target, &message.object_name, &message.message_name);
        if let Some(callback) = callback {
            info.set_callback(callback);
        }
        self.outgoing.put(id, info.clone());

        let header = MessageHeader::message(&message.object_name, &message.message_name, id);
        let progress = tracked_progress(info.clone(), self.outgoing.clone(), self.outbound_gate.clone());
        let hint = PostHint { expects_reply: true };
        if let Err(e) = self.transport.post(channel, header, body, message.priority, progress, hint) {
            self.outgoing.remove(id);
            self.outbound_gate.release();
            return Err(e.into());
        }
        trace!(message_id = id, %channel, "posted two-way message");
        Ok(OutgoingMessage::tracked(info, &self.outgoing))
    }

    async fn post_one_way(
        &self,
        message: &OutboundMessage,
        done: Option<oneshot::Sender<ProgressStatus>>,
    ) -> Result<(), BrokerError> {
        let body = message.body.encode()?;
        self.outbound_gate.acquire().await;
        let channel = match self.channel_for(&message.target, message.auto_connect, &message.overrides).await {
            Ok(channel) => channel,
            Err(e) => {
                self.outbound_gate.release();
                return Err(e);
            }
        };

        let header = MessageHeader::message(&message.object_name, &message.message_name, 0);
        let progress = untracked_progress(self.outbound_gate.clone(), done);
        if let Err(e) = self.transport.post(channel, header, body, message.priority, progress, PostHint::default()) {
            self.outbound_gate.release();
            return Err(e.into());
        }
        trace!(%channel, "posted one-way message");
        Ok(())
    }

    async fn failover_send(&self, message: &OutboundMessage) -> Result<OutgoingMessage, BrokerError> {
        let mut last = None;
        for target in failover_order(message.targets(), self.rng.as_ref()) {
            let attempt = message.retarget(&target);
            let handle = match self.send_single(&attempt, None).await {
                Ok(handle) => handle,
                Err(e) => {
                    debug!(endpoint = %target, error = %e, "failover member unavailable");
                    last = Some(e);
                    continue;
                }
            };
            let outcome = match attempt.timeout {
                Some(timeout) => handle.wait_for_completion_timeout(timeout).await,
                None => Ok(handle.wait_for_completion().await),
            };
            match outcome {
                Ok(MessageState::Abandoned) => last = Some(BrokerError::Abandoned(handle.message_id())),
                Ok(_) => return Ok(handle),
                Err(e) => last = Some(e),
            }
            // A late answer from this member is of no use any more.
            self.outgoing.remove(handle.message_id());
            debug!(endpoint = %target, "failover member did not complete, trying next");
        }
        Err(exhausted(message, last))
    }

    async fn failover_send_one_way(&self, message: &OutboundMessage) -> Result<(), BrokerError> {
        let mut last = None;
        for target in failover_order(message.targets(), self.rng.as_ref()) {
            let attempt = message.retarget(&target);
            let (done_tx, done_rx) = oneshot::channel();
            if let Err(e) = self.post_one_way(&attempt, Some(done_tx)).await {
                debug!(endpoint = %target, error = %e, "failover member unavailable");
                last = Some(e);
                continue;
            }
            let outcome = match attempt.timeout {
                Some(timeout) => tokio::time::timeout(timeout, done_rx)
                    .await
                    .map_err(|_| BrokerError::Timeout),
                None => Ok(done_rx.await),
            };
            match outcome {
                Ok(Ok(ProgressStatus::Transmitted)) => return Ok(()),
                Ok(_) => last = Some(BrokerError::Abandoned(0)),
                Err(e) => last = Some(e),
            }
            debug!(endpoint = %target, "failover member did not transmit, trying next");
        }
        Err(exhausted(message, last))
    }

    fn notify_monitor(&self, event: &ConnectionEvent) {
        let monitor = self.monitor.read().clone();
        if let Some(monitor) = monitor {
            if catch_unwind(AssertUnwindSafe(|| monitor(event))).is_err() {
                warn!(?event, "connection monitor panicked");
            }
        }
    }

    fn spawn_answer(self: &Arc<Self>, source: String, header: MessageHeader, body: Body) {
        let Some(runtime) = self.runtime.get() else {
            warn!("cannot answer before the agent is started");
            return;
        };
        let core = self.clone();
        runtime.spawn(async move {
            if let Err(e) = core.answer(&source, header, body).await {
                debug!(endpoint = %source, error = %e, "failed to send answer");
            }
        });
    }

    async fn dispatch(self: &Arc<Self>, message: IncomingMessage) {
        let replier = message.replier();
        let Some(handler) = self.resolver.resolve(&message.object_name) else {
            warn!(object = %message.object_name, source = %message.source, "no handler for object");
            if let Some(replier) = replier {
                let reason = format!("no object named '{}'", message.object_name);
                if let Err(e) = replier.reject(reason).await {
                    debug!(error = %e, "failed to send rejection");
                }
            }
            return;
        };

        let object = message.object_name.clone();
        let outcome = AssertUnwindSafe(handler.handle(message)).catch_unwind().await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!("handler panicked: {}", panic_message(panic.as_ref()))),
        };

        let Some(replier) = replier else {
            if let Err(e) = result {
                warn!(%object, error = %e, "one-way handler failed");
            }
            return;
        };
        let sent = match result {
            Ok(Some(body)) => replier.reply(body).await,
            Ok(None) => Ok(()),
            Err(e) => {
                debug!(%object, error = %e, "handler failed, rejecting");
                replier.reject(e.to_string()).await
            }
        };
        if let Err(e) = sent {
            debug!(%object, error = %e, "failed to send answer");
        }
    }
}

#[async_trait]
impl AnswerSink for AgentCore {
    async fn answer(&self, source: &str, header: MessageHeader, body: Body) -> Result<(), BrokerError> {
        let bytes = body.encode()?;
        let channel = self.channel_for(source, true, &ChannelOverrides::default()).await?;
        // Counted against the level, but never waits for the gate.
        self.outbound_gate.enter();
        let progress = untracked_progress(self.outbound_gate.clone(), None);
        if let Err(e) = self
            .transport
            .post(channel, header, bytes, Priority::NORMAL, progress, PostHint::default())
        {
            self.outbound_gate.release();
            return Err(e.into());
        }
        Ok(())
    }
}

/// The agent side of [`Transport::attach`].
struct InboundSink {
    core: Weak<AgentCore>,
}

impl TransportSink for InboundSink {
    fn deliver(&self, source: &str, header: MessageHeader, body: Vec<u8>) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let raw = core.config.deliver_as_raw_binary;
        match header.kind {
            MessageKind::Message => {
                if core.incoming.is_terminated() {
                    trace!(endpoint = source, "agent stopping, dropping inbound message");
                    return;
                }
                let body = match Body::decode(body, raw) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(endpoint = source, object = %header.object_name, error = %e, "undecodable message body");
                        if !header.is_one_way() {
                            let answer = MessageHeader::answer(&header, MessageKind::Exception);
                            core.spawn_answer(source.to_string(), answer, Body::reason(e.to_string()));
                        }
                        return;
                    }
                };
                trace!(endpoint = source, object = %header.object_name, message_id = header.message_id, "queueing inbound message");
                let sink: Arc<dyn AnswerSink> = core.clone();
                let message = IncomingMessage::new(source.to_string(), &header, body, sink);
                core.inbound_gate.enter();
                core.incoming.push(Some(message));
            }
            MessageKind::Reply => match Body::decode(body, raw) {
                Ok(body) => {
                    core.outgoing.report_replied(header.message_id, body);
                }
                Err(e) => {
                    core.outgoing
                        .report_rejected(header.message_id, format!("undecodable reply: {e}"));
                }
            },
            MessageKind::Exception => {
                let reason = Body::decode(body.clone(), false)
                    .map_or_else(|_| String::from_utf8_lossy(&body).into_owned(), |b| b.to_text());
                core.outgoing.report_rejected(header.message_id, reason);
            }
        }
    }

    fn connection_event(&self, event: ConnectionEvent) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        debug!(?event, "connection event");
        core.notify_monitor(&event);
    }
}

async fn io_worker(core: Arc<AgentCore>) {
    let interval = core.config.poll_interval();
    while !core.cancellation_token.is_cancelled() {
        let allow_in = !core.inbound_gate.is_suppressed();
        core.transport.do_some_work(interval, true, allow_in).await;
    }
    trace!("I/O worker exiting");
}

async fn dispatch_loop(core: Arc<AgentCore>, index: usize) {
    trace!(index, "dispatcher running");
    while let Some(message) = core.incoming.pop().await {
        core.dispatch(message).await;
        core.inbound_gate.release();
    }
    trace!(index, "dispatcher exiting");
}

/// Progress callback for two-way messages: drives the record and releases
/// the outgoing permit once transmission ends.
fn tracked_progress(
    info: Arc<OutgoingMessageInfo>,
    outgoing: Arc<OutgoingMessageManager>,
    gate: Arc<FlowGate>,
) -> ProgressCallback {
    let mut released = false;
    Box::new(move |progress: Progress| {
        if info.on_progress(progress) {
            outgoing.remove(info.message_id());
        }
        if progress.status.is_final() && !released {
            released = true;
            gate.release();
        }
    })
}

/// Progress callback for one-way messages and answers.
fn untracked_progress(gate: Arc<FlowGate>, mut done: Option<oneshot::Sender<ProgressStatus>>) -> ProgressCallback {
    let mut released = false;
    Box::new(move |progress: Progress| {
        if progress.status.is_final() && !released {
            released = true;
            gate.release();
            if let Some(done) = done.take() {
                let _ = done.send(progress.status);
            }
        }
    })
}

/// Addresses `message` to its only member, trimmed like group members are.
fn single_target(message: &OutboundMessage) -> Result<OutboundMessage, BrokerError> {
    match message.targets().first() {
        Some(target) => Ok(message.retarget(target)),
        None => Err(BrokerError::Configuration(format!(
            "message to '{}' names no target",
            message.target
        ))),
    }
}

fn exhausted(message: &OutboundMessage, last: Option<BrokerError>) -> BrokerError {
    let last = last.unwrap_or_else(|| BrokerError::ChannelUnavailable {
        target: message.target.clone(),
        attempts: 0,
    });
    error!(group = %message.target, error = %last, "failover group exhausted");
    BrokerError::FailoverExhausted {
        group: message.target.clone(),
        last: Box::new(last),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
