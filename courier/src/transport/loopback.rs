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

//! An in-process [`Transport`] connecting named endpoints on a shared
//! [`LoopbackNetwork`].
//!
//! Every endpoint owns its outbound channels and an inbox. Outbound messages
//! are queued per channel in priority order and moved to the destination's
//! inbox by [`Transport::do_some_work`]; inbound messages are handed to the
//! attached sink by the same call. The network can mark endpoints unreachable,
//! fail a number of opens, and hold transmission, which makes it useful for
//! exercising flow control, retries and failover.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::message::{MessageHeader, Priority, TransportError};
use crate::traits::{
    ChannelId, ChannelOverrides, ConnectionEvent, PostHint, Progress, ProgressCallback, ProgressStatus, Transport,
    TransportSink,
};

/// A hub of named loopback endpoints.
///
/// Cloning yields another handle to the same network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    endpoints: DashMap<String, Arc<LoopbackTransport>>,
    unreachable: DashMap<String, ()>,
    failing_opens: DashMap<String, u32>,
    next_channel: AtomicU64,
}

impl fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackNetwork")
            .field("endpoints", &self.inner.endpoints.len())
            .finish_non_exhaustive()
    }
}

impl LoopbackNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the endpoint called `name`, creating it on first use.
    #[must_use]
    pub fn endpoint(&self, name: &str) -> Arc<LoopbackTransport> {
        self.inner
            .endpoints
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(LoopbackTransport {
                    name: name.to_string(),
                    network: Arc::downgrade(&self.inner),
                    sink: RwLock::new(None),
                    channels: Mutex::new(Channels::default()),
                    inbox: Mutex::new(VecDeque::new()),
                    held: AtomicBool::new(false),
                    shut_down: AtomicBool::new(false),
                    open_calls: AtomicU64::new(0),
                    notify: Notify::new(),
                })
            })
            .clone()
    }

    /// Makes opens towards `name` fail (or succeed again).
    ///
    /// Already open channels are left alone; their traffic is abandoned on
    /// transmission while the endpoint is unreachable.
    pub fn set_unreachable(&self, name: &str, unreachable: bool) {
        if unreachable {
            self.inner.unreachable.insert(name.to_string(), ());
        } else {
            self.inner.unreachable.remove(name);
        }
    }

    /// Makes the next `count` opens towards `name` fail.
    pub fn fail_opens(&self, name: &str, count: u32) {
        self.inner.failing_opens.insert(name.to_string(), count);
    }
}

impl NetworkInner {
    fn reachable(&self, name: &str) -> Option<Arc<LoopbackTransport>> {
        if self.unreachable.contains_key(name) {
            return None;
        }
        let endpoint = self.endpoints.get(name)?.clone();
        (!endpoint.shut_down.load(Ordering::Acquire)).then_some(endpoint)
    }

    fn take_failure(&self, name: &str) -> bool {
        let mut remaining = match self.failing_opens.get_mut(name) {
            Some(remaining) => remaining,
            None => return false,
        };
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }
}

struct Pending {
    header: MessageHeader,
    body: Vec<u8>,
    progress: ProgressCallback,
}

struct Channel {
    target: String,
    queue: BTreeMap<Priority, VecDeque<Pending>>,
    closing: bool,
}

impl Channel {
    fn pop_highest(&mut self) -> Option<Pending> {
        let mut entry = self.queue.last_entry()?;
        let pending = entry.get_mut().pop_front();
        if entry.get().is_empty() {
            entry.remove();
        }
        pending
    }

    fn len(&self) -> usize {
        self.queue.values().map(VecDeque::len).sum()
    }
}

#[derive(Default)]
struct Channels {
    by_id: HashMap<ChannelId, Channel>,
    by_target: HashMap<String, ChannelId>,
}

impl Channels {
    fn remove(&mut self, id: ChannelId) -> Option<Channel> {
        let channel = self.by_id.remove(&id)?;
        if self.by_target.get(&channel.target) == Some(&id) {
            self.by_target.remove(&channel.target);
        }
        Some(channel)
    }
}

struct Frame {
    source: String,
    header: MessageHeader,
    body: Vec<u8>,
}

/// One endpoint of a [`LoopbackNetwork`].
pub struct LoopbackTransport {
    name: String,
    network: Weak<NetworkInner>,
    sink: RwLock<Option<Arc<dyn TransportSink>>>,
    channels: Mutex<Channels>,
    inbox: Mutex<VecDeque<Frame>>,
    held: AtomicBool,
    shut_down: AtomicBool,
    open_calls: AtomicU64,
    notify: Notify,
}

impl fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("name", &self.name)
            .field("held", &self.held.load(Ordering::Relaxed))
            .field("open_calls", &self.open_calls.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl LoopbackTransport {
    /// The endpoint name other endpoints use to reach this one.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Holds (or resumes) outbound transmission. Held messages stay queued.
    pub fn set_hold(&self, held: bool) {
        self.held.store(held, Ordering::Release);
        if !held {
            self.notify.notify_one();
        }
    }

    /// Number of [`Transport::open`] calls made so far, failed ones included.
    #[must_use]
    pub fn open_calls(&self) -> u64 {
        self.open_calls.load(Ordering::Acquire)
    }

    /// Messages queued on the channel towards `target`.
    #[must_use]
    pub fn queued(&self, target: &str) -> usize {
        let channels = self.channels.lock();
        channels
            .by_target
            .get(target)
            .and_then(|id| channels.by_id.get(id))
            .map_or(0, Channel::len)
    }

    /// Messages waiting in the inbox for the sink.
    #[must_use]
    pub fn inbox_len(&self) -> usize {
        self.inbox.lock().len()
    }

    fn emit(&self, event: ConnectionEvent) {
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.connection_event(event);
        }
    }

    fn receive(&self, frame: Frame) {
        self.inbox.lock().push_back(frame);
        self.notify.notify_one();
    }

    /// Moves everything transmittable to its destination. Returns `true` if
    /// anything was sent.
    fn transmit(&self) -> bool {
        let mut outbound = Vec::new();
        {
            let mut channels = self.channels.lock();
            let mut drained = Vec::new();
            for (id, channel) in &mut channels.by_id {
                while let Some(pending) = channel.pop_highest() {
                    outbound.push((channel.target.clone(), pending));
                }
                if channel.closing {
                    drained.push(*id);
                }
            }
            for id in drained {
                channels.remove(id);
                trace!(channel = %id, "drained closing channel");
            }
        }
        let network = self.network.upgrade();
        let sent = !outbound.is_empty();
        for (target, mut pending) in outbound {
            let header_len = serde_json::to_vec(&pending.header).map_or(0, |bytes| bytes.len()) as u64;
            let total_bytes = header_len + pending.body.len() as u64;
            let destination = network.as_ref().and_then(|n| n.reachable(&target));
            let Some(destination) = destination else {
                debug!(endpoint = %target, "destination unreachable, abandoning message");
                (pending.progress)(Progress {
                    sent_bytes: 0,
                    total_bytes,
                    status: ProgressStatus::Abandoned,
                });
                continue;
            };
            (pending.progress)(Progress {
                sent_bytes: header_len,
                total_bytes,
                status: ProgressStatus::InFlight,
            });
            destination.receive(Frame {
                source: self.name.clone(),
                header: pending.header,
                body: pending.body,
            });
            (pending.progress)(Progress {
                sent_bytes: total_bytes,
                total_bytes,
                status: ProgressStatus::Transmitted,
            });
        }
        sent
    }

    fn drain_inbox(&self) -> bool {
        let Some(sink) = self.sink.read().clone() else {
            return false;
        };
        let frames: Vec<Frame> = self.inbox.lock().drain(..).collect();
        let received = !frames.is_empty();
        for frame in frames {
            sink.deliver(&frame.source, frame.header, frame.body);
        }
        received
    }

    fn pass(&self, allow_out: bool, allow_in: bool) -> bool {
        let mut worked = false;
        if allow_out && !self.held.load(Ordering::Acquire) {
            worked |= self.transmit();
        }
        if allow_in {
            worked |= self.drain_inbox();
        }
        worked
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn attach(&self, sink: Arc<dyn TransportSink>) {
        *self.sink.write() = Some(sink);
        self.notify.notify_one();
    }

    async fn open(&self, target: &str, _overrides: &ChannelOverrides) -> Result<(ChannelId, bool), TransportError> {
        self.open_calls.fetch_add(1, Ordering::AcqRel);
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        let network = self.network.upgrade().ok_or(TransportError::Shutdown)?;
        if network.take_failure(target) {
            return Err(TransportError::Unreachable(target.to_string()));
        }
        let destination = network
            .reachable(target)
            .ok_or_else(|| TransportError::Unreachable(target.to_string()))?;

        let channel = {
            let mut channels = self.channels.lock();
            if let Some(id) = channels.by_target.get(target) {
                return Ok((*id, false));
            }
            let id = ChannelId(network.next_channel.fetch_add(1, Ordering::AcqRel) + 1);
            channels.by_id.insert(
                id,
                Channel {
                    target: target.to_string(),
                    queue: BTreeMap::new(),
                    closing: false,
                },
            );
            channels.by_target.insert(target.to_string(), id);
            id
        };
        trace!(endpoint = target, %channel, "loopback channel opened");
        self.emit(ConnectionEvent::Opened {
            target: target.to_string(),
            channel,
        });
        destination.emit(ConnectionEvent::Incoming {
            source: self.name.clone(),
        });
        Ok((channel, true))
    }

    fn is_open(&self, target: &str) -> Option<ChannelId> {
        self.channels.lock().by_target.get(target).copied()
    }

    async fn close(&self, channel: ChannelId, priority: Priority) -> Result<(), TransportError> {
        let (abandoned, target, drained) = {
            let mut channels = self.channels.lock();
            let entry = channels.by_id.get_mut(&channel).ok_or(TransportError::ChannelClosed)?;
            let kept = entry.queue.split_off(&priority);
            let abandoned = std::mem::replace(&mut entry.queue, kept);
            entry.closing = true;
            let target = entry.target.clone();
            let drained = entry.queue.is_empty();
            // A closing channel no longer serves new opens.
            channels.by_target.remove(&target);
            if drained {
                channels.by_id.remove(&channel);
            }
            (abandoned, target, drained)
        };
        debug!(endpoint = %target, %channel, %priority, "closing loopback channel");
        for mut pending in abandoned.into_values().flatten() {
            (pending.progress)(Progress {
                sent_bytes: 0,
                total_bytes: pending.body.len() as u64,
                status: ProgressStatus::Abandoned,
            });
        }
        if !drained {
            self.notify.notify_one();
        }
        self.emit(ConnectionEvent::Closed { target, channel });
        Ok(())
    }

    fn post(
        &self,
        channel: ChannelId,
        header: MessageHeader,
        body: Vec<u8>,
        priority: Priority,
        progress: ProgressCallback,
        _hint: PostHint,
    ) -> Result<(), TransportError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        {
            let mut channels = self.channels.lock();
            let entry = channels
                .by_id
                .get_mut(&channel)
                .filter(|c| !c.closing)
                .ok_or(TransportError::ChannelClosed)?;
            entry.queue.entry(priority).or_default().push_back(Pending {
                header,
                body,
                progress,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn do_some_work(&self, timeout: Duration, allow_out: bool, allow_in: bool) -> bool {
        if self.pass(allow_out, allow_in) {
            return true;
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        self.pass(allow_out, allow_in)
    }

    async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let channels = std::mem::take(&mut *self.channels.lock());
        self.inbox.lock().clear();
        for (id, channel) in channels.by_id {
            for mut pending in channel.queue.into_values().flatten() {
                (pending.progress)(Progress {
                    sent_bytes: 0,
                    total_bytes: pending.body.len() as u64,
                    status: ProgressStatus::Abandoned,
                });
            }
            self.emit(ConnectionEvent::Closed {
                target: channel.target,
                channel: id,
            });
        }
        debug!(endpoint = %self.name, "loopback endpoint shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        delivered: Mutex<Vec<(String, MessageHeader)>>,
        events: Mutex<Vec<ConnectionEvent>>,
    }

    impl TransportSink for Recorder {
        fn deliver(&self, source: &str, header: MessageHeader, _body: Vec<u8>) {
            self.delivered.lock().push((source.to_string(), header));
        }

        fn connection_event(&self, event: ConnectionEvent) {
            self.events.lock().push(event);
        }
    }

    fn recording(status: Arc<Mutex<Vec<ProgressStatus>>>) -> ProgressCallback {
        Box::new(move |p: Progress| {
            if p.status.is_final() {
                status.lock().push(p.status);
            }
        })
    }

    #[tokio::test]
    async fn test_higher_priority_transmits_first() {
        let network = LoopbackNetwork::new();
        let a = network.endpoint("a");
        let b = network.endpoint("b");
        let sink = Arc::new(Recorder::default());
        b.attach(sink.clone());

        let (channel, created) = a.open("b", &ChannelOverrides::new()).await.unwrap();
        assert!(created);
        let statuses = Arc::new(Mutex::new(Vec::new()));
        for (name, priority) in [("low", Priority::LOW), ("high", Priority::HIGH)] {
            let header = MessageHeader::message("obj", name, 0);
            a.post(channel, header, vec![1, 2, 3], priority, recording(statuses.clone()), PostHint::default())
                .unwrap();
        }
        assert!(a.do_some_work(Duration::from_millis(10), true, true).await);
        assert!(b.do_some_work(Duration::from_millis(10), true, true).await);

        let delivered = sink.delivered.lock();
        let names: Vec<_> = delivered.iter().map(|(_, h)| h.message_name.as_str()).collect();
        assert_eq!(names, ["high", "low"]);
        assert_eq!(delivered[0].0, "a");
        assert_eq!(*statuses.lock(), [ProgressStatus::Transmitted, ProgressStatus::Transmitted]);
    }

    #[tokio::test]
    async fn test_close_abandons_lower_priorities() {
        let network = LoopbackNetwork::new();
        let a = network.endpoint("a");
        let _b = network.endpoint("b");
        let (channel, _) = a.open("b", &ChannelOverrides::new()).await.unwrap();

        let statuses = Arc::new(Mutex::new(Vec::new()));
        for priority in [Priority::LOW, Priority::CRITICAL] {
            let header = MessageHeader::message("obj", "m", 0);
            a.post(channel, header, Vec::new(), priority, recording(statuses.clone()), PostHint::default())
                .unwrap();
        }
        a.close(channel, Priority::HIGH).await.unwrap();
        assert_eq!(*statuses.lock(), [ProgressStatus::Abandoned]);
        assert!(a.is_open("b").is_none());

        a.do_some_work(Duration::from_millis(10), true, false).await;
        assert_eq!(*statuses.lock(), [ProgressStatus::Abandoned, ProgressStatus::Transmitted]);
    }

    #[tokio::test]
    async fn test_open_failures_are_injectable() {
        let network = LoopbackNetwork::new();
        let a = network.endpoint("a");
        let _b = network.endpoint("b");

        assert!(matches!(
            a.open("nowhere", &ChannelOverrides::new()).await,
            Err(TransportError::Unreachable(_))
        ));
        network.fail_opens("b", 1);
        assert!(a.open("b", &ChannelOverrides::new()).await.is_err());
        assert!(a.open("b", &ChannelOverrides::new()).await.is_ok());
        network.set_unreachable("b", true);
        assert!(a.open("b", &ChannelOverrides::new()).await.is_err());
        assert_eq!(a.open_calls(), 4);
    }

    #[tokio::test]
    async fn test_hold_keeps_messages_queued() {
        let network = LoopbackNetwork::new();
        let a = network.endpoint("a");
        let _b = network.endpoint("b");
        let (channel, _) = a.open("b", &ChannelOverrides::new()).await.unwrap();
        a.set_hold(true);
        let statuses = Arc::new(Mutex::new(Vec::new()));
        a.post(
            channel,
            MessageHeader::message("obj", "m", 0),
            Vec::new(),
            Priority::NORMAL,
            recording(statuses.clone()),
            PostHint::default(),
        )
        .unwrap();
        assert!(!a.do_some_work(Duration::from_millis(5), true, true).await);
        assert_eq!(a.queued("b"), 1);

        a.shutdown().await;
        assert_eq!(*statuses.lock(), [ProgressStatus::Abandoned]);
    }
}
