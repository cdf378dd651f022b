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

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::trace;

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    terminated: bool,
}

/// FIFO between the transport delivery path and the dispatcher tasks.
///
/// The queue itself is unbounded; its depth is bounded by the inbound
/// [`FlowGate`](super::FlowGate), which pauses transport reads. Pushing
/// `None` terminates the queue: items already queued are still handed out,
/// after which every pop returns `None` immediately.
#[derive(Debug)]
pub struct IncomingMessageQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Semaphore,
}

impl<T> Default for IncomingMessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IncomingMessageQueue<T> {
    /// Creates an empty, live queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                terminated: false,
            }),
            available: Semaphore::new(0),
        }
    }

    /// Appends `item`, or terminates the queue when `item` is `None`.
    ///
    /// Never waits. Items pushed after termination are dropped, but the
    /// permit is still released so blocked poppers drain.
    pub fn push(&self, item: Option<T>) {
        {
            let mut state = self.state.lock();
            match item {
                Some(item) if !state.terminated => state.items.push_back(item),
                Some(_) => trace!("dropping item pushed after termination"),
                None => state.terminated = true,
            }
        }
        self.available.add_permits(1);
    }

    /// Waits for the next item. Returns `None` once the queue is terminated
    /// and drained.
    pub async fn pop(&self) -> Option<T> {
        {
            let state = self.state.lock();
            if state.terminated && state.items.is_empty() {
                return None;
            }
        }
        match self.available.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return None,
        }
        let mut state = self.state.lock();
        if let Some(item) = state.items.pop_front() {
            return Some(item);
        }
        if state.terminated {
            // Pass the wakeup on so every other blocked popper sees the end too.
            self.available.add_permits(1);
        }
        None
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// `true` once a sentinel has been pushed.
    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = IncomingMessageQueue::new();
        queue.push(Some(1));
        queue.push(Some(2));
        queue.push(Some(3));
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, Some(3));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(IncomingMessageQueue::new());
        let popper = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!popper.is_finished());
        queue.push(Some("hello"));
        assert_eq!(popper.await.unwrap(), Some("hello"));
    }

    #[tokio::test]
    async fn test_sentinels_release_every_popper() {
        let queue: Arc<IncomingMessageQueue<u32>> = Arc::new(IncomingMessageQueue::new());
        let poppers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.pop().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        for _ in 0..4 {
            queue.push(None);
        }
        for popper in poppers {
            let result = tokio::time::timeout(Duration::from_secs(1), popper)
                .await
                .expect("popper should be released")
                .unwrap();
            assert_eq!(result, None);
        }
    }

    #[tokio::test]
    async fn test_items_before_sentinel_are_still_delivered() {
        let queue = IncomingMessageQueue::new();
        queue.push(Some(1));
        queue.push(None);
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn test_pushes_after_termination_are_dropped() {
        let queue = IncomingMessageQueue::new();
        queue.push(None);
        queue.push(Some(9));
        assert!(queue.is_terminated());
        assert!(queue.is_empty());
        assert_eq!(queue.pop().await, None);
        assert_eq!(queue.pop().await, None);
    }
}
