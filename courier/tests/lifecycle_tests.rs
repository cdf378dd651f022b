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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier::prelude::*;
use tokio::sync::{Barrier, Semaphore};

use crate::setup::{client, echo_server, initialize_tracing, quick_config, WAIT};

mod setup;

/// An invalid configuration is refused before anything starts.
#[tokio::test]
async fn test_invalid_configuration_is_refused() {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let config = BrokerConfig {
        dispatcher_threads: 0,
        ..quick_config("broken")
    };
    let err = BrokerAgent::new(config, network.endpoint("broken")).unwrap_err();
    assert!(matches!(err, BrokerError::Configuration(_)));
}

/// Stopping abandons messages that are still waiting, and a second stop is a no-op.
#[tokio::test]
async fn test_stop_abandons_pending_messages() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let server = echo_server(&network, "server").await;
    let endpoint = network.endpoint("client");
    endpoint.set_hold(true);
    let client = BrokerAgent::new(quick_config("client"), endpoint)?.start().await;

    let queued = client.send(OutboundMessage::new("server", "echo", "ping")).await?;
    assert_eq!(queued.state(), MessageState::Posted);

    client.stop().await;
    assert_eq!(queued.wait_for_completion_timeout(WAIT).await?, MessageState::Abandoned);
    assert!(matches!(queued.response().await, Err(BrokerError::Abandoned(_))));
    assert_eq!(client.pending_replies(), 0);
    assert_eq!(client.outgoing_level(), 0);
    client.stop().await;

    assert!(client.send(OutboundMessage::new("server", "echo", "again")).await.is_err());
    server.stop().await;
    Ok(())
}

/// Several dispatchers run handlers side by side.
#[tokio::test]
async fn test_dispatchers_run_concurrently() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let config = BrokerConfig {
        dispatcher_threads: 3,
        ..quick_config("server")
    };
    let server = BrokerAgent::new(config, network.endpoint("server"))?;
    // Every handler waits for the other two; a single dispatcher would deadlock.
    let barrier = Arc::new(Barrier::new(3));
    let done = Arc::new(AtomicUsize::new(0));
    {
        let barrier = barrier.clone();
        let done = done.clone();
        server.register_object("meet", move |_msg: IncomingMessage| {
            let barrier = barrier.clone();
            let done = done.clone();
            async move {
                barrier.wait().await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(Some(Body::default()))
            }
        });
    }
    let server = server.start().await;
    let client = client(&network, "client").await;

    let mut handles = Vec::new();
    for i in 0..3 {
        handles.push(client.send(OutboundMessage::new("server", "meet", format!("m{i}"))).await?);
    }
    for handle in handles {
        assert_eq!(handle.wait_for_completion_timeout(WAIT).await?, MessageState::Replied);
    }
    assert_eq!(done.load(Ordering::SeqCst), 3);

    client.stop().await;
    server.stop().await;
    Ok(())
}

/// Messages queued before stop are still handled before the dispatchers exit.
#[tokio::test]
async fn test_stop_drains_queued_messages() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let server = BrokerAgent::new(quick_config("server"), network.endpoint("server"))?;
    let gate = Arc::new(Semaphore::new(0));
    let handled = Arc::new(AtomicUsize::new(0));
    {
        let gate = gate.clone();
        let handled = handled.clone();
        server.register_object("count", move |_msg: IncomingMessage| {
            let gate = gate.clone();
            let handled = handled.clone();
            async move {
                gate.acquire().await?.forget();
                handled.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(None)
            }
        });
    }
    let server = server.start().await;
    let client = client(&network, "client").await;

    for i in 0..5 {
        client.send_one_way(OutboundMessage::new("server", "count", format!("m{i}"))).await?;
    }
    // One message is held by the dispatcher, four wait in the queue.
    let deadline = tokio::time::Instant::now() + WAIT;
    while server.incoming_level() < 5 {
        assert!(tokio::time::Instant::now() < deadline, "messages never arrived");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let stopping = server.clone();
    let stop = tokio::spawn(async move { stopping.stop().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!stop.is_finished(), "stop waits for the dispatcher");
    gate.add_permits(5);
    tokio::time::timeout(WAIT, stop).await??;

    assert_eq!(handled.load(Ordering::SeqCst), 5);
    assert_eq!(server.incoming_level(), 0);

    client.stop().await;
    Ok(())
}
