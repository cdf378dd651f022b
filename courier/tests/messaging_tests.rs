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
use serde_json::json;
use tokio::sync::mpsc;

use crate::setup::{client, echo_server, initialize_tracing, quick_config, WAIT};

mod setup;

/// A two-way request to a registered object comes back with the handler's reply.
#[tokio::test]
async fn test_request_reply_round_trip() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let server = echo_server(&network, "server").await;
    let client = client(&network, "client").await;

    let message = OutboundMessage::new("server", "echo", "ping").with_body(json!({"n": 7}));
    let handle = client.send(message).await?;
    assert_eq!(handle.target(), "server");
    assert_eq!(handle.object_name(), "echo");

    let reply = tokio::time::timeout(WAIT, handle.response()).await??;
    assert_eq!(reply.as_params(), Some(&json!({"n": 7})));
    assert_eq!(handle.state(), MessageState::Replied);
    assert!(handle.is_transmitted());
    assert_eq!(client.pending_replies(), 0);

    client.stop().await;
    server.stop().await;
    Ok(())
}

/// Requests to an unknown object are rejected with a reason naming it.
#[tokio::test]
async fn test_unknown_object_is_rejected() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let server = echo_server(&network, "server").await;
    let client = client(&network, "client").await;

    let handle = client.send(OutboundMessage::new("server", "missing", "ping")).await?;
    let state = handle.wait_for_completion_timeout(WAIT).await?;
    assert_eq!(state, MessageState::Rejected);
    let reason = handle.exception().unwrap_or_default();
    assert!(reason.contains("missing"), "unexpected reason: {reason}");
    assert!(matches!(handle.response().await, Err(BrokerError::Rejected { .. })));

    client.stop().await;
    server.stop().await;
    Ok(())
}

/// A handler error becomes a rejection carrying the error text.
#[tokio::test]
async fn test_handler_error_rejects() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let server = BrokerAgent::new(quick_config("server"), network.endpoint("server"))?;
    server.register_object("fail", |_msg: IncomingMessage| async move {
        Err::<Option<Body>, _>(anyhow::anyhow!("disk on fire"))
    });
    let server = server.start().await;
    let client = client(&network, "client").await;

    let handle = client.send(OutboundMessage::new("server", "fail", "go")).await?;
    handle.wait_for_completion_timeout(WAIT).await?;
    assert_eq!(handle.exception().as_deref(), Some("disk on fire"));

    client.stop().await;
    server.stop().await;
    Ok(())
}

/// A panicking handler is contained: the request is rejected and the
/// dispatcher keeps serving.
#[tokio::test]
async fn test_handler_panic_is_contained() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let server = BrokerAgent::new(quick_config("server"), network.endpoint("server"))?;
    server.register_object("explode", |msg: IncomingMessage| async move {
        if msg.message_name == "go" {
            panic!("kaboom");
        }
        Ok::<_, anyhow::Error>(None::<Body>)
    });
    server.register_object("echo", crate::setup::echo);
    let server = server.start().await;
    let client = client(&network, "client").await;

    let handle = client.send(OutboundMessage::new("server", "explode", "go")).await?;
    assert_eq!(handle.wait_for_completion_timeout(WAIT).await?, MessageState::Rejected);
    assert!(handle.exception().unwrap_or_default().contains("kaboom"));

    let handle = client
        .send(OutboundMessage::new("server", "echo", "ping").with_body(json!("still here")))
        .await?;
    let reply = tokio::time::timeout(WAIT, handle.response()).await??;
    assert_eq!(reply.as_params(), Some(&json!("still here")));

    client.stop().await;
    server.stop().await;
    Ok(())
}

/// Only the first answer to a request reaches the sender.
#[tokio::test]
async fn test_only_first_answer_is_sent() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let server = BrokerAgent::new(quick_config("server"), network.endpoint("server"))?;
    server.register_object("twice", |msg: IncomingMessage| async move {
        let replier = msg.replier().expect("two-way request");
        replier.reply(json!("first")).await?;
        assert!(replier.is_answered());
        replier.reject("second").await?;
        // The dispatcher's own answer is dropped as well.
        Ok::<_, anyhow::Error>(Some(Body::from(json!("third"))))
    });
    let server = server.start().await;
    let client = client(&network, "client").await;

    let handle = client.send(OutboundMessage::new("server", "twice", "go")).await?;
    let reply = tokio::time::timeout(WAIT, handle.response()).await??;
    assert_eq!(reply.as_params(), Some(&json!("first")));

    client.stop().await;
    server.stop().await;
    Ok(())
}

/// A handler may return `None` and answer later from another task.
#[tokio::test]
async fn test_deferred_reply() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Replier>();
    let server = BrokerAgent::new(quick_config("server"), network.endpoint("server"))?;
    server.register_object("later", move |msg: IncomingMessage| {
        let tx = tx.clone();
        async move {
            if let Some(replier) = msg.replier() {
                tx.send(replier)?;
            }
            Ok::<_, anyhow::Error>(None)
        }
    });
    let server = server.start().await;
    let client = client(&network, "client").await;

    let handle = client.send(OutboundMessage::new("server", "later", "go")).await?;
    let replier = tokio::time::timeout(WAIT, rx.recv()).await?.expect("replier handed over");
    assert_eq!(handle.wait_for_transmission_timeout(WAIT).await?, MessageState::Transmitted);
    assert!(!handle.is_complete());

    replier.reply(json!({"done": true})).await?;
    let reply = tokio::time::timeout(WAIT, handle.response()).await??;
    assert_eq!(reply.as_params(), Some(&json!({"done": true})));

    client.stop().await;
    server.stop().await;
    Ok(())
}

/// The wildcard handler receives names with no exact binding.
#[tokio::test]
async fn test_wildcard_fallback() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let server = BrokerAgent::new(quick_config("server"), network.endpoint("server"))?;
    server.register_object(WILDCARD, |msg: IncomingMessage| async move {
        Ok::<_, anyhow::Error>(Some(Body::from(json!(format!("wildcard:{}", msg.object_name)))))
    });
    server.register_object("exact", |_msg: IncomingMessage| async move {
        Ok::<_, anyhow::Error>(Some(Body::from(json!("exact"))))
    });
    let server = server.start().await;
    let client = client(&network, "client").await;

    let exact = client.send(OutboundMessage::new("server", "exact", "m")).await?;
    let other = client.send(OutboundMessage::new("server", "anything", "m")).await?;
    assert_eq!(tokio::time::timeout(WAIT, exact.response()).await??.as_params(), Some(&json!("exact")));
    assert_eq!(
        tokio::time::timeout(WAIT, other.response()).await??.as_params(),
        Some(&json!("wildcard:anything"))
    );

    server.unregister_object("exact");
    let exact = client.send(OutboundMessage::new("server", "exact", "m")).await?;
    assert_eq!(
        tokio::time::timeout(WAIT, exact.response()).await??.as_params(),
        Some(&json!("wildcard:exact"))
    );

    client.stop().await;
    server.stop().await;
    Ok(())
}

/// One-way messages reach the handler and never produce an answer.
#[tokio::test]
async fn test_one_way_delivery() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, bool)>();
    let server = BrokerAgent::new(quick_config("server"), network.endpoint("server"))?;
    server.register_object("sink", move |msg: IncomingMessage| {
        let tx = tx.clone();
        async move {
            tx.send((msg.message_name.clone(), msg.is_one_way()))?;
            // Ignored for one-way messages.
            Ok::<_, anyhow::Error>(Some(Body::from(json!("unused"))))
        }
    });
    let server = server.start().await;
    let client = client(&network, "client").await;

    client.send_one_way(OutboundMessage::new("server", "sink", "notify")).await?;
    let (name, one_way) = tokio::time::timeout(WAIT, rx.recv()).await?.expect("delivered");
    assert_eq!(name, "notify");
    assert!(one_way);
    assert_eq!(client.pending_replies(), 0);

    client.stop().await;
    server.stop().await;
    Ok(())
}

/// The completion callback runs exactly once with the final state.
#[tokio::test]
async fn test_completion_callback() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let server = echo_server(&network, "server").await;
    let client = client(&network, "client").await;

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel::<MessageState>();
    let counted = calls.clone();
    let handle = client
        .send_with_callback(OutboundMessage::new("server", "echo", "ping"), move |done| {
            counted.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(done.state());
        })
        .await?;

    let state = tokio::time::timeout(WAIT, rx.recv()).await?.expect("callback fired");
    assert_eq!(state, MessageState::Replied);
    assert_eq!(handle.state(), MessageState::Replied);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    client.stop().await;
    server.stop().await;
    Ok(())
}

/// Raw mode hands the handler the undecoded bytes.
#[tokio::test]
async fn test_raw_binary_delivery() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let config = BrokerConfig {
        deliver_as_raw_binary: true,
        ..quick_config("server")
    };
    let server = BrokerAgent::new(config, network.endpoint("server"))?;
    server.register_object("bytes", |msg: IncomingMessage| async move {
        let len = msg.body.as_raw().map_or(0, <[u8]>::len);
        Ok::<_, anyhow::Error>(Some(Body::from(json!(len))))
    });
    let server = server.start().await;
    let client = client(&network, "client").await;

    let handle = client
        .send(OutboundMessage::new("server", "bytes", "count").with_body(vec![0_u8, 1, 2, 3, 4]))
        .await?;
    let reply = tokio::time::timeout(WAIT, handle.response()).await??;
    assert_eq!(reply.as_params(), Some(&json!(5)));

    client.stop().await;
    server.stop().await;
    Ok(())
}

/// A callback keeps its message tracked after the handle is dropped; a clone
/// of the handle does too.
#[tokio::test]
async fn test_tracking_outlives_dropped_handle() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let (replier_tx, mut replier_rx) = mpsc::unbounded_channel::<Replier>();
    let server = BrokerAgent::new(quick_config("server"), network.endpoint("server"))?;
    server.register_object("later", move |msg: IncomingMessage| {
        let replier_tx = replier_tx.clone();
        async move {
            if let Some(replier) = msg.replier() {
                replier_tx.send(replier)?;
            }
            Ok::<_, anyhow::Error>(None)
        }
    });
    let server = server.start().await;
    let client = client(&network, "client").await;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<MessageState>();
    let handle = client
        .send_with_callback(OutboundMessage::new("server", "later", "go"), move |done| {
            let _ = done_tx.send(done.state());
        })
        .await?;
    drop(handle);
    assert_eq!(client.pending_replies(), 1);

    let handle = client.send(OutboundMessage::new("server", "later", "go")).await?;
    let kept = handle.clone();
    drop(handle);
    assert_eq!(client.pending_replies(), 2);

    for _ in 0..2 {
        let replier = tokio::time::timeout(WAIT, replier_rx.recv()).await?.expect("replier handed over");
        replier.reply(json!("late")).await?;
    }
    let state = tokio::time::timeout(WAIT, done_rx.recv()).await?.expect("callback fired");
    assert_eq!(state, MessageState::Replied);
    assert_eq!(kept.wait_for_completion_timeout(WAIT).await?, MessageState::Replied);
    assert_eq!(client.pending_replies(), 0);

    client.stop().await;
    server.stop().await;
    Ok(())
}

/// A single target is trimmed like group members; an empty one is refused.
#[tokio::test]
async fn test_single_member_target_is_normalized() -> anyhow::Result<()> {
    initialize_tracing();
    let network = LoopbackNetwork::new();
    let server = echo_server(&network, "server").await;
    let client = client(&network, "client").await;

    let handle = client.send(OutboundMessage::new(" server |", "echo", "ping")).await?;
    assert_eq!(handle.target(), "server");
    assert_eq!(handle.wait_for_completion_timeout(WAIT).await?, MessageState::Replied);
    client.send_one_way(OutboundMessage::new("server|", "echo", "ping")).await?;

    let err = client.send(OutboundMessage::new(" | ", "echo", "ping")).await.unwrap_err();
    assert!(matches!(err, BrokerError::Configuration(_)));
    assert_eq!(client.outgoing_level(), 0);

    client.stop().await;
    server.stop().await;
    Ok(())
}
