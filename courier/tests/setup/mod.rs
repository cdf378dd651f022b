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
#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use courier::prelude::*;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Ensures tracing initialization happens only once across all tests.
static INIT: Once = Once::new();

/// Initializes the global tracing subscriber for tests.
///
/// Output goes to `logs/courier_tests.txt` so test runs stay quiet on stdout.
pub fn initialize_tracing() {
    INIT.call_once(|| {
        std::fs::create_dir_all("logs").expect("could not create logs dir");

        let file_appender = RollingFileAppender::new(Rotation::NEVER, "logs", "courier_tests.txt");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leak the guard so the non-blocking writer is not dropped before process exit
        Box::leak(Box::new(guard));

        let filter = EnvFilter::new("trace")
            .add_directive("courier::common::broker_agent=trace".parse().unwrap())
            .add_directive("courier::common::outgoing=trace".parse().unwrap())
            .add_directive("courier::transport::loopback=debug".parse().unwrap())
            .add_directive("tokio=info".parse().unwrap());

        let subscriber = FmtSubscriber::builder()
            .with_span_events(FmtSpan::NONE)
            .with_max_level(Level::TRACE)
            .compact()
            .with_line_number(true)
            .without_time()
            .with_target(true)
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .finish();

        tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
    });
}

/// Config with quick retries and a short poll interval.
pub fn quick_config(name: &str) -> BrokerConfig {
    BrokerConfig {
        name: name.to_string(),
        connection_retries: 3,
        connection_retry_delay_spread_ms: 5,
        poll_interval_ms: 5,
        ..BrokerConfig::default()
    }
}

/// Echoes the request body back as the reply.
pub async fn echo(message: IncomingMessage) -> anyhow::Result<Option<Body>> {
    Ok(Some(message.body))
}

/// Starts an agent on `network` under `name` with `echo` registered as "echo".
pub async fn echo_server(network: &LoopbackNetwork, name: &str) -> BrokerAgent<Started> {
    let agent = BrokerAgent::new(quick_config(name), network.endpoint(name)).expect("valid config");
    agent.register_object("echo", echo);
    agent.start().await
}

/// Starts a bare client agent.
pub async fn client(network: &LoopbackNetwork, name: &str) -> BrokerAgent<Started> {
    BrokerAgent::new(quick_config(name), network.endpoint(name))
        .expect("valid config")
        .start()
        .await
}

/// Same as [`client`] with a fixed random seed.
pub async fn seeded_client(network: &LoopbackNetwork, name: &str, seed: u64) -> BrokerAgent<Started> {
    BrokerAgent::with_random_source(quick_config(name), network.endpoint(name), Arc::new(StdRandom::seeded(seed)))
        .expect("valid config")
        .start()
        .await
}

pub const WAIT: Duration = Duration::from_secs(5);
