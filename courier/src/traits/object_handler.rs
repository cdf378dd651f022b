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

use std::future::Future;

use async_trait::async_trait;

use crate::message::{Body, IncomingMessage};

/// Application code bound to an object name on the agent.
///
/// The return value decides the answer to a two-way request:
///
/// * `Ok(Some(body))` replies with `body`.
/// * `Ok(None)` sends nothing; the handler is expected to answer later through
///   [`IncomingMessage::replier`].
/// * `Err(e)` rejects the request with `e`'s message.
///
/// For one-way messages the return value is only logged.
///
/// Closures of the shape `Fn(IncomingMessage) -> impl Future<Output =
/// anyhow::Result<Option<Body>>>` implement this trait.
#[async_trait]
pub trait ObjectHandler: Send + Sync + 'static {
    /// Handles one message.
    async fn handle(&self, message: IncomingMessage) -> anyhow::Result<Option<Body>>;
}

#[async_trait]
impl<F, Fut> ObjectHandler for F
where
    F: Fn(IncomingMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<Body>>> + Send + 'static,
{
    async fn handle(&self, message: IncomingMessage) -> anyhow::Result<Option<Body>> {
        (self)(message).await
    }
}
