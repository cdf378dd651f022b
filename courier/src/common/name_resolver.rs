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

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::traits::ObjectHandler;

/// Shared reference to a registered handler.
pub type HandlerRef = Arc<dyn ObjectHandler>;

/// Name under which the fallback handler is registered.
pub const WILDCARD: &str = "*";

/// Maps object names to handlers, with one optional wildcard fallback.
///
/// Lookups hand out a clone of the handler's `Arc`, so replacing or removing
/// an entry never invalidates a dispatch already in progress. The flip side
/// is that a handler may still be invoked for messages dequeued before it was
/// unregistered.
#[derive(Default)]
pub struct NameResolver {
    exact: DashMap<String, HandlerRef>,
    wildcard: RwLock<Option<HandlerRef>>,
}

impl fmt::Debug for NameResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameResolver")
            .field("registered", &self.exact.len())
            .field("has_wildcard", &self.wildcard.read().is_some())
            .finish()
    }
}

impl NameResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handler` under `name`, replacing any previous one.
    /// `"*"` installs the wildcard handler.
    pub fn register(&self, name: &str, handler: HandlerRef) {
        if name == WILDCARD {
            *self.wildcard.write() = Some(handler);
        } else {
            self.exact.insert(name.to_string(), handler);
        }
    }

    /// Removes the handler under `name`. Absent names are ignored.
    pub fn unregister(&self, name: &str) {
        if name == WILDCARD {
            self.wildcard.write().take();
        } else {
            self.exact.remove(name);
        }
    }

    /// Exact match first, then the wildcard, else `None`.
    pub fn resolve(&self, name: &str) -> Option<HandlerRef> {
        if let Some(entry) = self.exact.get(name) {
            return Some(entry.value().clone());
        }
        self.wildcard.read().clone()
    }

    /// Number of exact registrations (the wildcard is not counted).
    pub fn len(&self) -> usize {
        self.exact.len()
    }

    /// `true` when neither exact handlers nor a wildcard are registered.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcard.read().is_none()
    }
}
