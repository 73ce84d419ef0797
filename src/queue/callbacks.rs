//! Callback registry
//!
//! Jobs register their response and error handlers under stable string
//! keys. Requests carry only the key, so a persisted backlog stays valid as
//! long as the keys do; resolving an unknown key is an explicit error.

use crate::queue::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable key of a registered handler
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackRef(String);

impl CallbackRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallbackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handlers of one job, keyed by [`CallbackRef`]
#[derive(Debug, Clone)]
pub struct CallbackRegistry<H> {
    handlers: BTreeMap<String, H>,
}

impl<H> Default for CallbackRegistry<H> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<H> CallbackRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `key`, replacing any previous handler
    pub fn register(&mut self, key: &str, handler: H) -> CallbackRef {
        self.handlers.insert(key.to_string(), handler);
        CallbackRef::new(key)
    }

    pub fn contains(&self, key: &CallbackRef) -> bool {
        self.handlers.contains_key(key.as_str())
    }

    /// Resolves a key to its handler
    pub fn resolve(&self, key: &CallbackRef) -> QueueResult<&H> {
        self.handlers
            .get(key.as_str())
            .ok_or_else(|| QueueError::UnknownCallback(key.to_string()))
    }

    /// All registered keys, in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
