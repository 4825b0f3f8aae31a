//! Context types
//!
//! [`Context`] carries shared application state into every handler. It is
//! cloned per request, so wrap mutable state in `Arc`/locks.
//!
//! [`MiddlewareContext`] is the per-request map built up by middleware. Each
//! request starts with an empty one; every step sees what earlier steps
//! contributed and adds its own [`ContextPatch`]. It is dropped with the request
//! and never shared between requests.

use crate::{RpcError, RpcResult};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Context wrapper providing access to application state.
#[derive(Clone)]
pub struct Context<T: Clone + Send + Sync + 'static> {
    inner: Arc<T>,
}

impl<T: Clone + Send + Sync + 'static> Context<T> {
    /// Create a new context wrapping the given value
    pub fn new(ctx: T) -> Self {
        Self {
            inner: Arc::new(ctx),
        }
    }

    /// Get a reference to the inner value
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Clone + Send + Sync + 'static> std::ops::Deref for Context<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T: Clone + Send + Sync + Default + 'static> Default for Context<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Empty context for routers that don't need state
#[derive(Clone, Default, Debug)]
pub struct EmptyContext;

// =============================================================================
// Patches
// =============================================================================

/// Keys contributed by one middleware step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextPatch(Map<String, Value>);

impl ContextPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set a key from any serializable value
    pub fn try_with(mut self, key: impl Into<String>, value: &impl Serialize) -> RpcResult<Self> {
        self.0.insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Overlay `other` on top of this patch; keys in `other` win.
    #[must_use]
    pub fn merge(mut self, other: ContextPatch) -> Self {
        self.0.extend(other.0);
        self
    }

    /// True when the patch sets nothing
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for ContextPatch {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Objects contribute their keys; any other value contributes nothing.
impl From<Value> for ContextPatch {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for ContextPatch {
    fn from(entries: [(K, V); N]) -> Self {
        Self(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// =============================================================================
// Accumulated context
// =============================================================================

/// Context accumulated by the middleware of a single request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MiddlewareContext(Map<String, Value>);

impl MiddlewareContext {
    /// Empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value of a key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether a key has been contributed
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Decode a key into `T`; `Ok(None)` when the key is absent.
    pub fn decode<T: DeserializeOwned>(&self, key: &str) -> RpcResult<Option<T>> {
        self.0
            .get(key)
            .map(|value| T::deserialize(value))
            .transpose()
            .map_err(|e| {
                RpcError::middleware(format!("Context key '{}' has an unexpected shape", key))
                    .with_cause(e.to_string())
            })
    }

    /// Decode a key that an earlier middleware must have contributed.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> RpcResult<T> {
        self.decode(key)?.ok_or_else(|| {
            RpcError::middleware(format!("Context key '{}' was not provided by middleware", key))
        })
    }

    /// Contributed keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of contributed keys
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no middleware contributed anything
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shallow merge: every key of `patch` overwrites the current value.
    pub(crate) fn apply(&mut self, patch: ContextPatch) {
        self.0.extend(patch.0);
    }

    /// The context as a JSON object
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl Serialize for MiddlewareContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}
