//! Execution-environment bindings.
//!
//! Realtime procedures resolve broker credentials from the environment at
//! connection time. By default that is the live process environment; tests and
//! embedders can pass an explicit map instead. A router forwards its bindings to
//! mounted children through request extensions.

use std::collections::HashMap;
use std::sync::Arc;

/// Environment bindings visible to a request.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: Option<Arc<HashMap<String, String>>>,
}

impl Env {
    /// Read from the process environment on every lookup.
    pub fn process() -> Self {
        Self { vars: None }
    }

    /// Fixed bindings; the process environment is never consulted.
    pub fn from_map<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: Some(Arc::new(
                vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            )),
        }
    }

    /// Look up a binding. Empty values count as missing.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match &self.vars {
            Some(vars) => vars.get(key).cloned(),
            None => std::env::var(key).ok(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}
