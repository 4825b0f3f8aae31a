//! The raw request handle given to middleware and handlers.

use crate::config::RouterConfig;
use crate::context::Context;
use crate::env::Env;
use http::request::Parts;
use http::{Extensions, HeaderMap, Method, Uri};
use std::sync::Arc;

/// Read-only view of the in-flight HTTP request.
///
/// The body is not part of the handle: write procedures receive their parsed
/// body as input. Cloning is cheap; all clones refer to the same request.
pub struct RequestHandle<Ctx: Clone + Send + Sync + 'static> {
    parts: Arc<Parts>,
    procedure: Arc<str>,
    ctx: Context<Ctx>,
    env: Env,
    config: Arc<RouterConfig>,
}

impl<Ctx: Clone + Send + Sync + 'static> Clone for RequestHandle<Ctx> {
    fn clone(&self) -> Self {
        Self {
            parts: self.parts.clone(),
            procedure: self.procedure.clone(),
            ctx: self.ctx.clone(),
            env: self.env.clone(),
            config: self.config.clone(),
        }
    }
}

impl<Ctx: Clone + Send + Sync + 'static> RequestHandle<Ctx> {
    pub(crate) fn new(
        parts: Parts,
        procedure: Arc<str>,
        ctx: Context<Ctx>,
        env: Env,
        config: Arc<RouterConfig>,
    ) -> Self {
        Self {
            parts: Arc::new(parts),
            procedure,
            ctx,
            env,
            config,
        }
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    /// Full request URI as seen by this router
    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// URI path as seen by this router (after any sub-router rewrite)
    pub fn path(&self) -> &str {
        self.parts.uri.path()
    }

    /// Raw query string, if any
    pub fn query_string(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    /// Procedure path the request was routed to, e.g. `users/get`
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// A header value, when present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Request extensions
    pub fn extensions(&self) -> &Extensions {
        &self.parts.extensions
    }

    /// Application state
    pub fn context(&self) -> &Context<Ctx> {
        &self.ctx
    }

    /// Environment bindings of this request
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Configuration for this procedure: its per-path entry, else the router-wide one
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

impl<Ctx: Clone + Send + Sync + 'static> std::fmt::Debug for RequestHandle<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("method", self.method())
            .field("uri", self.uri())
            .field("procedure", &self.procedure)
            .finish_non_exhaustive()
    }
}
