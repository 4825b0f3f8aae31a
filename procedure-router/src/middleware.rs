//! Middleware pipeline
//!
//! A middleware step receives the context accumulated so far, the raw request
//! handle and a [`Next`] token. It either proceeds (optionally contributing a
//! [`ContextPatch`]) or answers the request itself with [`Step::respond`].
//!
//! Steps run strictly in declaration order, each exactly once. After a step
//! proceeds, its patch is merged into the request's [`MiddlewareContext`]
//! (shallow, later keys win) before the next step runs, so every step and the
//! handler see all earlier contributions. A step that responds ends the
//! request: later steps and the handler never run.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn auth(
//!     ctx: MiddlewareContext,
//!     req: RequestHandle<AppContext>,
//!     next: Next,
//! ) -> RpcResult<Step> {
//!     let Some(token) = req.header("authorization") else {
//!         return Err(RpcError::unauthorized("Missing authorization header"));
//!     };
//!     let user = lookup(token).await?;
//!     Ok(next.proceed_with([("user", serde_json::to_value(user)?)]))
//! }
//! ```

use crate::context::{ContextPatch, MiddlewareContext};
use crate::request::RequestHandle;
use crate::RpcResult;
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, trace};

pub use crate::logging::{REQUEST_ID_KEY, request_logger};

/// Future returned by a middleware step
pub type MiddlewareFuture = Pin<Box<dyn Future<Output = RpcResult<Step>> + Send>>;

/// Type-erased middleware step
pub type MiddlewareFn<Ctx> =
    Arc<dyn Fn(MiddlewareContext, RequestHandle<Ctx>, Next) -> MiddlewareFuture + Send + Sync>;

/// Permission to continue the chain.
///
/// The only way to build a continuing [`Step`]; a step that never uses its
/// `Next` has to respond.
#[derive(Debug)]
pub struct Next {
    _private: (),
}

impl Next {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }

    /// Continue without contributing anything.
    pub fn proceed(self) -> Step {
        Step(Flow::Continue(ContextPatch::new()))
    }

    /// Continue, contributing `patch` to the request context.
    pub fn proceed_with(self, patch: impl Into<ContextPatch>) -> Step {
        Step(Flow::Continue(patch.into()))
    }
}

/// What a middleware step decided.
#[derive(Debug)]
pub struct Step(Flow);

#[derive(Debug)]
enum Flow {
    Continue(ContextPatch),
    Respond(Response),
}

impl Step {
    /// End the request here with `response`.
    pub fn respond(response: impl IntoResponse) -> Self {
        Self(Flow::Respond(response.into_response()))
    }

    /// Add keys on top of what was passed to `proceed_with`; these win on conflict.
    ///
    /// Has no effect on a step that responds.
    #[must_use]
    pub fn with_patch(self, patch: impl Into<ContextPatch>) -> Self {
        match self.0 {
            Flow::Continue(existing) => Self(Flow::Continue(existing.merge(patch.into()))),
            respond => Self(respond),
        }
    }

    /// Whether the chain continues after this step
    pub fn is_continue(&self) -> bool {
        matches!(self.0, Flow::Continue(_))
    }
}

/// A middleware step.
///
/// Implemented for every async function
/// `(MiddlewareContext, RequestHandle<Ctx>, Next) -> RpcResult<Step>`.
pub trait Middleware<Ctx: Clone + Send + Sync + 'static>: Send + Sync + 'static {
    /// Run the step
    fn handle(&self, ctx: MiddlewareContext, req: RequestHandle<Ctx>, next: Next) -> MiddlewareFuture;
}

impl<Ctx, F, Fut> Middleware<Ctx> for F
where
    Ctx: Clone + Send + Sync + 'static,
    F: Fn(MiddlewareContext, RequestHandle<Ctx>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Step>> + Send + 'static,
{
    fn handle(&self, ctx: MiddlewareContext, req: RequestHandle<Ctx>, next: Next) -> MiddlewareFuture {
        Box::pin((self)(ctx, req, next))
    }
}

/// Create middleware from an async function or closure.
pub fn from_fn<Ctx, F, Fut>(f: F) -> MiddlewareFn<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
    F: Fn(MiddlewareContext, RequestHandle<Ctx>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Step>> + Send + 'static,
{
    Arc::new(move |ctx, req, next| Box::pin(f(ctx, req, next)))
}

/// Erase any [`Middleware`] implementation into a [`MiddlewareFn`].
pub fn boxed<Ctx, M>(middleware: M) -> MiddlewareFn<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
    M: Middleware<Ctx>,
{
    let middleware = Arc::new(middleware);
    Arc::new(move |ctx, req, next| middleware.handle(ctx, req, next))
}

/// Run `middleware` in order against `ctx`.
///
/// Returns `Ok(None)` when every step proceeded, `Ok(Some(response))` when a
/// step answered the request, and the first error raised otherwise.
pub(crate) async fn run_pipeline<Ctx: Clone + Send + Sync + 'static>(
    middleware: &[MiddlewareFn<Ctx>],
    req: &RequestHandle<Ctx>,
    ctx: &mut MiddlewareContext,
) -> RpcResult<Option<Response>> {
    for (index, step) in middleware.iter().enumerate() {
        trace!(procedure = %req.procedure(), index, "Running middleware");
        match step(ctx.clone(), req.clone(), Next::new()).await?.0 {
            Flow::Continue(patch) => ctx.apply(patch),
            Flow::Respond(response) => {
                debug!(
                    procedure = %req.procedure(),
                    index,
                    status = %response.status(),
                    "Middleware answered the request"
                );
                return Ok(Some(response));
            }
        }
    }
    Ok(None)
}
