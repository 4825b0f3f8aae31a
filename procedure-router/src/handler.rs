//! Handler traits
//!
//! Read and write procedures are served by a [`Handler`]: any async function
//! `(RequestHandle<Ctx>, MiddlewareContext, Input) -> RpcResult<Output>` where
//! `Input` is deserialized from the validated input (JSON `null` when there is
//! none) and `Output` is any axum response. Returning `()` produces an empty
//! `200 OK`; returning `Json<T>`, a `(StatusCode, ..)` tuple or a full
//! `Response` hands the handler full control over status and serialization.
//!
//! Realtime procedures are served by a [`RealtimeHandler`], which receives the
//! broker-backed [`Io`] and returns the [`SessionHandler`] that will own the
//! connection's lifecycle callbacks.

use crate::context::MiddlewareContext;
use crate::realtime::{Io, SessionHandler};
use crate::request::RequestHandle;
use crate::{RpcError, RpcResult};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{trace, warn};

/// Future returned by a boxed read/write handler
pub type HandlerFuture = Pin<Box<dyn Future<Output = RpcResult<Response>> + Send>>;

/// Boxed handler for type erasure
pub(crate) type BoxedHandler<Ctx> =
    Arc<dyn Fn(RequestHandle<Ctx>, MiddlewareContext, Value) -> HandlerFuture + Send + Sync>;

/// Future returned by a boxed realtime handler
pub type SessionFuture = Pin<Box<dyn Future<Output = RpcResult<Arc<dyn SessionHandler>>> + Send>>;

/// Boxed realtime connection factory
pub(crate) type BoxedRealtimeHandler<Ctx> =
    Arc<dyn Fn(RequestHandle<Ctx>, MiddlewareContext, Io) -> SessionFuture + Send + Sync>;

/// Trait for read/write handler functions
///
/// Automatically implemented for async functions with the signature:
/// `async fn(RequestHandle<Ctx>, MiddlewareContext, Input) -> RpcResult<Output>`
pub trait Handler<Ctx, Input, Output>: Clone + Send + Sync + 'static
where
    Ctx: Clone + Send + Sync + 'static,
    Input: DeserializeOwned + Send + 'static,
    Output: IntoResponse + Send + 'static,
{
    /// The future type returned by the handler
    type Future: Future<Output = RpcResult<Output>> + Send;

    /// Call the handler
    fn call(&self, req: RequestHandle<Ctx>, ctx: MiddlewareContext, input: Input) -> Self::Future;
}

impl<Ctx, Input, Output, F, Fut> Handler<Ctx, Input, Output> for F
where
    Ctx: Clone + Send + Sync + 'static,
    Input: DeserializeOwned + Send + 'static,
    Output: IntoResponse + Send + 'static,
    F: Fn(RequestHandle<Ctx>, MiddlewareContext, Input) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Output>> + Send + 'static,
{
    type Future = Fut;

    fn call(&self, req: RequestHandle<Ctx>, ctx: MiddlewareContext, input: Input) -> Self::Future {
        (self)(req, ctx, input)
    }
}

/// Convert a handler into a boxed handler for storage
pub(crate) fn into_boxed<Ctx, Input, Output, H>(handler: H) -> BoxedHandler<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
    Input: DeserializeOwned + Send + 'static,
    Output: IntoResponse + Send + 'static,
    H: Handler<Ctx, Input, Output>,
{
    Arc::new(move |req, ctx, input_value| {
        let handler = handler.clone();
        Box::pin(async move {
            let input: Input = serde_json::from_value(input_value).map_err(|e| {
                warn!(procedure = %req.procedure(), error = %e, "Handler input deserialization failed");
                RpcError::bad_request(format!("Invalid input: {}", e))
            })?;

            trace!(procedure = %req.procedure(), "Executing handler");
            let output = handler.call(req, ctx, input).await?;
            Ok(output.into_response())
        })
    })
}

/// Trait for realtime connection factories
///
/// Automatically implemented for async functions with the signature:
/// `async fn(RequestHandle<Ctx>, MiddlewareContext, Io) -> RpcResult<S>`
/// where `S` implements [`SessionHandler`].
pub trait RealtimeHandler<Ctx, S>: Clone + Send + Sync + 'static
where
    Ctx: Clone + Send + Sync + 'static,
    S: SessionHandler,
{
    /// The future type returned by the factory
    type Future: Future<Output = RpcResult<S>> + Send;

    /// Build the session handler for a new connection
    fn call(&self, req: RequestHandle<Ctx>, ctx: MiddlewareContext, io: Io) -> Self::Future;
}

impl<Ctx, S, F, Fut> RealtimeHandler<Ctx, S> for F
where
    Ctx: Clone + Send + Sync + 'static,
    S: SessionHandler,
    F: Fn(RequestHandle<Ctx>, MiddlewareContext, Io) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<S>> + Send + 'static,
{
    type Future = Fut;

    fn call(&self, req: RequestHandle<Ctx>, ctx: MiddlewareContext, io: Io) -> Self::Future {
        (self)(req, ctx, io)
    }
}

/// Convert a realtime factory into its boxed form
pub(crate) fn into_boxed_realtime<Ctx, S, H>(handler: H) -> BoxedRealtimeHandler<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
    S: SessionHandler,
    H: RealtimeHandler<Ctx, S>,
{
    Arc::new(move |req, ctx, io| {
        let handler = handler.clone();
        Box::pin(async move {
            let session = handler.call(req, ctx, io).await?;
            Ok(Arc::new(session) as Arc<dyn SessionHandler>)
        })
    })
}
