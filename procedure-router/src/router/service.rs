//! Tower integration.

use super::core::CompiledRouter;
use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use std::convert::Infallible;
use std::task::{Context, Poll};
use tower::Service;

/// A [`CompiledRouter`] as a tower [`Service`].
pub struct RouterService<Ctx: Clone + Send + Sync + 'static> {
    router: CompiledRouter<Ctx>,
}

impl<Ctx: Clone + Send + Sync + 'static> Clone for RouterService<Ctx> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
        }
    }
}

impl<Ctx: Clone + Send + Sync + 'static> Service<Request<Body>> for RouterService<Ctx> {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let router = self.router.clone();
        Box::pin(async move { Ok(router.fetch(request).await) })
    }
}

impl<Ctx: Clone + Send + Sync + 'static> CompiledRouter<Ctx> {
    /// Wrap the router in a tower service
    pub fn into_service(self) -> RouterService<Ctx> {
        RouterService { router: self }
    }

    /// An `axum::Router` that sends every request through this router.
    ///
    /// Further axum routes or layers can be added to the result.
    pub fn into_axum(self) -> axum::Router {
        axum::Router::new().fallback_service(self.into_service())
    }
}
