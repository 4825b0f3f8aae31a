//! HTTP serving helpers.
//!
//! Layer ordering is outer-to-inner: the first layer listed sees the request
//! first and the response last.

use axum::http::header::HeaderName;
use std::future::Future;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower::layer::util::{Identity, Stack};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The composed layer type returned by [`http_layers`].
pub type HttpLayers = Stack<
    PropagateRequestIdLayer,
    Stack<
        TraceLayer<SharedClassifier<ServerErrorsAsFailures>>,
        Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>,
    >,
>;

/// Transport-level layers for a router.
///
/// 1. `SetRequestId` assigns a UUID `x-request-id` unless the client sent one
/// 2. `Trace` opens a span per request
/// 3. `PropagateRequestId` copies the id onto the response
///
/// ```rust,ignore
/// let app = router.into_axum().layer(http_layers());
/// ```
#[must_use]
pub fn http_layers() -> HttpLayers {
    let x_request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Serve `app` on `listener` until `shutdown` resolves, then drain in-flight
/// requests.
///
/// # Errors
///
/// Returns the listener's I/O error if accepting fails.
pub async fn serve<F>(listener: TcpListener, app: axum::Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(%addr, "Serving procedures");

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!(%addr, "Server stopped");
    Ok(())
}
