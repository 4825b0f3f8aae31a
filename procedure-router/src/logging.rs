//! Request logging middleware.

use crate::context::MiddlewareContext;
use crate::middleware::{MiddlewareFn, Next, Step, from_fn};
use crate::request::RequestHandle;
use crate::RpcResult;
use tracing::debug;

/// Context key holding the request id assigned by [`request_logger`].
pub const REQUEST_ID_KEY: &str = "request_id";

/// Generate a time-ordered request id (UUID v7).
pub fn generate_request_id() -> uuid::Uuid {
    uuid::Uuid::new_v7(uuid::Timestamp::now(uuid::NoContext))
}

/// Middleware that tags the request with an id and logs it.
///
/// Reuses an incoming `x-request-id` header when present, so ids stay stable
/// across a reverse proxy or a parent router.
pub fn request_logger<Ctx: Clone + Send + Sync + 'static>() -> MiddlewareFn<Ctx> {
    from_fn(log_request::<Ctx>)
}

async fn log_request<Ctx: Clone + Send + Sync + 'static>(
    _ctx: MiddlewareContext,
    req: RequestHandle<Ctx>,
    next: Next,
) -> RpcResult<Step> {
    let request_id = req
        .header("x-request-id")
        .map(str::to_owned)
        .unwrap_or_else(|| generate_request_id().to_string());

    debug!(
        request_id = %request_id,
        method = %req.method(),
        path = %req.path(),
        procedure = %req.procedure(),
        "Procedure request"
    );

    Ok(next.proceed_with([(REQUEST_ID_KEY, request_id)]))
}
