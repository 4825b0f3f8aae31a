//! Per-kind request dispatch
//!
//! Read:     parse query (schema only) → middleware → validate → handler
//! Write:    parse body (schema only)  → middleware → validate → handler
//! Realtime: middleware → broker credentials → upgrade check → connection
//!           factory → 101 Switching Protocols → session
//!
//! Every error raised along the way goes through the router's error handler.

use super::core::Shared;
use crate::broker::BrokerCredentials;
use crate::context::MiddlewareContext;
use crate::handler::{BoxedHandler, BoxedRealtimeHandler};
use crate::middleware::{MiddlewareFn, run_pipeline};
use crate::parsing::{non_empty_input, parse_body, parse_query};
use crate::procedure::{Operation, OperationBody};
use crate::realtime::{Io, SessionSetup, run_session};
use crate::request::RequestHandle;
use crate::schema::{EventSchemas, Schema};
use crate::RpcResult;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Entry point bound to every procedure route.
pub(crate) async fn dispatch<Ctx: Clone + Send + Sync + 'static>(
    shared: Arc<Shared<Ctx>>,
    procedure: Arc<str>,
    operation: Arc<Operation<Ctx>>,
    request: Request,
) -> Response {
    let (mut parts, body) = request.into_parts();
    trace!(procedure = %procedure, kind = %operation.kind(), "Dispatching procedure");

    let (handle, result) = match &operation.body {
        OperationBody::Read { input, handler } => {
            let handle = shared.request_handle(parts, &procedure);
            let query = input
                .as_ref()
                .map(|_| Value::Object(parse_query(handle.query_string())));
            let result = run(&operation.middleware, input.as_ref(), query, handler, &handle).await;
            (handle, result)
        }
        OperationBody::Write { input, handler } => {
            let handle = shared.request_handle(parts, &procedure);
            let result = match input {
                Some(schema) => match parse_body(body, shared.rpc_config.max_body_size).await {
                    Ok(parsed) => run(&operation.middleware, Some(schema), parsed, handler, &handle).await,
                    Err(e) => Err(e),
                },
                None => run(&operation.middleware, None, None, handler, &handle).await,
            };
            (handle, result)
        }
        OperationBody::Realtime {
            incoming,
            outgoing,
            handler,
        } => {
            // Taken before the parts are frozen into the handle.
            let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &()).await;
            let handle = shared.request_handle(parts, &procedure);
            let realtime = Realtime {
                shared: &shared,
                middleware: &operation.middleware,
                incoming,
                outgoing,
                handler,
            };
            let result = realtime.connect(&handle, upgrade).await;
            (handle, result)
        }
    };

    match result {
        Ok(response) => response,
        Err(e) => shared.fail(e, &handle),
    }
}

/// Middleware, then validation, then the handler.
async fn run<Ctx: Clone + Send + Sync + 'static>(
    middleware: &[MiddlewareFn<Ctx>],
    schema: Option<&Schema>,
    raw_input: Option<Value>,
    handler: &BoxedHandler<Ctx>,
    handle: &RequestHandle<Ctx>,
) -> RpcResult<Response> {
    let mut ctx = MiddlewareContext::new();
    if let Some(response) = run_pipeline(middleware, handle, &mut ctx).await? {
        return Ok(response);
    }

    let input = match schema {
        Some(schema) => schema.parse(non_empty_input(raw_input)).inspect_err(|e| {
            warn!(
                procedure = %handle.procedure(),
                error_code = %e.code,
                "Input validation failed"
            );
        })?,
        None => Value::Null,
    };

    handler(handle.clone(), ctx, input).await
}

struct Realtime<'a, Ctx: Clone + Send + Sync + 'static> {
    shared: &'a Shared<Ctx>,
    middleware: &'a [MiddlewareFn<Ctx>],
    incoming: &'a Option<Arc<EventSchemas>>,
    outgoing: &'a Option<Arc<EventSchemas>>,
    handler: &'a BoxedRealtimeHandler<Ctx>,
}

impl<Ctx: Clone + Send + Sync + 'static> Realtime<'_, Ctx> {
    async fn connect(
        self,
        handle: &RequestHandle<Ctx>,
        upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    ) -> RpcResult<Response> {
        let mut ctx = MiddlewareContext::new();
        if let Some(response) = run_pipeline(self.middleware, handle, &mut ctx).await? {
            return Ok(response);
        }

        let credentials = BrokerCredentials::resolve(handle.env(), &self.shared.rpc_config)?;

        let upgrade = match upgrade {
            Ok(upgrade) => upgrade,
            Err(rejection) => {
                debug!(procedure = %handle.procedure(), reason = %rejection, "Not a websocket upgrade request");
                return Ok(rejection.into_response());
            }
        };

        let broker = self.shared.broker_factory.connect(&credentials)?;
        let io = Io::new(broker, self.outgoing.clone());
        let session = (self.handler)(handle.clone(), ctx, io.clone()).await?;

        let setup = SessionSetup {
            procedure: Arc::from(handle.procedure()),
            handler: session,
            incoming: self.incoming.clone(),
            outgoing: self.outgoing.clone(),
            io,
            buffer: self.shared.rpc_config.socket_buffer,
            debug_logging: self.shared.rpc_config.debug_logging,
        };

        debug!(procedure = %handle.procedure(), "Accepting websocket upgrade");
        Ok(upgrade
            .on_failed_upgrade(|e| warn!(error = %e, "Websocket upgrade failed"))
            .on_upgrade(move |socket| run_session(socket, setup)))
    }
}
