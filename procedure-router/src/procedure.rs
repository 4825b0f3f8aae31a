//! Procedure builder
//!
//! Declares one operation: its kind, middleware chain, schemas and handler.
//!
//! # Example
//!
//! ```rust,ignore
//! use procedure_router::prelude::*;
//!
//! let get_user = procedure::<AppContext>()
//!     .use_middleware(auth)
//!     .input(Schema::of::<GetUserInput>(get_user_schema()))
//!     .query(get_user);
//!
//! let create_user = procedure::<AppContext>()
//!     .use_middleware(auth)
//!     .input(Schema::of::<CreateUserInput>(create_user_schema()))
//!     .mutation(create_user);
//!
//! let chat = procedure::<AppContext>()
//!     .incoming(chat_events())
//!     .outgoing(chat_events())
//!     .realtime(open_chat);
//! ```
//!
//! The middleware list is fixed once a finisher (`query`, `mutation`,
//! `realtime`) runs.

use crate::context::MiddlewareContext;
use crate::handler::{BoxedHandler, BoxedRealtimeHandler, into_boxed, into_boxed_realtime};
use crate::middleware::{MiddlewareFn, Next, Step, from_fn};
use crate::realtime::{Io, SessionHandler};
use crate::request::RequestHandle;
use crate::schema::{EventSchemas, Schema};
use crate::RpcResult;
use axum::response::IntoResponse;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// The three request shapes a procedure can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Query-style read, bound to `GET`, input from the query string
    Read,
    /// Mutation-style write, bound to `POST`, input from the JSON body
    Write,
    /// Long-lived websocket session, bound to `GET` with an upgrade
    Realtime,
}

impl OperationKind {
    /// Lowercase name used in metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Realtime => "realtime",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared operation, ready to register on a router.
pub struct Operation<Ctx: Clone + Send + Sync + 'static> {
    pub(crate) middleware: Arc<[MiddlewareFn<Ctx>]>,
    pub(crate) body: OperationBody<Ctx>,
}

pub(crate) enum OperationBody<Ctx: Clone + Send + Sync + 'static> {
    Read {
        input: Option<Schema>,
        handler: BoxedHandler<Ctx>,
    },
    Write {
        input: Option<Schema>,
        handler: BoxedHandler<Ctx>,
    },
    Realtime {
        incoming: Option<Arc<EventSchemas>>,
        outgoing: Option<Arc<EventSchemas>>,
        handler: BoxedRealtimeHandler<Ctx>,
    },
}

impl<Ctx: Clone + Send + Sync + 'static> Operation<Ctx> {
    /// Kind of this operation
    pub fn kind(&self) -> OperationKind {
        match &self.body {
            OperationBody::Read { .. } => OperationKind::Read,
            OperationBody::Write { .. } => OperationKind::Write,
            OperationBody::Realtime { .. } => OperationKind::Realtime,
        }
    }

    /// Number of middleware steps declared on this operation
    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    /// Input schema of a read/write operation
    pub fn input_schema(&self) -> Option<&Schema> {
        match &self.body {
            OperationBody::Read { input, .. } | OperationBody::Write { input, .. } => input.as_ref(),
            OperationBody::Realtime { .. } => None,
        }
    }

    /// Incoming and outgoing event schemas of a realtime operation
    pub fn event_schemas(&self) -> (Option<&EventSchemas>, Option<&EventSchemas>) {
        match &self.body {
            OperationBody::Realtime { incoming, outgoing, .. } => (incoming.as_deref(), outgoing.as_deref()),
            _ => (None, None),
        }
    }
}

impl<Ctx: Clone + Send + Sync + 'static> Clone for Operation<Ctx> {
    fn clone(&self) -> Self {
        let body = match &self.body {
            OperationBody::Read { input, handler } => OperationBody::Read {
                input: input.clone(),
                handler: handler.clone(),
            },
            OperationBody::Write { input, handler } => OperationBody::Write {
                input: input.clone(),
                handler: handler.clone(),
            },
            OperationBody::Realtime {
                incoming,
                outgoing,
                handler,
            } => OperationBody::Realtime {
                incoming: incoming.clone(),
                outgoing: outgoing.clone(),
                handler: handler.clone(),
            },
        };
        Self {
            middleware: self.middleware.clone(),
            body,
        }
    }
}

impl<Ctx: Clone + Send + Sync + 'static> fmt::Debug for Operation<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind())
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

/// Start declaring a procedure for context type `Ctx`.
pub fn procedure<Ctx: Clone + Send + Sync + 'static>() -> ProcedureBuilder<Ctx> {
    ProcedureBuilder::new()
}

/// Fluent builder returned by [`procedure`].
pub struct ProcedureBuilder<Ctx: Clone + Send + Sync + 'static> {
    middleware: Vec<MiddlewareFn<Ctx>>,
    input: Option<Schema>,
    incoming: Option<EventSchemas>,
    outgoing: Option<EventSchemas>,
}

impl<Ctx: Clone + Send + Sync + 'static> Default for ProcedureBuilder<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Clone + Send + Sync + 'static> ProcedureBuilder<Ctx> {
    /// Empty builder
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
            input: None,
            incoming: None,
            outgoing: None,
        }
    }

    /// Append a middleware step written as an async function or closure.
    pub fn use_middleware<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(MiddlewareContext, RequestHandle<Ctx>, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Step>> + Send + 'static,
    {
        self.middleware.push(from_fn(f));
        self
    }

    /// Append an already boxed middleware step (e.g. a shared one).
    pub fn with_middleware(mut self, middleware: MiddlewareFn<Ctx>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Input schema of a read or write operation.
    pub fn input(mut self, schema: Schema) -> Self {
        self.input = Some(schema);
        self
    }

    /// Schemas of the events a realtime client may send.
    pub fn incoming(mut self, events: EventSchemas) -> Self {
        self.incoming = Some(events);
        self
    }

    /// Schemas of the events the server may send on a realtime connection.
    pub fn outgoing(mut self, events: EventSchemas) -> Self {
        self.outgoing = Some(events);
        self
    }

    /// Finish as a read operation.
    pub fn query<Input, Output, F, Fut>(self, handler: F) -> Operation<Ctx>
    where
        Input: DeserializeOwned + Send + 'static,
        Output: IntoResponse + Send + 'static,
        F: Fn(RequestHandle<Ctx>, MiddlewareContext, Input) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Output>> + Send + 'static,
    {
        self.warn_unused_events("query");
        Operation {
            middleware: self.middleware.into(),
            body: OperationBody::Read {
                input: self.input,
                handler: into_boxed(handler),
            },
        }
    }

    /// Finish as a write operation.
    pub fn mutation<Input, Output, F, Fut>(self, handler: F) -> Operation<Ctx>
    where
        Input: DeserializeOwned + Send + 'static,
        Output: IntoResponse + Send + 'static,
        F: Fn(RequestHandle<Ctx>, MiddlewareContext, Input) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Output>> + Send + 'static,
    {
        self.warn_unused_events("mutation");
        Operation {
            middleware: self.middleware.into(),
            body: OperationBody::Write {
                input: self.input,
                handler: into_boxed(handler),
            },
        }
    }

    /// Finish as a realtime operation.
    pub fn realtime<S, F, Fut>(self, handler: F) -> Operation<Ctx>
    where
        S: SessionHandler,
        F: Fn(RequestHandle<Ctx>, MiddlewareContext, Io) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<S>> + Send + 'static,
    {
        if self.input.is_some() {
            warn!("Input schema ignored on a realtime procedure; use incoming() instead");
        }
        Operation {
            middleware: self.middleware.into(),
            body: OperationBody::Realtime {
                incoming: self.incoming.map(Arc::new),
                outgoing: self.outgoing.map(Arc::new),
                handler: into_boxed_realtime(handler),
            },
        }
    }

    fn warn_unused_events(&self, finisher: &str) {
        if self.incoming.is_some() || self.outgoing.is_some() {
            warn!(finisher, "Event schemas ignored on a non-realtime procedure");
        }
    }
}
