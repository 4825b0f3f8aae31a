#![warn(missing_docs)]
//! # Procedure Router
//!
//! A declarative operation router over `axum`: query-style reads,
//! mutation-style writes and long-lived realtime channels behind one typed
//! procedure table.
//!
//! ## Overview
//!
//! - **Procedure table** with nested declarations flattened to `parent/child` paths
//! - **Schema validation** of query strings, JSON bodies and realtime events
//! - **Middleware pipeline** with per-request context accumulation
//! - **Realtime sessions** over websockets, bridged across instances by a pub/sub broker
//! - **Sub-routers** mounted at two-segment prefixes
//! - **Metadata** describing every procedure for client code generation
//!
//! ## Architecture
//!
//! ```text
//!   HTTP request
//!        │
//!        ▼
//! ┌───────────────────┐  /<s1>/<s2>/..   ┌──────────────────┐
//! │ CompiledRouter    │─────────────────▶│ mounted router   │
//! │   fetch()         │                  └──────────────────┘
//! └────────┬──────────┘
//!          │ GET /p  (read, realtime)   POST /p  (write)
//!          ▼
//! ┌───────────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ parse query/body  │──▶│ middleware   │──▶│ schema parse │──▶ handler
//! └───────────────────┘   └──────────────┘   └──────────────┘
//!                                │
//!                                ▼ realtime
//!                     ┌────────────────────────┐    ┌────────┐
//!                     │ upgrade → ServerSocket │◀──▶│ Broker │
//!                     └────────────────────────┘    └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use procedure_router::prelude::*;
//!
//! async fn get_user(
//!     req: RequestHandle<AppContext>,
//!     _ctx: MiddlewareContext,
//!     input: GetUserInput,
//! ) -> RpcResult<Json<User>> {
//!     req.context().users.get(&input.id).map(Json).ok_or_else(|| RpcError::not_found("User not found"))
//! }
//!
//! let router = Router::new()
//!     .context(AppContext::default())
//!     .procedure("users/get", procedure().input(get_user_schema()).query(get_user))
//!     .compile()?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! serve(listener, router.into_axum().layer(http_layers()), shutdown_signal()).await?;
//! ```
//!
//! ## Error Handling
//!
//! ```rust,ignore
//! RpcError::not_found("User not found")
//! RpcError::validation("Invalid input")
//!     .with_details(json!({ "field": "email", "reason": "invalid format" }))
//! ```
//!
//! Without a registered error handler every dispatch error is answered with
//! [`RpcError::into_response`](axum::response::IntoResponse): the status
//! derived from its code and a `{code, message, details?}` JSON body.
//!
//! ## Prelude
//!
//! ```rust,ignore
//! use procedure_router::prelude::*;
//! ```

mod config;
mod context;
pub mod declaration;
mod env;
mod error;
mod handler;
pub mod logging;
pub mod metadata;
pub mod middleware;
pub mod parsing;
pub mod procedure;
pub mod realtime;
mod request;
mod router;
pub mod schema;
pub mod server;
pub mod validation;
pub mod broker;

#[cfg(test)]
mod tests;

// Public API
pub use broker::{
    Broker, BrokerCredentials, BrokerFactory, BrokerSubscription, MemoryBroker, RestBroker,
    RestBrokerFactory,
};
pub use config::{
    ConfigValidationError, DEFAULT_BROKER_TOKEN_VAR, DEFAULT_BROKER_URL_VAR, RouterConfig, RpcConfig,
};
pub use context::{Context, ContextPatch, EmptyContext, MiddlewareContext};
pub use declaration::{Declaration, Entry, Group};
pub use env::Env;
pub use error::{ErrorHandler, RpcError, RpcErrorCode, RpcResult};
pub use handler::{Handler, HandlerFuture, RealtimeHandler, SessionFuture};
pub use metadata::{ProcedureDescriptor, RealtimeSchemaDescriptor, RouterMetadata};
pub use middleware::{Middleware, MiddlewareFn, Next, Step, from_fn};
pub use procedure::{Operation, OperationKind, ProcedureBuilder, procedure};
pub use realtime::{Io, Room, ServerSocket, SessionCallbacks, SessionHandler, SessionState};
pub use request::RequestHandle;
pub use router::{CompiledRouter, DynRouter, Router, RouterService, mount_key, rewrite_uri};
pub use schema::{EventSchemas, Schema, TypeSchema};
pub use server::{http_layers, serve};
pub use validation::{FieldError, Validate, ValidationResult, ValidationRules};

/// Prelude for convenient imports
///
/// ```rust,ignore
/// use procedure_router::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Router
        CompiledRouter,
        Declaration,
        Group,
        Router,
        // Procedures
        Operation,
        OperationKind,
        procedure,
        // Context and requests
        Context,
        ContextPatch,
        EmptyContext,
        Env,
        MiddlewareContext,
        RequestHandle,
        // Middleware
        Next,
        Step,
        from_fn,
        // Schemas
        EventSchemas,
        Schema,
        TypeSchema,
        Validate,
        ValidationResult,
        ValidationRules,
        // Realtime
        Io,
        ServerSocket,
        SessionCallbacks,
        SessionHandler,
        // Errors and configuration
        RouterConfig,
        RpcConfig,
        RpcError,
        RpcErrorCode,
        RpcResult,
        // Serving
        http_layers,
        serve,
    };
    pub use axum::Json;
    pub use async_trait::async_trait;
}
