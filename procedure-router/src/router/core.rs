//! Core router implementations
//!
//! This module contains the main `Router` builder and the `CompiledRouter`
//! dispatch engine it produces.

use super::dispatch::dispatch;
use super::subrouter::{DynRouter, mount_key, rewrite_uri};
use crate::broker::{BrokerFactory, RestBrokerFactory};
use crate::config::{RouterConfig, RpcConfig};
use crate::context::{Context, MiddlewareContext};
use crate::declaration::{Declaration, Group, validate_path};
use crate::env::Env;
use crate::error::ErrorHandler;
use crate::metadata::{ProcedureDescriptor, RouterMetadata, describe_operation};
use crate::middleware::{MiddlewareFn, Next, Step, from_fn};
use crate::procedure::{Operation, OperationKind};
use crate::request::RequestHandle;
use crate::{RpcError, RpcResult};
use axum::body::Body;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get, post};
use http::request::Parts;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tower::ServiceExt;
use tracing::{debug, trace, warn};

// =============================================================================
// Shared dispatch state
// =============================================================================

/// Router-wide state shared by every route of a compiled router.
pub(crate) struct Shared<Ctx: Clone + Send + Sync + 'static> {
    pub(crate) context: Context<Ctx>,
    pub(crate) env: Env,
    pub(crate) rpc_config: RpcConfig,
    pub(crate) config: Arc<RouterConfig>,
    pub(crate) path_config: HashMap<String, Arc<RouterConfig>>,
    pub(crate) error_handler: Option<ErrorHandler<Ctx>>,
    pub(crate) broker_factory: Arc<dyn BrokerFactory>,
}

impl<Ctx: Clone + Send + Sync + 'static> Shared<Ctx> {
    /// Build the request handle for `procedure`.
    ///
    /// Environment bindings forwarded by a parent router take precedence over
    /// this router's own.
    pub(crate) fn request_handle(&self, parts: Parts, procedure: &Arc<str>) -> RequestHandle<Ctx> {
        let env = parts
            .extensions
            .get::<Env>()
            .cloned()
            .unwrap_or_else(|| self.env.clone());
        let config = self
            .path_config
            .get(&**procedure)
            .cloned()
            .unwrap_or_else(|| self.config.clone());
        RequestHandle::new(parts, procedure.clone(), self.context.clone(), env, config)
    }

    /// Turn a dispatch error into the response sent to the caller.
    pub(crate) fn fail(&self, error: RpcError, req: &RequestHandle<Ctx>) -> Response {
        if error.code.is_server_error() {
            warn!(
                procedure = %req.procedure(),
                error_code = %error.code,
                error = %error.message,
                "Procedure failed"
            );
        } else {
            debug!(
                procedure = %req.procedure(),
                error_code = %error.code,
                error = %error.message,
                "Procedure rejected request"
            );
        }

        match &self.error_handler {
            Some(handler) => handler(error, req),
            None => error.into_response(),
        }
    }
}

// =============================================================================
// Compiled Router
// =============================================================================

/// A compiled router: the procedure table bound to HTTP routes, plus mounted
/// sub-routers and the metadata captured at registration.
///
/// Cheap to clone. Serve it with [`into_axum`](Self::into_axum) or call
/// [`fetch`](Self::fetch) directly.
///
/// # Example
/// ```rust,ignore
/// let router = Router::new()
///     .context(AppContext::default())
///     .procedure("health", health)
///     .compile()?;
///
/// let app = router.into_axum();
/// ```
pub struct CompiledRouter<Ctx: Clone + Send + Sync + 'static> {
    shared: Arc<Shared<Ctx>>,
    routes: axum::Router,
    mounts: Arc<HashMap<String, Arc<dyn DynRouter>>>,
    metadata: Arc<RouterMetadata>,
}

impl<Ctx: Clone + Send + Sync + 'static> Clone for CompiledRouter<Ctx> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            routes: self.routes.clone(),
            mounts: self.mounts.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl<Ctx: Clone + Send + Sync + 'static> CompiledRouter<Ctx> {
    /// Application context
    pub fn context(&self) -> &Ctx {
        self.shared.context.inner()
    }

    /// Dispatcher configuration
    pub fn rpc_config(&self) -> &RpcConfig {
        &self.shared.rpc_config
    }

    /// Metadata captured when the procedures were registered
    pub fn metadata(&self) -> &RouterMetadata {
        &self.metadata
    }

    /// Registered procedure paths, sorted
    pub fn procedures(&self) -> Vec<String> {
        self.metadata.procedures.keys().cloned().collect()
    }

    /// Kind of the procedure at `path`
    pub fn kind_of(&self, path: &str) -> Option<OperationKind> {
        self.metadata.get(path).map(ProcedureDescriptor::kind)
    }

    /// Mount keys of the attached sub-routers, sorted
    pub fn mounts(&self) -> Vec<String> {
        self.metadata.sub_routers.clone()
    }

    /// Dispatch one request.
    ///
    /// A request whose first two path segments match a mount key is forwarded
    /// to that sub-router with the prefix stripped, and the child's response is
    /// returned unchanged. Everything else goes to this router's own procedures;
    /// unbound paths get `404 PROCEDURE_NOT_FOUND`, a wrong method `405`.
    pub async fn fetch(&self, mut request: Request<Body>) -> Response {
        if let Some(key) = mount_key(request.uri().path())
            && let Some(child) = self.mounts.get(&key)
        {
            let uri = match rewrite_uri(request.uri()) {
                Ok(uri) => uri,
                Err(e) => return e.into_response(),
            };
            debug!(
                mount = %key,
                from = %request.uri().path(),
                to = %uri.path(),
                "Delegating to sub-router"
            );
            *request.uri_mut() = uri;
            if request.extensions().get::<Env>().is_none() {
                request.extensions_mut().insert(self.shared.env.clone());
            }
            return child.fetch(request).await;
        }

        trace!(method = %request.method(), path = %request.uri().path(), "Routing request");
        match self.routes.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

impl<Ctx: Clone + Send + Sync + 'static> fmt::Debug for CompiledRouter<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRouter")
            .field("procedures", &self.metadata.registered_paths)
            .field("mounts", &self.metadata.sub_routers)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Router
// =============================================================================

/// Router builder.
///
/// Registration problems (invalid paths, duplicates, conflicting mounts) are
/// collected and reported by [`compile`](Self::compile).
///
/// # Example
/// ```rust,ignore
/// let router = Router::new()
///     .context(AppContext::default())
///     .env(Env::process())
///     .on_error(|err, _req| err.into_response())
///     .procedure("health", procedure().query(health))
///     .group("users", Group::new()
///         .operation("get", procedure().input(get_user_schema()).query(get_user))
///         .operation("create", procedure().input(create_user_schema()).mutation(create_user)))
///     .mount("/api/admin", admin_router()?)
///     .compile()?;
/// ```
pub struct Router<Ctx: Clone + Send + Sync + 'static> {
    context: Option<Ctx>,
    env: Env,
    rpc_config: RpcConfig,
    config: RouterConfig,
    path_config: BTreeMap<String, RouterConfig>,
    error_handler: Option<ErrorHandler<Ctx>>,
    broker_factory: Option<Arc<dyn BrokerFactory>>,
    middleware: Vec<MiddlewareFn<Ctx>>,
    procedures: Vec<(String, Operation<Ctx>)>,
    descriptors: BTreeMap<String, ProcedureDescriptor>,
    mounts: Vec<(String, Arc<dyn DynRouter>)>,
    errors: Vec<RpcError>,
}

impl<Ctx: Clone + Send + Sync + 'static> Default for Router<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Clone + Send + Sync + 'static> Router<Ctx> {
    /// Create a new empty router
    pub fn new() -> Self {
        Self {
            context: None,
            env: Env::process(),
            rpc_config: RpcConfig::default(),
            config: RouterConfig::new(),
            path_config: BTreeMap::new(),
            error_handler: None,
            broker_factory: None,
            middleware: Vec::new(),
            procedures: Vec::new(),
            descriptors: BTreeMap::new(),
            mounts: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Set the application context
    pub fn context(mut self, ctx: Ctx) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Environment bindings used when this router is not reached through a parent
    pub fn env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    /// Dispatcher configuration
    pub fn rpc_config(mut self, config: RpcConfig) -> Self {
        self.rpc_config = config;
        self
    }

    /// Router-wide configuration bag
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Configuration bag for one procedure path; replaces the router-wide one there
    pub fn path_config(mut self, path: impl Into<String>, config: RouterConfig) -> Self {
        self.path_config.insert(path.into(), config);
        self
    }

    /// Register the error handler. Registering again replaces the previous one.
    pub fn on_error<F, R>(mut self, handler: F) -> Self
    where
        F: Fn(RpcError, &RequestHandle<Ctx>) -> R + Send + Sync + 'static,
        R: IntoResponse,
    {
        if self.error_handler.is_some() {
            debug!("Replacing previously registered error handler");
        }
        self.error_handler = Some(Arc::new(move |error, req| handler(error, req).into_response()));
        self
    }

    /// Broker factory for realtime procedures (default: [`RestBrokerFactory`])
    pub fn broker_factory(mut self, factory: impl BrokerFactory) -> Self {
        self.broker_factory = Some(Arc::new(factory));
        self
    }

    /// Add a router-wide middleware step; it runs before each procedure's own.
    pub fn middleware<F, Fut>(self, f: F) -> Self
    where
        F: Fn(MiddlewareContext, RequestHandle<Ctx>, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Step>> + Send + 'static,
    {
        self.with_middleware(from_fn(f))
    }

    /// Add an already boxed router-wide middleware step
    pub fn with_middleware(mut self, middleware: MiddlewareFn<Ctx>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Register an operation at `path` (`segment` or `segment/segment`).
    pub fn procedure(mut self, path: impl Into<String>, operation: Operation<Ctx>) -> Self {
        let path = path.into();
        if let Err(e) = validate_path(&path) {
            warn!(path = %path, error = %e.message, "Rejected procedure path");
            self.errors.push(e);
            return self;
        }
        if self.descriptors.contains_key(&path) {
            warn!(path = %path, "Duplicate procedure path");
            self.errors
                .push(RpcError::conflict(format!("Procedure path '{}' is declared twice", path)));
            return self;
        }

        let descriptor = describe_operation(&operation);
        debug!(path = %path, kind = %operation.kind(), "Registered procedure");
        self.descriptors.insert(path.clone(), descriptor);
        self.procedures.push((path, operation));
        self
    }

    /// Register every operation of `group` under `segment/`.
    pub fn group(self, segment: impl Into<String>, group: Group<Ctx>) -> Self {
        self.declare(Declaration::new().group(segment, group))
    }

    /// Register a whole declaration, flattened to `parent/child` paths.
    pub fn declare(mut self, declaration: Declaration<Ctx>) -> Self {
        match declaration.flatten() {
            Ok(flat) => flat
                .into_iter()
                .fold(self, |router, (path, operation)| router.procedure(path, operation)),
            Err(e) => {
                self.errors.push(e);
                self
            }
        }
    }

    /// Attach `child` under the mount key `/<segment1>/<segment2>`.
    ///
    /// Keys with a different number of segments are accepted but can never
    /// match a request.
    pub fn mount(mut self, key: &str, child: impl DynRouter) -> Self {
        let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
        let normalized = format!("/{}", segments.join("/"));

        if segments.len() != 2 {
            warn!(
                mount = %normalized,
                segments = segments.len(),
                "Mount key does not have exactly two segments and will never match"
            );
        }
        if self.mounts.iter().any(|(existing, _)| *existing == normalized) {
            self.errors
                .push(RpcError::conflict(format!("Mount key '{}' is used twice", normalized)));
            return self;
        }

        debug!(mount = %normalized, "Mounted sub-router");
        self.mounts.push((normalized, Arc::new(child)));
        self
    }

    /// Descriptors of the registered procedures, computed at registration
    pub fn describe(&self) -> &BTreeMap<String, ProcedureDescriptor> {
        &self.descriptors
    }

    /// Registered procedure paths in registration order
    pub fn procedures(&self) -> Vec<String> {
        self.procedures.iter().map(|(path, _)| path.clone()).collect()
    }

    /// Bind every procedure to its route and freeze the router.
    ///
    /// # Errors
    ///
    /// The first registration error, an invalid [`RpcConfig`], or a missing
    /// context.
    pub fn compile(self) -> RpcResult<CompiledRouter<Ctx>> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }
        self.rpc_config.validate()?;
        let context = self
            .context
            .ok_or_else(|| RpcError::internal("Router context not initialized"))?;

        let shared = Arc::new(Shared {
            context: Context::new(context),
            env: self.env,
            rpc_config: self.rpc_config,
            config: Arc::new(self.config.clone()),
            path_config: self
                .path_config
                .iter()
                .map(|(path, config)| (path.clone(), Arc::new(config.clone())))
                .collect(),
            error_handler: self.error_handler,
            broker_factory: self
                .broker_factory
                .unwrap_or_else(|| Arc::new(RestBrokerFactory::new())),
        });

        let mounts: HashMap<String, Arc<dyn DynRouter>> = self.mounts.into_iter().collect();
        let mut sub_routers: Vec<String> = mounts.keys().cloned().collect();
        sub_routers.sort();

        let registered_paths: Vec<String> = self.procedures.iter().map(|(p, _)| p.clone()).collect();
        let mut routes = axum::Router::new();

        for (path, operation) in self.procedures {
            if let Some(key) = mount_key(&format!("/{}", path))
                && mounts.contains_key(&key)
            {
                warn!(path = %path, mount = %key, "Procedure is shadowed by a mounted sub-router");
            }

            let kind = operation.kind();
            let operation = Arc::new(Operation {
                middleware: self
                    .middleware
                    .iter()
                    .chain(operation.middleware.iter())
                    .cloned()
                    .collect(),
                body: operation.body,
            });
            let procedure: Arc<str> = Arc::from(path.as_str());
            let route = format!("/{}", path);

            trace!(route = %route, kind = %kind, "Binding route");
            routes = routes.route(&route, bind(kind, shared.clone(), procedure, operation));
        }
        routes = routes.fallback(procedure_not_found);

        let metadata = RouterMetadata {
            procedures: self.descriptors,
            registered_paths,
            sub_routers,
            config: self.config,
            path_config: self.path_config,
        };

        debug!(
            procedures = metadata.len(),
            mounts = metadata.sub_routers.len(),
            "Router compiled"
        );

        Ok(CompiledRouter {
            shared,
            routes,
            mounts: Arc::new(mounts),
            metadata: Arc::new(metadata),
        })
    }
}

/// Paths with no procedure bound, after no mount matched.
async fn procedure_not_found(request: Request) -> Response {
    let path = request.uri().path().trim_start_matches('/');
    debug!(path = %path, "No procedure bound to path");
    RpcError::procedure_not_found(path).into_response()
}

/// Read and realtime operations answer `GET`, writes answer `POST`.
fn bind<Ctx: Clone + Send + Sync + 'static>(
    kind: OperationKind,
    shared: Arc<Shared<Ctx>>,
    procedure: Arc<str>,
    operation: Arc<Operation<Ctx>>,
) -> MethodRouter {
    let handler = move |request: Request| dispatch(shared.clone(), procedure.clone(), operation.clone(), request);
    match kind {
        OperationKind::Read | OperationKind::Realtime => get(handler),
        OperationKind::Write => post(handler),
    }
}
