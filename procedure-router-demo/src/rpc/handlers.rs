//! Procedure handlers
//!
//! Define your handlers here and register them in create_router().

use super::*;
use procedure_router::middleware::request_logger;
use procedure_router::prelude::*;
use serde_json::Value;
use tracing::{debug, info};

/// Room every chat session starts in
pub const LOBBY: &str = "lobby";

// =============================================================================
// Middleware
// =============================================================================

/// Require an `authorization` header and contribute the caller as `user`.
pub async fn auth(_ctx: MiddlewareContext, req: RequestHandle<AppContext>, next: Next) -> RpcResult<Step> {
    if req.header("authorization").is_none() {
        return Err(RpcError::unauthorized("Unauthorized"));
    }
    let caller = Caller {
        id: "user-123".into(),
        name: "Test User".into(),
    };
    Ok(next.proceed_with(ContextPatch::new().try_with("user", &caller)?))
}

// =============================================================================
// Router
// =============================================================================

/// Create the application router
pub fn create_router(ctx: AppContext, config: RpcConfig) -> RpcResult<CompiledRouter<AppContext>> {
    Router::new()
        .context(ctx.clone())
        .rpc_config(config)
        .with_middleware(request_logger())
        .procedure("health", procedure().query(health_handler))
        .group(
            "users",
            Group::new()
                .operation(
                    "get",
                    procedure()
                        .input(Schema::of::<GetUserInput>(GetUserInput::schema()))
                        .query(get_user),
                )
                .operation(
                    "create",
                    procedure()
                        .use_middleware(auth)
                        .input(Schema::of::<CreateUserInput>(CreateUserInput::schema()))
                        .mutation(create_user),
                ),
        )
        .procedure(
            "chat",
            procedure()
                .incoming(chat_events())
                .outgoing(EventSchemas::new().event("message", Schema::of::<ChatMessage>(ChatMessage::schema())))
                .realtime(chat),
        )
        .mount("/api/admin", admin_router(ctx)?)
        .compile()
}

/// Admin sub-router, mounted at `/api/admin`
fn admin_router(ctx: AppContext) -> RpcResult<CompiledRouter<AppContext>> {
    Router::new()
        .context(ctx)
        .procedure("stats", procedure().use_middleware(auth).query(stats))
        .compile()
}

fn chat_events() -> EventSchemas {
    EventSchemas::new()
        .event("message", Schema::of::<ChatMessage>(ChatMessage::schema()))
        .event(
            "join",
            Schema::of::<JoinRoom>(
                TypeSchema::object()
                    .with_property("room", TypeSchema::string())
                    .with_required("room"),
            ),
        )
}

// =============================================================================
// Root Handlers
// =============================================================================

async fn health_handler(_req: RequestHandle<AppContext>, _ctx: MiddlewareContext, _: ()) -> RpcResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    }))
}

// =============================================================================
// User Handlers
// =============================================================================

async fn get_user(req: RequestHandle<AppContext>, _ctx: MiddlewareContext, input: GetUserInput) -> RpcResult<Json<User>> {
    req.context()
        .db
        .get_user(input.id)
        .await
        .map(Json)
        .ok_or_else(|| RpcError::not_found(format!("User {} not found", input.id)))
}

async fn create_user(
    req: RequestHandle<AppContext>,
    ctx: MiddlewareContext,
    input: CreateUserInput,
) -> RpcResult<Json<User>> {
    let caller: Caller = ctx.require("user")?;
    let user = req.context().db.create_user(&input.name, &input.email).await;
    info!(user_id = user.id, created_by = %caller.id, "User created");
    Ok(Json(user))
}

async fn stats(req: RequestHandle<AppContext>, _ctx: MiddlewareContext, _: ()) -> RpcResult<Json<StatsResponse>> {
    Ok(Json(StatsResponse {
        user_count: req.context().db.count_users().await,
    }))
}

// =============================================================================
// Chat
// =============================================================================

/// Every session starts in the lobby. `join` moves it into another room,
/// `message` is broadcast to the room named in the payload.
async fn chat(_req: RequestHandle<AppContext>, _ctx: MiddlewareContext, _io: Io) -> RpcResult<SessionCallbacks> {
    Ok(SessionCallbacks::new()
        .on_connect(|socket: ServerSocket| async move {
            let joiner = socket.clone();
            socket.on("join", move |payload: Value| {
                let socket = joiner.clone();
                async move {
                    let JoinRoom { room } = serde_json::from_value(payload)?;
                    socket.join(&room).await
                }
            });

            let sender = socket.clone();
            socket.on("message", move |payload: Value| {
                let socket = sender.clone();
                async move {
                    let message: ChatMessage = serde_json::from_value(payload)?;
                    socket.broadcast(&message.room, "message", &message).await
                }
            });

            if let Err(e) = socket.join(LOBBY).await {
                debug!(session_id = %socket.id(), error = %e, "Could not join lobby");
            }
        })
        .on_disconnect(|socket: ServerSocket| async move {
            debug!(session_id = %socket.id(), rooms = ?socket.rooms(), "Chat session ended");
        }))
}
