//! Dispatch tests - read/write procedures through a compiled router
//!
//! Covers input sourcing per operation kind, the empty-input rule, schema
//! validation, route binding (404/405) and the error handler contract.

use super::support::{get, post_json, post_raw, send, send_json};
use crate::{
    EmptyContext, MiddlewareContext, RequestHandle, Router, RouterConfig, RpcConfig, RpcError,
    RpcErrorCode, RpcResult, Schema, TypeSchema, Validate, ValidationResult, ValidationRules,
    procedure,
};
use axum::Json;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// =============================================================================
// Test Fixtures
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct GetUser {
    id: String,
}

impl Validate for GetUser {
    fn validate(&self) -> ValidationResult {
        ValidationRules::new().required("id", &self.id).build()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CreateUser {
    name: String,
    email: String,
}

impl Validate for CreateUser {
    fn validate(&self) -> ValidationResult {
        ValidationRules::new()
            .min_length("name", &self.name, 2)
            .email("email", &self.email)
            .build()
    }
}

fn get_user_schema() -> Schema {
    Schema::of::<GetUser>(
        TypeSchema::object()
            .with_property("id", TypeSchema::string())
            .with_required("id"),
    )
}

fn create_user_schema() -> Schema {
    Schema::of::<CreateUser>(
        TypeSchema::object()
            .with_property("name", TypeSchema::string())
            .with_property("email", TypeSchema::string().with_format("email"))
            .with_required("name")
            .with_required("email"),
    )
}

async fn get_user(_req: RequestHandle<EmptyContext>, _ctx: MiddlewareContext, input: GetUser) -> RpcResult<Json<Value>> {
    Ok(Json(json!({ "id": input.id, "name": "Test User" })))
}

async fn create_user(
    _req: RequestHandle<EmptyContext>,
    _ctx: MiddlewareContext,
    input: CreateUser,
) -> RpcResult<(StatusCode, Json<Value>)> {
    Ok((StatusCode::CREATED, Json(json!({ "name": input.name, "email": input.email }))))
}

/// Echoes whatever input the handler received, `null` included.
async fn echo(_req: RequestHandle<EmptyContext>, _ctx: MiddlewareContext, input: Value) -> RpcResult<Json<Value>> {
    Ok(Json(json!({ "input": input })))
}

async fn ping(_req: RequestHandle<EmptyContext>, _ctx: MiddlewareContext, _input: ()) -> RpcResult<()> {
    Ok(())
}

fn app() -> axum::Router {
    Router::new()
        .context(EmptyContext)
        .procedure("users/get", procedure().input(get_user_schema()).query(get_user))
        .procedure("users/create", procedure().input(create_user_schema()).mutation(create_user))
        .procedure("echo/read", procedure().input(Schema::any()).query(echo))
        .procedure("echo/write", procedure().input(Schema::any()).mutation(echo))
        .procedure("echo/bare", procedure().mutation(echo))
        .procedure("ping", procedure().query(ping))
        .compile()
        .unwrap()
        .into_axum()
}

// =============================================================================
// Read Operations
// =============================================================================

#[tokio::test]
async fn test_read_takes_input_from_query() {
    let (status, body) = send_json(&app(), get("/users/get?id=abc")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "id": "abc", "name": "Test User" }));
}

#[tokio::test]
async fn test_read_query_values_keep_json_types() {
    let (_, body) = send_json(&app(), get("/echo/read?limit=10&flag=true&name=bob&tags=%5B%22a%22%5D")).await;
    assert_eq!(
        body["input"],
        json!({ "limit": 10, "flag": true, "name": "bob", "tags": ["a"] })
    );
}

#[tokio::test]
async fn test_read_empty_query_is_no_input() {
    let (status, body) = send_json(&app(), get("/echo/read")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["input"], Value::Null);
}

#[tokio::test]
async fn test_read_validation_failure_is_422() {
    let (status, body) = send_json(&app(), get("/users/get?id=%20")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["details"][0]["field"], "id");
}

#[tokio::test]
async fn test_read_missing_input_fails_schema() {
    let (status, body) = send_json(&app(), get("/users/get")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unit_output_is_empty_200() {
    let (status, body) = send(&app(), get("/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

// =============================================================================
// Write Operations
// =============================================================================

#[tokio::test]
async fn test_write_takes_input_from_body() {
    let (status, body) = send_json(
        &app(),
        post_json("/users/create", &json!({ "name": "Alice", "email": "alice@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["email"], "alice@example.com");
}

#[tokio::test]
async fn test_write_reports_every_failing_field() {
    let (status, body) = send_json(&app(), post_json("/users/create", &json!({ "name": "A", "email": "nope" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_write_empty_shapes_are_no_input() {
    for raw in ["", "   ", "{}", "[]", "null"] {
        let (status, body) = send_json(&app(), post_raw("/echo/write", raw)).await;
        assert_eq!(status, StatusCode::OK, "body {:?}", raw);
        assert_eq!(body["input"], Value::Null, "body {:?}", raw);
    }
}

#[tokio::test]
async fn test_write_invalid_json_is_400() {
    let (status, body) = send_json(&app(), post_raw("/echo/write", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_write_without_schema_ignores_body() {
    let (status, body) = send_json(&app(), post_raw("/echo/bare", "{not json")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["input"], Value::Null);
}

#[tokio::test]
async fn test_write_body_over_limit_is_413() {
    let app = Router::new()
        .context(EmptyContext)
        .rpc_config(RpcConfig::new().with_max_body_size(16))
        .procedure("echo", procedure().input(Schema::any()).mutation(echo))
        .compile()
        .unwrap()
        .into_axum();

    let (status, body) = send_json(&app, post_json("/echo", &json!({ "text": "x".repeat(64) }))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
}

// =============================================================================
// Route Binding
// =============================================================================

#[tokio::test]
async fn test_unknown_path_is_404() {
    let (status, body) = send_json(&app(), get("/users/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "PROCEDURE_NOT_FOUND");
    assert_eq!(body["message"], "Procedure 'users/missing' not found");
}

#[tokio::test]
async fn test_wrong_method_is_405() {
    let (status, _) = send(&app(), post_json("/users/get", &json!({ "id": "1" }))).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let (status, _) = send(&app(), get("/users/create")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_per_path_config_reaches_handler() {
    async fn config_of(req: RequestHandle<EmptyContext>, _ctx: MiddlewareContext, _input: ()) -> RpcResult<Json<Value>> {
        Ok(Json(serde_json::to_value(req.config())?))
    }

    let app = Router::new()
        .context(EmptyContext)
        .config(RouterConfig::new().with("tier", "default"))
        .path_config("special", RouterConfig::new().with("tier", "gold"))
        .procedure("plain", procedure().query(config_of))
        .procedure("special", procedure().query(config_of))
        .compile()
        .unwrap()
        .into_axum();

    assert_eq!(send_json(&app, get("/plain")).await.1, json!({ "tier": "default" }));
    assert_eq!(send_json(&app, get("/special")).await.1, json!({ "tier": "gold" }));
}

// =============================================================================
// Error Handler
// =============================================================================

fn app_with_error_handler(calls: Arc<AtomicUsize>) -> axum::Router {
    async fn fail(_req: RequestHandle<EmptyContext>, _ctx: MiddlewareContext, _input: ()) -> RpcResult<()> {
        Err(RpcError::conflict("already exists").with_cause("unique index"))
    }

    Router::new()
        .context(EmptyContext)
        .on_error(move |err: RpcError, req: &RequestHandle<EmptyContext>| {
            calls.fetch_add(1, Ordering::SeqCst);
            (
                StatusCode::IM_A_TEAPOT,
                Json(json!({ "handled": err.code, "procedure": req.procedure() })),
            )
        })
        .procedure("fail", procedure().query(fail))
        .procedure("users/create", procedure().input(create_user_schema()).mutation(create_user))
        .compile()
        .unwrap()
        .into_axum()
}

#[tokio::test]
async fn test_error_handler_receives_handler_errors() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (status, body) = send_json(&app_with_error_handler(calls.clone()), get("/fail")).await;

    assert_eq!(status, StatusCode::IM_A_TEAPOT);
    assert_eq!(body, json!({ "handled": "CONFLICT", "procedure": "fail" }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_error_handler_receives_parse_and_validation_errors() {
    let calls = Arc::new(AtomicUsize::new(0));
    let app = app_with_error_handler(calls.clone());

    let (_, body) = send_json(&app, post_raw("/users/create", "{broken")).await;
    assert_eq!(body["handled"], "BAD_REQUEST");

    let (_, body) = send_json(&app, post_json("/users/create", &json!({ "name": "", "email": "" }))).await;
    assert_eq!(body["handled"], "VALIDATION_ERROR");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_error_handler_not_used_for_unbound_routes() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (status, _) = send(&app_with_error_handler(calls.clone()), get("/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_default_error_response_hides_cause() {
    async fn fail(_req: RequestHandle<EmptyContext>, _ctx: MiddlewareContext, _input: ()) -> RpcResult<()> {
        Err(RpcError::internal("database password is hunter2").with_cause("pool exhausted"))
    }

    let app = Router::new()
        .context(EmptyContext)
        .procedure("fail", procedure().query(fail))
        .compile()
        .unwrap()
        .into_axum();

    let (status, body) = send_json(&app, get("/fail")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "code": "INTERNAL_ERROR", "message": "An internal error occurred" }));
}

// =============================================================================
// Compilation
// =============================================================================

#[test]
fn test_compile_requires_context() {
    let err = Router::<EmptyContext>::new()
        .procedure("ping", procedure().query(ping))
        .compile()
        .err()
        .unwrap();
    assert_eq!(err.code, RpcErrorCode::InternalError);
}

#[test]
fn test_compile_reports_registration_errors() {
    let err = Router::new()
        .context(EmptyContext)
        .procedure("ping", procedure().query(ping))
        .procedure("ping", procedure().mutation(ping))
        .compile()
        .err()
        .unwrap();
    assert_eq!(err.code, RpcErrorCode::Conflict);

    let err = Router::new()
        .context(EmptyContext)
        .procedure("bad path", procedure().query(ping))
        .compile()
        .err()
        .unwrap();
    assert_eq!(err.code, RpcErrorCode::ValidationError);

    let err = Router::new()
        .context(EmptyContext)
        .procedure("admin/users/list", procedure().query(ping))
        .compile()
        .err()
        .unwrap();
    assert_eq!(err.code, RpcErrorCode::ValidationError);
}

#[test]
fn test_compile_rejects_invalid_config() {
    let err = Router::new()
        .context(EmptyContext)
        .rpc_config(RpcConfig::new().with_socket_buffer(0))
        .compile()
        .err()
        .unwrap();
    assert_eq!(err.code, RpcErrorCode::BadRequest);
    assert!(err.message.contains("socket_buffer"));
}
