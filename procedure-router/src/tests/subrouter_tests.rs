//! Sub-router tests - prefix delegation between independently compiled routers

use super::support::{get, send, send_json};
use crate::{
    CompiledRouter, EmptyContext, Env, MiddlewareContext, RequestHandle, Router, RpcError, RpcErrorCode,
    RpcResult, procedure,
};
use axum::Json;
use http::StatusCode;
use serde_json::{Value, json};

// =============================================================================
// Test Fixtures
// =============================================================================

#[derive(Clone)]
struct AdminContext {
    label: &'static str,
}

async fn whoami(req: RequestHandle<AdminContext>, _ctx: MiddlewareContext, input: Value) -> RpcResult<Json<Value>> {
    Ok(Json(json!({
        "router": req.context().label,
        "path": req.path(),
        "query": req.query_string(),
        "input": input,
        "region": req.env().get("REGION"),
    })))
}

async fn denied(_req: RequestHandle<AdminContext>, _ctx: MiddlewareContext, _input: ()) -> RpcResult<()> {
    Err(RpcError::forbidden("admins only"))
}

fn admin() -> CompiledRouter<AdminContext> {
    Router::new()
        .context(AdminContext { label: "admin" })
        .env(Env::from_map([("REGION", "child")]))
        .on_error(|err: RpcError, _req: &RequestHandle<AdminContext>| {
            (StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST), err.message)
        })
        .procedure("stats", procedure().input(crate::Schema::any()).query(whoami))
        .procedure("denied", procedure().query(denied))
        .compile()
        .unwrap()
}

async fn root(_req: RequestHandle<EmptyContext>, _ctx: MiddlewareContext, _input: ()) -> RpcResult<&'static str> {
    Ok("root")
}

fn parent(env: Env) -> axum::Router {
    Router::new()
        .context(EmptyContext)
        .env(env)
        .procedure("health", procedure().query(root))
        .mount("/api/admin", admin())
        .compile()
        .unwrap()
        .into_axum()
}

// =============================================================================
// Delegation
// =============================================================================

#[tokio::test]
async fn test_mounted_router_sees_stripped_path_and_query() {
    let app = parent(Env::from_map([("REGION", "parent")]));
    let (status, body) = send_json(&app, get("/api/admin/stats?limit=5")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["router"], "admin");
    assert_eq!(body["path"], "/stats");
    assert_eq!(body["query"], "limit=5");
    assert_eq!(body["input"], json!({ "limit": 5 }));
}

#[tokio::test]
async fn test_parent_env_reaches_child() {
    let app = parent(Env::from_map([("REGION", "parent")]));
    let (_, body) = send_json(&app, get("/api/admin/stats")).await;
    assert_eq!(body["region"], "parent");
}

#[tokio::test]
async fn test_child_error_handler_answers_child_errors() {
    let app = parent(Env::from_map::<_, String, String>([]));
    let (status, body) = send(&app, get("/api/admin/denied")).await;
    assert_eq!(status.as_u16(), 499);
    assert_eq!(body, b"admins only");
}

#[tokio::test]
async fn test_child_404_is_returned_unchanged() {
    let app = parent(Env::from_map::<_, String, String>([]));
    let (status, _) = send(&app, get("/api/admin/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_non_matching_prefix_stays_local() {
    let app = parent(Env::from_map::<_, String, String>([]));

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"root");

    let (status, _) = send(&app, get("/api/other/stats")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_nested_mounts_delegate_twice() {
    let middle = Router::new()
        .context(EmptyContext)
        .mount("/v1/admin", admin())
        .compile()
        .unwrap();
    let app = Router::new()
        .context(EmptyContext)
        .mount("/api/gateway", middle)
        .compile()
        .unwrap()
        .into_axum();

    let (status, body) = send_json(&app, get("/api/gateway/v1/admin/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/stats");
}

#[tokio::test]
async fn test_mounted_router_keeps_its_own_metadata() {
    let parent = Router::new()
        .context(EmptyContext)
        .procedure("health", procedure().query(root))
        .mount("api/admin/", admin())
        .compile()
        .unwrap();

    assert_eq!(parent.mounts(), vec!["/api/admin"]);
    assert_eq!(parent.procedures(), vec!["health"]);
    assert!(parent.metadata().get("stats").is_none());
}

#[test]
fn test_duplicate_mount_is_conflict() {
    let err = Router::new()
        .context(EmptyContext)
        .mount("/api/admin", admin())
        .mount("/api/admin/", admin())
        .compile()
        .err()
        .unwrap();
    assert_eq!(err.code, RpcErrorCode::Conflict);
}

#[tokio::test]
async fn test_single_segment_mount_never_matches() {
    let app = Router::new()
        .context(EmptyContext)
        .mount("/admin", admin())
        .compile()
        .unwrap()
        .into_axum();

    let (status, _) = send(&app, get("/admin/stats")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
