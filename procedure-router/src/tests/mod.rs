//! Test module for procedure-router
//!
//! Router-level suites driving compiled routers end to end through
//! `tower::ServiceExt::oneshot`, plus property-based tests using proptest.

#[cfg(test)]
pub mod dispatch_tests;




#[cfg(test)]
pub mod subrouter_tests;

#[cfg(test)]
pub(crate) mod support {
    use axum::body::{Body, to_bytes};
    use axum::response::Response;
    use http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    /// Send one request through `app` and collect status and body.
    pub async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response: Response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    /// Like [`send`], decoding the body as JSON (`Null` when empty).
    pub async fn send_json(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, request).await;
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, value)
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn post_raw(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::post(uri).body(body.into()).unwrap()
    }
}
