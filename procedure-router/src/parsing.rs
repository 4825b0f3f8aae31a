//! Query and body parsing
//!
//! Runs ahead of user middleware, and only for procedures that declare an input
//! schema. An empty result counts as "no input": the schema receives nothing
//! rather than an empty object.

use crate::{RpcError, RpcResult};
use axum::body::Body;
use bytes::BytesMut;
use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::{debug, trace};

/// Decode a query string into a JSON object.
///
/// Each value that parses as JSON keeps its JSON type (`?limit=10` gives a
/// number, `?tags=["a"]` an array); anything else stays a string. A key that
/// repeats keeps its last value.
pub fn parse_query(query: Option<&str>) -> Map<String, Value> {
    let Some(query) = query else {
        return Map::new();
    };

    url::form_urlencoded::parse(query.as_bytes())
        .map(|(key, raw)| {
            let value = serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw.into_owned()));
            (key.into_owned(), value)
        })
        .collect()
}

/// Read and decode a JSON request body of at most `limit` bytes.
///
/// Returns `Ok(None)` for an empty body. Bodies over the limit fail with
/// `PAYLOAD_TOO_LARGE`, malformed JSON with `BAD_REQUEST`.
pub async fn parse_body(body: Body, limit: usize) -> RpcResult<Option<Value>> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| RpcError::bad_request("Failed to read request body").with_cause(e.to_string()))?;
        if buf.len() + chunk.len() > limit {
            debug!(limit, "Request body exceeds size limit");
            return Err(RpcError::payload_too_large(format!(
                "Request body exceeds {} bytes",
                limit
            )));
        }
        buf.extend_from_slice(&chunk);
    }

    if buf.iter().all(u8::is_ascii_whitespace) {
        trace!("Empty request body");
        return Ok(None);
    }

    serde_json::from_slice(&buf)
        .map(Some)
        .map_err(|e| RpcError::bad_request(format!("Request body is not valid JSON: {}", e)))
}

/// Collapse empty structures to "no input".
pub fn non_empty_input(value: Option<Value>) -> Option<Value> {
    value.filter(|value| match value {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::String(s) => !s.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RpcErrorCode;
    use serde_json::json;

    #[test]
    fn test_parse_query_decodes_json_values() {
        let parsed = parse_query(Some("id=42&name=ada&active=true&tags=%5B%22a%22%5D&id=43"));

        assert_eq!(parsed["id"], json!(43));
        assert_eq!(parsed["name"], json!("ada"));
        assert_eq!(parsed["active"], json!(true));
        assert_eq!(parsed["tags"], json!(["a"]));
    }

    #[test]
    fn test_parse_query_keeps_non_json_strings() {
        let parsed = parse_query(Some("q=hello+world&v=1.2.3"));
        assert_eq!(parsed["q"], json!("hello world"));
        assert_eq!(parsed["v"], json!("1.2.3"));
    }

    #[test]
    fn test_parse_query_empty() {
        assert!(parse_query(None).is_empty());
        assert!(parse_query(Some("")).is_empty());
    }

    #[test]
    fn test_non_empty_input() {
        assert_eq!(non_empty_input(None), None);
        assert_eq!(non_empty_input(Some(json!({}))), None);
        assert_eq!(non_empty_input(Some(json!([]))), None);
        assert_eq!(non_empty_input(Some(Value::Null)), None);
        assert_eq!(non_empty_input(Some(json!({"a": 1}))), Some(json!({"a": 1})));
        assert_eq!(non_empty_input(Some(json!(0))), Some(json!(0)));
    }

    #[tokio::test]
    async fn test_parse_body() {
        let parsed = parse_body(Body::from(r#"{"name":"ada"}"#), 1024).await.unwrap();
        assert_eq!(parsed, Some(json!({"name": "ada"})));

        assert_eq!(parse_body(Body::empty(), 1024).await.unwrap(), None);
        assert_eq!(parse_body(Body::from("  \n"), 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_parse_body_errors() {
        let err = parse_body(Body::from("{nope"), 1024).await.unwrap_err();
        assert_eq!(err.code, RpcErrorCode::BadRequest);

        let err = parse_body(Body::from(vec![b'1'; 64]), 16).await.unwrap_err();
        assert_eq!(err.code, RpcErrorCode::PayloadTooLarge);
    }
}
