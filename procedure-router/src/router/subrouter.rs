//! Sub-router delegation
//!
//! A parent router forwards every request whose first two path segments match
//! a mount key to the router mounted there. The prefix is stripped, everything
//! else about the request (method, headers, body, extensions) is kept, and the
//! child's response goes back to the caller untouched.

use super::core::CompiledRouter;
use crate::metadata::RouterMetadata;
use crate::{RpcError, RpcResult};
use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use http::Uri;
use http::uri::PathAndQuery;

/// A router that can be mounted under another one, whatever its context type.
pub trait DynRouter: Send + Sync + 'static {
    /// Dispatch a request whose path is already relative to the mount point
    fn fetch(&self, request: Request<Body>) -> BoxFuture<'static, Response>;

    /// Introspection data of the mounted router
    fn metadata(&self) -> &RouterMetadata;
}

impl<Ctx: Clone + Send + Sync + 'static> DynRouter for CompiledRouter<Ctx> {
    fn fetch(&self, request: Request<Body>) -> BoxFuture<'static, Response> {
        let router = self.clone();
        Box::pin(async move { router.fetch(request).await })
    }

    fn metadata(&self) -> &RouterMetadata {
        CompiledRouter::metadata(self)
    }
}

/// Mount key of `path`: `/<segment1>/<segment2>`, or `None` with fewer than
/// two segments. Empty segments are skipped.
pub fn mount_key(path: &str) -> Option<String> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let first = segments.next()?;
    let second = segments.next()?;
    Some(format!("/{}/{}", first, second))
}

/// Strip the first two path segments from `uri`, keeping the query string.
///
/// The remainder is kept verbatim, trailing slash included: `/api/admin/stats/?x=1`
/// becomes `/stats/?x=1`; `/api/admin` becomes `/`.
pub fn rewrite_uri(uri: &Uri) -> RpcResult<Uri> {
    let rest = strip_mount_prefix(uri.path());
    let mut path = if rest.is_empty() { "/".to_owned() } else { rest.to_owned() };
    if let Some(query) = uri.query() {
        path.push('?');
        path.push_str(query);
    }

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(
        PathAndQuery::try_from(path)
            .map_err(|e| RpcError::bad_request("Invalid delegated path").with_cause(e.to_string()))?,
    );
    Uri::from_parts(parts).map_err(|e| RpcError::bad_request("Invalid delegated URI").with_cause(e.to_string()))
}

fn strip_mount_prefix(path: &str) -> &str {
    let mut rest = path;
    for _ in 0..2 {
        rest = rest.trim_start_matches('/');
        rest = rest.find('/').map_or("", |i| &rest[i..]);
    }
    rest
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mount_key() {
        assert_eq!(mount_key("/api/admin/stats").as_deref(), Some("/api/admin"));
        assert_eq!(mount_key("/api/admin").as_deref(), Some("/api/admin"));
        assert_eq!(mount_key("//api//admin/").as_deref(), Some("/api/admin"));
        assert_eq!(mount_key("/api"), None);
        assert_eq!(mount_key("/"), None);
        assert_eq!(mount_key(""), None);
    }

    #[test]
    fn test_rewrite_uri() {
        let uri: Uri = "/api/admin/stats/daily?from=1&to=2".parse().unwrap();
        assert_eq!(rewrite_uri(&uri).unwrap(), "/stats/daily?from=1&to=2");

        let uri: Uri = "/api/admin".parse().unwrap();
        assert_eq!(rewrite_uri(&uri).unwrap(), "/");

        let uri: Uri = "/api/admin/".parse().unwrap();
        assert_eq!(rewrite_uri(&uri).unwrap(), "/");

        let uri: Uri = "/api/admin/stats/?limit=5".parse().unwrap();
        assert_eq!(rewrite_uri(&uri).unwrap(), "/stats/?limit=5");

        let uri: Uri = "http://example.com/api/admin/stats".parse().unwrap();
        let rewritten = rewrite_uri(&uri).unwrap();
        assert_eq!(rewritten.host(), Some("example.com"));
        assert_eq!(rewritten.path(), "/stats");
    }

    proptest! {
        #[test]
        fn prop_mount_key_uses_first_two_segments(
            segments in proptest::collection::vec("[a-z0-9_-]{1,8}", 0..6)
        ) {
            let path = format!("/{}", segments.join("/"));
            let key = mount_key(&path);
            if segments.len() < 2 {
                prop_assert!(key.is_none());
            } else {
                prop_assert_eq!(key, Some(format!("/{}/{}", segments[0], segments[1])));
            }
        }

        #[test]
        fn prop_rewrite_keeps_the_rest(
            segments in proptest::collection::vec("[a-z0-9_-]{1,8}", 2..6),
            query in proptest::option::of("[a-z]{1,4}=[0-9]{1,3}")
        ) {
            let mut raw = format!("/{}", segments.join("/"));
            if let Some(q) = &query {
                raw.push('?');
                raw.push_str(q);
            }
            let uri: Uri = raw.parse().unwrap();
            let rewritten = rewrite_uri(&uri).unwrap();

            prop_assert_eq!(rewritten.path(), format!("/{}", segments[2..].join("/")));
            prop_assert_eq!(rewritten.query(), query.as_deref());
        }
    }
}
