//! Nested route declarations
//!
//! A router is declared as a mapping from path segment to either an operation
//! or a [`Group`] of operations. Groups nest exactly one level and are
//! flattened to `parent/child` paths before anything is registered.
//!
//! ```rust,ignore
//! let declaration = Declaration::new()
//!     .operation("health", health)
//!     .group("users", Group::new()
//!         .operation("get", get_user)
//!         .operation("create", create_user));
//!
//! // -> ["health", "users/get", "users/create"]
//! ```

use crate::procedure::Operation;
use crate::{RpcError, RpcResult};
use std::collections::HashSet;
use tracing::trace;

/// One entry of a [`Declaration`].
pub enum Entry<Ctx: Clone + Send + Sync + 'static> {
    /// A single operation at `segment`
    Operation(Operation<Ctx>),
    /// Operations at `segment/child`
    Group(Group<Ctx>),
}

/// Operations nested under one parent segment.
pub struct Group<Ctx: Clone + Send + Sync + 'static> {
    entries: Vec<(String, Operation<Ctx>)>,
}

impl<Ctx: Clone + Send + Sync + 'static> Default for Group<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Clone + Send + Sync + 'static> Group<Ctx> {
    /// Empty group
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Add an operation at `segment`
    pub fn operation(mut self, segment: impl Into<String>, operation: Operation<Ctx>) -> Self {
        self.entries.push((segment.into(), operation));
        self
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the group is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Top-level route declaration, in declaration order.
pub struct Declaration<Ctx: Clone + Send + Sync + 'static> {
    entries: Vec<(String, Entry<Ctx>)>,
}

impl<Ctx: Clone + Send + Sync + 'static> Default for Declaration<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx: Clone + Send + Sync + 'static> Declaration<Ctx> {
    /// Empty declaration
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Add an operation at `segment`
    pub fn operation(mut self, segment: impl Into<String>, operation: Operation<Ctx>) -> Self {
        self.entries.push((segment.into(), Entry::Operation(operation)));
        self
    }

    /// Add a group of operations under `segment`
    pub fn group(mut self, segment: impl Into<String>, group: Group<Ctx>) -> Self {
        self.entries.push((segment.into(), Entry::Group(group)));
        self
    }

    /// Flatten into `(path, operation)` pairs. See [`flatten`].
    pub fn flatten(self) -> RpcResult<Vec<(String, Operation<Ctx>)>> {
        flatten(self)
    }
}

/// Flatten a declaration into `(path, operation)` pairs.
///
/// Output follows declaration order. Pure: the same declaration always yields
/// the same paths.
///
/// # Errors
///
/// `VALIDATION_ERROR` for an invalid segment, `CONFLICT` when two entries
/// produce the same path.
pub fn flatten<Ctx: Clone + Send + Sync + 'static>(
    declaration: Declaration<Ctx>,
) -> RpcResult<Vec<(String, Operation<Ctx>)>> {
    let mut seen = HashSet::new();
    let mut flat = Vec::new();

    let mut push = |path: String, operation: Operation<Ctx>| -> RpcResult<()> {
        if !seen.insert(path.clone()) {
            return Err(RpcError::conflict(format!("Procedure path '{}' is declared twice", path)));
        }
        trace!(path = %path, kind = %operation.kind(), "Flattened procedure");
        flat.push((path, operation));
        Ok(())
    };

    for (segment, entry) in declaration.entries {
        validate_segment(&segment)?;
        match entry {
            Entry::Operation(operation) => push(segment, operation)?,
            Entry::Group(group) => {
                for (child, operation) in group.entries {
                    validate_segment(&child)?;
                    push(format!("{}/{}", segment, child), operation)?;
                }
            }
        }
    }

    Ok(flat)
}

/// Validate one path segment: non-empty ASCII letters, digits, `_`, `-` or `.`.
pub fn validate_segment(segment: &str) -> RpcResult<()> {
    if segment.is_empty() {
        return Err(RpcError::validation("Path segment cannot be empty"));
    }
    if let Some(invalid) = segment
        .chars()
        .find(|&ch| !ch.is_ascii_alphanumeric() && !matches!(ch, '_' | '-' | '.'))
    {
        return Err(RpcError::validation(format!(
            "Path segment contains invalid character: '{}' in segment '{}'",
            invalid, segment
        )));
    }
    Ok(())
}

/// Validate a full procedure path: `segment` or `segment/segment`.
pub fn validate_path(path: &str) -> RpcResult<()> {
    if path.is_empty() {
        return Err(RpcError::validation("Procedure path cannot be empty"));
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() > 2 {
        return Err(RpcError::validation(format!(
            "Procedure path '{}' nests deeper than one level",
            path
        )));
    }
    segments.into_iter().try_for_each(validate_segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{EmptyContext, MiddlewareContext};
    use crate::procedure::{OperationKind, procedure};
    use crate::request::RequestHandle;
    use crate::RpcErrorCode;
    use proptest::prelude::*;
    use serde_json::Value;

    async fn noop(_req: RequestHandle<EmptyContext>, _ctx: MiddlewareContext, _input: Value) -> RpcResult<()> {
        Ok(())
    }

    fn read() -> Operation<EmptyContext> {
        procedure().query(noop)
    }

    fn write() -> Operation<EmptyContext> {
        procedure().mutation(noop)
    }

    fn paths(flat: &[(String, Operation<EmptyContext>)]) -> Vec<&str> {
        flat.iter().map(|(path, _)| path.as_str()).collect()
    }

    #[test]
    fn test_flatten_one_level() {
        let flat = Declaration::new()
            .operation("health", read())
            .group("users", Group::new().operation("get", read()).operation("create", write()))
            .flatten()
            .unwrap();

        assert_eq!(paths(&flat), vec!["health", "users/get", "users/create"]);
        assert_eq!(flat[2].1.kind(), OperationKind::Write);
    }

    #[test]
    fn test_flatten_rejects_duplicates() {
        let err = Declaration::new()
            .group("users", Group::new().operation("get", read()))
            .group("users", Group::new().operation("get", read()))
            .flatten()
            .err()
            .unwrap();
        assert_eq!(err.code, RpcErrorCode::Conflict);
    }

    #[test]
    fn test_flatten_rejects_bad_segments() {
        let err = Declaration::new().operation("a/b", read()).flatten().err().unwrap();
        assert_eq!(err.code, RpcErrorCode::ValidationError);

        let err = Declaration::new()
            .group("users", Group::new().operation("", read()))
            .flatten()
            .err()
            .unwrap();
        assert_eq!(err.code, RpcErrorCode::ValidationError);
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("users/get").is_ok());
        assert!(validate_path("user-profile.v2").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("users//get").is_err());
        assert!(validate_path("users/get?x").is_err());

        let err = validate_path("admin/users/get").unwrap_err();
        assert_eq!(err.code, RpcErrorCode::ValidationError);
        assert!(err.message.contains("admin/users/get"));
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,6}"
    }

    proptest! {
        #[test]
        fn prop_flatten_is_deterministic(
            groups in proptest::collection::btree_map(segment(), proptest::collection::btree_set(segment(), 1..4), 1..5)
        ) {
            let declare = || {
                groups.iter().fold(Declaration::new(), |decl, (parent, children)| {
                    let group = children
                        .iter()
                        .fold(Group::new(), |group, child| group.operation(child.clone(), read()));
                    decl.group(parent.clone(), group)
                })
            };

            let first = declare().flatten().unwrap();
            let second = declare().flatten().unwrap();

            prop_assert_eq!(paths(&first), paths(&second));
            let expected: usize = groups.values().map(|c| c.len()).sum();
            prop_assert_eq!(first.len(), expected);
            for (path, _) in &first {
                prop_assert_eq!(path.matches('/').count(), 1);
            }
        }
    }
}
