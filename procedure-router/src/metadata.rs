//! Procedure metadata
//!
//! Every operation is described once, when it is registered, and the
//! descriptors are stored on the router for documentation and client code
//! generation. Nothing here is ever recomputed from live traffic.
//!
//! Serialized form of one procedure:
//!
//! ```json
//! { "kind": "read", "schema": { "type": "object", ... } }
//! { "kind": "write", "schema": null }
//! { "kind": "realtime", "schema": { "incoming": { ... }, "outgoing": null } }
//! ```

use crate::config::RouterConfig;
use crate::procedure::{Operation, OperationBody, OperationKind};
use crate::schema::TypeSchema;
use crate::RpcResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Introspectable summary of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProcedureDescriptor {
    /// Read operation and its input description
    Read {
        /// Input schema, `null` when none is declared
        schema: Option<TypeSchema>,
    },
    /// Write operation and its input description
    Write {
        /// Input schema, `null` when none is declared
        schema: Option<TypeSchema>,
    },
    /// Realtime operation and its per-direction event descriptions
    Realtime {
        /// Incoming and outgoing event schemas
        schema: RealtimeSchemaDescriptor,
    },
}

/// Event descriptions of a realtime operation; each side may be `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealtimeSchemaDescriptor {
    /// Events the client may send
    pub incoming: Option<TypeSchema>,
    /// Events the server may send
    pub outgoing: Option<TypeSchema>,
}

impl ProcedureDescriptor {
    /// Operation kind
    pub fn kind(&self) -> OperationKind {
        match self {
            ProcedureDescriptor::Read { .. } => OperationKind::Read,
            ProcedureDescriptor::Write { .. } => OperationKind::Write,
            ProcedureDescriptor::Realtime { .. } => OperationKind::Realtime,
        }
    }

    /// Input description of a read/write operation
    pub fn input_schema(&self) -> Option<&TypeSchema> {
        match self {
            ProcedureDescriptor::Read { schema } | ProcedureDescriptor::Write { schema } => schema.as_ref(),
            ProcedureDescriptor::Realtime { .. } => None,
        }
    }
}

/// Describe an operation without running any of its code.
pub fn describe_operation<Ctx: Clone + Send + Sync + 'static>(operation: &Operation<Ctx>) -> ProcedureDescriptor {
    match &operation.body {
        OperationBody::Read { input, .. } => ProcedureDescriptor::Read {
            schema: input.as_ref().map(|s| s.description().clone()),
        },
        OperationBody::Write { input, .. } => ProcedureDescriptor::Write {
            schema: input.as_ref().map(|s| s.description().clone()),
        },
        OperationBody::Realtime { incoming, outgoing, .. } => ProcedureDescriptor::Realtime {
            schema: RealtimeSchemaDescriptor {
                incoming: incoming.as_ref().map(|e| e.describe()),
                outgoing: outgoing.as_ref().map(|e| e.describe()),
            },
        },
    }
}

/// Everything a router exposes for introspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterMetadata {
    /// Descriptor per procedure path
    pub procedures: BTreeMap<String, ProcedureDescriptor>,
    /// Procedure paths in registration order
    pub registered_paths: Vec<String>,
    /// Mount keys of sub-routers
    pub sub_routers: Vec<String>,
    /// Router-wide configuration
    pub config: RouterConfig,
    /// Per-path configuration
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub path_config: BTreeMap<String, RouterConfig>,
}

impl RouterMetadata {
    /// Descriptor of `path`
    pub fn get(&self, path: &str) -> Option<&ProcedureDescriptor> {
        self.procedures.get(path)
    }

    /// Number of procedures
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    /// Whether the router has no procedures
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Compact JSON
    pub fn to_json(&self) -> RpcResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Indented JSON
    pub fn to_json_pretty(&self) -> RpcResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
