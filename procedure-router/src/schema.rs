//! Schema adapter
//!
//! A [`Schema`] couples two things the router needs from an input schema:
//! a parser that turns an untrusted JSON value into a validated one (or a
//! `VALIDATION_ERROR`), and a JSON-Schema-like [`TypeSchema`] description used
//! for procedure metadata. The router never looks inside either.
//!
//! Realtime procedures declare an [`EventSchemas`] per direction, mapping each
//! event name to the schema of its payload.
//!
//! # Example
//!
//! ```rust,ignore
//! use procedure_router::schema::{Schema, TypeSchema, EventSchemas};
//!
//! let input = Schema::of::<GetUserInput>(
//!     TypeSchema::object()
//!         .with_property("id", TypeSchema::string().with_format("uuid"))
//!         .with_required("id"),
//! );
//!
//! let incoming = EventSchemas::new()
//!     .event("message", Schema::of::<ChatMessage>(TypeSchema::object()));
//! ```

use crate::validation::{FieldError, Validate};
use crate::{RpcError, RpcResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

// =============================================================================
// Type descriptions
// =============================================================================

/// JSON-Schema-like description of a type.
///
/// Object properties are kept in a `BTreeMap` so the serialized form is
/// identical every time it is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// Type name (`string`, `number`, `object`, ...)
    #[serde(rename = "type")]
    pub type_name: String,
    /// Object properties
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, TypeSchema>>,
    /// Required object properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Whether objects may carry properties beyond `properties`
    #[serde(
        rename = "additionalProperties",
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<bool>,
    /// Array item type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<TypeSchema>>,
    /// Description of the type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    /// Format hint (`email`, `uuid`, `date-time`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Minimum numeric value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    /// Maximum numeric value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Minimum string length
    #[serde(rename = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Maximum string length
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Whether `null` is accepted
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
}

impl TypeSchema {
    /// A schema with the given type name and nothing else
    pub fn custom(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: None,
            required: Vec::new(),
            additional_properties: None,
            items: None,
            description: None,
            enum_values: None,
            format: None,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            nullable: false,
        }
    }

    /// `string`
    pub fn string() -> Self {
        Self::custom("string")
    }

    /// `number`
    pub fn number() -> Self {
        Self::custom("number")
    }

    /// `integer`
    pub fn integer() -> Self {
        Self::custom("integer")
    }

    /// `boolean`
    pub fn boolean() -> Self {
        Self::custom("boolean")
    }

    /// `null`
    pub fn null() -> Self {
        Self::custom("null")
    }

    /// `object` with no properties yet
    pub fn object() -> Self {
        Self {
            properties: Some(BTreeMap::new()),
            ..Self::custom("object")
        }
    }

    /// `array` of `items`
    pub fn array(items: TypeSchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::custom("array")
        }
    }

    /// Add an object property
    pub fn with_property(mut self, name: impl Into<String>, schema: TypeSchema) -> Self {
        self.properties
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), schema);
        self
    }

    /// Mark an object property as required
    pub fn with_required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    /// Disallow properties not listed in `properties`
    pub fn strict(mut self) -> Self {
        self.additional_properties = Some(false);
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restrict to a set of values
    pub fn with_enum(mut self, values: impl IntoIterator<Item = impl Serialize>) -> Self {
        self.enum_values = Some(
            values
                .into_iter()
                .filter_map(|v| serde_json::to_value(v).ok())
                .collect(),
        );
        self
    }

    /// Set the format hint
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Set numeric bounds
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.minimum = Some(min);
        self.maximum = Some(max);
        self
    }

    /// Set string length bounds
    pub fn with_length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    /// Accept `null`
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Serialize the description to JSON.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// =============================================================================
// Schema
// =============================================================================

type ParseFn = dyn Fn(Value) -> RpcResult<Value> + Send + Sync;

/// Parser plus description for one input shape.
#[derive(Clone)]
pub struct Schema {
    description: TypeSchema,
    parse: Arc<ParseFn>,
}

impl Schema {
    /// Build a schema from a description and an arbitrary parse function.
    ///
    /// The parse function receives `Value::Null` when no input was supplied.
    pub fn new<F>(description: TypeSchema, parse: F) -> Self
    where
        F: Fn(Value) -> RpcResult<Value> + Send + Sync + 'static,
    {
        Self {
            description,
            parse: Arc::new(parse),
        }
    }

    /// Schema backed by a serde type that also validates itself.
    ///
    /// Input is deserialized into `T`, checked with [`Validate`], then
    /// serialized back so the handler sees the normalized value.
    pub fn of<T>(description: TypeSchema) -> Self
    where
        T: DeserializeOwned + Serialize + Validate + 'static,
    {
        Self::new(description, |value| {
            let parsed: T = serde_json::from_value(value).map_err(|e| {
                RpcError::validation(format!("Invalid input: {}", e))
                    .with_details(vec![FieldError::invalid_type("input", e.to_string())])
            })?;
            parsed.validate().into_result()?;
            Ok(serde_json::to_value(parsed)?)
        })
    }

    /// Schema that accepts any value, including no value at all.
    pub fn any() -> Self {
        Self::new(TypeSchema::custom("any"), Ok)
    }

    /// Parse and validate an input. `None` means "no input supplied".
    pub fn parse(&self, input: Option<Value>) -> RpcResult<Value> {
        trace!(has_input = input.is_some(), "Parsing input against schema");
        (self.parse)(input.unwrap_or(Value::Null))
    }

    /// JSON-Schema-like description of the accepted input.
    pub fn description(&self) -> &TypeSchema {
        &self.description
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Event schemas
// =============================================================================

/// Payload schemas keyed by realtime event name.
#[derive(Debug, Clone, Default)]
pub struct EventSchemas {
    events: BTreeMap<String, Schema>,
}

impl EventSchemas {
    /// No events yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an event and its payload schema
    pub fn event(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.events.insert(name.into(), schema);
        self
    }

    /// Payload schema of `name`
    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.events.get(name)
    }

    /// Declared event names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.events.keys().map(String::as_str)
    }

    /// Validate the payload of `event`. Undeclared events are rejected.
    pub fn parse(&self, event: &str, payload: Value) -> RpcResult<Value> {
        let schema = self.get(event).ok_or_else(|| {
            RpcError::validation(format!("Event '{}' is not declared", event))
                .with_details(vec![FieldError::custom(event, "undeclared event")])
        })?;
        schema.parse(Some(payload))
    }

    /// Object description whose properties are the event payloads.
    pub fn describe(&self) -> TypeSchema {
        self.events
            .iter()
            .fold(TypeSchema::object(), |schema, (name, event)| {
                schema
                    .with_property(name.clone(), event.description().clone())
                    .with_required(name.clone())
            })
    }
}

/// Validate an event payload when a schema set is present; pass it through otherwise.
pub(crate) fn check_event(
    schemas: Option<&EventSchemas>,
    event: &str,
    payload: Value,
) -> RpcResult<Value> {
    match schemas {
        Some(schemas) => schemas.parse(event, payload),
        None => Ok(payload),
    }
}
