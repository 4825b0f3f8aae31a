//! Application types

use procedure_router::{TypeSchema, Validate, ValidationResult, ValidationRules};
use serde::{Deserialize, Serialize};

// =============================================================================
// User Types
// =============================================================================

/// User entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u32,
    pub name: String,
    pub email: String,
}

impl User {
    pub fn new(id: u32, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Input for getting a user by ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUserInput {
    pub id: u32,
}

impl Validate for GetUserInput {
    fn validate(&self) -> ValidationResult {
        ValidationRules::new()
            .range("id", i64::from(self.id), 1, i64::from(u32::MAX))
            .build()
    }
}

impl GetUserInput {
    pub fn schema() -> TypeSchema {
        TypeSchema::object()
            .with_property("id", TypeSchema::integer().with_range(1.0, f64::from(u32::MAX)))
            .with_required("id")
    }
}

/// Input for creating a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserInput {
    pub name: String,
    pub email: String,
}

impl Validate for CreateUserInput {
    fn validate(&self) -> ValidationResult {
        ValidationRules::new()
            .required("name", &self.name)
            .max_length("name", &self.name, 64)
            .email("email", &self.email)
            .build()
    }
}

impl CreateUserInput {
    pub fn schema() -> TypeSchema {
        TypeSchema::object()
            .with_property("name", TypeSchema::string().with_length(1, 64))
            .with_property("email", TypeSchema::string().with_format("email"))
            .with_required("name")
            .with_required("email")
    }
}

/// The caller, as contributed by the auth middleware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    pub name: String,
}

// =============================================================================
// Chat Types
// =============================================================================

/// A chat message, both inbound and broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub room: String,
    pub text: String,
}

impl Validate for ChatMessage {
    fn validate(&self) -> ValidationResult {
        ValidationRules::new()
            .required("room", &self.room)
            .pattern("room", &self.room, r"^[a-z0-9-]{1,32}$")
            .required("text", &self.text)
            .max_length("text", &self.text, 500)
            .build()
    }
}

impl ChatMessage {
    pub fn schema() -> TypeSchema {
        TypeSchema::object()
            .with_property("room", TypeSchema::string())
            .with_property("text", TypeSchema::string().with_length(1, 500))
            .with_required("room")
            .with_required("text")
    }
}

/// Request to join a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRoom {
    pub room: String,
}

impl Validate for JoinRoom {
    fn validate(&self) -> ValidationResult {
        ValidationRules::new()
            .pattern("room", &self.room, r"^[a-z0-9-]{1,32}$")
            .build()
    }
}

// =============================================================================
// General Types
// =============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Admin statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub user_count: u32,
}
