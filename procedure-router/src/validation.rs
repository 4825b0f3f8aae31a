//! Input validation
//!
//! Field-level validation for procedure inputs and realtime event payloads.
//! Types implement [`Validate`] and build their result with
//! [`ValidationRules`]; a failing [`ValidationResult`] converts into a
//! `VALIDATION_ERROR` whose details list every offending field.
//!
//! # Example
//!
//! ```rust,ignore
//! use procedure_router::validation::{Validate, ValidationResult, ValidationRules};
//!
//! struct CreateUserInput {
//!     name: String,
//!     email: String,
//!     age: i64,
//! }
//!
//! impl Validate for CreateUserInput {
//!     fn validate(&self) -> ValidationResult {
//!         ValidationRules::new()
//!             .required("name", &self.name)
//!             .max_length("name", &self.name, 100)
//!             .email("email", &self.email)
//!             .range("age", self.age, 0, 150)
//!             .build()
//!     }
//! }
//! ```

use crate::{RpcError, RpcResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::{debug, trace, warn};

/// Validation error for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field that failed validation, dotted for nested values
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// Machine-readable failure kind (`required`, `range`, ...)
    pub code: String,
}

impl FieldError {
    /// Create a new field error
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.into(),
        }
    }

    /// A required value is missing or blank
    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("{} is required", field);
        Self::new(field, message, "required")
    }

    /// A string or list is shorter than allowed
    pub fn min_length(field: impl Into<String>, min: usize) -> Self {
        let field = field.into();
        let message = format!("{} must be at least {} characters", field, min);
        Self::new(field, message, "min_length")
    }

    /// A string or list is longer than allowed
    pub fn max_length(field: impl Into<String>, max: usize) -> Self {
        let field = field.into();
        let message = format!("{} must be at most {} characters", field, max);
        Self::new(field, message, "max_length")
    }

    /// A number falls outside an inclusive range
    pub fn range(field: impl Into<String>, min: i64, max: i64) -> Self {
        let field = field.into();
        let message = format!("{} must be between {} and {}", field, min, max);
        Self::new(field, message, "range")
    }

    /// A string does not match a pattern
    pub fn pattern(field: impl Into<String>, pattern: &str) -> Self {
        let field = field.into();
        let message = format!("{} must match pattern: {}", field, pattern);
        Self::new(field, message, "pattern")
    }

    /// A string is not an email address
    pub fn email(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("{} must be a valid email address", field);
        Self::new(field, message, "email")
    }

    /// The value has the wrong shape entirely (wrong JSON type, missing object, ...)
    pub fn invalid_type(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message, "invalid_type")
    }

    /// Custom failure
    pub fn custom(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message, "custom")
    }
}

/// Outcome of validating an input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ValidationResult {
    /// Field-level errors; empty when the input is valid
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    /// A passing result
    pub fn ok() -> Self {
        Self::default()
    }

    /// A result holding the given errors; passes when the list is empty
    pub fn from_errors(errors: Vec<FieldError>) -> Self {
        if !errors.is_empty() {
            let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
            debug!(error_count = errors.len(), fields = ?fields, "Validation failed");
        }
        Self { errors }
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Combine two results
    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.errors.extend(other.errors);
        self
    }

    /// Turn a failing result into a `VALIDATION_ERROR`.
    pub fn into_result(self) -> RpcResult<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(self.into())
        }
    }
}

impl From<ValidationResult> for RpcError {
    fn from(result: ValidationResult) -> Self {
        let message = match result.errors.as_slice() {
            [single] => single.message.clone(),
            errors => format!("{} fields failed validation", errors.len()),
        };
        RpcError::validation(message).with_details(result.errors)
    }
}

/// Types that check their own invariants after deserialization.
pub trait Validate {
    /// Validate the value and report every failing field
    fn validate(&self) -> ValidationResult;
}

impl Validate for () {
    fn validate(&self) -> ValidationResult {
        ValidationResult::ok()
    }
}

macro_rules! impl_validate_scalar {
    ($($ty:ty),*) => {
        $(impl Validate for $ty {
            fn validate(&self) -> ValidationResult {
                ValidationResult::ok()
            }
        })*
    };
}

impl_validate_scalar!(String, bool, i32, i64, u32, u64, f64);

impl Validate for serde_json::Value {
    fn validate(&self) -> ValidationResult {
        ValidationResult::ok()
    }
}

impl<T: Validate> Validate for Option<T> {
    fn validate(&self) -> ValidationResult {
        self.as_ref().map(Validate::validate).unwrap_or_default()
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> ValidationResult {
        self.iter()
            .fold(ValidationResult::ok(), |acc, item| acc.merge(item.validate()))
    }
}

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").ok());

/// Fluent builder collecting field errors.
#[derive(Debug, Default)]
pub struct ValidationRules {
    errors: Vec<FieldError>,
}

impl ValidationRules {
    /// Start an empty rule set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error directly
    pub fn add_error(mut self, error: FieldError) -> Self {
        self.errors.push(error);
        self
    }

    /// The string must contain something other than whitespace
    pub fn required(mut self, field: &str, value: &str) -> Self {
        if value.trim().is_empty() {
            trace!(field = %field, "Required field is empty");
            self.errors.push(FieldError::required(field));
        }
        self
    }

    /// Minimum length in characters
    pub fn min_length(mut self, field: &str, value: &str, min: usize) -> Self {
        if value.chars().count() < min {
            self.errors.push(FieldError::min_length(field, min));
        }
        self
    }

    /// Maximum length in characters
    pub fn max_length(mut self, field: &str, value: &str, max: usize) -> Self {
        if value.chars().count() > max {
            self.errors.push(FieldError::max_length(field, max));
        }
        self
    }

    /// Inclusive integer range
    pub fn range(mut self, field: &str, value: i64, min: i64, max: i64) -> Self {
        if !(min..=max).contains(&value) {
            trace!(field = %field, value, min, max, "Field outside valid range");
            self.errors.push(FieldError::range(field, min, max));
        }
        self
    }

    /// The string must match `pattern`
    pub fn pattern(mut self, field: &str, value: &str, pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(value) => {}
            Ok(_) => self.errors.push(FieldError::pattern(field, pattern)),
            Err(e) => {
                warn!(field = %field, pattern = %pattern, error = %e, "Invalid validation regex pattern");
                self.errors.push(FieldError::new(
                    field,
                    format!("Invalid validation pattern: {}", pattern),
                    "invalid_pattern",
                ));
            }
        }
        self
    }

    /// The string must look like an email address
    pub fn email(mut self, field: &str, value: &str) -> Self {
        let valid = EMAIL.as_ref().is_some_and(|re| re.is_match(value));
        if !valid {
            self.errors.push(FieldError::email(field));
        }
        self
    }

    /// Arbitrary predicate
    pub fn custom<F>(mut self, field: &str, predicate: F, message: &str) -> Self
    where
        F: FnOnce() -> bool,
    {
        if !predicate() {
            self.errors.push(FieldError::custom(field, message));
        }
        self
    }

    /// Finish the rule set
    pub fn build(self) -> ValidationResult {
        ValidationResult::from_errors(self.errors)
    }
}
