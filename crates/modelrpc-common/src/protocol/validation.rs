//! Structural validation for outgoing requests.

use std::fmt;

use super::error::RpcError;
use super::ModelRequest;

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// Outcome of validating one value; collects every failing field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Collapses the result into `Ok(())` or an [`RpcError::InvalidRequest`].
    pub fn into_result(self) -> Result<(), RpcError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(RpcError::InvalidRequest(self.to_string()))
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return write!(f, "valid");
        }
        write!(f, "validation failed:")?;
        for err in &self.errors {
            write!(f, " {}: {};", err.field, err.message)?;
        }
        Ok(())
    }
}

/// Checks a [`ModelRequest`] before it is put on the wire.
pub fn validate_request(request: &ModelRequest) -> ValidationResult {
    let mut result = ValidationResult::new();

    if request.id.trim().is_empty() {
        result.add_error("id", "cannot be empty");
    }

    for (index, parameter) in request.parameters.iter().enumerate() {
        if parameter.name.trim().is_empty() {
            result.add_error(format!("parameters[{}].name", index), "cannot be empty");
        }
    }

    result
}
