//! Shared validation error type.
//!
//! This is deliberately narrower than the server's `domain::Error` (which
//! also carries store- and transport-level failures): `registrar-core` only
//! ever fails at the field-validation boundary, spec.md §7 `ValidationError`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One field-level validation failure, reported back to the caller so a
/// form can highlight the offending field (spec.md §7: "user-visible:
/// specific fields flagged").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("validation failed: {0:?}")]
    Validation(Vec<FieldViolation>),
}

impl CoreError {
    pub fn single(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::Validation(vec![FieldViolation::new(field, reason)])
    }

    pub fn violations(&self) -> &[FieldViolation] {
        match self {
            CoreError::Validation(v) => v,
        }
    }
}
