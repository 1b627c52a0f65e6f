//! # Error Types
//!
//! The error taxonomy for the Arbor save engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  EngineError (this file)                                               │
//! │  ├── Validation   - payload fails schema rules (pre-transaction)       │
//! │  ├── NotFound     - referenced or target row missing                   │
//! │  ├── Domain       - a hook vetoes the save (e.g. insufficient stock)   │
//! │  ├── Constraint   - storage-level constraint failure                   │
//! │  └── Storage      - any other backend failure                          │
//! │                                                                         │
//! │  Everything raised inside the transactional region propagates to the  │
//! │  caller with the transaction rolled back; validation errors surface   │
//! │  before a transaction ever opens.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (entity, id, field)
//! 3. Errors are enum variants, never bare strings

use thiserror::Error;

// =============================================================================
// Validation Error
// =============================================================================

/// Payload validation errors.
///
/// Each variant is one constraint kind; the offending field is carried in the
/// variant and the `Display` impl is the user-facing message. These are
/// surfaced before any transaction opens, so no rollback is involved.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or null.
    #[error("{field} is required")]
    Required { field: String },

    /// The payload contains a field the schema does not declare.
    #[error("unknown field: {field}")]
    UnknownField { field: String },

    /// Field value has the wrong JSON type.
    #[error("{field} must be a {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    /// String value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// String value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is below the declared minimum.
    #[error("{field} must be at least {min}")]
    BelowMinimum { field: String, min: f64 },

    /// Numeric value is above the declared maximum.
    #[error("{field} must be at most {max}")]
    AboveMaximum { field: String, max: f64 },

    /// Invalid format (e.g. not a valid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Array value holds fewer items than the declared minimum.
    #[error("{field} must contain at least {min} items")]
    TooFewItems { field: String, min: usize },
}

impl ValidationError {
    /// The field the constraint failed on.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required { field }
            | ValidationError::UnknownField { field }
            | ValidationError::WrongType { field, .. }
            | ValidationError::TooShort { field, .. }
            | ValidationError::TooLong { field, .. }
            | ValidationError::BelowMinimum { field, .. }
            | ValidationError::AboveMaximum { field, .. }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::TooFewItems { field, .. } => field,
        }
    }

    /// Short name of the violated constraint.
    pub fn constraint(&self) -> &'static str {
        match self {
            ValidationError::Required { .. } => "required",
            ValidationError::UnknownField { .. } => "unknown",
            ValidationError::WrongType { .. } => "type",
            ValidationError::TooShort { .. } => "min_length",
            ValidationError::TooLong { .. } => "max_length",
            ValidationError::BelowMinimum { .. } => "min",
            ValidationError::AboveMaximum { .. } => "max",
            ValidationError::InvalidFormat { .. } => "format",
            ValidationError::TooFewItems { .. } => "min_items",
        }
    }
}

// =============================================================================
// Engine Error
// =============================================================================

/// Save engine errors.
///
/// The full taxonomy an operation can surface. Anything raised inside the
/// transactional region means the transaction was rolled back before the
/// error reached the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Payload failed schema or required-field rules.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Referenced or target row missing.
    ///
    /// ## When This Occurs
    /// - A locked relation id does not resolve to a row
    /// - Update/info/delete by an id that does not exist
    /// - A child item id that does not belong to the parent
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A hook vetoed the save with a human-readable message.
    #[error("{0}")]
    Domain(String),

    /// Storage-level constraint failure, surfaced unmodified.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Any other storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Creates a NotFound error for a given entity type and id.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a Domain error carrying a hook's veto message.
    pub fn domain(message: impl Into<String>) -> Self {
        EngineError::Domain(message.into())
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::not_found("Product", "p-1");
        assert_eq!(err.to_string(), "Product not found: p-1");

        let err = EngineError::domain("insufficient stock for product [Widget]");
        assert_eq!(err.to_string(), "insufficient stock for product [Widget]");
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "name".to_string(),
        };
        assert_eq!(err.to_string(), "name is required");
        assert_eq!(err.field(), "name");
        assert_eq!(err.constraint(), "required");

        let err = ValidationError::TooShort {
            field: "name".to_string(),
            min: 3,
        };
        assert_eq!(err.to_string(), "name must be at least 3 characters");
    }

    #[test]
    fn test_validation_converts_to_engine_error() {
        let validation_err = ValidationError::UnknownField {
            field: "bogus".to_string(),
        };
        let engine_err: EngineError = validation_err.into();
        assert!(matches!(engine_err, EngineError::Validation(_)));
    }
}
