//! # Declarative Field Schemas
//!
//! Resource endpoints declare their accepted payload as a [`Schema`]: one
//! [`FieldRule`] per field plus a `create_requires` list. The validator turns
//! a raw payload into a cleaned field map or a structural
//! [`ValidationError`], before any transaction opens.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Rules                                   │
//! │                                                                         │
//! │  Per field: independent type/format/range rule                         │
//! │  Unknown fields: rejected                                              │
//! │  Null values: treated as absent                                        │
//! │                                                                         │
//! │  Required-ness is asymmetric between create and update:                │
//! │  ├── create_requires("a,b,c")  - mandatory only when creating          │
//! │  └── FieldRule::required()     - mandatory in both modes               │
//! │                                                                         │
//! │  Update payloads may therefore be partial: every declared field is     │
//! │  optional unless explicitly always-required.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use arbor_core::schema::{FieldRule, Schema};
//! use arbor_core::types::object;
//! use serde_json::json;
//!
//! let schema = Schema::new()
//!     .field("name", FieldRule::string().min_len(3))
//!     .field("stock", FieldRule::integer())
//!     .create_requires("name,stock");
//!
//! let cleaned = schema
//!     .validate(&object(json!({ "name": "Widget", "stock": 5 })), true)
//!     .unwrap();
//! assert_eq!(cleaned.len(), 2);
//! ```

use serde_json::Value;

use crate::error::ValidationError;
use crate::types::FieldMap;

// =============================================================================
// Field Rules
// =============================================================================

/// The JSON shape a field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    /// UTF-8 string.
    Str,
    /// Whole number (floats rejected).
    Int,
    /// Any JSON number.
    Num,
    /// String holding a UUID.
    Uuid,
    /// Boolean.
    Bool,
    /// Array; element validation is the relation item schema's job.
    Array,
}

/// Independent type/format/range rule for one declared field.
#[derive(Debug, Clone)]
pub struct FieldRule {
    kind: RuleKind,
    required: bool,
    min_len: Option<usize>,
    max_len: Option<usize>,
    min: Option<f64>,
    max: Option<f64>,
    min_items: Option<usize>,
}

impl FieldRule {
    fn of(kind: RuleKind) -> Self {
        FieldRule {
            kind,
            required: false,
            min_len: None,
            max_len: None,
            min: None,
            max: None,
            min_items: None,
        }
    }

    /// String field.
    pub fn string() -> Self {
        FieldRule::of(RuleKind::Str)
    }

    /// Whole-number field; float values are rejected.
    pub fn integer() -> Self {
        FieldRule::of(RuleKind::Int)
    }

    /// Numeric field.
    pub fn number() -> Self {
        FieldRule::of(RuleKind::Num)
    }

    /// UUID-formatted string field (relation ids).
    pub fn uuid() -> Self {
        FieldRule::of(RuleKind::Uuid)
    }

    /// Boolean field.
    pub fn boolean() -> Self {
        FieldRule::of(RuleKind::Bool)
    }

    /// Array field; elements are validated by the owning relation's schema.
    pub fn array() -> Self {
        FieldRule::of(RuleKind::Array)
    }

    /// Marks the field mandatory on create AND update.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Minimum string length.
    pub fn min_len(mut self, min: usize) -> Self {
        self.min_len = Some(min);
        self
    }

    /// Maximum string length.
    pub fn max_len(mut self, max: usize) -> Self {
        self.max_len = Some(max);
        self
    }

    /// Minimum numeric value (inclusive).
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Maximum numeric value (inclusive).
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Minimum number of array items.
    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = Some(min);
        self
    }

    /// Checks one non-null value against this rule.
    fn check(&self, field: &str, value: &Value) -> Result<(), ValidationError> {
        match self.kind {
            RuleKind::Str | RuleKind::Uuid => {
                let s = value.as_str().ok_or_else(|| ValidationError::WrongType {
                    field: field.to_string(),
                    expected: "string",
                })?;

                if self.kind == RuleKind::Uuid {
                    uuid::Uuid::parse_str(s).map_err(|_| ValidationError::InvalidFormat {
                        field: field.to_string(),
                        reason: "must be a valid UUID".to_string(),
                    })?;
                }

                if let Some(min) = self.min_len {
                    if s.chars().count() < min {
                        return Err(ValidationError::TooShort {
                            field: field.to_string(),
                            min,
                        });
                    }
                }
                if let Some(max) = self.max_len {
                    if s.chars().count() > max {
                        return Err(ValidationError::TooLong {
                            field: field.to_string(),
                            max,
                        });
                    }
                }
                Ok(())
            }

            RuleKind::Int => {
                let n = value.as_i64().ok_or_else(|| ValidationError::WrongType {
                    field: field.to_string(),
                    expected: "whole number",
                })?;
                self.check_range(field, n as f64)
            }

            RuleKind::Num => {
                let n = value.as_f64().ok_or_else(|| ValidationError::WrongType {
                    field: field.to_string(),
                    expected: "number",
                })?;
                self.check_range(field, n)
            }

            RuleKind::Bool => {
                if !value.is_boolean() {
                    return Err(ValidationError::WrongType {
                        field: field.to_string(),
                        expected: "boolean",
                    });
                }
                Ok(())
            }

            RuleKind::Array => {
                let items = value.as_array().ok_or_else(|| ValidationError::WrongType {
                    field: field.to_string(),
                    expected: "array",
                })?;
                if let Some(min) = self.min_items {
                    if items.len() < min {
                        return Err(ValidationError::TooFewItems {
                            field: field.to_string(),
                            min,
                        });
                    }
                }
                Ok(())
            }
        }
    }

    fn check_range(&self, field: &str, n: f64) -> Result<(), ValidationError> {
        if let Some(min) = self.min {
            if n < min {
                return Err(ValidationError::BelowMinimum {
                    field: field.to_string(),
                    min,
                });
            }
        }
        if let Some(max) = self.max {
            if n > max {
                return Err(ValidationError::AboveMaximum {
                    field: field.to_string(),
                    max,
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Schema
// =============================================================================

/// Declared payload shape for one resource or one relation item.
///
/// Field order is declaration order, which makes validation errors
/// deterministic for payloads violating several rules at once.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<(String, FieldRule)>,
    create_requires: Vec<String>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Schema::default()
    }

    /// Declares a field.
    pub fn field(mut self, name: &str, rule: FieldRule) -> Self {
        self.fields.push((name.to_string(), rule));
        self
    }

    /// Names the fields mandatory only on creation, comma-separated.
    ///
    /// Update payloads may omit any of these; create payloads must carry
    /// every one (relation fields included).
    pub fn create_requires(mut self, list: &str) -> Self {
        self.create_requires = list
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        self
    }

    fn rule(&self, name: &str) -> Option<&FieldRule> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, rule)| rule)
    }

    /// Validates a payload and returns the cleaned field map.
    ///
    /// ## Rules Applied
    /// 1. Unknown fields are rejected (`id` is implicitly known)
    /// 2. Null values are treated as absent
    /// 3. Every present value must satisfy its field rule
    /// 4. Always-required fields must be present in both modes
    /// 5. `create_requires` fields must be present when `is_create`
    pub fn validate(
        &self,
        payload: &FieldMap,
        is_create: bool,
    ) -> Result<FieldMap, ValidationError> {
        let mut cleaned = FieldMap::new();

        for (name, value) in payload {
            if name == "id" {
                continue;
            }
            let rule = self
                .rule(name)
                .ok_or_else(|| ValidationError::UnknownField {
                    field: name.clone(),
                })?;
            if value.is_null() {
                continue;
            }
            rule.check(name, value)?;
            cleaned.insert(name.clone(), value.clone());
        }

        for (name, rule) in &self.fields {
            if rule.required && !cleaned.contains_key(name) {
                return Err(ValidationError::Required {
                    field: name.clone(),
                });
            }
        }

        if is_create {
            for name in &self.create_requires {
                if !cleaned.contains_key(name) {
                    return Err(ValidationError::Required {
                        field: name.clone(),
                    });
                }
            }
        }

        Ok(cleaned)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
