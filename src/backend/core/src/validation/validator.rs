//! Declarative schemas: ordered fields, each with ordered rules.

use crate::validation::error::{FieldError, ValidationError, ValidationResult};
use crate::validation::rules::ValidationRule;
use crate::validation::value::{FieldValue, Payload};
use std::fmt;

/// Rules for one field, applied in order until one fails.
pub struct FieldValidator {
    name: String,
    optional: bool,
    rules: Vec<Box<dyn ValidationRule>>,
}

impl FieldValidator {
    /// Create a validator for `name`. Dotted names reach into JSON objects.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
            rules: Vec::new(),
        }
    }

    /// Skip the rules when the field is absent or null.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Add a rule to apply.
    pub fn rule<R: ValidationRule + 'static>(mut self, rule: R) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First failing rule for this field, if any.
    pub fn check(&self, value: &FieldValue<'_>) -> Option<FieldError> {
        if self.optional && value.is_missing() {
            return None;
        }
        self.rules.iter().find_map(|rule| rule.validate(value))
    }
}

impl fmt::Debug for FieldValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules: Vec<String> = self.rules.iter().map(|r| r.description()).collect();
        f.debug_struct("FieldValidator")
            .field("name", &self.name)
            .field("optional", &self.optional)
            .field("rules", &rules)
            .finish()
    }
}

/// A request schema. Fields are checked in declaration order and only the
/// first violation is reported.
#[derive(Debug, Default)]
pub struct Schema {
    fields: Vec<FieldValidator>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldValidator) -> Self {
        self.fields.push(field);
        self
    }

    /// Append the fields of another schema after this one's.
    pub fn extend(mut self, other: Schema) -> Self {
        self.fields.extend(other.fields);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(FieldValidator::name)
    }

    pub fn validate(&self, payload: &Payload) -> ValidationResult<()> {
        for field in &self.fields {
            if let Some(error) = field.check(&payload.field(field.name())) {
                return Err(ValidationError::field(field.name(), error));
            }
        }
        Ok(())
    }
}
