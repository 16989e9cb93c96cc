//! Validation framework for manifests and their parts.
//!
//! Manifest validation never stops at the first problem: every check adds
//! to a [`ValidationErrors`] collection so authors see all violations in a
//! single run.

use std::fmt;

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field or path that failed validation (e.g. `images[2].dmap`).
    pub field: String,
    /// A human-readable description of the failure.
    pub message: String,
    /// The kind of validation that failed.
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    /// Creates a new validation error.
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        kind: ValidationErrorKind,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            kind,
        }
    }

    /// A required field is missing.
    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("'{field}' is required but was not provided"),
            field,
            kind: ValidationErrorKind::Required,
        }
    }

    /// A value has an invalid format.
    pub fn format(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message, ValidationErrorKind::Format)
    }

    /// A value or collection is empty.
    pub fn empty(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            message: format!("'{field}' must not be empty"),
            field,
            kind: ValidationErrorKind::Empty,
        }
    }

    /// A cross-field constraint was violated.
    pub fn constraint(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message, ValidationErrorKind::Constraint)
    }

    /// A file is missing or misplaced in a manifest directory tree.
    pub fn layout(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(path, message, ValidationErrorKind::Layout)
    }

    /// Prefixes the field path, e.g. `digest` becomes `images[0].digest`.
    #[must_use]
    pub fn at(mut self, prefix: &str) -> Self {
        self.field = format!("{prefix}.{}", self.field);
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error for '{}': {}", self.kind, self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// The category of validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    /// A required field was not provided.
    Required,
    /// The value format is invalid.
    Format,
    /// A collection is empty when it shouldn't be.
    Empty,
    /// A cross-field constraint was violated.
    Constraint,
    /// The on-disk manifest layout is wrong.
    Layout,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Required => "required",
            Self::Format => "format",
            Self::Empty => "empty",
            Self::Constraint => "constraint",
            Self::Layout => "layout",
        };
        f.write_str(s)
    }
}

/// A collection of validation errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an error.
    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Records the error of a failed result, returning the success value.
    pub fn check<T>(&mut self, result: Result<T, ValidationError>, prefix: &str) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.add(e.at(prefix));
                None
            }
        }
    }

    /// Returns true if there are no errors.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterates over the errors.
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    /// Moves all errors of `other` into this collection.
    pub fn merge(&mut self, other: Self) {
        self.errors.extend(other.errors);
    }

    /// Returns `Ok(value)` when empty, otherwise the whole collection.
    ///
    /// # Errors
    ///
    /// Returns `self` if any error was recorded.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl FromIterator<ValidationError> for ValidationErrors {
    fn from_iter<T: IntoIterator<Item = ValidationError>>(iter: T) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "no validation errors"),
            [only] => write!(f, "{only}"),
            errors => {
                writeln!(f, "{} validation errors:", errors.len())?;
                for error in errors {
                    writeln!(f, "  - {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationErrors {}

/// Types that can check their own invariants.
pub trait Validate {
    /// Validates this instance, reporting every violation found.
    ///
    /// # Errors
    ///
    /// Returns all validation failures.
    fn validate(&self) -> Result<(), ValidationErrors>;

    /// Returns true if [`Validate::validate`] passes.
    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}
