use std::borrow::Cow;

use thiserror::Error;

/// Top-level error type returned by sqlom queries and records.
#[derive(Debug, Error)]
pub enum OrmError {
    /// Validation failed for one or more members.
    #[error("validation failed")]
    Validation(#[from] ValidationError),

    /// The entity's declared metadata violates a structural invariant
    /// (duplicate storage column, duplicate role, unknown member).
    /// Raised eagerly at registration time, never retried.
    #[error("entity configuration error: {message}")]
    Config { message: String },

    /// A demanded lookup produced no rows. Carries the entity identity and a
    /// resolvable message so callers can pattern-match without string probing.
    #[error("{message}")]
    NotFound { entity: &'static str, message: String },

    /// A custom format codec rejected a value. Codec failures are surfaced
    /// to the caller unmodified, never reinterpreted.
    #[error("codec error on `{field}`: {message}")]
    Codec { field: String, message: String },

    /// Underlying relational executor failed.
    #[error("executor error: {message}")]
    Executor { message: Cow<'static, str> },

    /// Invalid input supplied to a query operation.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl OrmError {
    pub fn executor(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Executor {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Collection of validation issues encountered while coercing member values.
#[derive(Debug, Error)]
#[error("validation errors: {issues:?}")]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new<I>(issues: I) -> Self
    where
        I: IntoIterator<Item = ValidationIssue>,
    {
        Self {
            issues: issues.into_iter().collect(),
        }
    }

    /// Convenience helper for constructing a single-member validation error.
    pub fn single(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new([ValidationIssue::new(field, code, message)])
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Detailed validation failure for a single member.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;
