//! Error taxonomy for flakedb-core (spec §7).

use std::fmt;
use thiserror::Error;

/// Tagged error kinds, mirroring the `{status, error, details}` taxonomy of spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed commit map, hash mismatch, or `t`-gap. Fatal.
    InvalidCommit,
    /// Missing properties, bad value shape, unresolvable reference during staging.
    InvalidTransaction,
    /// SHACL constraint failed; carries a `sh:ValidationReport`.
    ShaclViolation,
    /// Policy compilation or enforcement error.
    InvalidPolicy,
    /// Comparator or invariant failure.
    UnexpectedError,
    /// Blob storage / naming service failure.
    Storage,
    /// Serialization/deserialization errors.
    Serialization,
    /// Schema hydration failure.
    Schema,
    /// Signature/credential verification failure.
    Credential,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidCommit => "invalid-commit",
            ErrorKind::InvalidTransaction => "invalid-transaction",
            ErrorKind::ShaclViolation => "shacl-violation",
            ErrorKind::InvalidPolicy => "invalid-policy",
            ErrorKind::UnexpectedError => "db/unexpected-error",
            ErrorKind::Storage => "storage",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Schema => "schema",
            ErrorKind::Credential => "credential",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A SHACL validation report attached to `ErrorKind::ShaclViolation` errors.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ValidationReport {
    pub conforms: bool,
    pub results: Vec<ValidationResult>,
}

/// One SHACL constraint violation (spec §4.5 "Result shape").
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ValidationResult {
    pub subject: String,
    pub shape: String,
    pub constraint: String,
    pub path: Option<String>,
    pub expect: Option<serde_json::Value>,
    pub value: Option<serde_json::Value>,
    pub message: String,
    pub severity: String,
}

/// flakedb-core error type.
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct DbError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
    /// Populated only for `ErrorKind::ShaclViolation`.
    pub report: Option<ValidationReport>,
}

impl DbError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            report: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_report(mut self, report: ValidationReport) -> Self {
        self.report = Some(report);
        self
    }

    pub fn invalid_commit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidCommit, message)
    }

    pub fn invalid_transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTransaction, message)
    }

    pub fn shacl_violation(report: ValidationReport) -> Self {
        let message = format!("{} constraint violation(s)", report.results.len());
        Self::new(ErrorKind::ShaclViolation, message).with_report(report)
    }

    pub fn invalid_policy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPolicy, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnexpectedError, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Schema, message)
    }

    pub fn credential(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Credential, message)
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::new(ErrorKind::Serialization, format!("JSON error: {err}")).with_source(err)
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::new(ErrorKind::Storage, format!("SQLite error: {err}")).with_source(err)
    }
}

impl From<regex::Error> for DbError {
    fn from(err: regex::Error) -> Self {
        // Only used by `sh:pattern`/`sh:flags` compilation (spec §4.5), not policy evaluation.
        DbError::new(ErrorKind::Schema, format!("regex error: {err}")).with_source(err)
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, DbError>;
