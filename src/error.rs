//! Error types for ferro-join
//!
//! Every error raised by the engine is fatal for the enclosing task. There is
//! no skip-and-continue mode: a task that hits any of these reports the
//! violated invariant together with the offending key or identifier, and
//! nothing it produced is committed.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Error codes for categorizing errors
///
/// These codes can be used for programmatic error handling
/// and for documentation lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // Key and category errors (E1xxx)
    /// A key field is absent or empty
    MissingField = 1001,
    /// Category name does not follow the primary naming pattern
    UnresolvableCategory = 1002,
    /// Category name is not part of the registry
    UnknownCategory = 1003,

    // Join and enrichment invariants (E2xxx)
    /// Primary record has no meta record
    JoinInvariantViolation = 2001,
    /// Two meta records share a key
    DuplicateMetaKey = 2002,
    /// No donor/sample entry for a record
    UnresolvedDonor = 2003,
    /// Record belongs to another project than its task
    ProjectMismatch = 2004,

    // Input and configuration errors (E9xxx)
    /// Malformed input record
    ParseError = 9001,
    /// Invalid configuration
    ConfigError = 9002,
    /// File IO error
    IoError = 9003,
    /// JSON serialization error
    JsonError = 9004,
}

impl ErrorCode {
    /// Get the error code as a string (e.g., "E1001")
    pub fn as_str(&self) -> String {
        format!("E{:04}", *self as u16)
    }

    /// Get a brief description of this error code
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::MissingField => "key field missing or empty",
            ErrorCode::UnresolvableCategory => "category does not match the primary naming pattern",
            ErrorCode::UnknownCategory => "unknown category",
            ErrorCode::JoinInvariantViolation => "primary record without meta record",
            ErrorCode::DuplicateMetaKey => "duplicate meta record key",
            ErrorCode::UnresolvedDonor => "donor/sample not resolved",
            ErrorCode::ProjectMismatch => "record from another project",
            ErrorCode::ParseError => "malformed input record",
            ErrorCode::ConfigError => "invalid configuration",
            ErrorCode::IoError => "file I/O error",
            ErrorCode::JsonError => "JSON serialization error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for ferro-join operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JoinError {
    /// A field required to build a key is absent, null or empty
    #[error("Missing field '{field}' in {context}")]
    MissingField { field: String, context: String },

    /// A primary record has no meta record with the same key
    #[error("A primary record must have a corresponding record in the meta file (key: {key})")]
    JoinInvariantViolation { key: String },

    /// The meta file holds more than one record for a key
    #[error("Meta file contains more than one record for key {key}")]
    DuplicateMetaKey { key: String },

    /// No donor/sample entry exists for the record
    #[error("No donor/sample entry for donor {donor_id} in project {project_id}")]
    UnresolvedDonor { project_id: String, donor_id: String },

    /// A record names a project other than the one being processed
    #[error("Record of project {found} found in input of project {expected}")]
    ProjectMismatch { expected: String, found: String },

    /// Category name does not match the primary naming pattern
    #[error("Cannot resolve paired category for '{name}': not a primary category")]
    UnresolvableCategory { name: String },

    /// Category name is not registered
    #[error("Unknown category: {name}")]
    UnknownCategory { name: String },

    /// Malformed input record
    #[error("Parse error in {} at line {line}: {msg}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        msg: String,
    },

    /// Invalid configuration
    #[error("Config error: {msg}")]
    Config { msg: String },

    /// IO error (for file operations)
    #[error("IO error: {msg}")]
    Io { msg: String },

    /// JSON serialization error
    #[error("JSON error: {msg}")]
    Json { msg: String },
}

impl JoinError {
    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        JoinError::MissingField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            JoinError::MissingField { .. } => ErrorCode::MissingField,
            JoinError::JoinInvariantViolation { .. } => ErrorCode::JoinInvariantViolation,
            JoinError::DuplicateMetaKey { .. } => ErrorCode::DuplicateMetaKey,
            JoinError::UnresolvedDonor { .. } => ErrorCode::UnresolvedDonor,
            JoinError::ProjectMismatch { .. } => ErrorCode::ProjectMismatch,
            JoinError::UnresolvableCategory { .. } => ErrorCode::UnresolvableCategory,
            JoinError::UnknownCategory { .. } => ErrorCode::UnknownCategory,
            JoinError::Parse { .. } => ErrorCode::ParseError,
            JoinError::Config { .. } => ErrorCode::ConfigError,
            JoinError::Io { .. } => ErrorCode::IoError,
            JoinError::Json { .. } => ErrorCode::JsonError,
        }
    }

    /// Get a formatted error prefixed with its code, e.g. `[E2001] ...`
    pub fn detailed_message(&self) -> String {
        format!("[{}] {}", self.code(), self)
    }
}

impl From<std::io::Error> for JoinError {
    fn from(err: std::io::Error) -> Self {
        JoinError::Io {
            msg: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for JoinError {
    fn from(err: serde_json::Error) -> Self {
        JoinError::Json {
            msg: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for JoinError {
    fn from(err: toml::de::Error) -> Self {
        JoinError::Config {
            msg: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for JoinError {
    fn from(err: toml::ser::Error) -> Self {
        JoinError::Config {
            msg: err.to_string(),
        }
    }
}
