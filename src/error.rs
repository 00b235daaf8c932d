//! Crate-wide error type.

use std::fmt;
use std::io;

use thiserror::Error;
use tracing::error;

use crate::config::ConfigError;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// A single failed validation rule on one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Field the rule is declared on.
    pub field: String,
    /// Human readable description of the failure.
    pub message: String,
}

impl Violation {
    /// Violation of one rule on `field`.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

/// Errors raised by persistence, search, patching and the service.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Element does not carry the label of the requested type.
    #[error("type mismatch: expected label '{expected}', element carries {found:?}")]
    TypeMismatch {
        /// Label of the requested type.
        expected: String,
        /// Labels the element carries.
        found: Vec<String>,
    },
    /// A required field has no value.
    #[error("the value for the field \"{field}\" is missing on {entity}")]
    MissingRequired {
        /// Type of the saved entity.
        entity: String,
        /// The empty field.
        field: String,
    },
    /// Validation rules or uniqueness constraints failed.
    #[error("violations storing {entity}: {}", join_violations(.violations))]
    ConstraintViolation {
        /// Type of the saved entity.
        entity: String,
        /// Every failed rule.
        violations: Vec<Violation>,
    },
    /// A save or removal could not be carried out.
    #[error("persist failed: {0}")]
    Persist(String),
    /// Lookup target does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// The type is unknown or the registry cannot be built.
    #[error("cannot provide a repository for '{name}': {reason}")]
    RepositoryInstantiation {
        /// Requested type name.
        name: String,
        /// Why no repository exists.
        reason: String,
    },
    /// A patch failed; the graph may be partially migrated.
    #[error("patch '{patch}' for version {version} failed: {source}")]
    Migration {
        /// Version of the failed patch.
        version: String,
        /// Name of the failed patch.
        patch: String,
        /// Error the patch returned.
        #[source]
        source: Box<GraphError>,
    },
    /// `connect` on a running service.
    #[error("service is already running")]
    AlreadyRunning,
    /// Operation needs a running service or a live repository.
    #[error("service is not running")]
    NotRunning,
    /// Write, commit or rollback without an owned transaction.
    #[error("no active transaction")]
    NoTransaction,
    /// Commit after a nested rollback.
    #[error("transaction was marked for rollback")]
    RolledBack,
    /// Malformed parameters or unknown fields.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Valid request the implementation does not handle.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Failure inside the graph backend.
    #[error("backend error: {0}")]
    Backend(String),
    /// Snapshot or configuration file I/O.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Snapshot or parameter JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A version string is not `major.minor.patch`.
    #[error("invalid version '{input}': {source}")]
    Version {
        /// Rejected input.
        input: String,
        /// Parser error.
        #[source]
        source: semver::Error,
    },
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GraphError {
    /// Errors after which the graph may be left in an inconsistent state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GraphError::Migration { .. })
    }

    pub(crate) fn not_found(what: impl fmt::Display) -> Self {
        GraphError::NotFound(what.to_string())
    }

    pub(crate) fn fatal_migration(version: String, patch: String, source: GraphError) -> Self {
        error!(%version, %patch, error = %source, "patch failed, graph state may be inconsistent");
        GraphError::Migration {
            version,
            patch,
            source: Box::new(source),
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
