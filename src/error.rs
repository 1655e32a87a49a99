//! Error types for the migration core

use thiserror::Error;

/// Errors raised by the schema, answer, diff and version components.
///
/// Storage and CLI layers wrap these in `anyhow::Error`; callers that need
/// to branch on the kind can `downcast_ref::<MigrationError>()`.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A referenced field is absent from a schema or answer tree
    #[error("field '{field}' not found")]
    MissingField { field: String },

    /// Two version nodes belong to different lineages
    #[error("versions {from} and {to} share no common ancestor")]
    DifferentTree { from: i64, to: i64 },

    /// Ambiguous or invalid restore request
    #[error("backup restore failed: {0}")]
    BackupRestore(String),

    /// Version id is not part of the graph
    #[error("unknown version {0}")]
    UnknownVersion(i64),

    /// A parent chain loops back on itself
    #[error("version history is corrupt around version {0}")]
    CorruptHistory(i64),

    /// Decision entry rejected at construction
    #[error("invalid decision: {0}")]
    InvalidDecision(String),

    /// A field appears in more than one change category
    #[error("invalid change set: {0}")]
    InvalidChangeSet(String),

    /// A group on an insertion path is occupied by a leaf value
    #[error("element '{group}' holds a value and cannot be used as a group")]
    GroupConflict { group: String },

    /// The document does not have the expected XForm/answer shape
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// Low-level XML parse or write failure
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}

impl MigrationError {
    pub(crate) fn missing(field: impl Into<String>) -> Self {
        MigrationError::MissingField {
            field: field.into(),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for MigrationError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        MigrationError::Xml(err.into())
    }
}

/// Result alias for the migration core
pub type Result<T> = std::result::Result<T, MigrationError>;
