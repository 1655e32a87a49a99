//! xformshift - XForm schema migration engine
//!
//! This library lets a form's schema evolve while keeping previously
//! collected answers consistent with it. Schema revisions are diffed,
//! resolved into change sets with operator decisions, recorded in a version
//! forest, and replayed over stored answers. Backups taken before each
//! migration allow restoring any earlier state.

pub mod answer;
pub mod backup;
pub mod changeset;
pub mod cli;
pub mod compare;
pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod migrate;
pub mod schema;
pub mod storage;
pub mod version;
pub mod xml;

/// Re-export commonly used types
pub use answer::{AnswerDocument, AnswerTree};
pub use backup::{BackupRestorer, RestoreReport, RestoreRequest};
pub use changeset::ChangeSet;
pub use compare::{SchemaComparator, SchemaDiff};
pub use config::EngineConfig;
pub use decision::{Decision, Decisions, MigrationDecisioner};
pub use engine::MigrationEngine;
pub use error::MigrationError;
pub use migrate::{DataMigrator, FieldMigrator, MigrationPlan};
pub use schema::SchemaTree;
pub use storage::Database;
pub use version::{VersionGraph, VersionNode};

/// Application-wide error type
pub use anyhow::Result;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = "xformshift";
