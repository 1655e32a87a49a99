//! Rewriting stored answers to match a new schema

pub mod data;
pub mod field;
pub mod plan;

pub use data::{DataMigrator, MigrationReport};
pub use field::{FieldMigrator, FieldOutcome};
pub use plan::MigrationPlan;
