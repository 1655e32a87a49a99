//! Applying a migration plan to every stored answer of a form

use super::field::{FieldMigrator, FieldOutcome};
use super::plan::MigrationPlan;
use crate::answer::{AnswerDocument, AnswerTree};
use crate::backup::BackupId;
use crate::storage::FormStore;
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

/// Totals for one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Backup taken before the first answer was touched
    pub backup_id: Option<BackupId>,
    pub answers_seen: usize,
    pub answers_changed: usize,
    pub fields_added: usize,
    pub fields_removed: usize,
    pub fields_renamed: usize,
    pub fields_relocated: usize,
}

impl MigrationReport {
    fn record(&mut self, outcome: &FieldOutcome) {
        self.answers_seen += 1;
        if outcome.changed() {
            self.answers_changed += 1;
        }
        self.fields_added += outcome.added;
        self.fields_removed += outcome.removed;
        self.fields_renamed += outcome.renamed;
        self.fields_relocated += outcome.relocated;
    }
}

/// Runs a [`FieldMigrator`] over all answers of a form
pub struct DataMigrator<'s, S: ?Sized> {
    store: &'s S,
}

impl<'s, S: FormStore + ?Sized> DataMigrator<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Migrate every answer of `form_id`, oldest first.
    ///
    /// With `backup_first`, the live schema is snapshotted into a new backup
    /// and each answer is copied into it before being rewritten. A rename
    /// whose source is missing aborts the run; callers are expected to apply
    /// each change set at most once.
    pub fn migrate(&self, form_id: &str, plan: &MigrationPlan, backup_first: bool) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();

        let backup = if backup_first {
            let version = self
                .store
                .current_version(form_id)?
                .with_context(|| format!("Form '{}' has no current version", form_id))?;
            let schema = self.store.load_schema(form_id, None)?;
            let backup = self
                .store
                .create_backup(form_id, version, &schema, &plan.changeset)?;
            info!("Created backup {} of form '{}' at version {}", backup.id, form_id, version);
            Some(backup.id)
        } else {
            None
        };
        report.backup_id = backup;

        let migrator = FieldMigrator::new(plan);
        for answer in self.store.iterate_answers(form_id)? {
            let answer = answer?;
            if let Some(backup_id) = backup {
                self.store.backup_answer(backup_id, &answer)?;
            }
            let outcome = self.migrate_answer(&migrator, &answer)?;
            report.record(&outcome);
        }

        info!(
            "Migrated form '{}': {} of {} answers changed",
            form_id, report.answers_changed, report.answers_seen
        );
        Ok(report)
    }

    /// Rewrite and save a single answer
    pub fn migrate_answer(&self, migrator: &FieldMigrator<'_>, answer: &AnswerDocument) -> Result<FieldOutcome> {
        let mut tree = AnswerTree::parse(&answer.xml)
            .with_context(|| format!("Failed to parse answer '{}'", answer.uuid))?;
        let outcome = migrator
            .alter_fields(&mut tree)
            .with_context(|| format!("Failed to migrate answer '{}'", answer.uuid))?;

        if outcome.changed() {
            let mut updated = answer.clone();
            updated.xml = tree.to_xml()?;
            self.store.save_answer(&updated)?;
        } else {
            debug!("Answer '{}' already up to date", answer.uuid);
        }
        Ok(outcome)
    }
}
