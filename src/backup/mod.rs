//! Backups and restoration of earlier form states
//!
//! Two restore modes exist:
//! - Most recent backup: answers captured in the backup are put back
//!   verbatim, newer answers are migrated backward.
//! - Any ancestor version: the change sets along the version path are merged
//!   into one and replayed over every live answer.

use crate::changeset::ChangeSet;
use crate::error::{MigrationError, Result as CoreResult};
use crate::migrate::{DataMigrator, FieldMigrator, MigrationPlan};
use crate::schema::SchemaTree;
use crate::storage::FormStore;
use crate::version::{VersionGraph, VersionId};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

pub type BackupId = i64;

/// Immutable snapshot of a schema taken before a migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,
    pub form_id: String,
    /// Version whose schema this backup holds
    pub version_id: VersionId,
    pub title: String,
    pub description: String,
    pub schema_text: String,
    /// Change that was applied right after the snapshot
    pub changeset: ChangeSet,
    pub created_at: DateTime<Utc>,
}

/// Unmodified copy of an answer inside a backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerBackup {
    pub uuid: String,
    pub xml: String,
}

/// Which state to restore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreRequest {
    /// The most recent backup of the form
    Latest,
    /// A specific version node
    Version(VersionId),
}

impl RestoreRequest {
    /// Exactly one of `version` and `latest` must be given
    pub fn new(version: Option<VersionId>, latest: bool) -> CoreResult<Self> {
        match (version, latest) {
            (Some(v), false) => Ok(Self::Version(v)),
            (None, true) => Ok(Self::Latest),
            (Some(_), true) => Err(MigrationError::BackupRestore(
                "choose either a version or the most recent backup, not both".into(),
            )),
            (None, false) => Err(MigrationError::BackupRestore(
                "no version given and most recent backup not requested".into(),
            )),
        }
    }
}

/// Outcome of a restore
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Version the form now points at
    pub version_id: VersionId,
    /// Change set replayed over answers that were not restored verbatim
    pub changeset: ChangeSet,
    /// Answers overwritten with their backup copy
    pub restored_verbatim: usize,
    /// Answers rewritten by the change set
    pub migrated: usize,
    /// Backup copies whose answer no longer exists
    pub orphaned: usize,
}

/// Restores a form's schema and answers to an earlier state
pub struct BackupRestorer<'s, S: ?Sized> {
    store: &'s S,
}

impl<'s, S: FormStore + ?Sized> BackupRestorer<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Restore by explicit version or most recent backup
    pub fn restore(&self, form_id: &str, version: Option<VersionId>, restore_last: bool) -> Result<RestoreReport> {
        match RestoreRequest::new(version, restore_last)? {
            RestoreRequest::Latest => self.restore_latest(form_id),
            RestoreRequest::Version(v) => self.restore_version(form_id, v),
        }
    }

    /// Put back the schema and answers captured by the most recent backup
    pub fn restore_latest(&self, form_id: &str) -> Result<RestoreReport> {
        let backup = self.store.get_backup(form_id, None, true)?;
        info!(
            "Restoring form '{}' from backup {} (version {})",
            form_id, backup.id, backup.version_id
        );

        let mut saved: HashMap<String, String> = self
            .store
            .backup_answers(backup.id)?
            .into_iter()
            .map(|a| (a.uuid, a.xml))
            .collect();

        let live = SchemaTree::parse(&self.store.load_schema(form_id, None)?)
            .context("Failed to parse live schema")?;
        let target = SchemaTree::parse(&backup.schema_text).context("Failed to parse backup schema")?;
        let changeset = backup.changeset.reverse();
        let plan = MigrationPlan::for_changeset(changeset.clone(), &live, &target);
        let migrator = FieldMigrator::new(&plan);
        let data = DataMigrator::new(self.store);

        let mut report = RestoreReport {
            version_id: backup.version_id,
            changeset,
            ..RestoreReport::default()
        };

        for answer in self.store.iterate_answers(form_id)? {
            let mut answer = answer?;
            match saved.remove(&answer.uuid) {
                Some(xml) => {
                    if answer.xml != xml {
                        answer.xml = xml;
                        self.store.save_answer(&answer)?;
                    }
                    report.restored_verbatim += 1;
                }
                None => {
                    debug!("Answer '{}' is newer than the backup", answer.uuid);
                    data.migrate_answer(&migrator, &answer)?;
                    report.migrated += 1;
                }
            }
        }
        report.orphaned = saved.len();

        self.store.save_schema(form_id, &backup.schema_text)?;
        self.store
            .save_form_details(form_id, &backup.title, Some(&backup.description))?;
        self.store.set_current_version(form_id, backup.version_id)?;

        info!(
            "Restored form '{}': {} verbatim, {} migrated back, {} orphaned copies",
            form_id, report.restored_verbatim, report.migrated, report.orphaned
        );
        Ok(report)
    }

    /// Move the form to any version in its lineage
    pub fn restore_version(&self, form_id: &str, version: VersionId) -> Result<RestoreReport> {
        let graph = VersionGraph::from_nodes(self.store.versions(form_id)?);
        if !graph.contains(version) {
            return Err(MigrationError::BackupRestore(format!(
                "version {} does not exist for form '{}'",
                version, form_id
            ))
            .into());
        }
        let current = self
            .store
            .current_version(form_id)?
            .with_context(|| format!("Form '{}' has no current version", form_id))?;

        let (up, down) = graph.find_path(current, version)?;
        info!(
            "Restoring form '{}' from version {} to {} (up {:?}, down {:?})",
            form_id, current, version, up, down
        );
        let changeset = graph.composite_changeset(current, version)?;
        debug!("Composite change set: {}", changeset.summary());

        let target_text = &graph.get(version)?.schema_text;
        let live = SchemaTree::parse(&self.store.load_schema(form_id, None)?)
            .context("Failed to parse live schema")?;
        let target = SchemaTree::parse(target_text).context("Failed to parse target schema")?;
        let plan = MigrationPlan::for_changeset(changeset.clone(), &live, &target);

        let migration = DataMigrator::new(self.store).migrate(form_id, &plan, false)?;

        self.store.save_schema(form_id, target_text)?;
        self.store.save_form_details(form_id, target.title(), None)?;
        self.store.set_current_version(form_id, version)?;

        Ok(RestoreReport {
            version_id: version,
            changeset,
            restored_verbatim: 0,
            migrated: migration.answers_changed,
            orphaned: 0,
        })
    }
}
