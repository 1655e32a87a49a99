//! Form lifecycle orchestration
//!
//! Ties the migration core to storage: registering forms, accepting answers,
//! previewing and applying schema updates, restoring earlier states and
//! reading the version history.

use crate::answer::{AnswerDocument, AnswerTree};
use crate::backup::{BackupRestorer, RestoreReport};
use crate::changeset::ChangeSet;
use crate::compare::{SchemaComparator, SchemaDiff};
use crate::config::EngineConfig;
use crate::decision::{Decisions, MigrationDecisioner};
use crate::error::MigrationError;
use crate::migrate::{DataMigrator, MigrationReport};
use crate::schema::SchemaTree;
use crate::storage::{BackupStore, Database, FormRecord, SchemaStore, VersionStore};
use crate::version::{schema_fingerprint, VersionId, VersionNode};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// What an update would do, before any decision is applied
#[derive(Debug, Clone, Serialize)]
pub struct UpdatePreview {
    pub diff: SchemaDiff,
    /// Change set under the decisions given so far
    pub changeset: ChangeSet,
    /// Added field to the removed fields it could be renamed from
    pub rename_candidates: BTreeMap<String, Vec<String>>,
    /// Added fields that have no decision yet
    pub pending: Vec<String>,
}

/// Result of applying a schema update
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    /// New version node, absent when the upload changed nothing structural
    pub version: Option<VersionId>,
    pub diff: SchemaDiff,
    pub changeset: ChangeSet,
    pub migration: Option<MigrationReport>,
    pub pruned_backups: usize,
}

/// One line of a form's history
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: VersionId,
    pub parent: Option<VersionId>,
    pub created_at: DateTime<Utc>,
    pub schema_hash: String,
    pub summary: String,
    pub current: bool,
}

impl HistoryEntry {
    fn from_node(node: &VersionNode, current: Option<VersionId>) -> Self {
        Self {
            id: node.id,
            parent: node.parent,
            created_at: node.created_at,
            schema_hash: node.schema_hash.clone(),
            summary: node
                .changeset
                .as_ref()
                .map(ChangeSet::summary)
                .unwrap_or_else(|| "initial version".to_string()),
            current: current == Some(node.id),
        }
    }
}

/// Facade over the database and the migration core
pub struct MigrationEngine<'d> {
    db: &'d Database,
    config: EngineConfig,
}

impl<'d> MigrationEngine<'d> {
    pub fn new(db: &'d Database, config: EngineConfig) -> Self {
        Self { db, config }
    }

    pub fn database(&self) -> &'d Database {
        self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn form(&self, form_id: &str) -> Result<FormRecord> {
        self.db
            .get_form(form_id)?
            .with_context(|| format!("Form '{}' is not registered", form_id))
    }

    // ==================== Forms & Answers ====================

    /// Register a new form and its root version
    pub fn register(&self, schema_text: &str, description: &str) -> Result<FormRecord> {
        let tree = SchemaTree::parse(schema_text).context("Failed to parse schema")?;
        let form_id = tree.form_id().to_string();
        anyhow::ensure!(
            self.db.get_form(&form_id)?.is_none(),
            "Form '{}' is already registered",
            form_id
        );

        self.db.in_transaction(|db| {
            db.insert_form(&form_id, tree.title(), description, schema_text)?;
            let root = db.create_version(&form_id, None, schema_text, None)?;
            db.set_current_version(&form_id, root.id)?;
            info!(
                "Registered form '{}' with {} fields (version {})",
                form_id,
                tree.fields().len(),
                root.id
            );
            Ok(())
        })?;

        self.form(&form_id)
    }

    /// Store a submitted answer
    pub fn submit(&self, form_id: &str, xml: &str) -> Result<AnswerDocument> {
        let form = self.form(form_id)?;
        let schema = SchemaTree::parse(&form.schema_text).context("Failed to parse live schema")?;
        let answer = AnswerTree::parse(xml).context("Failed to parse answer")?;

        if answer.root_name() != schema.root_name() {
            return Err(MigrationError::MalformedDocument(format!(
                "answer root '{}' does not match form root '{}'",
                answer.root_name(),
                schema.root_name()
            ))
            .into());
        }

        let uuid = answer
            .instance_id()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let doc = self.db.insert_answer(form_id, &uuid, xml)?;
        debug!("Stored answer '{}' for form '{}'", doc.uuid, form_id);
        Ok(doc)
    }

    pub fn answers(&self, form_id: &str) -> Result<Vec<AnswerDocument>> {
        self.form(form_id)?;
        self.db.list_answers(form_id)
    }

    // ==================== Schema Updates ====================

    /// Parse an upload and align its root tag and form id with the live form.
    ///
    /// Returns the tree and the text to store.
    fn prepare_upload(&self, live: &SchemaTree, schema_text: &str) -> Result<(SchemaTree, String)> {
        let mut tree = SchemaTree::parse(schema_text).context("Failed to parse new schema")?;
        if tree.is_aligned_with(live.root_name(), live.form_id()) {
            return Ok((tree, schema_text.to_string()));
        }
        debug!(
            "Aligning upload <{} id='{}'> to <{} id='{}'>",
            tree.root_name(),
            tree.form_id(),
            live.root_name(),
            live.form_id()
        );
        tree.align_with(live.root_name(), live.form_id());
        let text = tree.to_xml()?;
        Ok((tree, text))
    }

    /// Diff an upload against the live schema without changing anything
    pub fn compare(&self, form_id: &str, schema_text: &str, decisions: &Decisions) -> Result<UpdatePreview> {
        let form = self.form(form_id)?;
        let prev = SchemaTree::parse(&form.schema_text).context("Failed to parse live schema")?;
        let (new, _) = self.prepare_upload(&prev, schema_text)?;

        let comparator = SchemaComparator::new(&prev, &new);
        let decisioner = MigrationDecisioner::new(comparator, decisions);
        Ok(UpdatePreview {
            diff: comparator.diff(),
            changeset: decisioner.changeset()?,
            rename_candidates: decisioner.rename_candidates(),
            pending: decisioner.pending_fields(),
        })
    }

    /// Replace the live schema, migrating answers as decided
    pub fn update(&self, form_id: &str, schema_text: &str, decisions: &Decisions) -> Result<UpdateOutcome> {
        let form = self.form(form_id)?;
        let prev = SchemaTree::parse(&form.schema_text).context("Failed to parse live schema")?;
        let (new, text) = self.prepare_upload(&prev, schema_text)?;

        let comparator = SchemaComparator::new(&prev, &new);
        let diff = comparator.diff();
        let decisioner = MigrationDecisioner::new(comparator, decisions);
        let plan = decisioner.plan()?;
        for field in decisioner.pending_fields() {
            warn!("No decision for added field '{}', treating it as new", field);
        }

        let mut outcome = UpdateOutcome {
            version: None,
            diff,
            changeset: plan.changeset.clone(),
            migration: None,
            pruned_backups: 0,
        };

        if schema_fingerprint(&text) == schema_fingerprint(&form.schema_text) {
            info!("Schema of form '{}' is unchanged", form_id);
            return Ok(outcome);
        }

        if outcome.diff.is_empty() {
            info!("No structural change to form '{}', saving schema only", form_id);
            self.db.save_schema(form_id, &text)?;
            return Ok(outcome);
        }

        info!("Updating form '{}': {}", form_id, plan.changeset.summary());
        let current = self
            .db
            .current_version(form_id)?
            .with_context(|| format!("Form '{}' has no current version", form_id))?;

        let (version, migration, pruned) = self.db.in_transaction(|db| {
            let migration = DataMigrator::new(db).migrate(form_id, &plan, self.config.backup_first)?;
            let node = db.create_version(form_id, Some(current), &text, Some(&plan.changeset))?;
            db.set_current_version(form_id, node.id)?;
            db.save_schema(form_id, &text)?;
            if outcome.diff.title_change.is_some() {
                db.save_form_details(form_id, new.title(), None)?;
            }
            let pruned = match self.config.keep_backups {
                Some(keep) => db.prune_backups(form_id, keep)?,
                None => 0,
            };
            Ok((node.id, migration, pruned))
        })?;

        info!("Form '{}' is now at version {}", form_id, version);
        outcome.version = Some(version);
        outcome.migration = Some(migration);
        outcome.pruned_backups = pruned;
        Ok(outcome)
    }

    // ==================== Restore & History ====================

    /// Restore an explicit version or the most recent backup
    pub fn restore(&self, form_id: &str, version: Option<VersionId>, last: bool) -> Result<RestoreReport> {
        self.form(form_id)?;
        let report = self
            .db
            .in_transaction(|db| BackupRestorer::new(db).restore(form_id, version, last))?;
        info!("Form '{}' restored to version {}", form_id, report.version_id);
        Ok(report)
    }

    /// Version history of a form, oldest first
    pub fn history(&self, form_id: &str) -> Result<Vec<HistoryEntry>> {
        let form = self.form(form_id)?;
        Ok(self
            .db
            .versions(form_id)?
            .iter()
            .map(|node| HistoryEntry::from_node(node, form.current_version))
            .collect())
    }
}
