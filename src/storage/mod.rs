//! SQLite storage layer for xformshift
//!
//! This module handles persistent storage of:
//! - Forms and their live schema
//! - Submitted answers
//! - Schema version history
//! - Backups of schemas and answers taken before migrations
//!
//! The migration core only sees the collaborator traits below; `Database`
//! is the bundled implementation.

mod schema;

pub use schema::SCHEMA;

use crate::answer::{AnswerDocument, AnswerId};
use crate::backup::{AnswerBackup, BackupId, BackupRecord, RestoreRequest};
use crate::changeset::ChangeSet;
use crate::error::MigrationError;
use crate::version::{schema_fingerprint, VersionId, VersionNode};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;

// ==================== Collaborator Contracts ====================

/// Live schema storage
pub trait SchemaStore {
    /// Schema text of the live form, or of a specific revision
    fn load_schema(&self, form_id: &str, version: Option<VersionId>) -> Result<String>;

    /// Replace the live schema text
    fn save_schema(&self, form_id: &str, text: &str) -> Result<()>;

    /// Update the cached title, and the description when given
    fn save_form_details(&self, form_id: &str, title: &str, description: Option<&str>) -> Result<()>;
}

/// Answer storage
pub trait AnswerStore {
    /// Lazily iterate a form's answers in creation order.
    ///
    /// Each call starts from the beginning; answers saved during iteration
    /// are read back in their latest state.
    fn iterate_answers<'s>(
        &'s self,
        form_id: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<AnswerDocument>> + 's>>;

    /// Persist a (migrated) answer in place
    fn save_answer(&self, doc: &AnswerDocument) -> Result<()>;
}

/// Backup storage
pub trait BackupStore {
    /// Record a snapshot of the schema about to be replaced
    fn create_backup(
        &self,
        form_id: &str,
        version_id: VersionId,
        schema_text: &str,
        changeset: &ChangeSet,
    ) -> Result<BackupRecord>;

    /// Copy one unmodified answer into a backup
    fn backup_answer(&self, backup_id: BackupId, answer: &AnswerDocument) -> Result<()>;

    fn latest_backup(&self, form_id: &str) -> Result<Option<BackupRecord>>;

    /// Most recent backup of the given revision
    fn backup_for_version(&self, form_id: &str, version: VersionId) -> Result<Option<BackupRecord>>;

    fn backup_answers(&self, backup_id: BackupId) -> Result<Vec<AnswerBackup>>;

    /// Delete all but the `keep` most recent backups of a form
    fn prune_backups(&self, form_id: &str, keep: usize) -> Result<usize>;

    /// Resolve a backup by explicit version or as the most recent one.
    ///
    /// Passing both or neither, or naming a version without a backup, is a
    /// `BackupRestore` error.
    fn get_backup(&self, form_id: &str, version: Option<VersionId>, latest: bool) -> Result<BackupRecord> {
        let found = match RestoreRequest::new(version, latest)? {
            RestoreRequest::Latest => self.latest_backup(form_id)?,
            RestoreRequest::Version(v) => self.backup_for_version(form_id, v)?,
        };
        found.ok_or_else(|| {
            MigrationError::BackupRestore(format!("no backup found for form '{}'", form_id)).into()
        })
    }
}

/// Version history storage
pub trait VersionStore {
    fn create_version(
        &self,
        form_id: &str,
        parent: Option<VersionId>,
        schema_text: &str,
        changeset: Option<&ChangeSet>,
    ) -> Result<VersionNode>;

    fn get_version(&self, id: VersionId) -> Result<Option<VersionNode>>;

    /// All revisions of a form, oldest first
    fn versions(&self, form_id: &str) -> Result<Vec<VersionNode>>;

    fn current_version(&self, form_id: &str) -> Result<Option<VersionId>>;

    fn set_current_version(&self, form_id: &str, version: VersionId) -> Result<()>;
}

/// Everything the engine needs from persistence
pub trait FormStore: SchemaStore + AnswerStore + BackupStore + VersionStore {}

impl<T: SchemaStore + AnswerStore + BackupStore + VersionStore + ?Sized> FormStore for T {}

// ==================== Records ====================

/// A registered form
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormRecord {
    pub id_string: String,
    pub title: String,
    pub description: String,
    pub schema_text: String,
    pub current_version: Option<VersionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub forms: usize,
    pub answers: usize,
    pub versions: usize,
    pub backups: usize,
}

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", path.as_ref()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(())
    }

    /// Run `f` inside a transaction; any error rolls everything back
    pub fn in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let value = f(self)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(value)
    }

    // ==================== Forms ====================

    /// Insert a new form with its live schema
    pub fn insert_form(&self, id_string: &str, title: &str, description: &str, schema_text: &str) -> Result<()> {
        let now = timestamp();
        self.conn
            .execute(
                r#"
                INSERT INTO forms (id_string, title, description, schema_text, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                "#,
                params![id_string, title, description, schema_text, now],
            )
            .with_context(|| format!("Failed to insert form '{}'", id_string))?;
        Ok(())
    }

    /// Get a form by id
    pub fn get_form(&self, id_string: &str) -> Result<Option<FormRecord>> {
        let result = self
            .conn
            .query_row(
                r#"
                SELECT id_string, title, description, schema_text, current_version,
                       created_at, updated_at
                FROM forms WHERE id_string = ?1
                "#,
                params![id_string],
                |row| {
                    Ok(FormRow {
                        id_string: row.get(0)?,
                        title: row.get(1)?,
                        description: row.get(2)?,
                        schema_text: row.get(3)?,
                        current_version: row.get(4)?,
                        created_at: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()
            .context("Failed to get form")?;

        result.map(FormRow::into_form).transpose()
    }

    /// Get all forms, ordered by id
    pub fn list_forms(&self) -> Result<Vec<FormRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id_string, title, description, schema_text, current_version,
                   created_at, updated_at
            FROM forms ORDER BY id_string
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(FormRow {
                id_string: row.get(0)?,
                title: row.get(1)?,
                description: row.get(2)?,
                schema_text: row.get(3)?,
                current_version: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        })?;

        let mut forms = Vec::new();
        for row in rows {
            forms.push(row?.into_form()?);
        }

        Ok(forms)
    }

    // ==================== Answers ====================

    /// Store a new answer
    pub fn insert_answer(&self, form_id: &str, uuid: &str, xml: &str) -> Result<AnswerDocument> {
        let now = timestamp();
        self.conn
            .execute(
                r#"
                INSERT INTO answers (form_id, uuid, xml, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?4)
                "#,
                params![form_id, uuid, xml, now],
            )
            .with_context(|| format!("Failed to insert answer '{}'", uuid))?;

        let id = self.conn.last_insert_rowid();
        self.get_answer(id)?
            .with_context(|| format!("Answer {} vanished after insert", id))
    }

    /// Get an answer by row id
    pub fn get_answer(&self, id: AnswerId) -> Result<Option<AnswerDocument>> {
        let result = self
            .conn
            .query_row(
                "SELECT id, form_id, uuid, xml, created_at FROM answers WHERE id = ?1",
                params![id],
                |row| {
                    Ok(AnswerRow {
                        id: row.get(0)?,
                        form_id: row.get(1)?,
                        uuid: row.get(2)?,
                        xml: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to get answer")?;

        result.map(AnswerRow::into_answer).transpose()
    }

    /// Row ids of a form's answers in creation order
    pub fn answer_ids(&self, form_id: &str) -> Result<Vec<AnswerId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM answers WHERE form_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![form_id], |row| row.get(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }

        Ok(ids)
    }

    /// Load all answers of a form, in creation order
    pub fn list_answers(&self, form_id: &str) -> Result<Vec<AnswerDocument>> {
        self.iterate_answers(form_id)?.collect()
    }

    pub fn count_answers(&self, form_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM answers WHERE form_id = ?1",
            params![form_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ==================== Backups ====================

    fn query_backup(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<BackupRecord>> {
        let result = self
            .conn
            .query_row(sql, params, |row| {
                Ok(BackupRow {
                    id: row.get(0)?,
                    form_id: row.get(1)?,
                    version_id: row.get(2)?,
                    title: row.get(3)?,
                    description: row.get(4)?,
                    schema_text: row.get(5)?,
                    changeset: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })
            .optional()
            .context("Failed to get backup")?;

        result.map(BackupRow::into_backup).transpose()
    }

    /// All backups of a form, newest first
    pub fn list_backups(&self, form_id: &str) -> Result<Vec<BackupRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, form_id, version_id, title, description, schema_text,
                   changeset, created_at
            FROM backups WHERE form_id = ?1 ORDER BY id DESC
            "#,
        )?;

        let rows = stmt.query_map(params![form_id], |row| {
            Ok(BackupRow {
                id: row.get(0)?,
                form_id: row.get(1)?,
                version_id: row.get(2)?,
                title: row.get(3)?,
                description: row.get(4)?,
                schema_text: row.get(5)?,
                changeset: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;

        let mut backups = Vec::new();
        for row in rows {
            backups.push(row?.into_backup()?);
        }

        Ok(backups)
    }

    // ==================== Statistics ====================

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let forms: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM forms", [], |row| row.get(0))?;

        let answers: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM answers", [], |row| row.get(0))?;

        let versions: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM versions", [], |row| row.get(0))?;

        let backups: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM backups", [], |row| row.get(0))?;

        Ok(DatabaseStats {
            forms: forms as usize,
            answers: answers as usize,
            versions: versions as usize,
            backups: backups as usize,
        })
    }
}

impl SchemaStore for Database {
    fn load_schema(&self, form_id: &str, version: Option<VersionId>) -> Result<String> {
        match version {
            None => {
                let form = self
                    .get_form(form_id)?
                    .with_context(|| format!("Form '{}' is not registered", form_id))?;
                Ok(form.schema_text)
            }
            Some(id) => {
                let node = self
                    .get_version(id)?
                    .filter(|node| node.form_id == form_id)
                    .ok_or(MigrationError::UnknownVersion(id))?;
                Ok(node.schema_text)
            }
        }
    }

    fn save_schema(&self, form_id: &str, text: &str) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE forms SET schema_text = ?2, updated_at = ?3 WHERE id_string = ?1",
                params![form_id, text, timestamp()],
            )
            .context("Failed to save schema")?;
        anyhow::ensure!(updated == 1, "Form '{}' is not registered", form_id);
        Ok(())
    }

    fn save_form_details(&self, form_id: &str, title: &str, description: Option<&str>) -> Result<()> {
        let updated = self
            .conn
            .execute(
                r#"
                UPDATE forms
                SET title = ?2, description = COALESCE(?3, description), updated_at = ?4
                WHERE id_string = ?1
                "#,
                params![form_id, title, description, timestamp()],
            )
            .context("Failed to update form details")?;
        anyhow::ensure!(updated == 1, "Form '{}' is not registered", form_id);
        Ok(())
    }
}

impl AnswerStore for Database {
    fn iterate_answers<'s>(
        &'s self,
        form_id: &str,
    ) -> Result<Box<dyn Iterator<Item = Result<AnswerDocument>> + 's>> {
        let ids = self.answer_ids(form_id)?;
        Ok(Box::new(ids.into_iter().map(move |id| {
            self.get_answer(id)?
                .with_context(|| format!("Answer {} disappeared during iteration", id))
        })))
    }

    fn save_answer(&self, doc: &AnswerDocument) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE answers SET xml = ?2, uuid = ?3, updated_at = ?4 WHERE id = ?1",
                params![doc.id, doc.xml, doc.uuid, timestamp()],
            )
            .with_context(|| format!("Failed to save answer {}", doc.id))?;
        anyhow::ensure!(updated == 1, "Answer {} does not exist", doc.id);
        Ok(())
    }
}

impl BackupStore for Database {
    fn create_backup(
        &self,
        form_id: &str,
        version_id: VersionId,
        schema_text: &str,
        changeset: &ChangeSet,
    ) -> Result<BackupRecord> {
        let form = self
            .get_form(form_id)?
            .with_context(|| format!("Form '{}' is not registered", form_id))?;
        let changeset_json =
            serde_json::to_string(changeset).context("Failed to serialize change set")?;

        self.conn
            .execute(
                r#"
                INSERT INTO backups (form_id, version_id, title, description, schema_text,
                                     changeset, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    form_id,
                    version_id,
                    form.title,
                    form.description,
                    schema_text,
                    changeset_json,
                    timestamp(),
                ],
            )
            .context("Failed to create backup")?;

        let id = self.conn.last_insert_rowid();
        self.query_backup(
            r#"
            SELECT id, form_id, version_id, title, description, schema_text,
                   changeset, created_at
            FROM backups WHERE id = ?1
            "#,
            params![id],
        )?
        .with_context(|| format!("Backup {} vanished after insert", id))
    }

    fn backup_answer(&self, backup_id: BackupId, answer: &AnswerDocument) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO answer_backups (backup_id, uuid, xml, created_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![backup_id, answer.uuid, answer.xml, timestamp()],
            )
            .with_context(|| format!("Failed to back up answer '{}'", answer.uuid))?;
        Ok(())
    }

    fn latest_backup(&self, form_id: &str) -> Result<Option<BackupRecord>> {
        self.query_backup(
            r#"
            SELECT id, form_id, version_id, title, description, schema_text,
                   changeset, created_at
            FROM backups WHERE form_id = ?1 ORDER BY id DESC LIMIT 1
            "#,
            params![form_id],
        )
    }

    fn backup_for_version(&self, form_id: &str, version: VersionId) -> Result<Option<BackupRecord>> {
        self.query_backup(
            r#"
            SELECT id, form_id, version_id, title, description, schema_text,
                   changeset, created_at
            FROM backups WHERE form_id = ?1 AND version_id = ?2 ORDER BY id DESC LIMIT 1
            "#,
            params![form_id, version],
        )
    }

    fn backup_answers(&self, backup_id: BackupId) -> Result<Vec<AnswerBackup>> {
        let mut stmt = self
            .conn
            .prepare("SELECT uuid, xml FROM answer_backups WHERE backup_id = ?1 ORDER BY id")?;

        let rows = stmt.query_map(params![backup_id], |row| {
            Ok(AnswerBackup {
                uuid: row.get(0)?,
                xml: row.get(1)?,
            })
        })?;

        let mut answers = Vec::new();
        for row in rows {
            answers.push(row?);
        }

        Ok(answers)
    }

    fn prune_backups(&self, form_id: &str, keep: usize) -> Result<usize> {
        let deleted = self
            .conn
            .execute(
                r#"
                DELETE FROM backups WHERE form_id = ?1 AND id NOT IN (
                    SELECT id FROM backups WHERE form_id = ?1 ORDER BY id DESC LIMIT ?2
                )
                "#,
                params![form_id, keep as i64],
            )
            .context("Failed to prune backups")?;
        Ok(deleted)
    }
}

impl VersionStore for Database {
    fn create_version(
        &self,
        form_id: &str,
        parent: Option<VersionId>,
        schema_text: &str,
        changeset: Option<&ChangeSet>,
    ) -> Result<VersionNode> {
        let changeset_json = changeset
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize change set")?;

        self.conn
            .execute(
                r#"
                INSERT INTO versions (form_id, parent_id, schema_text, schema_hash, changeset, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    form_id,
                    parent,
                    schema_text,
                    schema_fingerprint(schema_text),
                    changeset_json,
                    timestamp(),
                ],
            )
            .context("Failed to create version")?;

        let id = self.conn.last_insert_rowid();
        self.get_version(id)?
            .with_context(|| format!("Version {} vanished after insert", id))
    }

    fn get_version(&self, id: VersionId) -> Result<Option<VersionNode>> {
        let result = self
            .conn
            .query_row(
                r#"
                SELECT id, form_id, parent_id, schema_text, schema_hash, changeset, created_at
                FROM versions WHERE id = ?1
                "#,
                params![id],
                |row| {
                    Ok(VersionRow {
                        id: row.get(0)?,
                        form_id: row.get(1)?,
                        parent_id: row.get(2)?,
                        schema_text: row.get(3)?,
                        schema_hash: row.get(4)?,
                        changeset: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()
            .context("Failed to get version")?;

        result.map(VersionRow::into_node).transpose()
    }

    fn versions(&self, form_id: &str) -> Result<Vec<VersionNode>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, form_id, parent_id, schema_text, schema_hash, changeset, created_at
            FROM versions WHERE form_id = ?1 ORDER BY id
            "#,
        )?;

        let rows = stmt.query_map(params![form_id], |row| {
            Ok(VersionRow {
                id: row.get(0)?,
                form_id: row.get(1)?,
                parent_id: row.get(2)?,
                schema_text: row.get(3)?,
                schema_hash: row.get(4)?,
                changeset: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?.into_node()?);
        }

        Ok(nodes)
    }

    fn current_version(&self, form_id: &str) -> Result<Option<VersionId>> {
        let result: Option<Option<VersionId>> = self
            .conn
            .query_row(
                "SELECT current_version FROM forms WHERE id_string = ?1",
                params![form_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to get current version")?;

        Ok(result.flatten())
    }

    fn set_current_version(&self, form_id: &str, version: VersionId) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE forms SET current_version = ?2, updated_at = ?3 WHERE id_string = ?1",
                params![form_id, version, timestamp()],
            )
            .context("Failed to set current version")?;
        anyhow::ensure!(updated == 1, "Form '{}' is not registered", form_id);
        Ok(())
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp '{}'", value))?
        .with_timezone(&Utc))
}

// Internal row types for database mapping

struct FormRow {
    id_string: String,
    title: String,
    description: String,
    schema_text: String,
    current_version: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl FormRow {
    fn into_form(self) -> Result<FormRecord> {
        Ok(FormRecord {
            id_string: self.id_string,
            title: self.title,
            description: self.description,
            schema_text: self.schema_text,
            current_version: self.current_version,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

struct AnswerRow {
    id: i64,
    form_id: String,
    uuid: String,
    xml: String,
    created_at: String,
}

impl AnswerRow {
    fn into_answer(self) -> Result<AnswerDocument> {
        Ok(AnswerDocument {
            id: self.id,
            form_id: self.form_id,
            uuid: self.uuid,
            xml: self.xml,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct VersionRow {
    id: i64,
    form_id: String,
    parent_id: Option<i64>,
    schema_text: String,
    schema_hash: String,
    changeset: Option<String>,
    created_at: String,
}

impl VersionRow {
    fn into_node(self) -> Result<VersionNode> {
        let changeset = self
            .changeset
            .as_deref()
            .map(serde_json::from_str::<ChangeSet>)
            .transpose()
            .with_context(|| format!("Corrupt change set on version {}", self.id))?;

        Ok(VersionNode {
            id: self.id,
            form_id: self.form_id,
            parent: self.parent_id,
            schema_text: self.schema_text,
            schema_hash: self.schema_hash,
            changeset,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct BackupRow {
    id: i64,
    form_id: String,
    version_id: i64,
    title: String,
    description: String,
    schema_text: String,
    changeset: String,
    created_at: String,
}

impl BackupRow {
    fn into_backup(self) -> Result<BackupRecord> {
        let changeset: ChangeSet = serde_json::from_str(&self.changeset)
            .with_context(|| format!("Corrupt change set on backup {}", self.id))?;

        Ok(BackupRecord {
            id: self.id,
            form_id: self.form_id,
            version_id: self.version_id,
            title: self.title,
            description: self.description,
            schema_text: self.schema_text,
            changeset,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}
