//! Database schema definition

/// SQL schema for the form store
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Forms and their live schema
CREATE TABLE IF NOT EXISTS forms (
    id_string TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    schema_text TEXT NOT NULL,
    current_version INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Submitted answers, mutated in place by migrations
CREATE TABLE IF NOT EXISTS answers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    form_id TEXT NOT NULL,
    uuid TEXT NOT NULL,
    xml TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (form_id) REFERENCES forms(id_string) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_answers_form ON answers(form_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_answers_uuid ON answers(form_id, uuid);

-- Schema revision history (parent-pointer forest)
CREATE TABLE IF NOT EXISTS versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    form_id TEXT NOT NULL,
    parent_id INTEGER,
    schema_text TEXT NOT NULL,
    schema_hash TEXT NOT NULL,
    changeset TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (form_id) REFERENCES forms(id_string) ON DELETE CASCADE,
    FOREIGN KEY (parent_id) REFERENCES versions(id)
);

CREATE INDEX IF NOT EXISTS idx_versions_form ON versions(form_id);
CREATE INDEX IF NOT EXISTS idx_versions_hash ON versions(schema_hash);

-- Snapshots of the previous schema taken before a migration
CREATE TABLE IF NOT EXISTS backups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    form_id TEXT NOT NULL,
    version_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    schema_text TEXT NOT NULL,
    changeset TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (form_id) REFERENCES forms(id_string) ON DELETE CASCADE,
    FOREIGN KEY (version_id) REFERENCES versions(id)
);

CREATE INDEX IF NOT EXISTS idx_backups_form ON backups(form_id);
CREATE INDEX IF NOT EXISTS idx_backups_version ON backups(version_id);

-- Unmodified answer copies belonging to a backup
CREATE TABLE IF NOT EXISTS answer_backups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    backup_id INTEGER NOT NULL,
    uuid TEXT NOT NULL,
    xml TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (backup_id) REFERENCES backups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_answer_backups_backup ON answer_backups(backup_id);
CREATE INDEX IF NOT EXISTS idx_answer_backups_uuid ON answer_backups(uuid);
"#;
