//! Command implementations

use super::DecisionArgs;
use crate::answer::AnswerDocument;
use crate::backup::RestoreReport;
use crate::config::{EngineConfig, STATE_DIR};
use crate::decision::Decisions;
use crate::engine::{HistoryEntry, MigrationEngine, UpdateOutcome, UpdatePreview};
use crate::storage::{Database, DatabaseStats, FormRecord};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// An opened workspace: configuration plus database
pub struct Workspace {
    pub config: EngineConfig,
    pub db: Database,
}

impl Workspace {
    /// Open an initialized workspace
    pub fn open(path: &Path) -> Result<Self> {
        if !path.join(STATE_DIR).exists() {
            anyhow::bail!("xformshift not initialized. Run 'xformshift init' first.");
        }
        let config = EngineConfig::load_or_default(path)?;
        let db = Database::open(config.database_path(path))?;
        Ok(Self {
            config,
            db,
        })
    }

    pub fn engine(&self) -> MigrationEngine<'_> {
        MigrationEngine::new(&self.db, self.config.clone())
    }
}

/// Initialize a workspace
pub fn init(path: &Path, force: bool) -> Result<()> {
    let state_dir = path.join(STATE_DIR);
    if state_dir.exists() && !force {
        anyhow::bail!("xformshift already initialized. Use --force to re-initialize.");
    }

    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create {:?}", state_dir))?;

    let config = EngineConfig::default();
    config.save(path)?;

    let db_path = config.database_path(path);
    let _db = Database::open(&db_path)?;

    println!("✓ Initialized xformshift in {:?}", path);
    println!("  Database: {:?}", db_path);
    println!("  Config: {:?}", state_dir.join("config.toml"));

    Ok(())
}

/// Register a form
pub fn register(path: &Path, schema: &Path, description: &str) -> Result<FormRecord> {
    let workspace = Workspace::open(path)?;
    let text = read_file(schema)?;
    workspace.engine().register(&text, description)
}

/// Store answers for a form
pub fn submit(path: &Path, form: &str, files: &[PathBuf]) -> Result<Vec<AnswerDocument>> {
    let workspace = Workspace::open(path)?;
    let engine = workspace.engine();

    let mut stored = Vec::new();
    for file in files {
        let xml = read_file(file)?;
        let doc = engine
            .submit(form, &xml)
            .with_context(|| format!("Failed to submit {:?}", file))?;
        stored.push(doc);
    }

    Ok(stored)
}

/// Collect decisions from `--decision` pairs and an optional TOML file.
///
/// File entries come first; command-line pairs are appended.
pub fn load_decisions(args: &DecisionArgs) -> Result<Decisions> {
    let mut pairs: Vec<(String, String)> = Vec::new();

    if let Some(ref file) = args.decisions_file {
        let content = read_file(file)?;
        let table: BTreeMap<String, String> = toml::from_str(&content)
            .with_context(|| format!("Failed to parse decisions file: {:?}", file))?;
        pairs.extend(table);
    }

    for raw in &args.decisions {
        let (key, value) = raw
            .split_once('=')
            .with_context(|| format!("Decision '{}' is not in key=value form", raw))?;
        pairs.push((key.trim().to_string(), value.to_string()));
    }

    Ok(Decisions::from_pairs(pairs)?)
}

/// Preview a schema update
pub fn compare(path: &Path, form: &str, schema: &Path, decisions: &DecisionArgs) -> Result<UpdatePreview> {
    let workspace = Workspace::open(path)?;
    let text = read_file(schema)?;
    let decisions = load_decisions(decisions)?;
    workspace.engine().compare(form, &text, &decisions)
}

/// Apply a schema update
pub fn update(
    path: &Path,
    form: &str,
    schema: &Path,
    decisions: &DecisionArgs,
    no_backup: bool,
) -> Result<UpdateOutcome> {
    let mut workspace = Workspace::open(path)?;
    if no_backup {
        workspace.config.backup_first = false;
    }
    let text = read_file(schema)?;
    let decisions = load_decisions(decisions)?;
    workspace.engine().update(form, &text, &decisions)
}

/// Restore a form
pub fn restore(path: &Path, form: &str, version: Option<i64>, last: bool) -> Result<RestoreReport> {
    let workspace = Workspace::open(path)?;
    workspace.engine().restore(form, version, last)
}

/// Version history of a form
pub fn history(path: &Path, form: &str) -> Result<Vec<HistoryEntry>> {
    let workspace = Workspace::open(path)?;
    workspace.engine().history(form)
}

/// Stored answers of a form
pub fn answers(path: &Path, form: &str) -> Result<Vec<AnswerDocument>> {
    let workspace = Workspace::open(path)?;
    workspace.engine().answers(form)
}

/// Workspace overview
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub stats: DatabaseStats,
    pub forms: Vec<FormRecord>,
}

/// Show workspace status
pub fn status(path: &Path) -> Result<StatusReport> {
    let workspace = Workspace::open(path)?;
    Ok(StatusReport {
        stats: workspace.db.get_stats()?,
        forms: workspace.db.list_forms()?,
    })
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}

// ==================== Output ====================

/// Print any result as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_form_text(form: &FormRecord) {
    println!("✓ Registered form '{}'", form.id_string);
    println!("  Title: {}", form.title);
    if let Some(version) = form.current_version {
        println!("  Version: {}", version);
    }
}

pub fn print_submitted_text(docs: &[AnswerDocument]) {
    for doc in docs {
        println!("✓ Stored answer {} ({})", doc.id, doc.uuid);
    }
}

pub fn print_preview_text(preview: &UpdatePreview) {
    let diff = &preview.diff;
    if diff.is_empty() {
        println!("No structural differences.");
        return;
    }

    println!("Schema Comparison");
    println!("=================\n");

    if !diff.added.is_empty() {
        println!("Added fields: {}", diff.added.join(", "));
    }
    if !diff.removed.is_empty() {
        println!("Removed fields: {}", diff.removed.join(", "));
    }
    for (field, field_type) in &diff.type_changes {
        println!("Type changed: {} → {}", field, field_type);
    }
    for (field, required) in &diff.obligation_changes {
        let label = if *required { "required" } else { "optional" };
        println!("Now {}: {}", label, field);
    }
    for (field, options) in &diff.option_changes.added {
        println!("Options added to {}: {}", field, options.join(", "));
    }
    for (field, options) in &diff.option_changes.removed {
        println!("Options removed from {}: {}", field, options.join(", "));
    }
    for (field, groups) in &diff.group_changes {
        println!("Moved: {} → /{}", field, groups.join("/"));
    }
    if let Some(ref title) = diff.title_change {
        println!("Title: {}", title);
    }

    println!("\nChange set: {}", preview.changeset.summary());

    if !preview.pending.is_empty() {
        println!("\nUndecided fields:");
        for field in &preview.pending {
            let candidates = preview
                .rename_candidates
                .get(field)
                .map(|c| c.join(", "))
                .unwrap_or_default();
            if candidates.is_empty() {
                println!("  {} (new)", field);
            } else {
                println!("  {} (new, or renamed from: {})", field, candidates);
            }
        }
    }
}

pub fn print_update_text(outcome: &UpdateOutcome) {
    match outcome.version {
        None => println!("✓ No structural change, version unchanged"),
        Some(version) => {
            println!("✓ Updated to version {}", version);
            println!("  Changes: {}", outcome.changeset.summary());
            if let Some(ref migration) = outcome.migration {
                println!(
                    "  Answers migrated: {} of {}",
                    migration.answers_changed, migration.answers_seen
                );
                if let Some(backup) = migration.backup_id {
                    println!("  Backup: {}", backup);
                }
            }
            if outcome.pruned_backups > 0 {
                println!("  Old backups pruned: {}", outcome.pruned_backups);
            }
        }
    }
}

pub fn print_restore_text(report: &RestoreReport) {
    println!("✓ Restored to version {}", report.version_id);
    println!("  Replayed changes: {}", report.changeset.summary());
    println!("  Answers restored from backup: {}", report.restored_verbatim);
    println!("  Answers migrated: {}", report.migrated);
    if report.orphaned > 0 {
        println!("  Backup copies without a live answer: {}", report.orphaned);
    }
}

pub fn print_history_text(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("No versions recorded.");
        return;
    }

    for entry in entries {
        let marker = if entry.current { "*" } else { " " };
        let parent = entry
            .parent
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {:>4}  parent {:>4}  {}  {}  {}",
            marker,
            entry.id,
            parent,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            &entry.schema_hash[..12.min(entry.schema_hash.len())],
            entry.summary
        );
    }
}

pub fn print_answers_text(docs: &[AnswerDocument]) {
    if docs.is_empty() {
        println!("No answers stored.");
        return;
    }

    for doc in docs {
        println!("{:>5}  {}  {}", doc.id, doc.uuid, doc.created_at.format("%Y-%m-%d %H:%M:%S"));
    }
}

pub fn print_status_text(report: &StatusReport) {
    println!("xformshift Status");
    println!("=================\n");

    println!("Forms: {}", report.stats.forms);
    println!("Answers: {}", report.stats.answers);
    println!("Versions: {}", report.stats.versions);
    println!("Backups: {}", report.stats.backups);

    if !report.forms.is_empty() {
        println!();
        for form in &report.forms {
            let version = form
                .current_version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("  {} \"{}\" (version {})", form.id_string, form.title, version);
        }
    }
}
