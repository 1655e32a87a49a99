//! Turning a raw schema diff into a canonical change set
//!
//! A diff alone cannot tell a rename from a removal plus an addition. The
//! decisioner combines the comparator's output with operator decisions to
//! settle that, and produces the change set and migration plan.

pub mod decisions;

pub use decisions::{Decision, DecisionKind, Decisions, NEW_FIELD_MARKER};

use crate::changeset::ChangeSet;
use crate::compare::SchemaComparator;
use crate::error::Result;
use crate::migrate::plan::{group_relocations, MigrationPlan};
use std::collections::{BTreeMap, BTreeSet};

/// Resolves a comparison into a change set using operator decisions.
///
/// Decisions naming fields absent from the diff are ignored.
pub struct MigrationDecisioner<'a> {
    comparator: SchemaComparator<'a>,
    decisions: &'a Decisions,
    added: Vec<String>,
    removed: Vec<String>,
}

impl<'a> MigrationDecisioner<'a> {
    pub fn new(comparator: SchemaComparator<'a>, decisions: &'a Decisions) -> Self {
        let (added, removed) = comparator.fields_diff();
        Self {
            comparator,
            decisions,
            added,
            removed,
        }
    }

    pub fn comparator(&self) -> SchemaComparator<'a> {
        self.comparator
    }

    /// Rename source of an added field, if its decision points at a removed field
    fn valid_rename_source(&self, added: &str) -> Option<&'a str> {
        let decisions: &'a Decisions = self.decisions;
        decisions
            .rename_source(added)
            .filter(|source| self.removed.iter().any(|r| r == source))
    }

    /// Removed fields that no rename decision claims
    pub fn removed_fields(&self) -> BTreeSet<String> {
        let claimed: BTreeSet<&str> = self
            .added
            .iter()
            .filter_map(|f| self.valid_rename_source(f))
            .collect();
        self.removed
            .iter()
            .filter(|f| !claimed.contains(f.as_str()))
            .cloned()
            .collect()
    }

    /// Added fields that are not renames
    pub fn new_fields(&self) -> BTreeSet<String> {
        self.added
            .iter()
            .filter(|f| self.valid_rename_source(f).is_none())
            .cloned()
            .collect()
    }

    /// Renames, old name to new name
    pub fn modified_fields(&self) -> BTreeMap<String, String> {
        self.added
            .iter()
            .filter_map(|f| {
                self.valid_rename_source(f)
                    .map(|source| (source.to_string(), f.clone()))
            })
            .collect()
    }

    pub fn changeset(&self) -> Result<ChangeSet> {
        ChangeSet::new(self.new_fields(), self.removed_fields(), self.modified_fields())
    }

    /// Surviving fields whose group path changed, with the new path
    pub fn changed_fields_groups(&self) -> Result<BTreeMap<String, Vec<String>>> {
        Ok(group_relocations(
            &self.changeset()?,
            self.comparator.prev(),
            self.comparator.new_tree(),
        ))
    }

    /// Change set plus placements, relocations and fill values
    pub fn plan(&self) -> Result<MigrationPlan> {
        let plan = MigrationPlan::for_changeset(
            self.changeset()?,
            self.comparator.prev(),
            self.comparator.new_tree(),
        );
        Ok(plan.with_prepopulate(self.decisions.prepopulate_values()))
    }

    /// For each added field, the removed fields it could be a rename of.
    ///
    /// Candidates of the same type come first.
    pub fn rename_candidates(&self) -> BTreeMap<String, Vec<String>> {
        let prev = self.comparator.prev();
        let new = self.comparator.new_tree();
        self.added
            .iter()
            .map(|added| {
                let added_type = new.field_type(added).ok();
                let mut candidates: Vec<&String> = self.removed.iter().collect();
                candidates.sort_by_key(|removed| prev.field_type(removed).ok() != added_type);
                (added.clone(), candidates.into_iter().cloned().collect())
            })
            .collect()
    }

    /// Added fields without any determination yet
    pub fn pending_fields(&self) -> Vec<String> {
        self.added
            .iter()
            .filter(|f| !self.decisions.is_determined(f))
            .cloned()
            .collect()
    }
}

/// Decisions that regenerate `changeset` when replayed
pub fn convert_changes_to_decisions(changeset: &ChangeSet) -> Decisions {
    Decisions::from_changeset(changeset)
}

/// Change set described by `decisions`
pub fn decisions_to_changeset(decisions: &Decisions) -> ChangeSet {
    decisions.to_changeset()
}
