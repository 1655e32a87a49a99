//! Structural comparison of two schema versions
//!
//! Classifies every difference between a previous and a new schema:
//! - Added and removed fields
//! - Type changes and required-flag changes
//! - Gained and lost select options
//! - Title changes and per-field group paths

use crate::schema::{FieldType, SchemaField, SchemaTree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Options gained and lost by select fields present in both schemas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionChanges {
    pub added: BTreeMap<String, Vec<String>>,
    pub removed: BTreeMap<String, Vec<String>>,
}

impl OptionChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Complete comparison result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// Fields only in the new schema, document order
    pub added: Vec<String>,
    /// Fields only in the previous schema, document order
    pub removed: Vec<String>,
    /// Field to new type, for shared fields whose type changed
    pub type_changes: BTreeMap<String, FieldType>,
    /// Field to new required flag, for shared fields whose flag changed
    pub obligation_changes: BTreeMap<String, bool>,
    /// Select option changes on shared fields
    pub option_changes: OptionChanges,
    /// Shared fields whose enclosing groups changed, with the new path
    pub group_changes: BTreeMap<String, Vec<String>>,
    /// New title when it changed
    pub title_change: Option<String>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.type_changes.is_empty()
            && self.obligation_changes.is_empty()
            && self.option_changes.is_empty()
            && self.group_changes.is_empty()
            && self.title_change.is_none()
    }
}

/// Compares a previous schema with a new one. Never mutates either input.
#[derive(Debug, Clone, Copy)]
pub struct SchemaComparator<'a> {
    prev: &'a SchemaTree,
    new: &'a SchemaTree,
}

impl<'a> SchemaComparator<'a> {
    pub fn new(prev: &'a SchemaTree, new: &'a SchemaTree) -> Self {
        Self { prev, new }
    }

    pub fn prev(&self) -> &'a SchemaTree {
        self.prev
    }

    pub fn new_tree(&self) -> &'a SchemaTree {
        self.new
    }

    /// `(added, removed)` field names, each in its own document order
    pub fn fields_diff(&self) -> (Vec<String>, Vec<String>) {
        let added = self
            .new
            .fields()
            .iter()
            .filter(|f| !self.prev.has_field(&f.name))
            .map(|f| f.name.clone())
            .collect();
        let removed = self
            .prev
            .fields()
            .iter()
            .filter(|f| !self.new.has_field(&f.name))
            .map(|f| f.name.clone())
            .collect();
        (added, removed)
    }

    /// Shared fields whose declared type changed, mapped to the new type
    pub fn fields_type_diff(&self) -> BTreeMap<String, FieldType> {
        self.shared_fields()
            .filter(|(prev, new)| prev.field_type != new.field_type)
            .map(|(_, new)| (new.name.clone(), new.field_type.clone()))
            .collect()
    }

    /// Shared fields whose required flag changed, mapped to the new flag
    pub fn input_obligation_diff(&self) -> BTreeMap<String, bool> {
        self.shared_fields()
            .filter(|(prev, new)| prev.required != new.required)
            .map(|(_, new)| (new.name.clone(), new.required))
            .collect()
    }

    /// `(added_options, removed_options)` for select fields present in both
    pub fn selects_diff(&self) -> (BTreeMap<String, Vec<String>>, BTreeMap<String, Vec<String>>) {
        let mut added = BTreeMap::new();
        let mut removed = BTreeMap::new();

        for (prev, new) in self.shared_fields() {
            if !prev.field_type.is_select() || !new.field_type.is_select() {
                continue;
            }
            let gained: Vec<String> = new
                .options
                .iter()
                .filter(|o| !prev.options.contains(o))
                .cloned()
                .collect();
            let lost: Vec<String> = prev
                .options
                .iter()
                .filter(|o| !new.options.contains(o))
                .cloned()
                .collect();
            if !gained.is_empty() {
                added.insert(new.name.clone(), gained);
            }
            if !lost.is_empty() {
                removed.insert(new.name.clone(), lost);
            }
        }

        (added, removed)
    }

    /// The new title, if it differs
    pub fn titles_diff(&self) -> Option<String> {
        (self.prev.title() != self.new.title()).then(|| self.new.title().to_string())
    }

    /// Field name to enclosing group names (innermost last) for either side
    pub fn fields_groups_for(tree: &SchemaTree) -> BTreeMap<String, Vec<String>> {
        tree.fields_groups()
    }

    /// Shared fields whose group path changed, mapped to the new path
    pub fn fields_groups_diff(&self) -> BTreeMap<String, Vec<String>> {
        self.shared_fields()
            .filter(|(prev, new)| prev.group_path != new.group_path)
            .map(|(_, new)| (new.name.clone(), new.group_path.clone()))
            .collect()
    }

    /// Run every comparison
    pub fn diff(&self) -> SchemaDiff {
        let (added, removed) = self.fields_diff();
        let (added_options, removed_options) = self.selects_diff();
        SchemaDiff {
            added,
            removed,
            type_changes: self.fields_type_diff(),
            obligation_changes: self.input_obligation_diff(),
            option_changes: OptionChanges {
                added: added_options,
                removed: removed_options,
            },
            group_changes: self.fields_groups_diff(),
            title_change: self.titles_diff(),
        }
    }

    fn shared_fields(&self) -> impl Iterator<Item = (&'a SchemaField, &'a SchemaField)> + '_ {
        let prev: HashMap<&str, &'a SchemaField> = self
            .prev
            .fields()
            .iter()
            .map(|f| (f.name.as_str(), f))
            .collect();
        self.new
            .fields()
            .iter()
            .filter_map(move |new| prev.get(new.name.as_str()).map(|p| (*p, new)))
    }
}
