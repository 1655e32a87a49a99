//! Everything needed to rewrite stored answers for one schema transition

use crate::changeset::ChangeSet;
use crate::schema::SchemaTree;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A change set plus the placement details that the change set alone lacks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub changeset: ChangeSet,
    /// Fill values for new fields
    #[serde(default)]
    pub prepopulate: BTreeMap<String, String>,
    /// Surviving fields (post-rename names) that move to a new group path
    #[serde(default)]
    pub relocations: BTreeMap<String, Vec<String>>,
    /// Group path each new field is created under
    #[serde(default)]
    pub placements: BTreeMap<String, Vec<String>>,
}

impl MigrationPlan {
    /// Plan for moving answers of `prev` to `target` with a known change set
    pub fn for_changeset(changeset: ChangeSet, prev: &SchemaTree, target: &SchemaTree) -> Self {
        let relocations = group_relocations(&changeset, prev, target);
        let placements = changeset
            .new_fields
            .iter()
            .filter_map(|name| {
                target
                    .group_path(name)
                    .ok()
                    .filter(|path| !path.is_empty())
                    .map(|path| (name.clone(), path.to_vec()))
            })
            .collect();
        Self {
            changeset,
            prepopulate: BTreeMap::new(),
            relocations,
            placements,
        }
    }

    /// Attach fill values, keeping only those for new fields
    pub fn with_prepopulate(mut self, values: BTreeMap<String, String>) -> Self {
        self.prepopulate = values
            .into_iter()
            .filter(|(field, _)| self.changeset.new_fields.contains(field))
            .collect();
        self
    }

    /// True if applying the plan can change any stored answer
    pub fn requires_data_migration(&self) -> bool {
        !self.changeset.is_empty() || !self.relocations.is_empty()
    }
}

/// Surviving fields whose enclosing groups differ between `prev` and `target`.
///
/// Renamed fields are compared against the group path of their old name.
pub fn group_relocations(
    changeset: &ChangeSet,
    prev: &SchemaTree,
    target: &SchemaTree,
) -> BTreeMap<String, Vec<String>> {
    let sources: BTreeMap<&str, &str> = changeset
        .modified_fields
        .iter()
        .map(|(old, new)| (new.as_str(), old.as_str()))
        .collect();

    target
        .fields()
        .iter()
        .filter(|field| !changeset.new_fields.contains(&field.name))
        .filter_map(|field| {
            let source = sources
                .get(field.name.as_str())
                .copied()
                .unwrap_or(field.name.as_str());
            let before = prev.group_path(source).ok()?;
            (before != field.group_path.as_slice())
                .then(|| (field.name.clone(), field.group_path.clone()))
        })
        .collect()
}
