//! Change sets: the unit of schema evolution
//!
//! A change set records which fields a schema revision introduced, dropped
//! and renamed. Change sets can be reversed (to undo a revision) and chained
//! (to jump across several revisions in one step).

use crate::error::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Field-level delta between two schema versions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Fields introduced by the revision
    #[serde(default)]
    pub new_fields: BTreeSet<String>,
    /// Fields dropped by the revision
    #[serde(default)]
    pub removed_fields: BTreeSet<String>,
    /// Renames, old name to new name
    #[serde(default)]
    pub modified_fields: BTreeMap<String, String>,
}

impl ChangeSet {
    /// Build a change set, checking that no field sits in two categories
    pub fn new(
        new_fields: BTreeSet<String>,
        removed_fields: BTreeSet<String>,
        modified_fields: BTreeMap<String, String>,
    ) -> Result<Self> {
        let changeset = Self {
            new_fields,
            removed_fields,
            modified_fields,
        };
        changeset.validate()?;
        Ok(changeset)
    }

    /// Check the category invariant.
    ///
    /// A change set is applied as removals, then renames, then additions.
    /// A renamed-away name may therefore be re-introduced, and a removed
    /// name may be taken over by a rename. Any other overlap is rejected.
    pub fn validate(&self) -> Result<()> {
        let sources: BTreeSet<&str> = self.modified_fields.keys().map(String::as_str).collect();
        let mut targets: BTreeSet<&str> = BTreeSet::new();
        for target in self.modified_fields.values() {
            if !targets.insert(target.as_str()) {
                return Err(MigrationError::InvalidChangeSet(format!(
                    "several fields are renamed to '{}'",
                    target
                )));
            }
        }

        let overlap = self
            .new_fields
            .intersection(&self.removed_fields)
            .chain(self.new_fields.iter().filter(|f| targets.contains(f.as_str())))
            .chain(self.removed_fields.iter().filter(|f| sources.contains(f.as_str())))
            .next();
        match overlap {
            Some(name) => Err(MigrationError::InvalidChangeSet(format!(
                "field '{}' appears in more than one category",
                name
            ))),
            None => Ok(()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new_fields.is_empty() && self.removed_fields.is_empty() && self.modified_fields.is_empty()
    }

    /// Undo this change: new and removed swap, renames point backwards
    pub fn reverse(&self) -> ChangeSet {
        ChangeSet {
            new_fields: self.removed_fields.clone(),
            removed_fields: self.new_fields.clone(),
            modified_fields: self
                .modified_fields
                .iter()
                .map(|(old, new)| (new.clone(), old.clone()))
                .collect(),
        }
    }

    /// Compose `self` followed by `next` into one change set.
    ///
    /// Rename chains collapse (`a→b`, `b→c` becomes `a→c`, `a→b→a`
    /// disappears). A field introduced and later renamed is introduced under
    /// its final name; introduced and later removed cancels out; removed and
    /// later re-introduced cancels out. A name freed by a rename and then
    /// introduced again stays both renamed and new.
    pub fn then(&self, next: &ChangeSet) -> ChangeSet {
        let mut new_fields = self.new_fields.clone();
        let mut removed_fields = self.removed_fields.clone();
        let mut renames = self.modified_fields.clone();

        for field in &next.removed_fields {
            if new_fields.remove(field) {
                continue;
            }
            match origin_of(&renames, field) {
                Some(origin) => {
                    renames.remove(&origin);
                    // The origin name was re-introduced meanwhile
                    if !new_fields.remove(&origin) {
                        removed_fields.insert(origin);
                    }
                }
                None => {
                    removed_fields.insert(field.clone());
                }
            }
        }

        // Renames inside one change set are simultaneous: resolve every
        // source against the state before any of them is applied.
        let mut renamed_new = Vec::new();
        let mut chained = Vec::new();
        for (old, new) in &next.modified_fields {
            if new_fields.contains(old) {
                renamed_new.push((old.clone(), new.clone()));
            } else {
                let origin = origin_of(&renames, old).unwrap_or_else(|| old.clone());
                chained.push((origin, new.clone()));
            }
        }
        for (old, _) in &renamed_new {
            new_fields.remove(old);
        }
        for (_, new) in renamed_new {
            if !removed_fields.remove(&new) {
                new_fields.insert(new);
            }
        }
        for (origin, _) in &chained {
            renames.remove(origin);
        }
        for (origin, new) in chained {
            if origin != new {
                renames.insert(origin, new);
            }
        }

        for field in &next.new_fields {
            if !removed_fields.remove(field) {
                new_fields.insert(field.clone());
            }
        }

        ChangeSet {
            new_fields,
            removed_fields,
            modified_fields: renames,
        }
    }

    /// Fold a sequence of change sets, applied in order, into one
    pub fn merge_all<'a, I>(changesets: I) -> ChangeSet
    where
        I: IntoIterator<Item = &'a ChangeSet>,
    {
        changesets
            .into_iter()
            .fold(ChangeSet::default(), |acc, next| acc.then(next))
    }

    /// One-line human summary
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no field changes".to_string();
        }
        let mut parts = Vec::new();
        if !self.new_fields.is_empty() {
            parts.push(format!(
                "+{}",
                self.new_fields.iter().cloned().collect::<Vec<_>>().join(",")
            ));
        }
        if !self.removed_fields.is_empty() {
            parts.push(format!(
                "-{}",
                self.removed_fields.iter().cloned().collect::<Vec<_>>().join(",")
            ));
        }
        for (old, new) in &self.modified_fields {
            parts.push(format!("{}→{}", old, new));
        }
        parts.join(" ")
    }
}

/// Original name whose rename currently ends at `current`
fn origin_of(renames: &BTreeMap<String, String>, current: &str) -> Option<String> {
    renames
        .iter()
        .find(|(_, target)| target.as_str() == current)
        .map(|(origin, _)| origin.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn renames(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    fn cs(new: &[&str], removed: &[&str], modified: &[(&str, &str)]) -> ChangeSet {
        ChangeSet::new(set(new), set(removed), renames(modified)).unwrap()
    }

    #[test]
    fn test_reverse_twice_is_identity() {
        let c = cs(&["birthday", "last_name"], &["date"], &[("name", "first_name")]);
        assert_eq!(c.reverse().reverse(), c);
        assert_eq!(c.reverse().new_fields, set(&["date"]));
        assert_eq!(c.reverse().modified_fields, renames(&[("first_name", "name")]));
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let err = ChangeSet::new(set(&["a"]), set(&["a"]), BTreeMap::new()).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidChangeSet(_)));

        let err = ChangeSet::new(set(&["b"]), BTreeSet::new(), renames(&[("a", "b")])).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidChangeSet(_)));

        let err = ChangeSet::new(BTreeSet::new(), set(&["a"]), renames(&[("a", "b")])).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidChangeSet(_)));
    }

    #[test]
    fn test_freed_names_may_be_reused() {
        assert!(ChangeSet::new(set(&["a"]), BTreeSet::new(), renames(&[("a", "b")])).is_ok());
        assert!(ChangeSet::new(BTreeSet::new(), set(&["b"]), renames(&[("a", "b")])).is_ok());
    }

    #[test]
    fn test_renamed_source_introduced_again() {
        let rename = cs(&[], &[], &[("a", "b")]);
        let readd = cs(&["a"], &[], &[]);

        let merged = rename.then(&readd);
        assert_eq!(merged.new_fields, set(&["a"]));
        assert_eq!(merged.modified_fields, renames(&[("a", "b")]));
        assert!(merged.validate().is_ok());

        let back = readd.reverse().then(&rename.reverse());
        assert_eq!(back.removed_fields, set(&["a"]));
        assert_eq!(back.modified_fields, renames(&[("b", "a")]));
        assert!(back.validate().is_ok());
        assert!(back.then(&merged).is_empty());
    }

    #[test]
    fn test_removing_rename_target_after_source_came_back() {
        let merged = cs(&[], &[], &[("a", "b")])
            .then(&cs(&["a"], &[], &[]))
            .then(&cs(&[], &["b"], &[]));
        assert!(merged.is_empty());
    }

    #[test]
    fn test_rename_chain_collapses() {
        let merged = cs(&[], &[], &[("a", "b")]).then(&cs(&[], &[], &[("b", "c")]));
        assert_eq!(merged.modified_fields, renames(&[("a", "c")]));
    }

    #[test]
    fn test_swap_within_one_change_set_is_not_a_chain() {
        let swap = cs(&[], &[], &[("a", "b"), ("b", "a")]);
        let merged = ChangeSet::default().then(&swap);
        assert_eq!(merged, swap);
        assert!(swap.then(&swap).is_empty());
    }

    #[test]
    fn test_rename_and_back_disappears() {
        let forward = cs(&[], &[], &[("a", "b")]);
        let merged = forward.then(&forward.reverse());
        assert!(merged.is_empty());
    }

    #[test]
    fn test_change_then_reverse_is_empty() {
        let c = cs(&["x"], &["y"], &[("a", "b")]);
        assert!(c.then(&c.reverse()).is_empty());
        assert!(c.reverse().then(&c).is_empty());
    }

    #[test]
    fn test_new_field_renamed_later() {
        let merged = cs(&["x"], &[], &[]).then(&cs(&[], &[], &[("x", "y")]));
        assert_eq!(merged.new_fields, set(&["y"]));
        assert!(merged.modified_fields.is_empty());
    }

    #[test]
    fn test_removed_after_rename_removes_origin() {
        let merged = cs(&[], &[], &[("a", "b")]).then(&cs(&[], &["b"], &[]));
        assert_eq!(merged.removed_fields, set(&["a"]));
        assert!(merged.modified_fields.is_empty());
    }

    #[test]
    fn test_merge_is_associative_for_disjoint_renames() {
        let c1 = cs(&["n1"], &[], &[("a", "b")]);
        let c2 = cs(&[], &["r2"], &[("c", "d")]);
        let c3 = cs(&["n3"], &[], &[("b", "e")]);

        let left = c1.then(&c2).then(&c3);
        let right = c1.then(&c2.then(&c3));
        assert_eq!(left, right);
        assert_eq!(ChangeSet::merge_all([&c1, &c2, &c3]), left);
        assert!(left.validate().is_ok());
        assert_eq!(left.modified_fields, renames(&[("a", "e"), ("c", "d")]));
    }

    #[test]
    fn test_json_round_trip() {
        let c = cs(&["x"], &["y"], &[("a", "b")]);
        let json = serde_json::to_string(&c).unwrap();
        let back: ChangeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_summary() {
        assert_eq!(ChangeSet::default().summary(), "no field changes");
        let c = cs(&["x"], &["y"], &[("a", "b")]);
        assert_eq!(c.summary(), "+x -y a→b");
    }
}
