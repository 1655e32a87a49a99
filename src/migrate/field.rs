//! Applying a migration plan to one answer document

use super::plan::MigrationPlan;
use crate::answer::AnswerTree;
use crate::error::Result;
use tracing::debug;

/// What happened to one answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldOutcome {
    pub added: usize,
    pub removed: usize,
    pub renamed: usize,
    pub relocated: usize,
}

impl FieldOutcome {
    pub fn changed(&self) -> bool {
        self.added + self.removed + self.renamed + self.relocated > 0
    }
}

/// Rewrites a single answer tree according to a plan
pub struct FieldMigrator<'p> {
    plan: &'p MigrationPlan,
}

impl<'p> FieldMigrator<'p> {
    pub fn new(plan: &'p MigrationPlan) -> Self {
        Self { plan }
    }

    /// Apply the plan in place.
    ///
    /// Order: drop removed fields, rename, add new fields, then relocate by
    /// post-rename name. A rename whose source is missing fails the whole
    /// answer with `MissingField`.
    pub fn alter_fields(&self, tree: &mut AnswerTree) -> Result<FieldOutcome> {
        let changeset = &self.plan.changeset;
        let mut outcome = FieldOutcome::default();

        for name in &changeset.removed_fields {
            if !tree.has_field(name) {
                debug!("Field '{}' already absent", name);
                continue;
            }
            tree.permanently_remove_field(name)?;
            outcome.removed += 1;
        }

        tree.rename_fields(&changeset.modified_fields)?;
        outcome.renamed = changeset.modified_fields.len();

        for name in &changeset.new_fields {
            if tree.has_field(name) {
                continue;
            }
            let text = self
                .plan
                .prepopulate
                .get(name)
                .map(String::as_str)
                .unwrap_or("");
            tree.add_field(name, text, None)?;
            if let Some(path) = self.plan.placements.get(name) {
                let id = tree.get_field(name)?;
                tree.insert_field_into_group_chain(id, path)?;
            }
            outcome.added += 1;
        }

        for (name, path) in &self.plan.relocations {
            if !tree.has_field(name) {
                debug!("Field '{}' not answered, nothing to relocate", name);
                continue;
            }
            if tree.relocate_field(name, path)? {
                outcome.relocated += 1;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::ChangeSet;
    use crate::error::MigrationError;
    use crate::schema::fixtures::SURVEY_ANSWER;
    use std::collections::{BTreeMap, BTreeSet};

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn survey_plan() -> MigrationPlan {
        let changeset = ChangeSet::new(
            set(&["birthday", "last_name"]),
            set(&["date"]),
            [("name".to_string(), "first_name".to_string())]
                .into_iter()
                .collect(),
        )
        .unwrap();
        MigrationPlan {
            changeset,
            prepopulate: [("last_name".to_string(), "Fowler".to_string())]
                .into_iter()
                .collect(),
            ..MigrationPlan::default()
        }
    }

    #[test]
    fn test_survey_migration() {
        let mut tree = AnswerTree::parse(SURVEY_ANSWER).unwrap();
        let outcome = FieldMigrator::new(&survey_plan()).alter_fields(&mut tree).unwrap();

        assert_eq!(tree.field_text("first_name").unwrap(), "Alonzo Church");
        assert_eq!(tree.field_text("last_name").unwrap(), "Fowler");
        assert_eq!(tree.field_text("birthday").unwrap(), "");
        assert_eq!(tree.field_text("age").unwrap(), "50");
        assert!(!tree.has_field("date"));
        assert!(!tree.has_field("name"));
        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.renamed, 1);
    }

    #[test]
    fn test_rerun_fails_on_missing_rename_source() {
        let plan = survey_plan();
        let mut tree = AnswerTree::parse(SURVEY_ANSWER).unwrap();
        FieldMigrator::new(&plan).alter_fields(&mut tree).unwrap();

        let err = FieldMigrator::new(&plan).alter_fields(&mut tree).unwrap_err();
        assert!(matches!(err, MigrationError::MissingField { ref field } if field == "name"));
    }

    #[test]
    fn test_forward_then_reverse_restores_structure() {
        let plan = survey_plan();
        let original = AnswerTree::parse(SURVEY_ANSWER).unwrap();
        let mut tree = original.clone();
        FieldMigrator::new(&plan).alter_fields(&mut tree).unwrap();

        let back = MigrationPlan {
            changeset: plan.changeset.reverse(),
            ..MigrationPlan::default()
        };
        FieldMigrator::new(&back).alter_fields(&mut tree).unwrap();

        let mut fields = tree.field_names();
        let mut expected = original.field_names();
        fields.sort();
        expected.sort();
        assert_eq!(fields, expected);
        assert_eq!(tree.field_text("name").unwrap(), "Alonzo Church");
    }

    #[test]
    fn test_reverse_of_renames_and_grouped_additions_restores_document() {
        let mut plan = MigrationPlan {
            changeset: ChangeSet::new(
                set(&["street", "nickname"]),
                BTreeSet::new(),
                [
                    ("name".to_string(), "full_name".to_string()),
                    ("age".to_string(), "years".to_string()),
                ]
                .into_iter()
                .collect(),
            )
            .unwrap(),
            ..MigrationPlan::default()
        };
        plan.placements
            .insert("street".into(), vec!["address".into(), "line".into()]);

        let original = AnswerTree::parse(SURVEY_ANSWER).unwrap();
        let mut tree = original.clone();
        FieldMigrator::new(&plan).alter_fields(&mut tree).unwrap();
        assert_eq!(tree.field_group_path("street").unwrap(), vec!["address", "line"]);
        assert!(!tree.doc().same_structure(original.doc()));

        let back = MigrationPlan {
            changeset: plan.changeset.reverse(),
            ..MigrationPlan::default()
        };
        let outcome = FieldMigrator::new(&back).alter_fields(&mut tree).unwrap();
        assert_eq!(outcome.removed, 2);
        assert_eq!(outcome.renamed, 2);
        assert!(tree.doc().same_structure(original.doc()));
    }

    #[test]
    fn test_renamed_away_name_can_be_added_again() {
        let plan = MigrationPlan {
            changeset: ChangeSet::new(
                set(&["name"]),
                BTreeSet::new(),
                [("name".to_string(), "full_name".to_string())]
                    .into_iter()
                    .collect(),
            )
            .unwrap(),
            ..MigrationPlan::default()
        };

        let mut tree = AnswerTree::parse(SURVEY_ANSWER).unwrap();
        let outcome = FieldMigrator::new(&plan).alter_fields(&mut tree).unwrap();
        assert_eq!(tree.field_text("full_name").unwrap(), "Alonzo Church");
        assert_eq!(tree.field_text("name").unwrap(), "");
        assert_eq!(outcome.added, 1);

        let back = MigrationPlan {
            changeset: plan.changeset.reverse(),
            ..MigrationPlan::default()
        };
        FieldMigrator::new(&back).alter_fields(&mut tree).unwrap();
        assert_eq!(tree.field_text("name").unwrap(), "Alonzo Church");
        assert!(!tree.has_field("full_name"));
    }

    #[test]
    fn test_new_field_created_inside_groups() {
        let mut plan = MigrationPlan {
            changeset: ChangeSet::new(set(&["street"]), BTreeSet::new(), BTreeMap::new()).unwrap(),
            ..MigrationPlan::default()
        };
        plan.placements
            .insert("street".into(), vec!["address".into(), "line".into()]);

        let mut tree = AnswerTree::parse(SURVEY_ANSWER).unwrap();
        FieldMigrator::new(&plan).alter_fields(&mut tree).unwrap();
        assert_eq!(
            tree.field_group_path("street").unwrap(),
            vec!["address", "line"]
        );
    }

    #[test]
    fn test_relocation_uses_post_rename_name() {
        let mut plan = MigrationPlan {
            changeset: ChangeSet::new(
                BTreeSet::new(),
                BTreeSet::new(),
                [("age".to_string(), "years".to_string())]
                    .into_iter()
                    .collect(),
            )
            .unwrap(),
            ..MigrationPlan::default()
        };
        plan.relocations.insert("years".into(), vec!["person".into()]);

        let mut tree = AnswerTree::parse(SURVEY_ANSWER).unwrap();
        let outcome = FieldMigrator::new(&plan).alter_fields(&mut tree).unwrap();
        assert_eq!(outcome.relocated, 1);
        assert_eq!(tree.field_group_path("years").unwrap(), vec!["person"]);
        assert_eq!(tree.field_text("years").unwrap(), "50");
    }

    #[test]
    fn test_empty_plan_changes_nothing() {
        let mut tree = AnswerTree::parse(SURVEY_ANSWER).unwrap();
        let before = tree.to_xml().unwrap();
        let outcome = FieldMigrator::new(&MigrationPlan::default())
            .alter_fields(&mut tree)
            .unwrap();
        assert!(!outcome.changed());
        assert_eq!(tree.to_xml().unwrap(), before);
    }
}
