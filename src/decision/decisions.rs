//! Operator decisions resolving ambiguous schema diffs

use crate::changeset::ChangeSet;
use crate::error::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Key prefix declaring what an added field is
pub const DETERMINE_PREFIX: &str = "determine_";
/// Key prefix supplying a fill value for a new field
pub const PREPOPULATE_PREFIX: &str = "prepopulate_";
/// Value of a `determine_` key marking a genuinely new field
pub const NEW_FIELD_MARKER: &str = "__new_field__";

/// What an operator decided about one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionKind {
    /// The field is a rename of `from`
    Rename { from: String },
    /// The field is new
    NewField,
    /// Fill the new field with `value` in existing answers
    Prepopulate { value: String },
}

/// A decision about one field of the new schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub field: String,
    #[serde(flatten)]
    pub kind: DecisionKind,
}

impl Decision {
    pub fn rename(field: &str, from: &str) -> Self {
        Self {
            field: field.to_string(),
            kind: DecisionKind::Rename {
                from: from.to_string(),
            },
        }
    }

    pub fn new_field(field: &str) -> Self {
        Self {
            field: field.to_string(),
            kind: DecisionKind::NewField,
        }
    }

    pub fn prepopulate(field: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            kind: DecisionKind::Prepopulate {
                value: value.to_string(),
            },
        }
    }

    /// Parse one `determine_<field>` / `prepopulate_<field>` key-value pair
    pub fn parse_pair(key: &str, value: &str) -> Result<Self> {
        if let Some(field) = key.strip_prefix(DETERMINE_PREFIX) {
            let value = value.trim();
            if value == NEW_FIELD_MARKER {
                Ok(Self::new_field(field))
            } else {
                Ok(Self::rename(field, value))
            }
        } else if let Some(field) = key.strip_prefix(PREPOPULATE_PREFIX) {
            Ok(Self::prepopulate(field, value))
        } else {
            Err(MigrationError::InvalidDecision(format!(
                "unrecognized decision key '{}'",
                key
            )))
        }
    }

    /// The legacy `(key, value)` spelling of this decision
    pub fn to_pair(&self) -> (String, String) {
        match &self.kind {
            DecisionKind::Rename { from } => {
                (format!("{}{}", DETERMINE_PREFIX, self.field), from.clone())
            }
            DecisionKind::NewField => (
                format!("{}{}", DETERMINE_PREFIX, self.field),
                NEW_FIELD_MARKER.to_string(),
            ),
            DecisionKind::Prepopulate { value } => {
                (format!("{}{}", PREPOPULATE_PREFIX, self.field), value.clone())
            }
        }
    }

    fn is_determination(&self) -> bool {
        !matches!(self.kind, DecisionKind::Prepopulate { .. })
    }
}

/// A validated collection of decisions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decisions {
    entries: Vec<Decision>,
}

impl Decisions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries, validating each one
    pub fn from_entries<I: IntoIterator<Item = Decision>>(entries: I) -> Result<Self> {
        let mut decisions = Self::new();
        for entry in entries {
            decisions.push(entry)?;
        }
        Ok(decisions)
    }

    /// Build from legacy `determine_*` / `prepopulate_*` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| Decision::parse_pair(k.as_ref(), v.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::from_entries(entries)
    }

    /// Add a decision.
    ///
    /// Rejects empty names, self-renames, a second determination for the
    /// same field, a second prepopulation for the same field, and two fields
    /// claiming the same rename source.
    pub fn push(&mut self, decision: Decision) -> Result<()> {
        if decision.field.trim().is_empty() {
            return Err(MigrationError::InvalidDecision(
                "decision has an empty field name".into(),
            ));
        }

        match &decision.kind {
            DecisionKind::Rename { from } => {
                if from.trim().is_empty() || *from == decision.field {
                    return Err(MigrationError::InvalidDecision(format!(
                        "'{}' cannot be a rename of '{}'",
                        decision.field, from
                    )));
                }
                if let Some(other) = self.entries.iter().find(|d| {
                    matches!(&d.kind, DecisionKind::Rename { from: f } if f == from)
                }) {
                    return Err(MigrationError::InvalidDecision(format!(
                        "'{}' is already claimed as the source of '{}'",
                        from, other.field
                    )));
                }
            }
            DecisionKind::NewField | DecisionKind::Prepopulate { .. } => {}
        }

        let duplicate = self.entries.iter().any(|d| {
            d.field == decision.field && d.is_determination() == decision.is_determination()
        });
        if duplicate {
            return Err(MigrationError::InvalidDecision(format!(
                "more than one decision of the same kind for '{}'",
                decision.field
            )));
        }

        self.entries.push(decision);
        Ok(())
    }

    pub fn entries(&self) -> &[Decision] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rename source declared for `field`, if any
    pub fn rename_source(&self, field: &str) -> Option<&str> {
        self.entries.iter().find_map(|d| match &d.kind {
            DecisionKind::Rename { from } if d.field == field => Some(from.as_str()),
            _ => None,
        })
    }

    /// Field that claims `source` as its rename source, if any
    pub fn rename_target_of(&self, source: &str) -> Option<&str> {
        self.entries.iter().find_map(|d| match &d.kind {
            DecisionKind::Rename { from } if from == source => Some(d.field.as_str()),
            _ => None,
        })
    }

    /// True if `field` is explicitly declared new
    pub fn is_new_field(&self, field: &str) -> bool {
        self.entries
            .iter()
            .any(|d| d.field == field && d.kind == DecisionKind::NewField)
    }

    /// True if any determination exists for `field`
    pub fn is_determined(&self, field: &str) -> bool {
        self.entries
            .iter()
            .any(|d| d.field == field && d.is_determination())
    }

    pub fn prepopulate_value(&self, field: &str) -> Option<&str> {
        self.entries.iter().find_map(|d| match &d.kind {
            DecisionKind::Prepopulate { value } if d.field == field => Some(value.as_str()),
            _ => None,
        })
    }

    /// All prepopulation values by field
    pub fn prepopulate_values(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter_map(|d| match &d.kind {
                DecisionKind::Prepopulate { value } => Some((d.field.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Decisions equivalent to a change set's renames and new fields.
    ///
    /// Removed fields are not represented: they follow from the diff.
    pub fn from_changeset(changeset: &ChangeSet) -> Self {
        let renames = changeset
            .modified_fields
            .iter()
            .map(|(old, new)| Decision::rename(new, old));
        let new_fields = changeset.new_fields.iter().map(|f| Decision::new_field(f));
        Self {
            entries: renames.chain(new_fields).collect(),
        }
    }

    /// Change set described by the determinations alone
    pub fn to_changeset(&self) -> ChangeSet {
        let mut new_fields = BTreeSet::new();
        let mut modified_fields = BTreeMap::new();
        for decision in &self.entries {
            match &decision.kind {
                DecisionKind::Rename { from } => {
                    modified_fields.insert(from.clone(), decision.field.clone());
                }
                DecisionKind::NewField => {
                    new_fields.insert(decision.field.clone());
                }
                DecisionKind::Prepopulate { .. } => {}
            }
        }
        ChangeSet {
            new_fields,
            removed_fields: BTreeSet::new(),
            modified_fields,
        }
    }

    /// Legacy key-value spelling of every decision
    pub fn to_pairs(&self) -> BTreeMap<String, String> {
        self.entries.iter().map(Decision::to_pair).collect()
    }
}
