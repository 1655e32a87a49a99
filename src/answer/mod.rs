//! Submitted answer documents
//!
//! An answer is an XML instance named after the form's root element. Leaf
//! elements hold values; intermediate elements mirror the schema's groups.

use crate::error::{MigrationError, Result};
use crate::schema::is_excluded;
use crate::xml::{Namespaces, NodeId, XmlData, XmlTree, XFORM_NAMESPACES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage identifier of an answer
pub type AnswerId = i64;

/// A stored submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerDocument {
    /// Row id; also defines creation order
    pub id: AnswerId,
    /// Owning form
    pub form_id: String,
    /// Stable identifier used to match answers against backups
    pub uuid: String,
    /// Raw answer XML
    pub xml: String,
    /// Submission time
    pub created_at: DateTime<Utc>,
}

/// Addressable view over one answer document
#[derive(Debug, Clone)]
pub struct AnswerTree {
    doc: XmlTree,
}

impl AnswerTree {
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with(text, &XFORM_NAMESPACES)
    }

    pub fn parse_with(text: &str, namespaces: &Namespaces) -> Result<Self> {
        Ok(Self {
            doc: XmlTree::parse(text, namespaces)?,
        })
    }

    pub fn doc(&self) -> &XmlTree {
        &self.doc
    }

    pub fn root_name(&self) -> &str {
        self.doc.name(self.doc.root())
    }

    /// Find an element by name, skipping metadata containers
    fn find(&self, name: &str) -> Option<NodeId> {
        let root = self.doc.root();
        let mut stack: Vec<NodeId> = self.doc.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let label = self.doc.name(id);
            if is_excluded(label) {
                continue;
            }
            if label == name {
                return Some(id);
            }
            stack.extend(self.doc.children(id).iter().rev().copied());
        }
        None
    }

    /// Element for `name`, or `MissingField`
    pub fn get_field(&self, name: &str) -> Result<NodeId> {
        self.find(name).ok_or_else(|| MigrationError::missing(name))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn field_text(&self, name: &str) -> Result<&str> {
        Ok(self.doc.text(self.get_field(name)?))
    }

    /// Names of all leaf elements outside the metadata containers
    pub fn field_names(&self) -> Vec<String> {
        let root = self.doc.root();
        let mut names = Vec::new();
        let mut stack: Vec<NodeId> = self.doc.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let label = self.doc.name(id);
            if is_excluded(label) {
                continue;
            }
            let children = self.doc.children(id);
            if children.is_empty() {
                names.push(label.to_string());
            } else {
                stack.extend(children.iter().rev().copied());
            }
        }
        names
    }

    /// Enclosing group names of a field, outermost first
    pub fn field_group_path(&self, name: &str) -> Result<Vec<String>> {
        let id = self.get_field(name)?;
        Ok(self.doc.tree().label_path(id))
    }

    /// Add a field unless it already exists.
    ///
    /// `parent` names an existing group; `None` appends to the root.
    pub fn add_field(&mut self, name: &str, text: &str, parent: Option<&str>) -> Result<()> {
        if self.has_field(name) {
            return Ok(());
        }
        let parent = match parent {
            Some(group) => self.get_field(group)?,
            None => self.doc.root(),
        };
        let data = XmlData {
            text: text.to_string(),
            ..XmlData::default()
        };
        self.doc.tree_mut().add_child(parent, name, data);
        Ok(())
    }

    /// Detach and discard a field with its subtree.
    ///
    /// Groups left empty by the removal are discarded as well.
    pub fn permanently_remove_field(&mut self, name: &str) -> Result<()> {
        let id = self.get_field(name)?;
        let parent = self.doc.tree().parent(id);
        self.doc.tree_mut().detach(id);
        if let Some(parent) = parent {
            self.prune_empty_groups(parent);
        }
        Ok(())
    }

    /// Rename a field in place, keeping its children and text
    pub fn modify_field(&mut self, old: &str, new: &str) -> Result<()> {
        let id = self.get_field(old)?;
        self.doc.tree_mut().set_label(id, new);
        Ok(())
    }

    /// Apply several renames at once.
    ///
    /// Every source is resolved before any tag changes, so swaps and chains
    /// within one map are safe. Fails on the first missing source.
    pub fn rename_fields(&mut self, renames: &BTreeMap<String, String>) -> Result<()> {
        let resolved = renames
            .iter()
            .map(|(old, new)| Ok((self.get_field(old)?, new.as_str())))
            .collect::<Result<Vec<_>>>()?;
        for (id, new) in resolved {
            self.doc.tree_mut().set_label(id, new);
        }
        Ok(())
    }

    /// Move `field` under the chain of groups `group_path`, starting at the root.
    ///
    /// Missing groups are created; existing groups and their children are
    /// reused as they are.
    pub fn insert_field_into_group_chain(&mut self, field: NodeId, group_path: &[String]) -> Result<()> {
        let mut current = self.doc.root();
        for group in group_path {
            current = match self.doc.tree().child_by_label(current, group) {
                Some(existing) if existing == field => {
                    return Err(MigrationError::GroupConflict {
                        group: group.clone(),
                    });
                }
                Some(existing) => {
                    if !self.doc.text(existing).trim().is_empty() {
                        return Err(MigrationError::GroupConflict {
                            group: group.clone(),
                        });
                    }
                    existing
                }
                None => self
                    .doc
                    .tree_mut()
                    .add_child(current, group, XmlData::default()),
            };
        }
        self.doc.tree_mut().append(current, field);
        Ok(())
    }

    /// Move a field to `group_path` if it lives elsewhere.
    ///
    /// Returns whether the field moved.
    pub fn relocate_field(&mut self, name: &str, group_path: &[String]) -> Result<bool> {
        let id = self.get_field(name)?;
        if self.doc.tree().label_path(id) == group_path {
            return Ok(false);
        }
        let old_parent = self.doc.tree().parent(id);
        self.insert_field_into_group_chain(id, group_path)?;
        if let Some(parent) = old_parent {
            self.prune_empty_groups(parent);
        }
        Ok(true)
    }

    fn prune_empty_groups(&mut self, mut id: NodeId) {
        let root = self.doc.root();
        while id != root && self.doc.tree().is_leaf(id) && self.doc.text(id).trim().is_empty() {
            let parent = self.doc.tree().parent(id);
            self.doc.tree_mut().detach(id);
            match parent {
                Some(p) => id = p,
                None => break,
            }
        }
    }

    /// `meta/instanceID` without its `uuid:` prefix
    pub fn instance_id(&self) -> Option<String> {
        let meta = self.doc.tree().child_by_label(self.doc.root(), "meta")?;
        let instance = self.doc.tree().child_by_label(meta, "instanceID")?;
        let value = self.doc.text(instance).trim();
        let value = value.strip_prefix("uuid:").unwrap_or(value);
        (!value.is_empty()).then(|| value.to_string())
    }

    pub fn to_xml(&self) -> Result<String> {
        self.doc.to_xml()
    }
}
