//! Schema revision history
//!
//! Every saved revision of a form is a node pointing at its parent. Nodes of
//! all forms together make a forest; path-finding between two nodes goes
//! through their deepest common ancestor.

use crate::changeset::ChangeSet;
use crate::error::{MigrationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

pub type VersionId = i64;

/// One historical schema revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionNode {
    pub id: VersionId,
    pub form_id: String,
    pub parent: Option<VersionId>,
    /// Schema text as saved at this revision
    pub schema_text: String,
    /// SHA-256 of `schema_text`
    pub schema_hash: String,
    /// Change from the parent to this node; `None` for roots
    pub changeset: Option<ChangeSet>,
    pub created_at: DateTime<Utc>,
}

/// Hex SHA-256 fingerprint of a schema document
pub fn schema_fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Arena of version nodes indexed by id
#[derive(Debug, Clone, Default)]
pub struct VersionGraph {
    nodes: BTreeMap<VersionId, VersionNode>,
}

impl VersionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes<I: IntoIterator<Item = VersionNode>>(nodes: I) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id, n)).collect(),
        }
    }

    pub fn insert(&mut self, node: VersionNode) {
        self.nodes.insert(node.id, node);
    }

    pub fn get(&self, id: VersionId) -> Result<&VersionNode> {
        self.nodes.get(&id).ok_or(MigrationError::UnknownVersion(id))
    }

    pub fn contains(&self, id: VersionId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, oldest first
    pub fn nodes(&self) -> impl Iterator<Item = &VersionNode> {
        self.nodes.values()
    }

    pub fn children(&self, id: VersionId) -> Vec<VersionId> {
        self.nodes
            .values()
            .filter(|n| n.parent == Some(id))
            .map(|n| n.id)
            .collect()
    }

    pub fn roots(&self) -> Vec<VersionId> {
        self.nodes
            .values()
            .filter(|n| n.parent.is_none())
            .map(|n| n.id)
            .collect()
    }

    /// Ids from the root down to `id`, both included
    pub fn root_path(&self, id: VersionId) -> Result<Vec<VersionId>> {
        let mut path = vec![id];
        let mut seen = BTreeSet::from([id]);
        let mut current = self.get(id)?;
        while let Some(parent) = current.parent {
            if !seen.insert(parent) {
                return Err(MigrationError::CorruptHistory(parent));
            }
            path.push(parent);
            current = self.get(parent)?;
        }
        path.reverse();
        Ok(path)
    }

    /// `(up, down)` path from `from` to `to` through their deepest common ancestor.
    ///
    /// `up` runs from `from` to the ancestor, both included. `down` runs from
    /// the ancestor's child to `to`, excluding the ancestor.
    pub fn find_path(&self, from: VersionId, to: VersionId) -> Result<(Vec<VersionId>, Vec<VersionId>)> {
        if from == to {
            self.get(from)?;
            return Ok((vec![from], Vec::new()));
        }

        let from_path = self.root_path(from)?;
        let to_path = self.root_path(to)?;
        if from_path[0] != to_path[0] {
            return Err(MigrationError::DifferentTree { from, to });
        }

        let common = from_path
            .iter()
            .zip(&to_path)
            .take_while(|(a, b)| a == b)
            .count();

        let up = from_path[common - 1..].iter().rev().copied().collect();
        let down = to_path[common..].to_vec();
        Ok((up, down))
    }

    /// The single change set that moves answers from `from` to `to`.
    ///
    /// Nodes on the way up contribute their change reversed (the ancestor
    /// itself contributes nothing); nodes on the way down contribute theirs
    /// as recorded. The sequence is merged transitively and the result is
    /// checked before it is handed out.
    pub fn composite_changeset(&self, from: VersionId, to: VersionId) -> Result<ChangeSet> {
        let (up, down) = self.find_path(from, to)?;

        let mut steps = Vec::with_capacity(up.len() + down.len());
        for id in &up[..up.len() - 1] {
            steps.push(self.node_changeset(*id)?.reverse());
        }
        for id in &down {
            steps.push(self.node_changeset(*id)?);
        }
        let merged = ChangeSet::merge_all(&steps);
        merged.validate()?;
        Ok(merged)
    }

    fn node_changeset(&self, id: VersionId) -> Result<ChangeSet> {
        let node = self.get(id)?;
        match (&node.changeset, node.parent) {
            (Some(changeset), _) => Ok(changeset.clone()),
            (None, None) => Ok(ChangeSet::default()),
            (None, Some(_)) => Err(MigrationError::CorruptHistory(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renaming(old: &str, new: &str) -> ChangeSet {
        ChangeSet::new(
            BTreeSet::new(),
            BTreeSet::new(),
            [(old.to_string(), new.to_string())].into_iter().collect(),
        )
        .unwrap()
    }

    fn node(id: VersionId, parent: Option<VersionId>, changeset: Option<ChangeSet>) -> VersionNode {
        VersionNode {
            id,
            form_id: "f".into(),
            parent,
            schema_text: format!("schema {}", id),
            schema_hash: schema_fingerprint(&format!("schema {}", id)),
            changeset,
            created_at: Utc::now(),
        }
    }

    /// 1 ─ 2 ─ 3
    ///      └─ 4
    /// 5 (separate lineage)
    fn graph() -> VersionGraph {
        VersionGraph::from_nodes([
            node(1, None, None),
            node(2, Some(1), Some(renaming("a", "b"))),
            node(3, Some(2), Some(renaming("c", "d"))),
            node(4, Some(2), Some(renaming("b", "e"))),
            node(5, None, None),
        ])
    }

    #[test]
    fn test_root_path() {
        let g = graph();
        assert_eq!(g.root_path(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(g.root_path(1).unwrap(), vec![1]);
        assert!(matches!(g.root_path(9), Err(MigrationError::UnknownVersion(9))));
    }

    #[test]
    fn test_find_path_to_self() {
        assert_eq!(graph().find_path(3, 3).unwrap(), (vec![3], vec![]));
    }

    #[test]
    fn test_find_path_to_parent() {
        assert_eq!(graph().find_path(3, 2).unwrap(), (vec![3, 2], vec![]));
    }

    #[test]
    fn test_find_path_to_descendant() {
        assert_eq!(graph().find_path(1, 3).unwrap(), (vec![1], vec![2, 3]));
    }

    #[test]
    fn test_find_path_across_branches() {
        assert_eq!(graph().find_path(3, 4).unwrap(), (vec![3, 2], vec![4]));
    }

    #[test]
    fn test_find_path_between_lineages_fails() {
        let err = graph().find_path(3, 5).unwrap_err();
        assert!(matches!(err, MigrationError::DifferentTree { from: 3, to: 5 }));
    }

    #[test]
    fn test_cycle_is_reported() {
        let g = VersionGraph::from_nodes([
            node(1, Some(2), Some(renaming("a", "b"))),
            node(2, Some(1), Some(renaming("b", "a"))),
        ]);
        assert!(matches!(g.root_path(1), Err(MigrationError::CorruptHistory(_))));
    }

    #[test]
    fn test_composite_changeset() {
        let g = graph();
        // 3 back to 1: undo c→d, then undo a→b
        let back = g.composite_changeset(3, 1).unwrap();
        assert_eq!(
            back.modified_fields,
            [("b".to_string(), "a".to_string()), ("d".to_string(), "c".to_string())]
                .into_iter()
                .collect()
        );

        // 3 over to 4: undo c→d, then b→e
        let across = g.composite_changeset(3, 4).unwrap();
        assert_eq!(
            across.modified_fields,
            [("b".to_string(), "e".to_string()), ("d".to_string(), "c".to_string())]
                .into_iter()
                .collect()
        );

        assert!(g.composite_changeset(4, 4).unwrap().is_empty());
    }

    #[test]
    fn test_composite_changeset_with_reused_name() {
        let readd = ChangeSet::new(
            ["a".to_string()].into_iter().collect(),
            BTreeSet::new(),
            BTreeMap::new(),
        )
        .unwrap();
        let g = VersionGraph::from_nodes([
            node(1, None, None),
            node(2, Some(1), Some(renaming("a", "b"))),
            node(3, Some(2), Some(readd)),
        ]);

        let back = g.composite_changeset(3, 1).unwrap();
        assert_eq!(back.removed_fields, ["a".to_string()].into_iter().collect());
        assert_eq!(
            back.modified_fields,
            [("b".to_string(), "a".to_string())].into_iter().collect()
        );

        let forward = g.composite_changeset(1, 3).unwrap();
        assert_eq!(forward.new_fields, ["a".to_string()].into_iter().collect());
        assert_eq!(
            forward.modified_fields,
            [("a".to_string(), "b".to_string())].into_iter().collect()
        );
    }

    #[test]
    fn test_children_and_roots() {
        let g = graph();
        assert_eq!(g.children(2), vec![3, 4]);
        assert_eq!(g.roots(), vec![1, 5]);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(schema_fingerprint("x"), schema_fingerprint("x"));
        assert_ne!(schema_fingerprint("x"), schema_fingerprint("y"));
        assert_eq!(schema_fingerprint("x").len(), 64);
    }
}
