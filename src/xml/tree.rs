//! Generic labeled tree with parent links
//!
//! Nodes live in an arena and are addressed by index. Detaching a node
//! unlinks it from its parent; the slot stays in the arena but is no longer
//! reachable from the root.

/// Index of a node inside a [`Tree`]
pub type NodeId = usize;

#[derive(Debug, Clone)]
struct Node<T> {
    label: String,
    data: T,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed labeled tree
#[derive(Debug, Clone)]
pub struct Tree<T> {
    nodes: Vec<Node<T>>,
    root: NodeId,
}

impl<T> Tree<T> {
    /// Create a tree holding a single root node
    pub fn new(label: &str, data: T) -> Self {
        Self {
            nodes: vec![Node {
                label: label.to_string(),
                data,
                parent: None,
                children: Vec::new(),
            }],
            root: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn label(&self, id: NodeId) -> &str {
        &self.nodes[id].label
    }

    pub fn set_label(&mut self, id: NodeId, label: &str) {
        self.nodes[id].label = label.to_string();
    }

    pub fn data(&self, id: NodeId) -> &T {
        &self.nodes[id].data
    }

    pub fn data_mut(&mut self, id: NodeId) -> &mut T {
        &mut self.nodes[id].data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].children
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id].children.is_empty()
    }

    /// Append a new node under `parent`
    pub fn add_child(&mut self, parent: NodeId, label: &str, data: T) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            label: label.to_string(),
            data,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Re-attach a detached node (with its subtree) as the last child of `parent`
    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    /// Unlink a node from its parent. The root cannot be detached.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id].parent.take() {
            self.nodes[parent].children.retain(|&c| c != id);
        }
    }

    /// First direct child carrying `label`
    pub fn child_by_label(&self, parent: NodeId, label: &str) -> Option<NodeId> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].label == label)
    }

    /// All nodes below `id` in document (pre-)order, `id` excluded
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.nodes[id].children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next].children.iter().rev().copied());
        }
        out
    }

    /// Ancestors of `id`, nearest first, root last
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.nodes[id].parent;
        while let Some(p) = current {
            out.push(p);
            current = self.nodes[p].parent;
        }
        out
    }

    /// Labels of the nodes enclosing `id`, outermost first.
    ///
    /// The root and `id` itself are excluded, so a direct child of the root
    /// has an empty path.
    pub fn label_path(&self, id: NodeId) -> Vec<String> {
        let mut ancestors = self.ancestors(id);
        ancestors.pop();
        ancestors
            .iter()
            .rev()
            .map(|&a| self.nodes[a].label.clone())
            .collect()
    }

    /// True if following parent links from `id` reaches the root
    pub fn is_attached(&self, id: NodeId) -> bool {
        id == self.root || self.ancestors(id).last() == Some(&self.root)
    }
}
