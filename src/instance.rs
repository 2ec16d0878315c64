//! Instance data: items, their observed attributes, and (for the tree
//! variant) the parent/child structure connecting them.
//!
//! This is the "(attribute-id, value) vectors" input named as an external
//! collaborator's output in spec §1b — the feature-extraction pipeline
//! that produces it is out of scope, but the shape it hands to the core
//! lives here.

use crate::error::{CrfError, CrfResult};

/// One observed item: a sparse vector of `(attribute_id, value)` pairs.
#[derive(Debug, Clone, Default)]
pub struct Item {
    pub attributes: Vec<(u32, f64)>,
}

impl Item {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, attribute_id: u32, value: f64) {
        self.attributes.push((attribute_id, value));
    }
}

/// Parent/child links for the tree variant, plus precomputed traversal
/// orders (post-order for α, pre-order for β — spec §9's resolution of
/// the tree-traversal open question).
#[derive(Debug, Clone)]
pub struct TreeTopology {
    /// `parent[i]` is the index of item `i`'s parent, or `None` at the root.
    pub parent: Vec<Option<usize>>,
    /// `children[i]` lists the indices of item `i`'s children.
    pub children: Vec<Vec<usize>>,
    /// Items ordered children-before-parents.
    pub post_order: Vec<usize>,
    /// Items ordered parent-before-children.
    pub pre_order: Vec<usize>,
    pub root: usize,
}

impl TreeTopology {
    /// Build a topology from a `parent` assignment (one entry per item,
    /// `None` for the root). Fails if the parent links do not form a
    /// single tree (cycle, multiple roots, or a dangling parent index).
    pub fn from_parents(parent: Vec<Option<usize>>) -> CrfResult<Self> {
        let n = parent.len();
        let mut children = vec![Vec::new(); n];
        let mut root = None;
        for (i, p) in parent.iter().enumerate() {
            match p {
                Some(pi) => {
                    if *pi >= n {
                        return Err(CrfError::InvalidInstance(format!(
                            "tree parent index {pi} out of range for item {i}"
                        )));
                    }
                    children[*pi].push(i);
                }
                None => {
                    if root.is_some() {
                        return Err(CrfError::InvalidInstance(
                            "tree instance has more than one root".into(),
                        ));
                    }
                    root = Some(i);
                }
            }
        }
        let root = root.ok_or_else(|| {
            CrfError::InvalidInstance("tree instance has no root".into())
        })?;

        let mut post_order = Vec::with_capacity(n);
        let mut visited = vec![false; n];
        let mut stack = vec![(root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                post_order.push(node);
                continue;
            }
            if visited[node] {
                return Err(CrfError::InvalidInstance(
                    "tree instance contains a cycle".into(),
                ));
            }
            visited[node] = true;
            stack.push((node, true));
            for &c in &children[node] {
                stack.push((c, false));
            }
        }
        if post_order.len() != n {
            return Err(CrfError::InvalidInstance(
                "tree instance is not a single connected tree".into(),
            ));
        }

        let mut pre_order = post_order.clone();
        pre_order.reverse();

        Ok(TreeTopology {
            parent,
            children,
            post_order,
            pre_order,
            root,
        })
    }
}

/// One labeled (or unlabeled, for inference) instance: a sequence of
/// items plus, for the tree variant, the topology linking them.
#[derive(Debug, Clone)]
pub struct Instance {
    pub items: Vec<Item>,
    /// Gold labels, one per item. Empty for inference-only instances.
    pub labels: Vec<u32>,
    /// `Some` only for tree-structured instances.
    pub tree: Option<TreeTopology>,
}

impl Instance {
    pub fn chain(items: Vec<Item>, labels: Vec<u32>) -> Self {
        Instance { items, labels, tree: None }
    }

    pub fn tree(items: Vec<Item>, labels: Vec<u32>, tree: TreeTopology) -> CrfResult<Self> {
        if tree.parent.len() != items.len() {
            return Err(CrfError::InvalidInstance(
                "tree topology size does not match item count".into(),
            ));
        }
        Ok(Instance { items, labels, tree: Some(tree) })
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn validate(&self) -> CrfResult<()> {
        if self.items.is_empty() {
            return Err(CrfError::InvalidInstance("instance has zero items".into()));
        }
        if !self.labels.is_empty() && self.labels.len() != self.items.len() {
            return Err(CrfError::InvalidInstance(
                "label count does not match item count".into(),
            ));
        }
        Ok(())
    }
}
