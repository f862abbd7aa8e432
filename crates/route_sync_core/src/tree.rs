//! Read-time index of the remote resource tree.
//!
//! The index is built from a complete listing at the start of a run and
//! discarded at the end. Nodes created during the run are inserted so later
//! paths sharing a prefix see them immediately.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use crate::path::PathSpec;
use crate::remote::{ApiGateway, RemoteError};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub path_part: String,
    pub path: String,
}

impl ResourceNode {
    pub fn root(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            path_part: String::new(),
            path: "/".to_string(),
        }
    }

    pub fn child_of(parent: &ResourceNode, id: impl Into<String>, path_part: &str) -> Self {
        let path = if parent.parent_id.is_none() {
            format!("/{path_part}")
        } else {
            format!("{}/{path_part}", parent.path)
        };
        Self {
            id: id.into(),
            parent_id: Some(parent.id.clone()),
            path_part: path_part.to_string(),
            path,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("resource listing has no root node")]
    MissingRoot,
    #[error("resource listing has multiple root nodes: {ids:?}")]
    MultipleRoots { ids: Vec<String> },
    #[error("resource `{id}` appears more than once in the listing")]
    DuplicateId { id: String },
    #[error(
        "resources `{first}` and `{second}` share parent `{parent_id}` and path part `{path_part}`"
    )]
    DuplicateSibling {
        parent_id: String,
        path_part: String,
        first: String,
        second: String,
    },
    #[error("resource `{id}` references unknown parent `{parent_id}`")]
    OrphanNode { id: String, parent_id: String },
    #[error("resource listing returned position `{position}` twice")]
    PaginationLoop { position: String },
}

#[derive(Debug, Clone)]
pub struct ResourceTreeIndex {
    root_id: String,
    by_id: HashMap<String, ResourceNode>,
    by_parent_segment: HashMap<(String, String), String>,
}

impl ResourceTreeIndex {
    /// Reads every page of the remote tree and indexes it. Any page failure
    /// fails the whole build; a partial index is never returned.
    pub fn build(
        gateway: &(impl ApiGateway + ?Sized),
        api_id: &str,
        retry: &RetryPolicy,
    ) -> Result<Self, TreeError> {
        let nodes = fetch_all_resources(gateway, api_id, retry)?;
        let index = Self::from_nodes(nodes)?;
        tracing::info!(
            component = "tree_index",
            event = "index_built",
            api_id,
            nodes = index.len(),
        );
        Ok(index)
    }

    pub fn from_nodes(nodes: Vec<ResourceNode>) -> Result<Self, TreeError> {
        let roots: Vec<String> = nodes
            .iter()
            .filter(|node| node.is_root())
            .map(|node| node.id.clone())
            .collect();
        let root_id = match roots.as_slice() {
            [] => return Err(TreeError::MissingRoot),
            [root] => root.clone(),
            _ => return Err(TreeError::MultipleRoots { ids: roots }),
        };

        let mut by_id = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if by_id.contains_key(&node.id) {
                return Err(TreeError::DuplicateId { id: node.id });
            }
            by_id.insert(node.id.clone(), node);
        }

        let mut by_parent_segment = HashMap::with_capacity(by_id.len());
        for node in by_id.values() {
            let Some(parent_id) = &node.parent_id else {
                continue;
            };
            if !by_id.contains_key(parent_id) {
                return Err(TreeError::OrphanNode {
                    id: node.id.clone(),
                    parent_id: parent_id.clone(),
                });
            }
            let key = (parent_id.clone(), node.path_part.clone());
            if let Some(existing) = by_parent_segment.insert(key, node.id.clone()) {
                let (first, second) = ordered_pair(existing, node.id.clone());
                return Err(TreeError::DuplicateSibling {
                    parent_id: parent_id.clone(),
                    path_part: node.path_part.clone(),
                    first,
                    second,
                });
            }
        }

        Ok(Self {
            root_id,
            by_id,
            by_parent_segment,
        })
    }

    /// Replaces the index contents with a fresh full listing.
    pub fn refresh(
        &mut self,
        gateway: &(impl ApiGateway + ?Sized),
        api_id: &str,
        retry: &RetryPolicy,
    ) -> Result<(), TreeError> {
        let nodes = fetch_all_resources(gateway, api_id, retry)?;
        *self = Self::from_nodes(nodes)?;
        Ok(())
    }

    pub fn root(&self) -> &ResourceNode {
        &self.by_id[&self.root_id]
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn lookup(&self, parent_id: &str, path_part: &str) -> Option<&ResourceNode> {
        self.by_parent_segment
            .get(&(parent_id.to_string(), path_part.to_string()))
            .and_then(|id| self.by_id.get(id))
    }

    /// Adds a node created during this run. Inserting a node that is already
    /// indexed under the same id is a no-op.
    pub fn insert(&mut self, node: ResourceNode) -> Result<(), TreeError> {
        if self.by_id.contains_key(&node.id) {
            return Ok(());
        }
        let Some(parent_id) = node.parent_id.clone() else {
            return Err(TreeError::MultipleRoots {
                ids: vec![self.root_id.clone(), node.id],
            });
        };
        if !self.by_id.contains_key(&parent_id) {
            return Err(TreeError::OrphanNode {
                id: node.id,
                parent_id,
            });
        }

        let key = (parent_id.clone(), node.path_part.clone());
        if let Some(existing) = self.by_parent_segment.get(&key) {
            let (first, second) = ordered_pair(existing.clone(), node.id);
            return Err(TreeError::DuplicateSibling {
                parent_id,
                path_part: node.path_part,
                first,
                second,
            });
        }

        self.by_parent_segment.insert(key, node.id.clone());
        self.by_id.insert(node.id.clone(), node);
        Ok(())
    }

    /// Walks `path` from the root without creating anything.
    pub fn resolve(&self, path: &PathSpec) -> Option<&ResourceNode> {
        let mut current = self.root();
        for segment in path.segments() {
            current = self.lookup(&current.id, &segment.path_part())?;
        }
        Some(current)
    }

    /// Reconstructs a node's full path from its ancestors.
    pub fn path_of(&self, id: &str) -> Option<String> {
        let mut parts = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.by_id.get(id)?;
        while let Some(parent_id) = &current.parent_id {
            if !seen.insert(current.id.as_str()) {
                return None;
            }
            parts.push(current.path_part.as_str());
            current = self.by_id.get(parent_id)?;
        }
        parts.reverse();
        Some(format!("/{}", parts.join("/")))
    }

    /// Every indexed path mapped to its node id, sorted by path.
    pub fn paths(&self) -> BTreeMap<String, String> {
        self.by_id
            .keys()
            .filter_map(|id| self.path_of(id).map(|path| (path, id.clone())))
            .collect()
    }
}

pub fn fetch_all_resources(
    gateway: &(impl ApiGateway + ?Sized),
    api_id: &str,
    retry: &RetryPolicy,
) -> Result<Vec<ResourceNode>, TreeError> {
    let mut nodes = Vec::new();
    let mut seen_positions = HashSet::new();
    let mut position: Option<String> = None;

    loop {
        let page = retry.run("get_resources", || {
            gateway.get_resources(api_id, position.as_deref())
        })?;
        nodes.extend(page.items);

        match page.next_position {
            Some(next) => {
                if !seen_positions.insert(next.clone()) {
                    return Err(TreeError::PaginationLoop { position: next });
                }
                position = Some(next);
            }
            None => return Ok(nodes),
        }
    }
}

fn ordered_pair(left: String, right: String) -> (String, String) {
    if left <= right {
        (left, right)
    } else {
        (right, left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_nodes() -> Vec<ResourceNode> {
        let root = ResourceNode::root("r0");
        let users = ResourceNode::child_of(&root, "r1", "users");
        let user = ResourceNode::child_of(&users, "r2", "{id}");
        let orders = ResourceNode::child_of(&root, "r3", "orders");
        // Children before parents, as a paginated listing may return them.
        vec![user, orders, users, root]
    }

    #[test]
    fn indexes_nodes_by_parent_and_segment() {
        let index = ResourceTreeIndex::from_nodes(sample_nodes()).expect("index should build");

        assert_eq!(index.root().id, "r0");
        assert_eq!(index.len(), 4);
        assert_eq!(index.lookup("r0", "users").map(|node| node.id.as_str()), Some("r1"));
        assert_eq!(index.lookup("r1", "{id}").map(|node| node.id.as_str()), Some("r2"));
        assert!(index.lookup("r1", "{uid}").is_none());
        assert!(index.lookup("r0", "{id}").is_none());
    }

    #[test]
    fn resolves_paths_and_reconstructs_ancestry() {
        let index = ResourceTreeIndex::from_nodes(sample_nodes()).expect("index should build");
        let path = PathSpec::parse("/users/{id}").expect("path should parse");

        assert_eq!(index.resolve(&path).map(|node| node.id.as_str()), Some("r2"));
        assert_eq!(index.path_of("r2").as_deref(), Some("/users/{id}"));
        assert_eq!(index.path_of("r0").as_deref(), Some("/"));
        assert_eq!(
            index.paths().keys().cloned().collect::<Vec<_>>(),
            vec!["/", "/orders", "/users", "/users/{id}"]
        );
    }

    #[test]
    fn rejects_listing_without_single_root() {
        let root = ResourceNode::root("r0");
        let child = ResourceNode::child_of(&root, "r1", "users");
        assert_eq!(
            ResourceTreeIndex::from_nodes(vec![child.clone()]).expect_err("no root"),
            TreeError::MissingRoot
        );

        let second_root = ResourceNode::root("r9");
        assert!(matches!(
            ResourceTreeIndex::from_nodes(vec![root, second_root, child]),
            Err(TreeError::MultipleRoots { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_siblings_and_orphans() {
        let root = ResourceNode::root("r0");
        let first = ResourceNode::child_of(&root, "r1", "users");
        let second = ResourceNode::child_of(&root, "r2", "users");
        assert!(matches!(
            ResourceTreeIndex::from_nodes(vec![root.clone(), first.clone(), second]),
            Err(TreeError::DuplicateSibling { .. })
        ));

        let mut orphan = ResourceNode::child_of(&first, "r3", "x");
        orphan.parent_id = Some("missing".to_string());
        assert!(matches!(
            ResourceTreeIndex::from_nodes(vec![root, first, orphan]),
            Err(TreeError::OrphanNode { .. })
        ));
    }

    #[test]
    fn insert_is_idempotent_by_id_and_preserves_sibling_uniqueness() {
        let mut index = ResourceTreeIndex::from_nodes(sample_nodes()).expect("index should build");
        let root = index.root().clone();

        let items = ResourceNode::child_of(&root, "r4", "items");
        index.insert(items.clone()).expect("insert should succeed");
        index.insert(items).expect("re-insert should be a no-op");
        assert_eq!(index.len(), 5);

        let clash = ResourceNode::child_of(&root, "r5", "items");
        assert!(matches!(
            index.insert(clash),
            Err(TreeError::DuplicateSibling { .. })
        ));
    }
}
