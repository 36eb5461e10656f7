//! Query-time graph nodes.
//!
//! A query assembles a small subgraph around one subject. Nodes live in a
//! per-call arena and refer to each other by [`NodeId`]; an entity or CVT
//! reached along several edges is one node shared by index. Nothing here is
//! persisted or cached across calls.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// How an object string is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A string literal.
    Value,
    /// A named entity (MID).
    Entity,
    /// An anonymous compound value type node.
    Cvt,
}

/// Index of a node inside a [`Subgraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One predicate and its objects, in file order. Within one node's predicate
/// list a predicate occurs at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateObjects {
    pub predicate: String,
    pub objects: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphNode {
    Value {
        value: String,
    },
    Entity {
        mid: String,
        name: Option<String>,
        /// `None` until the entity's own neighborhood is expanded.
        predicates: Option<Vec<PredicateObjects>>,
    },
    Cvt {
        mid: String,
        /// `None` for a CVT reached beyond the one-hop CVT limit.
        predicates: Option<Vec<PredicateObjects>>,
    },
}

impl GraphNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            GraphNode::Value { .. } => NodeKind::Value,
            GraphNode::Entity { .. } => NodeKind::Entity,
            GraphNode::Cvt { .. } => NodeKind::Cvt,
        }
    }

    /// The MID for entities and CVTs; empty for values.
    pub fn mid(&self) -> &str {
        match self {
            GraphNode::Value { .. } => "",
            GraphNode::Entity { mid, .. } | GraphNode::Cvt { mid, .. } => mid,
        }
    }

    /// The entity name or literal value; empty for CVTs.
    pub fn name_or_value(&self) -> &str {
        match self {
            GraphNode::Value { value } => value,
            GraphNode::Entity { name, .. } => name.as_deref().unwrap_or_default(),
            GraphNode::Cvt { .. } => "",
        }
    }

    pub fn predicates(&self) -> Option<&[PredicateObjects]> {
        match self {
            GraphNode::Value { .. } => None,
            GraphNode::Entity { predicates, .. } | GraphNode::Cvt { predicates, .. } => {
                predicates.as_deref()
            }
        }
    }

    pub fn is_expanded(&self) -> bool {
        self.predicates().is_some()
    }

    fn predicates_slot(&mut self) -> Option<&mut Option<Vec<PredicateObjects>>> {
        match self {
            GraphNode::Value { .. } => None,
            GraphNode::Entity { predicates, .. } | GraphNode::Cvt { predicates, .. } => {
                Some(predicates)
            }
        }
    }
}

/// Per-call node arena with MID deduplication.
#[derive(Debug, Default)]
pub struct NodeTable {
    nodes: Vec<GraphNode>,
    by_mid: AHashMap<String, NodeId>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a literal leaf. Values are never deduplicated.
    pub fn push_value(&mut self, value: &str) -> NodeId {
        self.push(GraphNode::Value {
            value: value.to_string(),
        })
    }

    /// Return the node registered for `mid`, creating it with `make` if absent.
    /// The boolean is `true` when the node was created by this call.
    pub fn get_or_insert_with(
        &mut self,
        mid: &str,
        make: impl FnOnce() -> GraphNode,
    ) -> (NodeId, bool) {
        if let Some(&id) = self.by_mid.get(mid) {
            return (id, false);
        }
        let id = self.push(make());
        self.by_mid.insert(mid.to_string(), id);
        (id, true)
    }

    pub fn lookup(&self, mid: &str) -> Option<NodeId> {
        self.by_mid.get(mid).copied()
    }

    pub fn get(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.index()]
    }

    /// Replace a node's predicate list in place. Values are left untouched.
    pub fn set_predicates(&mut self, id: NodeId, list: Vec<PredicateObjects>) {
        if let Some(slot) = self.nodes[id.index()].predicates_slot() {
            *slot = Some(list);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Finish the call: keep only nodes reachable from `root`, renumbered in
    /// breadth-first order so the root becomes node 0.
    pub fn into_subgraph(self, root: NodeId) -> Subgraph {
        let mut remap: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        let mut order = vec![root];
        remap[root.index()] = Some(NodeId(0));
        let mut next = 0;
        while next < order.len() {
            let id = order[next];
            next += 1;
            for po in self.nodes[id.index()].predicates().unwrap_or_default() {
                for &object in &po.objects {
                    if remap[object.index()].is_none() {
                        remap[object.index()] = Some(NodeId(order.len() as u32));
                        order.push(object);
                    }
                }
            }
        }

        let mut slots: Vec<Option<GraphNode>> = self.nodes.into_iter().map(Some).collect();
        let nodes = order
            .iter()
            .filter_map(|id| slots[id.index()].take())
            .map(|mut node| {
                if let Some(Some(list)) = node.predicates_slot() {
                    for object in list.iter_mut().flat_map(|po| po.objects.iter_mut()) {
                        if let Some(new_id) = remap[object.index()] {
                            *object = new_id;
                        }
                    }
                }
                node
            })
            .collect();
        Subgraph {
            root: NodeId(0),
            nodes,
        }
    }

    fn push(&mut self, node: GraphNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }
}

/// The result of a neighborhood query: a root node and every node reachable
/// from it, shared by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subgraph {
    pub root: NodeId,
    pub nodes: Vec<GraphNode>,
}

impl Subgraph {
    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.index()]
    }

    pub fn root_node(&self) -> &GraphNode {
        self.node(self.root)
    }

    /// The root's predicate list (empty if it was never expanded).
    pub fn root_predicates(&self) -> &[PredicateObjects] {
        self.root_node().predicates().unwrap_or_default()
    }

    /// Objects of `predicate` hanging off `id`, in order.
    pub fn objects(&self, id: NodeId, predicate: &str) -> Vec<&GraphNode> {
        self.node(id)
            .predicates()
            .unwrap_or_default()
            .iter()
            .filter(|po| po.predicate == predicate)
            .flat_map(|po| po.objects.iter().map(|&o| self.node(o)))
            .collect()
    }

    /// Node ids of `predicate` hanging off `id`, in order.
    pub fn object_ids(&self, id: NodeId, predicate: &str) -> Vec<NodeId> {
        self.node(id)
            .predicates()
            .unwrap_or_default()
            .iter()
            .filter(|po| po.predicate == predicate)
            .flat_map(|po| po.objects.iter().copied())
            .collect()
    }

    pub fn find_mid(&self, mid: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| !matches!(n, GraphNode::Value { .. }) && n.mid() == mid)
            .map(|i| NodeId(i as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(mid: &str) -> GraphNode {
        GraphNode::Entity {
            mid: mid.to_string(),
            name: Some(mid.to_uppercase()),
            predicates: None,
        }
    }

    #[test]
    fn test_mid_registration_is_shared() {
        let mut table = NodeTable::new();
        let (a, created_a) = table.get_or_insert_with("m.a", || entity("m.a"));
        let (b, created_b) = table.get_or_insert_with("m.a", || unreachable!());
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_values_are_not_deduplicated() {
        let mut table = NodeTable::new();
        let a = table.push_value("42");
        let b = table.push_value("42");
        assert_ne!(a, b);
    }

    #[test]
    fn test_set_predicates_expands_in_place() {
        let mut table = NodeTable::new();
        let (root, _) = table.get_or_insert_with("m.root", || entity("m.root"));
        let leaf = table.push_value("1.75");
        assert!(!table.get(root).is_expanded());
        table.set_predicates(
            root,
            vec![PredicateObjects {
                predicate: "people.person.height_meters".to_string(),
                objects: vec![leaf],
            }],
        );
        let graph = table.into_subgraph(root);
        assert!(graph.root_node().is_expanded());
        assert_eq!(
            graph.objects(graph.root, "people.person.height_meters")[0].name_or_value(),
            "1.75"
        );
    }

    #[test]
    fn test_subgraph_drops_unreachable_nodes() {
        let mut table = NodeTable::new();
        let orphan = table.push_value("dropped");
        let (root, _) = table.get_or_insert_with("m.root", || entity("m.root"));
        let (shared, _) = table.get_or_insert_with("m.x", || entity("m.x"));
        table.set_predicates(
            root,
            vec![
                PredicateObjects {
                    predicate: "a".to_string(),
                    objects: vec![shared],
                },
                PredicateObjects {
                    predicate: "b".to_string(),
                    objects: vec![shared],
                },
            ],
        );
        assert_ne!(orphan, root);

        let graph = table.into_subgraph(root);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.root, NodeId(0));
        assert_eq!(graph.root_node().mid(), "m.root");
        assert_eq!(graph.object_ids(graph.root, "a"), graph.object_ids(graph.root, "b"));
        assert_eq!(graph.find_mid("m.x"), Some(NodeId(1)));
    }

    #[test]
    fn test_json_shape_is_tagged() {
        let node = GraphNode::Cvt {
            mid: "m.cvt".to_string(),
            predicates: None,
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "cvt");
        assert_eq!(json["mid"], "m.cvt");
        assert!(json["predicates"].is_null());
    }
}
