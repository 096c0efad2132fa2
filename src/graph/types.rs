use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type NodeId = u64;
pub type EdgeId = u64;
pub type LabelId = u32;
pub type RelationId = u32;
pub type AttributeId = u32;

/// Attribute values keyed by attribute ID.
pub type AttributeSet = BTreeMap<AttributeId, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub attributes: AttributeSet,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub src: NodeId,
    pub dst: NodeId,
    pub relation: RelationId,
    pub attributes: AttributeSet,
}

/// Topology of a single edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub src: NodeId,
    pub dst: NodeId,
    pub relation: RelationId,
}

impl EdgeRecord {
    pub fn topology(&self, id: EdgeId) -> Edge {
        Edge {
            id,
            src: self.src,
            dst: self.dst,
            relation: self.relation,
        }
    }
}

/// Per-label node counts and per-relation edge counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub node_count: Vec<u64>,
    pub edge_count: Vec<u64>,
}

impl GraphStatistics {
    pub(crate) fn introduce_label(&mut self) {
        self.node_count.push(0);
    }

    pub(crate) fn introduce_relation(&mut self) {
        self.edge_count.push(0);
    }

    pub(crate) fn increment_node_count(&mut self, label: LabelId, n: u64) {
        if let Some(count) = self.node_count.get_mut(label as usize) {
            *count += n;
        }
    }

    pub(crate) fn decrement_node_count(&mut self, label: LabelId, n: u64) {
        if let Some(count) = self.node_count.get_mut(label as usize) {
            *count = count.saturating_sub(n);
        }
    }

    pub(crate) fn increment_edge_count(&mut self, relation: RelationId, n: u64) {
        if let Some(count) = self.edge_count.get_mut(relation as usize) {
            *count += n;
        }
    }

    pub(crate) fn decrement_edge_count(&mut self, relation: RelationId, n: u64) {
        if let Some(count) = self.edge_count.get_mut(relation as usize) {
            *count = count.saturating_sub(n);
        }
    }
}

/// Serializes an [`AttributeSet`] as `[[id, value], ...]`. Integer map keys do
/// not survive the buffering serde does for internally tagged enums.
pub(crate) mod attribute_pairs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    use super::{AttributeId, AttributeSet};

    pub fn serialize<S: Serializer>(set: &AttributeSet, serializer: S) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&AttributeId, &Value)> = set.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AttributeSet, D::Error> {
        let pairs: Vec<(AttributeId, Value)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
