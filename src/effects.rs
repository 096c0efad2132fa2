//! Deterministic forward records of a write query's mutations.
//!
//! A committed write query replicates its effects instead of its query text, so
//! replicas never re-evaluate randomness or wall-clock reads. Effects carry the
//! entity IDs chosen on the primary; replaying them places entities at those
//! IDs.
//!
//! The wire form is one JSON object per line, tagged by `type`.

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    errors::{GraphError, GraphResult},
    graph::{AttributeId, AttributeSet, EdgeId, Graph, LabelId, NodeId, RelationId},
    graph_context::GraphContext,
    schema::{IndexFieldType, SchemaKind},
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    AddSchema {
        kind: SchemaKind,
        id: u32,
        name: String,
    },
    AddAttribute {
        id: AttributeId,
        name: String,
    },
    CreateNode {
        id: NodeId,
        labels: Vec<LabelId>,
        #[serde(with = "crate::graph::attribute_pairs")]
        attributes: AttributeSet,
    },
    CreateEdge {
        id: EdgeId,
        src: NodeId,
        dst: NodeId,
        relation: RelationId,
        #[serde(with = "crate::graph::attribute_pairs")]
        attributes: AttributeSet,
    },
    DeleteNode {
        id: NodeId,
    },
    DeleteEdge {
        id: EdgeId,
    },
    UpdateNode {
        id: NodeId,
        attribute: AttributeId,
        value: Option<Value>,
    },
    UpdateEdge {
        id: EdgeId,
        attribute: AttributeId,
        value: Option<Value>,
    },
    AddLabels {
        node: NodeId,
        labels: Vec<LabelId>,
    },
    RemoveLabels {
        node: NodeId,
        labels: Vec<LabelId>,
    },
    CreateIndex {
        kind: SchemaKind,
        schema: String,
        attribute: String,
        field_type: IndexFieldType,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EffectsBuffer {
    effects: Vec<Effect>,
}

impl EffectsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn clear(&mut self) {
        self.effects.clear();
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> GraphResult<()> {
        for effect in &self.effects {
            serde_json::to_writer(&mut writer, effect)?;
            writer
                .write_all(b"\n")
                .map_err(|e| GraphError::serialization(e.to_string()))?;
        }
        Ok(())
    }

    pub fn encode(&self) -> GraphResult<Vec<u8>> {
        let mut payload = Vec::new();
        self.write_to(&mut payload)?;
        Ok(payload)
    }

    pub fn read_from<R: BufRead>(reader: R) -> GraphResult<Self> {
        let mut effects = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| GraphError::serialization(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            effects.push(serde_json::from_str(&line)?);
        }
        Ok(Self { effects })
    }

    pub fn decode(payload: &[u8]) -> GraphResult<Self> {
        Self::read_from(payload)
    }

    fn count(&self, pred: impl Fn(&Effect) -> bool) -> u64 {
        self.effects.iter().filter(|e| pred(e)).count() as u64
    }

    /// Replay every effect against `graph`, the graph of `gc` held in write
    /// mode. Pending matrix changes are merged once at the end.
    ///
    /// A created entity's ID must lie below the store's high-water mark plus
    /// the number of entities of its kind this buffer creates.
    pub fn apply(&self, gc: &GraphContext, graph: &mut Graph) -> GraphResult<()> {
        let limits = SlotLimits {
            nodes: graph.node_store().high_water_mark() + self.count(|e| matches!(e, Effect::CreateNode { .. })),
            edges: graph.edge_store().high_water_mark() + self.count(|e| matches!(e, Effect::CreateEdge { .. })),
        };
        for effect in &self.effects {
            apply_effect(effect, gc, graph, &limits)?;
        }
        graph.apply_all_pending(false);
        tracing::debug!(graph = %gc.name(), effects = self.effects.len(), "effects applied");
        Ok(())
    }
}

struct SlotLimits {
    nodes: u64,
    edges: u64,
}

fn check_slot(id: u64, limit: u64) -> GraphResult<()> {
    if id >= limit {
        return Err(GraphError::out_of_range(id, limit));
    }
    Ok(())
}

fn apply_effect(
    effect: &Effect,
    gc: &GraphContext,
    graph: &mut Graph,
    limits: &SlotLimits,
) -> GraphResult<()> {
    match effect {
        Effect::AddSchema { kind, id, name } => {
            let (assigned, _) = gc.find_or_add_schema(graph, name, *kind)?;
            if assigned != *id {
                return Err(GraphError::schema_conflict(format!(
                    "{kind:?} schema {name:?} replayed as {assigned}, expected {id}"
                )));
            }
        }
        Effect::AddAttribute { id, name } => {
            let assigned = gc.resolve_attribute_id(name)?;
            if assigned != *id {
                return Err(GraphError::schema_conflict(format!(
                    "attribute {name:?} replayed as {assigned}, expected {id}"
                )));
            }
        }
        Effect::CreateNode {
            id,
            labels,
            attributes,
        } => {
            check_slot(*id, limits.nodes)?;
            graph.create_node_at(*id, labels, attributes.clone())?;
        }
        Effect::CreateEdge {
            id,
            src,
            dst,
            relation,
            attributes,
        } => {
            check_slot(*id, limits.edges)?;
            graph.create_edge_at(*id, *src, *dst, *relation, attributes.clone())?;
        }
        Effect::DeleteNode { id } => {
            graph.delete_node(*id)?;
        }
        Effect::DeleteEdge { id } => {
            graph.delete_edge(*id)?;
        }
        Effect::UpdateNode {
            id,
            attribute,
            value,
        } => {
            graph.set_node_attribute(*id, *attribute, value.clone())?;
        }
        Effect::UpdateEdge {
            id,
            attribute,
            value,
        } => {
            graph.set_edge_attribute(*id, *attribute, value.clone())?;
        }
        Effect::AddLabels { node, labels } => {
            graph.label_node(*node, labels)?;
        }
        Effect::RemoveLabels { node, labels } => {
            graph.remove_node_labels(*node, labels)?;
        }
        Effect::CreateIndex {
            kind,
            schema,
            attribute,
            field_type,
        } => {
            gc.add_index(*kind, schema, attribute, *field_type)?;
        }
    }
    Ok(())
}
