//! Inverse operations recorded while a write query mutates the graph.
//!
//! Consecutive operations of the same kind are batched into one entry.
//! Rollback replays entries, and the items inside each batch, strictly in
//! reverse order of recording, which makes every block-store allocation undo
//! the exact inverse of the allocation it pairs with. A failing inverse
//! operation does not stop the replay; the remaining ones still run.

use serde_json::Value;

use crate::{
    block_store::Allocation,
    errors::{GraphError, GraphResult},
    graph::{AttributeId, DeletedEdge, DeletedNode, EdgeId, Graph, LabelId, NodeId},
    graph_context::GraphContext,
    schema::{IndexFieldType, SchemaKind},
};

#[derive(Clone, Debug, PartialEq)]
pub enum UndoOp {
    CreateNodes(Vec<Allocation>),
    CreateEdges(Vec<Allocation>),
    DeleteNodes(Vec<DeletedNode>),
    DeleteEdges(Vec<DeletedEdge>),
    UpdateNode {
        id: NodeId,
        attribute: AttributeId,
        old: Option<Value>,
    },
    UpdateEdge {
        id: EdgeId,
        attribute: AttributeId,
        old: Option<Value>,
    },
    AddLabels {
        node: NodeId,
        labels: Vec<LabelId>,
    },
    RemoveLabels {
        node: NodeId,
        labels: Vec<LabelId>,
    },
    AddSchema {
        kind: SchemaKind,
        id: u32,
    },
    AddAttribute {
        id: AttributeId,
    },
    AddSchemaAttribute {
        kind: SchemaKind,
        schema: u32,
        attribute: AttributeId,
    },
    CreateIndex {
        kind: SchemaKind,
        schema: String,
        attribute: AttributeId,
        field_type: IndexFieldType,
    },
}

#[derive(Debug, Default)]
pub struct UndoLog {
    ops: Vec<UndoOp>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[UndoOp] {
        &self.ops
    }

    pub fn create_node(&mut self, allocation: Allocation) {
        if let Some(UndoOp::CreateNodes(batch)) = self.ops.last_mut() {
            batch.push(allocation);
        } else {
            self.ops.push(UndoOp::CreateNodes(vec![allocation]));
        }
    }

    pub fn create_edge(&mut self, allocation: Allocation) {
        if let Some(UndoOp::CreateEdges(batch)) = self.ops.last_mut() {
            batch.push(allocation);
        } else {
            self.ops.push(UndoOp::CreateEdges(vec![allocation]));
        }
    }

    pub fn delete_node(&mut self, deleted: DeletedNode) {
        if let Some(UndoOp::DeleteNodes(batch)) = self.ops.last_mut() {
            batch.push(deleted);
        } else {
            self.ops.push(UndoOp::DeleteNodes(vec![deleted]));
        }
    }

    pub fn delete_edge(&mut self, deleted: DeletedEdge) {
        if let Some(UndoOp::DeleteEdges(batch)) = self.ops.last_mut() {
            batch.push(deleted);
        } else {
            self.ops.push(UndoOp::DeleteEdges(vec![deleted]));
        }
    }

    pub fn update_node(&mut self, id: NodeId, attribute: AttributeId, old: Option<Value>) {
        self.ops.push(UndoOp::UpdateNode { id, attribute, old });
    }

    pub fn update_edge(&mut self, id: EdgeId, attribute: AttributeId, old: Option<Value>) {
        self.ops.push(UndoOp::UpdateEdge { id, attribute, old });
    }

    pub fn add_labels(&mut self, node: NodeId, labels: Vec<LabelId>) {
        if !labels.is_empty() {
            self.ops.push(UndoOp::AddLabels { node, labels });
        }
    }

    pub fn remove_labels(&mut self, node: NodeId, labels: Vec<LabelId>) {
        if !labels.is_empty() {
            self.ops.push(UndoOp::RemoveLabels { node, labels });
        }
    }

    pub fn add_schema(&mut self, kind: SchemaKind, id: u32) {
        self.ops.push(UndoOp::AddSchema { kind, id });
    }

    pub fn add_attribute(&mut self, id: AttributeId) {
        self.ops.push(UndoOp::AddAttribute { id });
    }

    pub fn add_schema_attribute(&mut self, kind: SchemaKind, schema: u32, attribute: AttributeId) {
        self.ops.push(UndoOp::AddSchemaAttribute {
            kind,
            schema,
            attribute,
        });
    }

    pub fn create_index(
        &mut self,
        kind: SchemaKind,
        schema: impl Into<String>,
        attribute: AttributeId,
        field_type: IndexFieldType,
    ) {
        self.ops.push(UndoOp::CreateIndex {
            kind,
            schema: schema.into(),
            attribute,
            field_type,
        });
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Undo every recorded operation, newest first. The log is emptied and
    /// every operation is attempted even when some fail; the first failure is
    /// returned.
    pub fn rollback(&mut self, gc: &GraphContext, graph: &mut Graph) -> GraphResult<()> {
        let ops = std::mem::take(&mut self.ops);
        let count = ops.len();
        let mut failures = Failures::default();
        for op in ops.into_iter().rev() {
            undo(op, gc, graph, &mut failures);
        }
        tracing::debug!(graph = %gc.name(), ops = count, failed = failures.count, "undo log replayed");
        match failures.first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct Failures {
    first: Option<GraphError>,
    count: usize,
}

impl Failures {
    fn check<T>(&mut self, result: GraphResult<T>) {
        if let Err(err) = result {
            tracing::error!(error = %err, "undo step failed");
            self.count += 1;
            self.first.get_or_insert(err);
        }
    }
}

fn undo(op: UndoOp, gc: &GraphContext, graph: &mut Graph, failures: &mut Failures) {
    match op {
        UndoOp::CreateNodes(batch) => {
            for allocation in batch.into_iter().rev() {
                failures.check(graph.rollback_node_creation(allocation));
            }
        }
        UndoOp::CreateEdges(batch) => {
            for allocation in batch.into_iter().rev() {
                failures.check(graph.rollback_edge_creation(allocation));
            }
        }
        UndoOp::DeleteNodes(batch) => {
            for deleted in batch.into_iter().rev() {
                failures.check(graph.restore_node(deleted));
            }
        }
        UndoOp::DeleteEdges(batch) => {
            for deleted in batch.into_iter().rev() {
                failures.check(graph.restore_edge(deleted));
            }
        }
        UndoOp::UpdateNode { id, attribute, old } => {
            failures.check(graph.set_node_attribute(id, attribute, old));
        }
        UndoOp::UpdateEdge { id, attribute, old } => {
            failures.check(graph.set_edge_attribute(id, attribute, old));
        }
        UndoOp::AddLabels { node, labels } => {
            failures.check(graph.remove_node_labels(node, &labels));
        }
        UndoOp::RemoveLabels { node, labels } => {
            failures.check(graph.label_node(node, &labels));
        }
        UndoOp::AddSchema { kind, id } => failures.check(gc.remove_schema(graph, id, kind)),
        UndoOp::AddAttribute { id } => {
            gc.remove_attribute(id);
        }
        UndoOp::AddSchemaAttribute {
            kind,
            schema,
            attribute,
        } => {
            gc.remove_schema_attribute(schema, kind, attribute);
        }
        UndoOp::CreateIndex {
            kind,
            schema,
            attribute,
            field_type,
        } => failures.check(gc.delete_index_field(kind, &schema, attribute, field_type)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::GraphConfig, graph::AttributeSet};

    #[test]
    fn consecutive_creations_share_a_batch() {
        let gc = GraphContext::new("undo", GraphConfig::default().with_node_capacity(8)).unwrap();
        let mut graph = gc.graph().acquire_write();
        let mut log = UndoLog::new();
        for _ in 0..3 {
            log.create_node(graph.create_node_tracked(&[], AttributeSet::new()).unwrap());
        }
        log.update_node(0, 0, None);
        log.create_node(graph.create_node_tracked(&[], AttributeSet::new()).unwrap());
        assert_eq!(log.len(), 3);
        assert!(matches!(&log.ops()[0], UndoOp::CreateNodes(batch) if batch.len() == 3));
    }

    #[test]
    fn rollback_restores_free_list_order() {
        let gc = GraphContext::new("undo", GraphConfig::default().with_node_capacity(8)).unwrap();
        let mut graph = gc.graph().acquire_write();
        for _ in 0..4 {
            graph.create_node(&[]).unwrap();
        }
        graph.delete_node(1).unwrap();
        graph.delete_node(3).unwrap();
        let before = graph.node_store().clone();

        let mut log = UndoLog::new();
        log.delete_node(graph.delete_node(0).unwrap());
        for _ in 0..4 {
            log.create_node(graph.create_node_tracked(&[], AttributeSet::new()).unwrap());
        }
        log.rollback(&gc, &mut graph).unwrap();

        assert_eq!(graph.node_store(), &before);
        assert!(log.is_empty());
    }

    #[test]
    fn schema_and_attribute_additions_are_undone() {
        let gc = GraphContext::new("undo", GraphConfig::default().with_node_capacity(8)).unwrap();
        let mut graph = gc.graph().acquire_write();
        let mut log = UndoLog::new();

        let (label, _) = gc.find_or_add_schema(&mut graph, "Person", SchemaKind::Node).unwrap();
        log.add_schema(SchemaKind::Node, label);
        let (attr, _) = gc.find_or_add_attribute("name").unwrap();
        log.add_attribute(attr);
        let node = graph.create_node_tracked(&[label], AttributeSet::new()).unwrap();
        log.create_node(node);
        let old = graph
            .set_node_attribute(node.id, attr, Some(Value::from("Ada")))
            .unwrap();
        log.update_node(node.id, attr, old);

        log.rollback(&gc, &mut graph).unwrap();
        assert_eq!(graph.label_count(), 0);
        assert_eq!(graph.node_count(), 0);
        assert_eq!(gc.attribute_count(), 0);
        assert!(gc.schema_for("Person", SchemaKind::Node).is_none());
    }

    #[test]
    fn replay_continues_past_a_failing_step() {
        let gc = GraphContext::new("undo", GraphConfig::default().with_node_capacity(8)).unwrap();
        let mut graph = gc.graph().acquire_write();
        let mut log = UndoLog::new();

        let (label, _) = gc.find_or_add_schema(&mut graph, "Person", SchemaKind::Node).unwrap();
        log.add_schema(SchemaKind::Node, label);
        log.create_node(graph.create_node_tracked(&[label], AttributeSet::new()).unwrap());
        log.update_node(42, 0, None);

        let err = log.rollback(&gc, &mut graph).unwrap_err();
        assert!(matches!(err, GraphError::OutOfRange { id: 42, .. }));
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.label_count(), 0);
        assert!(log.is_empty());
    }

    #[test]
    fn attribute_followed_by_another_is_kept() {
        let gc = GraphContext::new("undo", GraphConfig::default().with_node_capacity(8)).unwrap();
        let mut graph = gc.graph().acquire_write();
        let mut log = UndoLog::new();

        let (label, _) = gc.find_or_add_schema(&mut graph, "Person", SchemaKind::Node).unwrap();
        log.add_schema(SchemaKind::Node, label);
        let (mine, _) = gc.find_or_add_attribute("mine").unwrap();
        log.add_attribute(mine);
        assert!(gc.add_schema_attribute(label, SchemaKind::Node, mine));
        log.add_schema_attribute(SchemaKind::Node, label, mine);
        gc.find_or_add_attribute("theirs").unwrap();

        log.rollback(&gc, &mut graph).unwrap();
        assert_eq!(gc.attribute_names(), vec!["mine", "theirs"]);
        assert!(gc.schema_for("Person", SchemaKind::Node).is_none());
    }
}
