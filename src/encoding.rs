//! Sequential JSON-lines snapshots of a graph context.
//!
//! A snapshot is written from a fully synchronized graph in this order: one
//! header, attributes, schemas, live nodes, the node free list, live edges,
//! the edge free list. Decoding places every entity back at its ID and
//! reinstalls the free lists, so tombstones and future ID reuse survive the
//! round trip.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    config::GraphConfig,
    errors::{GraphError, GraphResult},
    graph::{AttributeSet, EdgeId, Graph, LabelId, NodeId, RelationId},
    graph_context::GraphContext,
    schema::{Schema, SchemaKind},
};

const FORMAT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct SnapshotHeader {
    format: u32,
    graph: String,
    node_high_water_mark: u64,
    edge_high_water_mark: u64,
    node_count: u64,
    edge_count: u64,
    deleted_node_count: u64,
    deleted_edge_count: u64,
    attribute_count: u64,
    label_count: u64,
    relation_count: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SnapshotRecord {
    Header(SnapshotHeader),
    Attribute {
        id: u32,
        name: String,
    },
    Schema(Schema),
    Node {
        id: NodeId,
        labels: Vec<LabelId>,
        #[serde(with = "crate::graph::attribute_pairs")]
        attributes: AttributeSet,
    },
    DeletedNodes {
        ids: Vec<NodeId>,
    },
    Edge {
        id: EdgeId,
        src: NodeId,
        dst: NodeId,
        relation: RelationId,
        #[serde(with = "crate::graph::attribute_pairs")]
        attributes: AttributeSet,
    },
    DeletedEdges {
        ids: Vec<EdgeId>,
    },
}

impl SnapshotHeader {
    /// Every slot below a high-water mark is either live or on the free list.
    fn check_slot_counts(&self) -> GraphResult<()> {
        for (kind, hwm, live, deleted) in [
            ("node", self.node_high_water_mark, self.node_count, self.deleted_node_count),
            ("edge", self.edge_high_water_mark, self.edge_count, self.deleted_edge_count),
        ] {
            if live.checked_add(deleted) != Some(hwm) {
                return Err(GraphError::serialization(format!(
                    "{kind} high-water mark {hwm} does not match {live} live and {deleted} deleted"
                )));
            }
        }
        Ok(())
    }

    fn check_decoded(
        &self,
        progress: &EncodeProgress,
        attributes: usize,
        labels: usize,
        relations: usize,
    ) -> GraphResult<()> {
        let counts = [
            ("deleted nodes", self.deleted_node_count, progress.deleted_nodes),
            ("deleted edges", self.deleted_edge_count, progress.deleted_edges),
            ("attributes", self.attribute_count, attributes as u64),
            ("labels", self.label_count, labels as u64),
            ("relation types", self.relation_count, relations as u64),
        ];
        for (what, declared, decoded) in counts {
            if declared != decoded {
                return Err(GraphError::serialization(format!(
                    "header declares {declared} {what}, snapshot holds {decoded}"
                )));
            }
        }
        Ok(())
    }
}

fn check_slot(kind: &str, id: u64, high_water_mark: u64) -> GraphResult<()> {
    if id >= high_water_mark {
        return Err(GraphError::serialization(format!(
            "{kind} {id} lies past the high-water mark {high_water_mark}"
        )));
    }
    Ok(())
}

/// Section of the snapshot being produced or consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum EncodeState {
    #[default]
    Init,
    Header,
    Attributes,
    Schemas,
    Nodes,
    DeletedNodes,
    Edges,
    DeletedEdges,
    Done,
}

/// Entities handled so far by an encode or decode pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeProgress {
    pub attributes: u64,
    pub schemas: u64,
    pub nodes: u64,
    pub deleted_nodes: u64,
    pub edges: u64,
    pub deleted_edges: u64,
}

#[derive(Debug, Default)]
pub struct GraphEncodeContext {
    state: EncodeState,
    progress: EncodeProgress,
}

impl GraphEncodeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EncodeState {
        self.state
    }

    pub fn progress(&self) -> EncodeProgress {
        self.progress
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Write a snapshot of `gc`. Takes the graph's write lock to merge every
    /// pending matrix change first.
    pub fn encode<W: Write>(&mut self, gc: &GraphContext, mut writer: W) -> GraphResult<()> {
        self.reset();
        let mut graph = gc.graph().acquire_write();
        graph.apply_all_pending(true);

        self.enter(EncodeState::Header);
        let attributes = gc.attribute_names();
        let node_schemas = gc.all_schemas(SchemaKind::Node);
        let edge_schemas = gc.all_schemas(SchemaKind::Edge);
        let header = SnapshotHeader {
            format: FORMAT_VERSION,
            graph: gc.name().to_string(),
            node_high_water_mark: graph.node_store().high_water_mark(),
            edge_high_water_mark: graph.edge_store().high_water_mark(),
            node_count: graph.node_count() as u64,
            edge_count: graph.edge_count() as u64,
            deleted_node_count: graph.deleted_node_count() as u64,
            deleted_edge_count: graph.deleted_edge_count() as u64,
            attribute_count: attributes.len() as u64,
            label_count: graph.label_count() as u64,
            relation_count: graph.relation_type_count() as u64,
        };
        write_record(&mut writer, &SnapshotRecord::Header(header))?;

        self.enter(EncodeState::Attributes);
        for (id, name) in attributes.into_iter().enumerate() {
            write_record(&mut writer, &SnapshotRecord::Attribute { id: id as u32, name })?;
            self.progress.attributes += 1;
        }

        self.enter(EncodeState::Schemas);
        for schema in node_schemas.into_iter().chain(edge_schemas) {
            write_record(&mut writer, &SnapshotRecord::Schema(schema))?;
            self.progress.schemas += 1;
        }

        self.enter(EncodeState::Nodes);
        for (id, record) in graph.node_store().iter() {
            write_record(
                &mut writer,
                &SnapshotRecord::Node {
                    id,
                    labels: graph.node_labels(id)?,
                    attributes: record.attributes.clone(),
                },
            )?;
            self.progress.nodes += 1;
        }

        self.enter(EncodeState::DeletedNodes);
        let ids = graph.node_store().free_list().to_vec();
        self.progress.deleted_nodes = ids.len() as u64;
        write_record(&mut writer, &SnapshotRecord::DeletedNodes { ids })?;

        self.enter(EncodeState::Edges);
        for (id, record) in graph.edge_store().iter() {
            write_record(
                &mut writer,
                &SnapshotRecord::Edge {
                    id,
                    src: record.src,
                    dst: record.dst,
                    relation: record.relation,
                    attributes: record.attributes.clone(),
                },
            )?;
            self.progress.edges += 1;
        }

        self.enter(EncodeState::DeletedEdges);
        let ids = graph.edge_store().free_list().to_vec();
        self.progress.deleted_edges = ids.len() as u64;
        write_record(&mut writer, &SnapshotRecord::DeletedEdges { ids })?;

        writer
            .flush()
            .map_err(|e| GraphError::serialization(e.to_string()))?;
        self.enter(EncodeState::Done);
        tracing::info!(
            graph = %gc.name(),
            nodes = self.progress.nodes,
            edges = self.progress.edges,
            "graph encoded"
        );
        Ok(())
    }

    fn enter(&mut self, state: EncodeState) {
        debug_assert!(state > self.state);
        self.state = state;
    }
}

#[derive(Debug, Default)]
pub struct GraphDecodeContext {
    state: EncodeState,
    progress: EncodeProgress,
}

impl GraphDecodeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EncodeState {
        self.state
    }

    pub fn progress(&self) -> EncodeProgress {
        self.progress
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Rebuild a graph context from a snapshot. Capacities and thresholds come
    /// from `config`; stores grow to fit the snapshot.
    pub fn decode<R: BufRead>(
        &mut self,
        config: GraphConfig,
        reader: R,
    ) -> GraphResult<Arc<GraphContext>> {
        self.reset();
        config.validate()?;
        let mut lines = reader.lines();
        let header = match next_record(&mut lines)? {
            Some(SnapshotRecord::Header(header)) => header,
            _ => return Err(GraphError::serialization("snapshot must start with a header")),
        };
        if header.format != FORMAT_VERSION {
            return Err(GraphError::serialization(format!(
                "unsupported snapshot format {}",
                header.format
            )));
        }
        header.check_slot_counts()?;
        self.state = EncodeState::Header;

        let mut graph = Graph::from_config(&config);
        let mut attributes = Vec::new();
        let mut node_schemas = Vec::new();
        let mut edge_schemas = Vec::new();
        let mut deleted_nodes = Vec::new();
        let mut deleted_edges = Vec::new();

        while let Some(record) = next_record(&mut lines)? {
            match record {
                SnapshotRecord::Header(_) => {
                    return Err(GraphError::serialization("duplicate snapshot header"));
                }
                SnapshotRecord::Attribute { id, name } => {
                    self.advance(EncodeState::Attributes)?;
                    if id as usize != attributes.len() {
                        return Err(GraphError::serialization(format!(
                            "attribute {name:?} out of order"
                        )));
                    }
                    attributes.push(name);
                    self.progress.attributes += 1;
                }
                SnapshotRecord::Schema(schema) => {
                    self.advance(EncodeState::Schemas)?;
                    let id = match schema.kind() {
                        SchemaKind::Node => {
                            node_schemas.push(schema.clone());
                            graph.add_label()
                        }
                        SchemaKind::Edge => {
                            edge_schemas.push(schema.clone());
                            graph.add_relation_type()
                        }
                    };
                    if id != schema.id() {
                        return Err(GraphError::schema_conflict(format!(
                            "schema {:?} decoded as {id}, expected {}",
                            schema.name(),
                            schema.id()
                        )));
                    }
                    self.progress.schemas += 1;
                }
                SnapshotRecord::Node {
                    id,
                    labels,
                    attributes,
                } => {
                    self.advance(EncodeState::Nodes)?;
                    check_slot("node", id, header.node_high_water_mark)?;
                    graph.create_node_at(id, &labels, attributes)?;
                    self.progress.nodes += 1;
                }
                SnapshotRecord::DeletedNodes { ids } => {
                    self.advance(EncodeState::DeletedNodes)?;
                    self.progress.deleted_nodes = ids.len() as u64;
                    deleted_nodes = ids;
                }
                SnapshotRecord::Edge {
                    id,
                    src,
                    dst,
                    relation,
                    attributes,
                } => {
                    self.advance(EncodeState::Edges)?;
                    check_slot("edge", id, header.edge_high_water_mark)?;
                    graph.create_edge_at(id, src, dst, relation, attributes)?;
                    self.progress.edges += 1;
                }
                SnapshotRecord::DeletedEdges { ids } => {
                    self.advance(EncodeState::DeletedEdges)?;
                    self.progress.deleted_edges = ids.len() as u64;
                    deleted_edges = ids;
                }
            }
        }

        if self.progress.nodes != header.node_count || self.progress.edges != header.edge_count {
            return Err(GraphError::serialization(format!(
                "snapshot truncated: {} of {} nodes, {} of {} edges",
                self.progress.nodes, header.node_count, self.progress.edges, header.edge_count
            )));
        }
        header.check_decoded(
            &self.progress,
            attributes.len(),
            node_schemas.len(),
            edge_schemas.len(),
        )?;
        graph.restore_tombstones(
            header.node_high_water_mark,
            header.edge_high_water_mark,
            deleted_nodes,
            deleted_edges,
        )?;
        graph.apply_all_pending(true);

        let gc = GraphContext::with_graph(header.graph, config, graph);
        gc.install_attributes(&attributes)?;
        gc.install_schemas(node_schemas, edge_schemas);
        self.state = EncodeState::Done;
        tracing::info!(
            graph = %gc.name(),
            nodes = self.progress.nodes,
            edges = self.progress.edges,
            "graph decoded"
        );
        Ok(Arc::new(gc))
    }

    fn advance(&mut self, state: EncodeState) -> GraphResult<()> {
        if state < self.state {
            return Err(GraphError::serialization(format!(
                "{state:?} record after {:?} section",
                self.state
            )));
        }
        self.state = state;
        Ok(())
    }
}

/// Snapshot `gc` with its own encode context.
pub fn encode_graph<W: Write>(gc: &GraphContext, writer: W) -> GraphResult<()> {
    gc.encoding_context().lock().encode(gc, writer)
}

pub fn encode_graph_to_path<P: AsRef<Path>>(gc: &GraphContext, path: P) -> GraphResult<()> {
    let file = File::create(path.as_ref()).map_err(|e| GraphError::serialization(e.to_string()))?;
    encode_graph(gc, BufWriter::new(file))
}

pub fn decode_graph<R: BufRead>(config: GraphConfig, reader: R) -> GraphResult<Arc<GraphContext>> {
    let mut ctx = GraphDecodeContext::new();
    let gc = ctx.decode(config, reader)?;
    *gc.decoding_context().lock() = ctx;
    Ok(gc)
}

pub fn decode_graph_from_path<P: AsRef<Path>>(
    config: GraphConfig,
    path: P,
) -> GraphResult<Arc<GraphContext>> {
    let file = File::open(path.as_ref()).map_err(|e| GraphError::serialization(e.to_string()))?;
    decode_graph(config, BufReader::new(file))
}

fn write_record<W: Write>(writer: &mut W, record: &SnapshotRecord) -> GraphResult<()> {
    serde_json::to_writer(&mut *writer, record)?;
    writer
        .write_all(b"\n")
        .map_err(|e| GraphError::serialization(e.to_string()))
}

fn next_record<I>(lines: &mut I) -> GraphResult<Option<SnapshotRecord>>
where
    I: Iterator<Item = std::io::Result<String>>,
{
    for line in lines.by_ref() {
        let line = line.map_err(|e| GraphError::serialization(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        return Ok(Some(serde_json::from_str(&line)?));
    }
    Ok(None)
}
