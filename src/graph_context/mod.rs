//! Schema- and version-aware wrapper around one graph.
//!
//! A `GraphContext` is shared as `Arc<GraphContext>`: every executing query and
//! the hosting layer hold one reference, and the graph with its matrices and
//! schemas is torn down when the last reference is released.
//!
//! Locking:
//! - the graph topology sits behind the [`SharedGraph`] reader-writer lock
//! - the attribute mapping has its own lock, so resolving attribute names never
//!   waits on a topology writer
//! - schemas are only added by the graph's writer but may be read by anyone

mod registry;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::{
    attributes::AttributeMap,
    cache::PlanCache,
    config::GraphConfig,
    encoding::{GraphDecodeContext, GraphEncodeContext},
    errors::{GraphError, GraphResult},
    graph::{AttributeId, Graph, SharedGraph},
    query_log::{QueriesLog, SlowLog},
    schema::{IndexField, IndexFieldType, Schema, SchemaKind},
};

pub use registry::GraphRegistry;

#[derive(Debug, Default)]
struct Schemas {
    nodes: Vec<Schema>,
    edges: Vec<Schema>,
}

impl Schemas {
    fn of(&self, kind: SchemaKind) -> &Vec<Schema> {
        match kind {
            SchemaKind::Node => &self.nodes,
            SchemaKind::Edge => &self.edges,
        }
    }

    fn of_mut(&mut self, kind: SchemaKind) -> &mut Vec<Schema> {
        match kind {
            SchemaKind::Node => &mut self.nodes,
            SchemaKind::Edge => &mut self.edges,
        }
    }
}

pub struct GraphContext {
    name: String,
    config: GraphConfig,
    graph: SharedGraph,
    attributes: RwLock<AttributeMap>,
    schemas: RwLock<Schemas>,
    index_count: AtomicUsize,
    version: AtomicU64,
    plan_cache: PlanCache,
    slowlog: SlowLog,
    queries_log: QueriesLog,
    encoding: Mutex<GraphEncodeContext>,
    decoding: Mutex<GraphDecodeContext>,
}

impl GraphContext {
    pub fn new(name: impl Into<String>, config: GraphConfig) -> GraphResult<Arc<Self>> {
        config.validate()?;
        let graph = Graph::from_config(&config);
        Ok(Arc::new(Self::with_graph(name.into(), config, graph)))
    }

    pub(crate) fn with_graph(name: String, config: GraphConfig, graph: Graph) -> Self {
        let version = u64::from(rand::random::<u32>());
        tracing::info!(graph = %name, version, "graph context created");
        Self {
            plan_cache: PlanCache::new(config.plan_cache_size),
            slowlog: SlowLog::new(config.slowlog_capacity),
            queries_log: QueriesLog::new(config.query_log_capacity),
            graph: SharedGraph::new(graph),
            attributes: RwLock::new(AttributeMap::new()),
            schemas: RwLock::new(Schemas::default()),
            index_count: AtomicUsize::new(0),
            version: AtomicU64::new(version),
            encoding: Mutex::new(GraphEncodeContext::new()),
            decoding: Mutex::new(GraphDecodeContext::new()),
            name,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    /// Take an additional shared reference.
    pub fn add_reference(this: &Arc<Self>) -> Arc<Self> {
        Arc::clone(this)
    }

    /// Give up a reference; the context is torn down with the last one.
    pub fn release_reference(this: Arc<Self>) {
        drop(this);
    }

    pub fn reference_count(this: &Arc<Self>) -> usize {
        Arc::strong_count(this)
    }

    /// Current schema version. Strictly increases with every schema change.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Advance the schema version, returning the new value.
    pub fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn attribute_id(&self, name: &str) -> Option<AttributeId> {
        self.attributes.read().id(name)
    }

    pub fn attribute_name(&self, id: AttributeId) -> Option<String> {
        self.attributes.read().name(id).map(str::to_string)
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.read().len()
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.read().names().to_vec()
    }

    /// Resolve `name`, creating the attribute on first use. Returns the ID and
    /// whether it was created.
    pub fn find_or_add_attribute(&self, name: &str) -> GraphResult<(AttributeId, bool)> {
        if let Some(id) = self.attributes.read().id(name) {
            return Ok((id, false));
        }
        let mut attributes = self.attributes.write();
        if let Some(id) = attributes.id(name) {
            return Ok((id, false));
        }
        let id = attributes.insert(name)?;
        drop(attributes);
        self.bump_version();
        tracing::debug!(graph = %self.name, attribute = name, id, "attribute added");
        Ok((id, true))
    }

    pub fn resolve_attribute_id(&self, name: &str) -> GraphResult<AttributeId> {
        self.find_or_add_attribute(name).map(|(id, _)| id)
    }

    /// Remove attribute `id` if nothing was registered after it. An attribute
    /// followed by later ones stays mapped; returns whether it was removed.
    pub fn remove_attribute(&self, id: AttributeId) -> bool {
        let removed = self.attributes.write().remove_if_last(id);
        if !removed {
            tracing::debug!(graph = %self.name, id, "attribute kept, later attributes depend on it");
        }
        removed
    }

    pub fn schema_id(&self, name: &str, kind: SchemaKind) -> Option<u32> {
        self.schemas
            .read()
            .of(kind)
            .iter()
            .find(|s| s.name() == name)
            .map(Schema::id)
    }

    pub fn schema(&self, id: u32, kind: SchemaKind) -> Option<Schema> {
        self.schemas.read().of(kind).get(id as usize).cloned()
    }

    /// Schema of the label or relation type called `name`.
    pub fn schema_for(&self, name: &str, kind: SchemaKind) -> Option<Schema> {
        self.schemas
            .read()
            .of(kind)
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    pub fn schema_count(&self, kind: SchemaKind) -> usize {
        self.schemas.read().of(kind).len()
    }

    pub fn schema_names(&self, kind: SchemaKind) -> Vec<String> {
        self.schemas
            .read()
            .of(kind)
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Resolve a label or relation type, registering it with `graph` when new.
    /// Returns the ID and whether it was created.
    pub fn find_or_add_schema(
        &self,
        graph: &mut Graph,
        name: &str,
        kind: SchemaKind,
    ) -> GraphResult<(u32, bool)> {
        let mut schemas = self.schemas.write();
        if let Some(existing) = schemas.of(kind).iter().find(|s| s.name() == name) {
            return Ok((existing.id(), false));
        }
        let expected = schemas.of(kind).len() as u32;
        let id = match kind {
            SchemaKind::Node => graph.add_label(),
            SchemaKind::Edge => graph.add_relation_type(),
        };
        if id != expected {
            return Err(GraphError::schema_conflict(format!(
                "{kind:?} schema {name:?} got id {id}, expected {expected}"
            )));
        }
        schemas.of_mut(kind).push(Schema::new(kind, id, name));
        drop(schemas);
        self.bump_version();
        tracing::debug!(graph = %self.name, schema = name, ?kind, id, "schema added");
        Ok((id, true))
    }

    /// Remove the most recently added schema and its label or relation type.
    pub fn remove_schema(&self, graph: &mut Graph, id: u32, kind: SchemaKind) -> GraphResult<()> {
        let mut schemas = self.schemas.write();
        let list = schemas.of_mut(kind);
        if id as usize + 1 != list.len() {
            return Err(GraphError::invalid_input(format!(
                "{kind:?} schema {id} is not the most recently added"
            )));
        }
        match kind {
            SchemaKind::Node => graph.remove_label(id)?,
            SchemaKind::Edge => graph.remove_relation_type(id)?,
        }
        if let Some(schema) = list.pop()
            && schema.has_indices()
        {
            self.index_count.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Record that entities of schema `id` carry `attribute`.
    pub fn add_schema_attribute(&self, id: u32, kind: SchemaKind, attribute: AttributeId) -> bool {
        self.schemas
            .write()
            .of_mut(kind)
            .get_mut(id as usize)
            .is_some_and(|s| s.add_attribute(attribute))
    }

    /// Drop `attribute` from the attribute set of schema `id`.
    pub fn remove_schema_attribute(&self, id: u32, kind: SchemaKind, attribute: AttributeId) -> bool {
        self.schemas
            .write()
            .of_mut(kind)
            .get_mut(id as usize)
            .is_some_and(|s| s.remove_attribute(attribute))
    }

    /// Declare an index field on `schema_name`. Returns `false` when the field
    /// was already declared.
    pub fn add_index(
        &self,
        kind: SchemaKind,
        schema_name: &str,
        attribute_name: &str,
        field_type: IndexFieldType,
    ) -> GraphResult<bool> {
        let attribute = self.resolve_attribute_id(attribute_name)?;
        let mut schemas = self.schemas.write();
        let schema = schemas
            .of_mut(kind)
            .iter_mut()
            .find(|s| s.name() == schema_name)
            .ok_or_else(|| GraphError::not_found(format!("{kind:?} schema {schema_name:?}")))?;
        let had_index = schema.has_indices();
        let added = schema.add_index_field(IndexField {
            attribute,
            name: attribute_name.to_string(),
            field_type,
        });
        drop(schemas);
        if added {
            if !had_index {
                self.index_count.fetch_add(1, Ordering::AcqRel);
            }
            self.bump_version();
        }
        Ok(added)
    }

    /// Promote the pending index of `schema_name` to active.
    pub fn activate_index(&self, kind: SchemaKind, schema_name: &str) -> GraphResult<bool> {
        let mut schemas = self.schemas.write();
        let schema = schemas
            .of_mut(kind)
            .iter_mut()
            .find(|s| s.name() == schema_name)
            .ok_or_else(|| GraphError::not_found(format!("{kind:?} schema {schema_name:?}")))?;
        Ok(schema.activate_index())
    }

    /// Remove an index field from `schema_name`.
    pub fn delete_index(
        &self,
        kind: SchemaKind,
        schema_name: &str,
        attribute_name: &str,
        field_type: IndexFieldType,
    ) -> GraphResult<()> {
        let attribute = self
            .attribute_id(attribute_name)
            .ok_or_else(|| GraphError::not_found(format!("attribute {attribute_name:?}")))?;
        self.delete_index_field(kind, schema_name, attribute, field_type)
    }

    pub(crate) fn delete_index_field(
        &self,
        kind: SchemaKind,
        schema_name: &str,
        attribute: AttributeId,
        field_type: IndexFieldType,
    ) -> GraphResult<()> {
        let mut schemas = self.schemas.write();
        let schema = schemas
            .of_mut(kind)
            .iter_mut()
            .find(|s| s.name() == schema_name)
            .ok_or_else(|| GraphError::not_found(format!("{kind:?} schema {schema_name:?}")))?;
        if !schema.remove_index_field(attribute, field_type) {
            return Err(GraphError::not_found(format!(
                "index on {schema_name:?} attribute {attribute}"
            )));
        }
        if !schema.has_indices() {
            self.index_count.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }

    pub fn index_count(&self) -> usize {
        self.index_count.load(Ordering::Acquire)
    }

    pub fn plan_cache(&self) -> &PlanCache {
        &self.plan_cache
    }

    pub fn slowlog(&self) -> &SlowLog {
        &self.slowlog
    }

    pub fn queries_log(&self) -> &QueriesLog {
        &self.queries_log
    }

    pub fn encoding_context(&self) -> &Mutex<GraphEncodeContext> {
        &self.encoding
    }

    pub fn decoding_context(&self) -> &Mutex<GraphDecodeContext> {
        &self.decoding
    }

    pub(crate) fn install_schemas(&self, nodes: Vec<Schema>, edges: Vec<Schema>) {
        let indexed = nodes.iter().chain(edges.iter()).filter(|s| s.has_indices()).count();
        *self.schemas.write() = Schemas { nodes, edges };
        self.index_count.store(indexed, Ordering::Release);
    }

    pub(crate) fn install_attributes(&self, names: &[String]) -> GraphResult<()> {
        let mut map = AttributeMap::new();
        for name in names {
            map.insert(name)?;
        }
        *self.attributes.write() = map;
        Ok(())
    }

    pub(crate) fn all_schemas(&self, kind: SchemaKind) -> Vec<Schema> {
        self.schemas.read().of(kind).clone()
    }
}

impl Drop for GraphContext {
    fn drop(&mut self) {
        tracing::info!(graph = %self.name, "graph context released");
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn context() -> Arc<GraphContext> {
        GraphContext::new("test", GraphConfig::default().with_node_capacity(16)).expect("context")
    }

    #[test]
    fn attribute_creation_bumps_version_once() {
        let gc = context();
        let v0 = gc.version();
        let (id, created) = gc.find_or_add_attribute("name").unwrap();
        assert!(created);
        let v1 = gc.version();
        assert!(v1 > v0);
        assert_eq!(gc.find_or_add_attribute("name").unwrap(), (id, false));
        assert_eq!(gc.version(), v1);
    }

    #[test]
    fn concurrent_attribute_resolution_agrees() {
        let gc = context();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gc = GraphContext::add_reference(&gc);
                thread::spawn(move || gc.resolve_attribute_id("shared").unwrap())
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|&id| id == ids[0]));
        assert_eq!(gc.attribute_count(), 1);
    }

    #[test]
    fn schema_ids_follow_graph_labels() {
        let gc = context();
        let mut graph = gc.graph().acquire_write();
        let (person, created) = gc.find_or_add_schema(&mut graph, "Person", SchemaKind::Node).unwrap();
        assert!(created);
        let (city, _) = gc.find_or_add_schema(&mut graph, "City", SchemaKind::Node).unwrap();
        let (knows, _) = gc.find_or_add_schema(&mut graph, "KNOWS", SchemaKind::Edge).unwrap();
        assert_eq!((person, city, knows), (0, 1, 0));
        assert_eq!(graph.label_count(), 2);
        assert_eq!(graph.relation_type_count(), 1);
        assert_eq!(gc.schema_id("City", SchemaKind::Node), Some(1));

        gc.remove_schema(&mut graph, city, SchemaKind::Node).unwrap();
        assert_eq!(graph.label_count(), 1);
        assert!(gc.schema_for("City", SchemaKind::Node).is_none());
    }

    #[test]
    fn index_count_tracks_indexed_schemas() {
        let gc = context();
        {
            let mut graph = gc.graph().acquire_write();
            gc.find_or_add_schema(&mut graph, "Person", SchemaKind::Node).unwrap();
        }
        assert!(gc.add_index(SchemaKind::Node, "Person", "age", IndexFieldType::Range).unwrap());
        assert!(gc.add_index(SchemaKind::Node, "Person", "name", IndexFieldType::Fulltext).unwrap());
        assert_eq!(gc.index_count(), 1);
        gc.delete_index(SchemaKind::Node, "Person", "age", IndexFieldType::Range).unwrap();
        assert_eq!(gc.index_count(), 1);
        gc.delete_index(SchemaKind::Node, "Person", "name", IndexFieldType::Fulltext).unwrap();
        assert_eq!(gc.index_count(), 0);
        assert!(gc.add_index(SchemaKind::Node, "Nobody", "age", IndexFieldType::Range).is_err());
    }

    #[test]
    fn references_are_counted() {
        let gc = context();
        let extra = GraphContext::add_reference(&gc);
        assert_eq!(GraphContext::reference_count(&gc), 2);
        GraphContext::release_reference(extra);
        assert_eq!(GraphContext::reference_count(&gc), 1);
    }
}
