//! Per-query transactional context.
//!
//! A [`QueryCtx`] drives one query through `Waiting -> Executing -> Reporting
//! -> Finished`. Write queries hold the graph's write lock from [`QueryCtx::begin`]
//! until the query finishes; every mutation made through the context records
//! its inverse in an [`UndoLog`] and a forward [`Effect`]. A failed or
//! timed-out write is rolled back before the lock is released; a successful
//! one replicates its effects.

mod command;
mod params;
mod stage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::{
    effects::{Effect, EffectsBuffer},
    errors::{GraphError, GraphResult},
    graph::{
        AttributeId, AttributeSet, EdgeId, Graph, GraphReadGuard, GraphWriteGuard, LabelId,
        NodeId, RelationId,
    },
    graph_context::GraphContext,
    interfaces::{ExecutionPlan, Parser, QueryAst},
    query_log::QueryLogEntry,
    schema::{IndexFieldType, SchemaKind},
    undo_log::UndoLog,
};

pub use command::{BlockedClient, BoltClient, CommandCtx, ExecutorThread, HostContext};
pub use params::QueryParams;
pub use stage::{ExecutionFlags, ExecutionStage, QueryStatus};

use stage::StageTimer;

enum LockHold {
    Read(GraphReadGuard),
    Write(GraphWriteGuard),
}

/// Split borrows handed to a mutation helper.
struct Writer<'a> {
    gc: &'a GraphContext,
    graph: &'a mut Graph,
    undo: &'a mut UndoLog,
    effects: &'a mut EffectsBuffer,
}

impl Writer<'_> {
    fn schema(&mut self, name: &str, kind: SchemaKind) -> GraphResult<u32> {
        let (id, created) = self.gc.find_or_add_schema(self.graph, name, kind)?;
        if created {
            self.undo.add_schema(kind, id);
            self.effects.push(Effect::AddSchema {
                kind,
                id,
                name: name.to_string(),
            });
        }
        Ok(id)
    }

    fn attribute(&mut self, name: &str) -> GraphResult<AttributeId> {
        let (id, created) = self.gc.find_or_add_attribute(name)?;
        if created {
            self.undo.add_attribute(id);
            self.effects.push(Effect::AddAttribute {
                id,
                name: name.to_string(),
            });
        }
        Ok(id)
    }

    fn attribute_set(
        &mut self,
        kind: SchemaKind,
        schema: u32,
        attributes: &[(&str, Value)],
    ) -> GraphResult<AttributeSet> {
        let mut set = AttributeSet::new();
        for (name, value) in attributes {
            let id = self.attribute(name)?;
            if self.gc.add_schema_attribute(schema, kind, id) {
                self.undo.add_schema_attribute(kind, schema, id);
            }
            set.insert(id, value.clone());
        }
        Ok(set)
    }
}

pub struct QueryCtx {
    command: CommandCtx,
    gc: Arc<GraphContext>,
    params: QueryParams,
    query_no_params: String,
    ast: Option<Box<dyn QueryAst>>,
    plan: Option<Arc<dyn ExecutionPlan>>,
    flags: ExecutionFlags,
    stage: ExecutionStage,
    status: QueryStatus,
    timer: StageTimer,
    deadline: Option<Instant>,
    utilized_cache: bool,
    lock: Option<LockHold>,
    host_locked: bool,
    undo_log: UndoLog,
    effects: EffectsBuffer,
    error: Option<String>,
}

impl QueryCtx {
    /// Create a context in the `Waiting` stage. The query's parameter header is
    /// parsed here.
    pub fn new(command: CommandCtx) -> GraphResult<Self> {
        let (params, body) = QueryParams::parse(command.query())?;
        let query_no_params = body.to_string();
        let gc = Arc::clone(command.graph());
        Ok(Self {
            command,
            gc,
            params,
            query_no_params,
            ast: None,
            plan: None,
            flags: ExecutionFlags::READ,
            stage: ExecutionStage::Waiting,
            status: QueryStatus::Success,
            timer: StageTimer::start(),
            deadline: None,
            utilized_cache: false,
            lock: None,
            host_locked: false,
            undo_log: UndoLog::new(),
            effects: EffectsBuffer::new(),
            error: None,
        })
    }

    pub fn command(&self) -> &CommandCtx {
        &self.command
    }

    pub fn graph_context(&self) -> &Arc<GraphContext> {
        &self.gc
    }

    pub fn query(&self) -> &str {
        self.command.query()
    }

    /// Query text without its parameter header; the plan cache key.
    pub fn query_no_params(&self) -> &str {
        &self.query_no_params
    }

    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    pub fn ast(&self) -> Option<&dyn QueryAst> {
        self.ast.as_deref()
    }

    pub fn plan(&self) -> Option<&Arc<dyn ExecutionPlan>> {
        self.plan.as_ref()
    }

    pub fn flags(&self) -> ExecutionFlags {
        self.flags
    }

    pub fn stage(&self) -> ExecutionStage {
        self.stage
    }

    /// Final status, available once the query finished.
    pub fn status(&self) -> Option<QueryStatus> {
        (self.stage == ExecutionStage::Finished).then_some(self.status)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn utilized_cache(&self) -> bool {
        self.utilized_cache
    }

    pub fn undo_log(&self) -> &UndoLog {
        &self.undo_log
    }

    pub fn effects(&self) -> &EffectsBuffer {
        &self.effects
    }

    pub fn wait_duration(&self) -> Duration {
        self.timer.elapsed(ExecutionStage::Waiting, self.stage)
    }

    pub fn execution_duration(&self) -> Duration {
        self.timer.elapsed(ExecutionStage::Executing, self.stage)
    }

    pub fn report_duration(&self) -> Duration {
        self.timer.elapsed(ExecutionStage::Reporting, self.stage)
    }

    /// Execution plus reporting time.
    pub fn runtime(&self) -> Duration {
        self.execution_duration() + self.report_duration()
    }

    /// Parse the query body and derive the execution flags from the AST.
    pub fn parse(&mut self, parser: &dyn Parser) -> GraphResult<()> {
        let ast = parser.parse(&self.query_no_params, &self.params)?;
        self.set_ast(ast);
        Ok(())
    }

    pub fn set_ast(&mut self, ast: Box<dyn QueryAst>) {
        let mut flags = if ast.is_read_only() {
            ExecutionFlags::READ
        } else {
            ExecutionFlags::WRITE
        };
        if ast.is_profile() {
            flags = flags.set(ExecutionFlags::PROFILE);
        }
        self.flags = flags;
        self.ast = Some(ast);
    }

    /// Override the execution flags. Only allowed before execution starts.
    pub fn set_flags(&mut self, flags: ExecutionFlags) -> GraphResult<()> {
        if self.stage != ExecutionStage::Waiting {
            return Err(GraphError::invalid_input(
                "execution flags can only change while waiting",
            ));
        }
        self.flags = flags;
        Ok(())
    }

    /// Fetch the cached plan for this query's body, building and caching it
    /// on a miss.
    pub fn resolve_plan<F>(&mut self, build: F) -> GraphResult<Arc<dyn ExecutionPlan>>
    where
        F: FnOnce(&str, &QueryParams) -> GraphResult<Arc<dyn ExecutionPlan>>,
    {
        let cache = self.gc.plan_cache();
        let plan = match cache.lookup(&self.query_no_params) {
            Some(plan) => {
                self.utilized_cache = true;
                plan
            }
            None => {
                let built = build(&self.query_no_params, &self.params)?;
                cache.store(&self.query_no_params, built)
            }
        };
        self.plan = Some(Arc::clone(&plan));
        Ok(plan)
    }

    /// Acquire the graph lock for the query's mode and enter `Executing`.
    ///
    /// Write queries also verify the graph is still registered with the host,
    /// taking the host lock first when running off the main thread. A lock
    /// timeout finishes the query as `TimedOut`.
    pub fn begin(&mut self) -> GraphResult<()> {
        self.expect_stage(ExecutionStage::Waiting)?;
        if let Err(err) = self.acquire_lock() {
            self.status = if err.is_timeout() {
                QueryStatus::TimedOut
            } else {
                QueryStatus::Failure
            };
            self.error = Some(err.to_string());
            self.advance(ExecutionStage::Finished)?;
            return Err(err);
        }
        self.advance(ExecutionStage::Executing)?;
        self.deadline = self.command.timeout().map(|limit| Instant::now() + limit);
        Ok(())
    }

    fn acquire_lock(&mut self) -> GraphResult<()> {
        let lock_timeout = self.gc.config().lock_timeout;
        if !self.flags.is_write() {
            let guard = self.gc.graph().try_acquire_read(lock_timeout)?;
            self.lock = Some(LockHold::Read(guard));
            return Ok(());
        }

        if let Some(host) = self.command.host() {
            // The main thread already holds the host lock.
            let lock_host = self.command.thread() != ExecutorThread::Main;
            if lock_host {
                host.lock();
            }
            if !host.owns_graph(&self.gc) {
                if lock_host {
                    host.unlock();
                }
                return Err(GraphError::not_found(format!(
                    "key {:?} no longer holds this graph",
                    self.gc.name()
                )));
            }
            self.host_locked = lock_host;
        }
        match self.gc.graph().try_acquire_write(lock_timeout) {
            Ok(guard) => {
                self.lock = Some(LockHold::Write(guard));
                Ok(())
            }
            Err(err) => {
                self.unlock_host();
                Err(err)
            }
        }
    }

    /// Fail with [`GraphError::TimedOut`] once the query's deadline passed.
    pub fn check_timeout(&self) -> GraphResult<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(GraphError::TimedOut),
            _ => Ok(()),
        }
    }

    /// Read access to the locked graph.
    pub fn graph(&self) -> GraphResult<&Graph> {
        match &self.lock {
            Some(LockHold::Read(guard)) => Ok(&**guard),
            Some(LockHold::Write(guard)) => Ok(&**guard),
            None => Err(GraphError::invalid_input("graph lock is not held")),
        }
    }

    fn writer(&mut self) -> GraphResult<Writer<'_>> {
        self.expect_stage(ExecutionStage::Executing)?;
        self.check_timeout()?;
        match &mut self.lock {
            Some(LockHold::Write(guard)) => Ok(Writer {
                gc: &self.gc,
                graph: guard,
                undo: &mut self.undo_log,
                effects: &mut self.effects,
            }),
            _ => Err(GraphError::ReadOnlyQuery),
        }
    }

    /// Create a node, registering unknown labels and attributes.
    pub fn create_node(&mut self, labels: &[&str], attributes: &[(&str, Value)]) -> GraphResult<NodeId> {
        let mut w = self.writer()?;
        let mut label_ids: Vec<LabelId> = Vec::with_capacity(labels.len());
        for name in labels {
            label_ids.push(w.schema(name, SchemaKind::Node)?);
        }
        let mut set = AttributeSet::new();
        for &label in &label_ids {
            set.extend(w.attribute_set(SchemaKind::Node, label, attributes)?);
        }
        if label_ids.is_empty() {
            for (name, value) in attributes {
                let id = w.attribute(name)?;
                set.insert(id, value.clone());
            }
        }
        let allocation = w.graph.create_node_tracked(&label_ids, set.clone())?;
        w.undo.create_node(allocation);
        w.effects.push(Effect::CreateNode {
            id: allocation.id,
            labels: label_ids,
            attributes: set,
        });
        Ok(allocation.id)
    }

    /// Create an edge of type `relation`, registering it when unknown.
    pub fn create_edge(
        &mut self,
        src: NodeId,
        dst: NodeId,
        relation: &str,
        attributes: &[(&str, Value)],
    ) -> GraphResult<EdgeId> {
        let mut w = self.writer()?;
        let relation: RelationId = w.schema(relation, SchemaKind::Edge)?;
        let set = w.attribute_set(SchemaKind::Edge, relation, attributes)?;
        let allocation = w.graph.create_edge_tracked(src, dst, relation, set.clone())?;
        w.undo.create_edge(allocation);
        w.effects.push(Effect::CreateEdge {
            id: allocation.id,
            src,
            dst,
            relation,
            attributes: set,
        });
        Ok(allocation.id)
    }

    pub fn delete_node(&mut self, id: NodeId) -> GraphResult<()> {
        let w = self.writer()?;
        let deleted = w.graph.delete_node(id)?;
        w.undo.delete_node(deleted);
        w.effects.push(Effect::DeleteNode { id });
        Ok(())
    }

    pub fn delete_edge(&mut self, id: EdgeId) -> GraphResult<()> {
        let w = self.writer()?;
        let deleted = w.graph.delete_edge(id)?;
        w.undo.delete_edge(deleted);
        w.effects.push(Effect::DeleteEdge { id });
        Ok(())
    }

    /// Set (`Some`) or clear (`None`) a node attribute.
    pub fn set_node_attribute(&mut self, id: NodeId, name: &str, value: Option<Value>) -> GraphResult<()> {
        let mut w = self.writer()?;
        w.graph.get_node(id)?;
        let attribute = w.attribute(name)?;
        let old = w.graph.set_node_attribute(id, attribute, value.clone())?;
        w.undo.update_node(id, attribute, old);
        w.effects.push(Effect::UpdateNode {
            id,
            attribute,
            value,
        });
        Ok(())
    }

    pub fn set_edge_attribute(&mut self, id: EdgeId, name: &str, value: Option<Value>) -> GraphResult<()> {
        let mut w = self.writer()?;
        w.graph.get_edge(id)?;
        let attribute = w.attribute(name)?;
        let old = w.graph.set_edge_attribute(id, attribute, value.clone())?;
        w.undo.update_edge(id, attribute, old);
        w.effects.push(Effect::UpdateEdge {
            id,
            attribute,
            value,
        });
        Ok(())
    }

    pub fn add_labels(&mut self, node: NodeId, labels: &[&str]) -> GraphResult<()> {
        let mut w = self.writer()?;
        w.graph.get_node(node)?;
        let mut ids = Vec::with_capacity(labels.len());
        for name in labels {
            ids.push(w.schema(name, SchemaKind::Node)?);
        }
        let added = w.graph.label_node(node, &ids)?;
        if !added.is_empty() {
            w.effects.push(Effect::AddLabels {
                node,
                labels: added.clone(),
            });
        }
        w.undo.add_labels(node, added);
        Ok(())
    }

    pub fn remove_labels(&mut self, node: NodeId, labels: &[&str]) -> GraphResult<()> {
        let w = self.writer()?;
        let ids: Vec<LabelId> = labels
            .iter()
            .filter_map(|name| w.gc.schema_id(name, SchemaKind::Node))
            .collect();
        let removed = w.graph.remove_node_labels(node, &ids)?;
        if !removed.is_empty() {
            w.effects.push(Effect::RemoveLabels {
                node,
                labels: removed.clone(),
            });
        }
        w.undo.remove_labels(node, removed);
        Ok(())
    }

    /// Declare an index field, creating the schema when unknown.
    pub fn create_index(
        &mut self,
        kind: SchemaKind,
        schema: &str,
        attribute: &str,
        field_type: IndexFieldType,
    ) -> GraphResult<bool> {
        let mut w = self.writer()?;
        w.schema(schema, kind)?;
        let attribute_id = w.attribute(attribute)?;
        let added = w.gc.add_index(kind, schema, attribute, field_type)?;
        if added {
            w.undo.create_index(kind, schema, attribute_id, field_type);
            w.effects.push(Effect::CreateIndex {
                kind,
                schema: schema.to_string(),
                attribute: attribute.to_string(),
                field_type,
            });
        }
        Ok(added)
    }

    /// Close the `Executing` stage with the outcome of execution.
    ///
    /// On success a write query merges pending matrix changes past the
    /// threshold and replicates its effects. On failure the undo log is
    /// replayed; a timeout then finishes the query directly, any other error
    /// moves it to `Reporting` with a `Failure` status. Failures while
    /// replicating or rolling back are logged and never leave the query
    /// stuck in `Executing`.
    pub fn end_execution(&mut self, outcome: GraphResult<()>) -> GraphResult<()> {
        self.expect_stage(ExecutionStage::Executing)?;
        match outcome {
            Ok(()) => {
                self.commit();
                self.advance(ExecutionStage::Reporting)
            }
            Err(err) => {
                let timed_out = err.is_timeout();
                if timed_out {
                    tracing::warn!(graph = %self.gc.name(), query = %self.query_no_params, "query timed out");
                } else {
                    tracing::debug!(graph = %self.gc.name(), error = %err, "query execution failed");
                }
                self.error = Some(err.to_string());
                if let Err(undo_err) = self.rollback() {
                    tracing::error!(graph = %self.gc.name(), error = %undo_err, "rollback incomplete");
                }
                if timed_out {
                    self.status = QueryStatus::TimedOut;
                    self.advance(ExecutionStage::Finished)
                } else {
                    self.status = QueryStatus::Failure;
                    self.advance(ExecutionStage::Reporting)
                }
            }
        }
    }

    fn commit(&mut self) {
        if let Some(LockHold::Write(guard)) = &mut self.lock {
            guard.apply_all_pending(false);
            guard.reset_reserved_nodes();
        }
        self.undo_log.clear();
        // The write is committed at this point; a replication failure does
        // not undo it.
        if let Err(err) = self.replicate() {
            tracing::error!(graph = %self.gc.name(), error = %err, "effects replication failed");
        }
    }

    fn rollback(&mut self) -> GraphResult<()> {
        self.effects.clear();
        match &mut self.lock {
            Some(LockHold::Write(guard)) => {
                guard.reset_reserved_nodes();
                self.undo_log.rollback(&self.gc, guard)
            }
            _ => {
                self.undo_log.clear();
                Ok(())
            }
        }
    }

    fn replicate(&mut self) -> GraphResult<()> {
        if !self.flags.is_write() || self.effects.is_empty() || self.command.is_replicated() {
            return Ok(());
        }
        if let Some(replicator) = self.command.replicator() {
            let payload = self.effects.encode()?;
            replicator.replicate(self.gc.name(), self.command.command_name(), &payload)?;
            tracing::debug!(
                graph = %self.gc.name(),
                effects = self.effects.len(),
                bytes = payload.len(),
                "effects replicated"
            );
        }
        Ok(())
    }

    /// Leave `Reporting`, release the lock and publish the query's stats.
    pub fn finish(&mut self) -> GraphResult<QueryStatus> {
        self.expect_stage(ExecutionStage::Reporting)?;
        self.advance(ExecutionStage::Finished)?;
        Ok(self.status)
    }

    /// Run a query end to end: lock, execute `body`, commit or roll back,
    /// report with `report`, finish.
    pub fn run<B, R>(&mut self, body: B, report: R) -> GraphResult<QueryStatus>
    where
        B: FnOnce(&mut QueryCtx) -> GraphResult<()>,
        R: FnOnce(&QueryCtx),
    {
        if self.begin().is_err() {
            return Ok(self.status);
        }
        let outcome = body(self);
        self.end_execution(outcome)?;
        if self.stage == ExecutionStage::Reporting {
            report(self);
            self.finish()?;
        }
        Ok(self.status)
    }

    fn expect_stage(&self, stage: ExecutionStage) -> GraphResult<()> {
        if self.stage != stage {
            return Err(GraphError::invalid_input(format!(
                "query is {:?}, expected {stage:?}",
                self.stage
            )));
        }
        Ok(())
    }

    fn advance(&mut self, next: ExecutionStage) -> GraphResult<()> {
        if !self.stage.can_advance_to(next) {
            return Err(GraphError::invalid_input(format!(
                "cannot move query from {:?} to {next:?}",
                self.stage
            )));
        }
        self.timer.close(self.stage);
        self.stage = next;
        if next == ExecutionStage::Finished {
            self.on_finished();
        }
        Ok(())
    }

    fn on_finished(&mut self) {
        self.lock = None;
        self.unlock_host();
        let entry = self.log_entry();
        self.gc.slowlog().report(&entry);
        self.gc.queries_log().report(&entry);
        if let Some(client) = self.command.blocked_client() {
            client.unblock(self.status);
        }
        if let Some(client) = self.command.bolt_client() {
            client.end_of_query(self.status);
        }
        tracing::debug!(
            graph = %self.gc.name(),
            status = ?self.status,
            thread = ?self.command.thread(),
            flags = %self.flags,
            runtime_us = self.runtime().as_micros() as u64,
            "query finished"
        );
    }

    fn unlock_host(&mut self) {
        if self.host_locked {
            self.host_locked = false;
            if let Some(host) = self.command.host() {
                host.unlock();
            }
        }
    }

    fn log_entry(&self) -> QueryLogEntry {
        QueryLogEntry {
            received_at_ms: self.command.received_at_ms(),
            graph: self.gc.name().to_string(),
            query: self.query_no_params.clone(),
            status: self.status,
            wait: self.wait_duration(),
            execution: self.execution_duration(),
            report: self.report_duration(),
            utilized_cache: self.utilized_cache,
            parameterized: !self.params.is_empty(),
            write: self.flags.is_write(),
        }
    }
}

impl Drop for QueryCtx {
    fn drop(&mut self) {
        if self.stage == ExecutionStage::Finished {
            return;
        }
        if !self.undo_log.is_empty() {
            tracing::warn!(graph = %self.gc.name(), "query dropped mid-execution, rolling back");
            if let Err(err) = self.rollback() {
                tracing::error!(graph = %self.gc.name(), error = %err, "rollback failed");
            }
        }
        self.lock = None;
        self.unlock_host();
    }
}
