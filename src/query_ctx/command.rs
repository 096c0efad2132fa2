//! Per-command input handed to a query by the host command layer.
//!
//! Host handles are optional trait objects so a query can run (and be tested)
//! without a live host process.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{graph_context::GraphContext, interfaces::Replicator};

use super::QueryStatus;

/// Host execution context: the host-wide lock taken around a commit and the
/// key lookup that proves the graph is still registered under its name.
pub trait HostContext: Send + Sync {
    fn lock(&self);
    fn unlock(&self);
    fn owns_graph(&self, graph: &GraphContext) -> bool;
}

/// A client suspended by the host while its query runs on a worker thread.
pub trait BlockedClient: Send + Sync {
    fn unblock(&self, status: QueryStatus);
}

/// A binary wire-protocol connection.
pub trait BoltClient: Send + Sync {
    fn end_of_query(&self, status: QueryStatus);
}

/// Thread a command executes on. Only the main thread runs with the host
/// lock already held.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExecutorThread {
    Main,
    Reader,
    Writer,
}

pub struct CommandCtx {
    query: String,
    command_name: String,
    graph: Arc<GraphContext>,
    thread: ExecutorThread,
    replicated_command: bool,
    timeout: Option<Duration>,
    received_at_ms: u64,
    host: Option<Arc<dyn HostContext>>,
    blocked_client: Option<Arc<dyn BlockedClient>>,
    bolt_client: Option<Arc<dyn BoltClient>>,
    replicator: Option<Arc<dyn Replicator>>,
}

impl CommandCtx {
    pub fn new(
        command_name: impl Into<String>,
        query: impl Into<String>,
        graph: Arc<GraphContext>,
    ) -> Self {
        let received_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            timeout: graph.config().query_timeout,
            query: query.into(),
            command_name: command_name.into(),
            graph,
            thread: ExecutorThread::Main,
            replicated_command: false,
            received_at_ms,
            host: None,
            blocked_client: None,
            bolt_client: None,
            replicator: None,
        }
    }

    pub fn with_thread(mut self, thread: ExecutorThread) -> Self {
        self.thread = thread;
        self
    }

    /// Mark the command as arriving through replication; its effects are not
    /// replicated again.
    pub fn replicated(mut self) -> Self {
        self.replicated_command = true;
        self
    }

    /// Override the graph's configured query timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_received_at(mut self, received_at_ms: u64) -> Self {
        self.received_at_ms = received_at_ms;
        self
    }

    pub fn with_host(mut self, host: Arc<dyn HostContext>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn with_blocked_client(mut self, client: Arc<dyn BlockedClient>) -> Self {
        self.blocked_client = Some(client);
        self
    }

    pub fn with_bolt_client(mut self, client: Arc<dyn BoltClient>) -> Self {
        self.bolt_client = Some(client);
        self
    }

    pub fn with_replicator(mut self, replicator: Arc<dyn Replicator>) -> Self {
        self.replicator = Some(replicator);
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn graph(&self) -> &Arc<GraphContext> {
        &self.graph
    }

    pub fn thread(&self) -> ExecutorThread {
        self.thread
    }

    pub fn set_thread(&mut self, thread: ExecutorThread) {
        self.thread = thread;
    }

    pub fn is_replicated(&self) -> bool {
        self.replicated_command
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn received_at_ms(&self) -> u64 {
        self.received_at_ms
    }

    pub fn host(&self) -> Option<&Arc<dyn HostContext>> {
        self.host.as_ref()
    }

    pub fn blocked_client(&self) -> Option<&Arc<dyn BlockedClient>> {
        self.blocked_client.as_ref()
    }

    pub fn bolt_client(&self) -> Option<&Arc<dyn BoltClient>> {
        self.bolt_client.as_ref()
    }

    pub fn replicator(&self) -> Option<&Arc<dyn Replicator>> {
        self.replicator.as_ref()
    }
}
