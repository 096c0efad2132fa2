//! Contracts of the collaborators this core consumes but does not implement.

use std::fmt;

use crate::errors::GraphResult;
use crate::query_ctx::QueryParams;

/// Parsed form of a query.
pub trait QueryAst: Send + Sync + fmt::Debug {
    /// `true` when executing the query cannot mutate the graph.
    fn is_read_only(&self) -> bool;

    /// `true` for profiled executions.
    fn is_profile(&self) -> bool {
        false
    }
}

/// Turns query text (parameter header already stripped) into an AST.
pub trait Parser: Send + Sync {
    fn parse(&self, query: &str, params: &QueryParams) -> GraphResult<Box<dyn QueryAst>>;
}

/// Executable plan stored in the plan cache and shared between queries.
pub trait ExecutionPlan: Send + Sync + fmt::Debug {
    fn is_read_only(&self) -> bool;
}

/// Propagates committed effects of a write query downstream.
pub trait Replicator: Send + Sync {
    fn replicate(&self, graph: &str, command: &str, payload: &[u8]) -> GraphResult<()>;
}
