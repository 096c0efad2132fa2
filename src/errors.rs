use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("id {id} out of range (high-water mark {limit})")]
    OutOfRange { id: u64, limit: u64 },
    #[error("edge endpoint {0} is not a live node")]
    InvalidEndpoint(u64),
    #[error("node {node} still has {edges} incident edge(s)")]
    NodeHasEdges { node: u64, edges: usize },
    #[error("lock not acquired within {0:?}")]
    LockTimeout(Duration),
    #[error("schema conflict: {0}")]
    SchemaConflict(String),
    #[error("entity not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("write attempted by a read-only query")]
    ReadOnlyQuery,
    #[error("query timed out")]
    TimedOut,
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl GraphError {
    pub fn out_of_range(id: u64, limit: u64) -> Self {
        GraphError::OutOfRange { id, limit }
    }

    pub fn schema_conflict<T: Into<String>>(msg: T) -> Self {
        GraphError::SchemaConflict(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        GraphError::NotFound(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        GraphError::InvalidInput(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        GraphError::Serialization(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        GraphError::Config(msg.into())
    }

    /// Errors that finish a query as `TIMEDOUT` rather than `FAILURE`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GraphError::LockTimeout(_) | GraphError::TimedOut)
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::serialization(err.to_string())
    }
}

pub type GraphResult<T> = Result<T, GraphError>;
