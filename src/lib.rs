//! Storage and transactional core of a property graph built on deferred-update
//! sparse matrices.
//! Run Criterion benchmarks with `cargo bench` to inspect reports under `target/criterion`.

pub mod algo;
pub mod attributes;
pub mod block_store;
pub mod cache;
pub mod config;
pub mod effects;
pub mod encoding;
pub mod errors;
pub mod graph;
pub mod graph_context;
pub mod interfaces;
pub mod matrix;
pub mod query_ctx;
pub mod query_log;
pub mod schema;
pub mod undo_log;

pub use crate::block_store::{Allocation, BlockStore, SlotOrigin};
pub use crate::config::GraphConfig;
pub use crate::effects::{Effect, EffectsBuffer};
pub use crate::errors::{GraphError, GraphResult};
pub use crate::graph::{Direction, Graph, GraphExport, SharedGraph};
pub use crate::graph_context::{GraphContext, GraphRegistry};
pub use crate::matrix::{DeltaMatrix, SparseMatrix, SyncPolicy};
pub use crate::query_ctx::{CommandCtx, ExecutionStage, QueryCtx, QueryStatus};
pub use crate::schema::{Schema, SchemaKind};
