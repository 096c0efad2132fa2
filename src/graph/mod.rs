mod adjacency;
mod core;
mod edge_ops;
mod entity_ops;
mod lock;
mod types;

pub use self::core::{Graph, GraphExport};
pub use adjacency::Neighbors;
pub use edge_ops::DeletedEdge;
pub use entity_ops::DeletedNode;
pub use lock::{GraphReadGuard, GraphWriteGuard, SharedGraph};
pub(crate) use types::attribute_pairs;
pub use types::{
    AttributeId, AttributeSet, Direction, Edge, EdgeId, EdgeRecord, GraphStatistics, LabelId,
    NodeId, NodeRecord, RelationId,
};
