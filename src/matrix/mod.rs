//! Deferred-update sparse matrices backing the graph topology.

mod delta;
mod relation;
mod sparse;
mod sync;

pub use delta::{DeltaMatrix, DeltaRow};
pub use relation::{RelationExport, RelationMatrices};
pub use sparse::{Coord, RowEntries, SparseMatrix};
pub use sync::{SyncPolicy, SyncStrategy};
