//! Multi-reader / single-writer access to a [`Graph`].
//!
//! Guards are `Arc`-backed so a query context can hold the lock across
//! execution stages without borrowing from its graph context.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

use crate::errors::{GraphError, GraphResult};

use super::Graph;

#[derive(Clone)]
pub struct SharedGraph {
    inner: Arc<RwLock<Graph>>,
    writelocked: Arc<AtomicBool>,
}

pub struct GraphReadGuard {
    guard: ArcRwLockReadGuard<RawRwLock, Graph>,
}

pub struct GraphWriteGuard {
    guard: ArcRwLockWriteGuard<RawRwLock, Graph>,
    writelocked: Arc<AtomicBool>,
}

impl SharedGraph {
    pub fn new(graph: Graph) -> Self {
        Self {
            inner: Arc::new(RwLock::new(graph)),
            writelocked: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn acquire_read(&self) -> GraphReadGuard {
        GraphReadGuard {
            guard: self.inner.read_arc(),
        }
    }

    /// Acquire read mode, giving up after `timeout` when one is set.
    pub fn try_acquire_read(&self, timeout: Option<Duration>) -> GraphResult<GraphReadGuard> {
        match timeout {
            None => Ok(self.acquire_read()),
            Some(limit) => self
                .inner
                .try_read_arc_for(limit)
                .map(|guard| GraphReadGuard { guard })
                .ok_or_else(|| {
                    tracing::warn!(?limit, "graph read lock timed out");
                    GraphError::LockTimeout(limit)
                }),
        }
    }

    pub fn acquire_write(&self) -> GraphWriteGuard {
        let guard = self.inner.write_arc();
        self.mark_writer(guard)
    }

    /// Acquire write mode, giving up after `timeout` when one is set.
    pub fn try_acquire_write(&self, timeout: Option<Duration>) -> GraphResult<GraphWriteGuard> {
        match timeout {
            None => Ok(self.acquire_write()),
            Some(limit) => match self.inner.try_write_arc_for(limit) {
                Some(guard) => Ok(self.mark_writer(guard)),
                None => {
                    tracing::warn!(?limit, "graph write lock timed out");
                    Err(GraphError::LockTimeout(limit))
                }
            },
        }
    }

    /// Whether the current holder acquired write mode.
    pub fn is_writelocked(&self) -> bool {
        self.writelocked.load(Ordering::Acquire)
    }

    fn mark_writer(&self, guard: ArcRwLockWriteGuard<RawRwLock, Graph>) -> GraphWriteGuard {
        debug_assert!(!self.writelocked.load(Ordering::Relaxed));
        self.writelocked.store(true, Ordering::Release);
        GraphWriteGuard {
            guard,
            writelocked: Arc::clone(&self.writelocked),
        }
    }
}

impl GraphReadGuard {
    pub fn release(self) {}
}

impl GraphWriteGuard {
    pub fn release(self) {}
}

impl Deref for GraphReadGuard {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &self.guard
    }
}

impl Deref for GraphWriteGuard {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &self.guard
    }
}

impl DerefMut for GraphWriteGuard {
    fn deref_mut(&mut self) -> &mut Graph {
        &mut self.guard
    }
}

impl Drop for GraphWriteGuard {
    fn drop(&mut self) {
        self.writelocked.store(false, Ordering::Release);
    }
}
