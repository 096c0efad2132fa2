//! Runtime configuration for graph instances.
//!
//! Every [`GraphContext`](crate::GraphContext) is created from a [`GraphConfig`].
//! The defaults mirror what a freshly started server would use; the values can
//! be overridden in code through the `with_*` builders or from the process
//! environment through [`GraphConfig::from_env`].

use std::env;
use std::time::Duration;

use crate::errors::GraphError;

/// Default node block capacity, also the initial matrix dimension.
pub const DEFAULT_NODE_CAPACITY: u64 = 16384;
/// Default edge block capacity.
pub const DEFAULT_EDGE_CAPACITY: u64 = 16384;
/// Pending-buffer size above which a delta matrix merges on a non-forced flush.
pub const DEFAULT_DELTA_MAX_PENDING_CHANGES: u64 = 10000;
/// Default number of plans retained per graph.
pub const DEFAULT_PLAN_CACHE_SIZE: usize = 25;
/// Default number of entries retained by the slow log.
pub const DEFAULT_SLOWLOG_CAPACITY: usize = 10;
/// Default number of entries retained by the recent-queries log.
pub const DEFAULT_QUERY_LOG_CAPACITY: usize = 1000;

const ENV_PREFIX: &str = "DELTAGRAPH_";

/// Configuration for a single graph.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use deltagraph::GraphConfig;
///
/// let cfg = GraphConfig::default()
///     .with_node_capacity(1024)
///     .with_query_timeout(Duration::from_millis(500));
/// assert_eq!(cfg.node_capacity, 1024);
/// assert_eq!(cfg.delta_max_pending_changes, 10000);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphConfig {
    /// Initial node slot capacity; matrices are created with this dimension.
    ///
    /// **Default:** `16384`
    pub node_capacity: u64,

    /// Initial edge slot capacity; incidence matrices use it as row count.
    ///
    /// **Default:** `16384`
    pub edge_capacity: u64,

    /// Threshold for merging pending matrix changes during a non-forced flush.
    ///
    /// **Default:** `10000`
    pub delta_max_pending_changes: u64,

    /// Upper bound on query execution, checked between execution sub-steps.
    ///
    /// **Default:** `None` (no timeout)
    pub query_timeout: Option<Duration>,

    /// Upper bound on waiting for the graph lock.
    ///
    /// **Default:** `None` (block until granted)
    pub lock_timeout: Option<Duration>,

    /// Number of execution plans cached per graph.
    ///
    /// **Default:** `25`
    pub plan_cache_size: usize,

    /// Number of slowest queries kept by the slow log.
    ///
    /// **Default:** `10`
    pub slowlog_capacity: usize,

    /// Number of recent queries kept by the queries log.
    ///
    /// **Default:** `1000`
    pub query_log_capacity: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            node_capacity: DEFAULT_NODE_CAPACITY,
            edge_capacity: DEFAULT_EDGE_CAPACITY,
            delta_max_pending_changes: DEFAULT_DELTA_MAX_PENDING_CHANGES,
            query_timeout: None,
            lock_timeout: None,
            plan_cache_size: DEFAULT_PLAN_CACHE_SIZE,
            slowlog_capacity: DEFAULT_SLOWLOG_CAPACITY,
            query_log_capacity: DEFAULT_QUERY_LOG_CAPACITY,
        }
    }
}

impl GraphConfig {
    pub fn with_node_capacity(mut self, capacity: u64) -> Self {
        self.node_capacity = capacity;
        self
    }

    pub fn with_edge_capacity(mut self, capacity: u64) -> Self {
        self.edge_capacity = capacity;
        self
    }

    pub fn with_delta_max_pending_changes(mut self, threshold: u64) -> Self {
        self.delta_max_pending_changes = threshold;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn with_plan_cache_size(mut self, size: usize) -> Self {
        self.plan_cache_size = size;
        self
    }

    pub fn with_slowlog_capacity(mut self, capacity: usize) -> Self {
        self.slowlog_capacity = capacity;
        self
    }

    pub fn with_query_log_capacity(mut self, capacity: usize) -> Self {
        self.query_log_capacity = capacity;
        self
    }

    /// Build a configuration from `DELTAGRAPH_*` environment variables.
    ///
    /// Unset variables keep their defaults. Recognised variables:
    /// `NODE_CAPACITY`, `EDGE_CAPACITY`, `DELTA_MAX_PENDING_CHANGES`,
    /// `QUERY_TIMEOUT_MS`, `LOCK_TIMEOUT_MS`, `CACHE_SIZE`,
    /// `SLOWLOG_CAPACITY` and `QUERY_LOG_CAPACITY`.
    ///
    /// # Errors
    /// Returns [`GraphError::Config`] when a variable is set but cannot be parsed,
    /// or when the resulting configuration fails [`GraphConfig::validate`].
    pub fn from_env() -> Result<Self, GraphError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`GraphConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GraphError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        let cfg = Self {
            node_capacity: parse_or(read("NODE_CAPACITY"), "NODE_CAPACITY", defaults.node_capacity)?,
            edge_capacity: parse_or(read("EDGE_CAPACITY"), "EDGE_CAPACITY", defaults.edge_capacity)?,
            delta_max_pending_changes: parse_or(
                read("DELTA_MAX_PENDING_CHANGES"),
                "DELTA_MAX_PENDING_CHANGES",
                defaults.delta_max_pending_changes,
            )?,
            query_timeout: parse_millis(read("QUERY_TIMEOUT_MS"), "QUERY_TIMEOUT_MS")?,
            lock_timeout: parse_millis(read("LOCK_TIMEOUT_MS"), "LOCK_TIMEOUT_MS")?,
            plan_cache_size: parse_or(read("CACHE_SIZE"), "CACHE_SIZE", defaults.plan_cache_size)?,
            slowlog_capacity: parse_or(
                read("SLOWLOG_CAPACITY"),
                "SLOWLOG_CAPACITY",
                defaults.slowlog_capacity,
            )?,
            query_log_capacity: parse_or(
                read("QUERY_LOG_CAPACITY"),
                "QUERY_LOG_CAPACITY",
                defaults.query_log_capacity,
            )?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        if self.node_capacity == 0 {
            return Err(GraphError::config("node_capacity must be positive"));
        }
        if self.edge_capacity == 0 {
            return Err(GraphError::config("edge_capacity must be positive"));
        }
        if self.plan_cache_size == 0 {
            return Err(GraphError::config("plan_cache_size must be positive"));
        }
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(
    raw: Option<String>,
    name: &str,
    default: T,
) -> Result<T, GraphError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| GraphError::config(format!("{ENV_PREFIX}{name}: cannot parse {value:?}"))),
    }
}

fn parse_millis(raw: Option<String>, name: &str) -> Result<Option<Duration>, GraphError> {
    match raw {
        None => Ok(None),
        Some(_) => parse_or(raw, name, 0u64).map(|ms| Some(Duration::from_millis(ms))),
    }
}
