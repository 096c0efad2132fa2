use ahash::AHashMap;

use crate::{
    errors::{GraphError, GraphResult},
    graph::AttributeId,
};

/// Bidirectional attribute name / ID mapping. IDs are dense and assigned in
/// creation order.
#[derive(Clone, Debug, Default)]
pub struct AttributeMap {
    by_name: AHashMap<String, AttributeId>,
    names: Vec<String>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self, name: &str) -> Option<AttributeId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: AttributeId) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names in ID order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Append `name`, which must not be mapped yet.
    pub fn insert(&mut self, name: &str) -> GraphResult<AttributeId> {
        if self.by_name.len() != self.names.len() {
            return Err(GraphError::schema_conflict(
                "attribute mapping directions disagree",
            ));
        }
        if self.by_name.contains_key(name) {
            return Err(GraphError::schema_conflict(format!(
                "attribute {name:?} already exists"
            )));
        }
        let id = self.names.len() as AttributeId;
        self.by_name.insert(name.to_string(), id);
        self.names.push(name.to_string());
        Ok(id)
    }

    /// Remove `id` when it is the most recently added attribute. Returns
    /// `false` and keeps the mapping otherwise, since later IDs are dense on
    /// top of it.
    pub fn remove_if_last(&mut self, id: AttributeId) -> bool {
        if id as usize + 1 != self.names.len() {
            return false;
        }
        if let Some(name) = self.names.pop() {
            self.by_name.remove(&name);
        }
        true
    }
}
