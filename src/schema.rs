//! Per-label and per-relation-type schemas with index declarations.
//!
//! A schema knows which attributes its entities carry and which of them are
//! indexed. Index fields are first declared on the pending index; activation
//! promotes the pending index to active. Index contents live elsewhere.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::graph::AttributeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Node,
    Edge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexFieldType {
    Range,
    Fulltext,
    Vector,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub attribute: AttributeId,
    pub name: String,
    pub field_type: IndexFieldType,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    fields: Vec<IndexField>,
}

impl IndexDefinition {
    pub fn fields(&self) -> &[IndexField] {
        &self.fields
    }

    pub fn contains_field(&self, attribute: AttributeId, field_type: Option<IndexFieldType>) -> bool {
        self.fields.iter().any(|f| {
            f.attribute == attribute && field_type.is_none_or(|t| t == f.field_type)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    id: u32,
    name: String,
    kind: SchemaKind,
    attributes: BTreeSet<AttributeId>,
    active_index: Option<IndexDefinition>,
    pending_index: Option<IndexDefinition>,
}

impl Schema {
    pub fn new(kind: SchemaKind, id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            attributes: BTreeSet::new(),
            active_index: None,
            pending_index: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    pub fn attributes(&self) -> &BTreeSet<AttributeId> {
        &self.attributes
    }

    /// Record that entities of this schema carry `attribute`. Returns `true`
    /// when the attribute was new to the schema.
    pub fn add_attribute(&mut self, attribute: AttributeId) -> bool {
        self.attributes.insert(attribute)
    }

    pub fn remove_attribute(&mut self, attribute: AttributeId) -> bool {
        self.attributes.remove(&attribute)
    }

    pub fn has_indices(&self) -> bool {
        self.active_index.is_some() || self.pending_index.is_some()
    }

    pub fn active_index(&self) -> Option<&IndexDefinition> {
        self.active_index.as_ref()
    }

    pub fn pending_index(&self) -> Option<&IndexDefinition> {
        self.pending_index.as_ref()
    }

    /// The index covering every attribute in `attrs`, preferring the active one.
    pub fn get_index(
        &self,
        attrs: &[AttributeId],
        field_type: Option<IndexFieldType>,
        include_pending: bool,
    ) -> Option<&IndexDefinition> {
        let covers =
            |idx: &IndexDefinition| attrs.iter().all(|&a| idx.contains_field(a, field_type));
        match (&self.active_index, &self.pending_index) {
            (Some(active), _) => covers(active).then_some(active),
            (None, Some(pending)) if include_pending => covers(pending).then_some(pending),
            _ => None,
        }
    }

    /// Declare an index field on the pending index, seeding it from the
    /// active index. Returns `false` when the field was already declared.
    pub fn add_index_field(&mut self, field: IndexField) -> bool {
        let pending = self
            .pending_index
            .get_or_insert_with(|| self.active_index.clone().unwrap_or_default());
        if pending.contains_field(field.attribute, Some(field.field_type)) {
            return false;
        }
        self.attributes.insert(field.attribute);
        pending.fields.push(field);
        true
    }

    /// Remove a field from both indices. Empty indices are dropped. Returns
    /// `false` when no such field existed.
    pub fn remove_index_field(&mut self, attribute: AttributeId, field_type: IndexFieldType) -> bool {
        let mut removed = false;
        for slot in [&mut self.active_index, &mut self.pending_index] {
            if let Some(index) = slot {
                let before = index.fields.len();
                index
                    .fields
                    .retain(|f| !(f.attribute == attribute && f.field_type == field_type));
                removed |= index.fields.len() != before;
                if index.is_empty() {
                    *slot = None;
                }
            }
        }
        removed
    }

    /// Promote the pending index to active.
    pub fn activate_index(&mut self) -> bool {
        match self.pending_index.take() {
            Some(pending) => {
                self.active_index = Some(pending);
                true
            }
            None => false,
        }
    }
}
