//! Table schemas
//!
//! A schema fixes the ordered field layout of a table, resolves field names
//! to positional ids and carries the table's secondary index definitions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::FieldType;

/// Positional field id within a schema
pub type FieldId = u16;

/// Index id within a schema
pub type IndexId = u32;

/// Whether the store applies snapshot versioning to a table
///
/// B-tree pointer and node tables are non-transactional; their records are
/// versioned per record, not per snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableType {
    Transactional,
    NonTransactional,
}

/// Field definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Positional id (unique within a schema)
    pub id: FieldId,
    /// Field name
    pub name: String,
    /// Value type
    pub field_type: FieldType,
    /// Whether NULL is rejected at encode time
    pub not_null: bool,
}

/// Secondary index definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index id (unique within a schema)
    pub id: IndexId,
    /// Index name
    pub name: String,
    /// Fields forming the index key, in order
    pub fields: Vec<FieldId>,
}

/// Ordered field layout of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    table_type: TableType,
    fields: Vec<FieldDef>,
    indexes: Vec<IndexDef>,
    name_to_id: HashMap<String, FieldId>,
}

impl Schema {
    /// Create an empty schema
    pub fn new(table_type: TableType) -> Self {
        Self {
            table_type,
            fields: Vec::new(),
            indexes: Vec::new(),
            name_to_id: HashMap::new(),
        }
    }

    /// Append a field, returning its positional id
    pub fn add_field(
        &mut self,
        field_type: FieldType,
        name: impl Into<String>,
        not_null: bool,
    ) -> FieldId {
        let name = name.into();
        let id = self.fields.len() as FieldId;
        self.name_to_id.insert(name.clone(), id);
        self.fields.push(FieldDef {
            id,
            name,
            field_type,
            not_null,
        });
        id
    }

    /// Add a secondary index over the given fields
    pub fn add_index(&mut self, name: impl Into<String>, fields: Vec<FieldId>) -> IndexId {
        let id = self.indexes.len() as IndexId;
        self.indexes.push(IndexDef {
            id,
            name: name.into(),
            fields,
        });
        id
    }

    /// Table type
    pub fn table_type(&self) -> TableType {
        self.table_type
    }

    /// Resolve a field name to its id
    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.name_to_id.get(name).copied()
    }

    /// Field definition by id
    pub fn field(&self, id: FieldId) -> Option<&FieldDef> {
        self.fields.get(id as usize)
    }

    /// All field definitions in positional order
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Number of fields
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// All index definitions
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Index definition by name
    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|idx| idx.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_ids_are_positional() {
        let mut schema = Schema::new(TableType::Transactional);
        let a = schema.add_field(FieldType::Int, "a", true);
        let b = schema.add_field(FieldType::Text, "b", false);

        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(schema.field_id("b"), Some(1));
        assert_eq!(schema.field(0).unwrap().field_type, FieldType::Int);
        assert!(schema.field(2).is_none());
        assert_eq!(schema.field_id("c"), None);
    }

    #[test]
    fn test_index_lookup() {
        let mut schema = Schema::new(TableType::Transactional);
        let a = schema.add_field(FieldType::BigInt, "a", true);
        let b = schema.add_field(FieldType::Text, "b", true);
        let idx = schema.add_index("by_name", vec![b, a]);

        assert_eq!(idx, 0);
        assert_eq!(schema.index("by_name").unwrap().fields, vec![1, 0]);
        assert!(schema.index("missing").is_none());
    }
}
