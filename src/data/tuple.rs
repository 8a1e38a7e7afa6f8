//! Schema-bound tuples
//!
//! A tuple is an ordered sequence of fields bound to a schema. Tuples read
//! from the store are decoded once and never mutated; tuples being assembled
//! for an insert or update are built field by field and handed to the cache
//! by value.
//!
//! Wire image: a null bitmap (one bit per field, zero-padded to eight bytes)
//! followed by each non-null field in schema order in the fixed field layout.

use std::sync::Arc;

use crate::{Result, TellError};

use super::schema::{FieldId, Schema};
use super::Field;

/// An ordered sequence of fields bound to a schema
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    schema: Arc<Schema>,
    fields: Vec<Field>,
}

impl Tuple {
    /// Create a tuple with every field NULL
    pub fn new(schema: Arc<Schema>) -> Self {
        let fields = vec![Field::Null; schema.field_count()];
        Self { schema, fields }
    }

    /// The bound schema
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Set a field by positional id
    pub fn set(&mut self, id: FieldId, value: Field) -> Result<()> {
        let def = self
            .schema
            .field(id)
            .ok_or_else(|| TellError::FieldNotFound(format!("#{}", id)))?;
        if !value.is_null() && value.field_type() != def.field_type {
            return Err(TellError::TypeMismatch {
                left: def.field_type,
                right: value.field_type(),
            });
        }
        self.fields[id as usize] = value;
        Ok(())
    }

    /// Set a field by name
    pub fn set_by_name(&mut self, name: &str, value: Field) -> Result<()> {
        let id = self
            .schema
            .field_id(name)
            .ok_or_else(|| TellError::FieldNotFound(name.to_string()))?;
        self.set(id, value)
    }

    /// Get a field by positional id
    pub fn get(&self, id: FieldId) -> Result<&Field> {
        self.fields
            .get(id as usize)
            .ok_or_else(|| TellError::FieldNotFound(format!("#{}", id)))
    }

    /// Get a field by name
    pub fn get_by_name(&self, name: &str) -> Result<&Field> {
        let id = self
            .schema
            .field_id(name)
            .ok_or_else(|| TellError::FieldNotFound(name.to_string()))?;
        self.get(id)
    }

    /// All fields in positional order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    // ========================================================================
    // Wire image
    // ========================================================================

    /// Encode into the wire image
    ///
    /// Not-null violations surface here, when the tuple leaves the builder.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let count = self.fields.len();
        let bitmap_len = padded_bitmap_len(count);
        let mut image = vec![0u8; bitmap_len];
        for (i, field) in self.fields.iter().enumerate() {
            let def = &self.schema.fields()[i];
            if field.is_null() {
                if def.not_null {
                    return Err(TellError::InvalidData(format!(
                        "field '{}' must not be null",
                        def.name
                    )));
                }
                image[i / 8] |= 1u8 << (i % 8);
            }
        }
        for field in self.fields.iter().filter(|f| !f.is_null()) {
            field.serialize(&mut image)?;
        }
        Ok(image)
    }

    /// Decode a wire image against a schema
    pub fn decode(schema: Arc<Schema>, data: &[u8]) -> Result<Tuple> {
        let count = schema.field_count();
        let bitmap_len = padded_bitmap_len(count);
        if data.len() < bitmap_len {
            return Err(TellError::InvalidData("truncated tuple image".into()));
        }
        let mut fields = Vec::with_capacity(count);
        let mut offset = bitmap_len;
        for i in 0..count {
            let is_null = data[i / 8] & (1u8 << (i % 8)) != 0;
            if is_null {
                fields.push(Field::Null);
                continue;
            }
            let ty = schema.fields()[i].field_type;
            let (field, consumed) = Field::deserialize(ty, &data[offset..])?;
            fields.push(field);
            offset += consumed;
        }
        Ok(Tuple { schema, fields })
    }
}

/// Null bitmap length, zero-padded to eight bytes
pub(crate) fn padded_bitmap_len(field_count: usize) -> usize {
    let raw = (field_count + 7) / 8;
    let rem = raw % 8;
    raw + if rem == 0 && raw > 0 { 0 } else { 8 - rem }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FieldType, TableType};

    fn test_schema() -> Arc<Schema> {
        let mut schema = Schema::new(TableType::Transactional);
        schema.add_field(FieldType::BigInt, "id", true);
        schema.add_field(FieldType::Text, "name", false);
        schema.add_field(FieldType::Double, "score", false);
        Arc::new(schema)
    }

    #[test]
    fn test_access_by_name_and_id() {
        let mut tuple = Tuple::new(test_schema());
        tuple.set_by_name("id", Field::BigInt(7)).unwrap();
        tuple.set(1, Field::Text("ada".into())).unwrap();

        assert_eq!(tuple.get(0).unwrap(), &Field::BigInt(7));
        assert_eq!(tuple.get_by_name("name").unwrap(), &Field::Text("ada".into()));
        assert_eq!(tuple.get_by_name("score").unwrap(), &Field::Null);
        assert!(matches!(
            tuple.get_by_name("missing").unwrap_err(),
            TellError::FieldNotFound(_)
        ));
    }

    #[test]
    fn test_set_rejects_wrong_type() {
        let mut tuple = Tuple::new(test_schema());
        assert!(matches!(
            tuple.set_by_name("id", Field::Int(7)).unwrap_err(),
            TellError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let schema = test_schema();
        let mut tuple = Tuple::new(schema.clone());
        tuple.set(0, Field::BigInt(42)).unwrap();
        tuple.set(1, Field::Text("grace".into())).unwrap();
        // score stays NULL

        let image = tuple.encode().unwrap();
        let back = Tuple::decode(schema, &image).unwrap();
        assert_eq!(back, tuple);
    }

    #[test]
    fn test_encode_rejects_not_null_violation() {
        let tuple = Tuple::new(test_schema());
        assert!(matches!(
            tuple.encode().unwrap_err(),
            TellError::InvalidData(_)
        ));
    }

    #[test]
    fn test_decode_truncated_image() {
        let schema = test_schema();
        assert!(matches!(
            Tuple::decode(schema, &[0u8; 3]).unwrap_err(),
            TellError::InvalidData(_)
        ));
    }
}
