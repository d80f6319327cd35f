//! Record codec: packs a tuple of typed fields into the byte string the
//! slotted page stores, and unpacks it again.
//!
//! The first field of every schema is the primary key and must encode to
//! exactly four bytes (see [`validate_key_field`]).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{HeapError, Result};

/// The four field kinds a schema entry can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Short,
    Byte,
    VarStr,
}

/// A schema is an ordered list of field types; it carries no values.
pub type Schema = Vec<FieldType>;

/// A single decoded field value, one variant per [`FieldType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Int(u32),
    Short(u16),
    Byte(u8),
    VarStr(String),
}

/// A decoded tuple, in schema order.
pub type Tuple = Vec<Field>;

/// Size in bytes of the primary-key prefix every record must carry.
pub const KEY_SIZE: usize = 4;

/// Fails fast if `schema`'s first field is not a 4-byte integer, per the
/// page layer's assumption that the first four bytes of a record are the key.
pub fn validate_key_field(schema: &Schema) -> Result<()> {
    match schema.first() {
        Some(FieldType::Int) => Ok(()),
        Some(other) => Err(HeapError::SchemaError(format!(
            "first schema field must be `int` to serve as the primary key, got {other:?}"
        ))),
        None => Err(HeapError::SchemaError("schema has no fields".into())),
    }
}

/// Encodes a primary-key value alone, for use in lookups.
pub fn encode_key(id: u32) -> Result<Vec<u8>> {
    encode_record(&[Field::Int(id)], &[FieldType::Int])
}

/// Encodes `tuple` against `schema` by concatenating each field's wire form.
pub fn encode_record(tuple: &[Field], schema: &Schema) -> Result<Vec<u8>> {
    if tuple.len() != schema.len() {
        return Err(HeapError::SchemaError(format!(
            "tuple has {} fields, schema expects {}",
            tuple.len(),
            schema.len()
        )));
    }
    let mut buf = Vec::new();
    for (value, ty) in tuple.iter().zip(schema.iter()) {
        encode_field(&mut buf, value, *ty)?;
    }
    Ok(buf)
}

fn encode_field(buf: &mut Vec<u8>, value: &Field, ty: FieldType) -> Result<()> {
    match (value, ty) {
        (Field::Int(v), FieldType::Int) => buf.write_u32::<LittleEndian>(*v)?,
        (Field::Short(v), FieldType::Short) => buf.write_u16::<LittleEndian>(*v)?,
        (Field::Byte(v), FieldType::Byte) => buf.write_u8(*v)?,
        (Field::VarStr(s), FieldType::VarStr) => {
            let bytes = s.as_bytes();
            if bytes.len() > u8::MAX as usize {
                return Err(HeapError::LengthOverflow { len: bytes.len() });
            }
            buf.write_u8(bytes.len() as u8)?;
            buf.extend_from_slice(bytes);
        }
        (value, ty) => {
            return Err(HeapError::SchemaError(format!(
                "field {value:?} does not match schema type {ty:?}"
            )))
        }
    }
    Ok(())
}

/// Decodes `data` against `schema`, consuming exactly the bytes the schema
/// describes. Trailing bytes (if any) are ignored by design: callers read a
/// fixed-length slice out of a page and the schema determines where the
/// record ends.
pub fn decode_record(data: &[u8], schema: &Schema) -> Result<Tuple> {
    let mut cursor = Cursor::new(data);
    let mut fields = Vec::with_capacity(schema.len());
    for ty in schema {
        fields.push(decode_field(&mut cursor, *ty)?);
    }
    Ok(fields)
}

fn decode_field(cursor: &mut Cursor<&[u8]>, ty: FieldType) -> Result<Field> {
    Ok(match ty {
        FieldType::Int => Field::Int(cursor.read_u32::<LittleEndian>()?),
        FieldType::Short => Field::Short(cursor.read_u16::<LittleEndian>()?),
        FieldType::Byte => Field::Byte(cursor.read_u8()?),
        FieldType::VarStr => {
            let len = cursor.read_u8()? as usize;
            let start = cursor.position() as usize;
            let end = start + len;
            let bytes = cursor.get_ref().get(start..end).ok_or_else(|| {
                HeapError::SchemaError("var_str length runs past end of record".into())
            })?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| HeapError::SchemaError(format!("var_str is not valid utf-8: {e}")))?
                .to_string();
            cursor.set_position(end as u64);
            Field::VarStr(s)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        vec![
            FieldType::Int,
            FieldType::VarStr,
            FieldType::Int,
            FieldType::Int,
            FieldType::Int,
            FieldType::Byte,
            FieldType::VarStr,
            FieldType::VarStr,
            FieldType::VarStr,
            FieldType::VarStr,
        ]
    }

    fn sample_tuple() -> Tuple {
        vec![
            Field::Int(1),
            Field::VarStr("Alice".into()),
            Field::Int(23),
            Field::Int(12345),
            Field::Int(987654),
            Field::Byte(4),
            Field::VarStr("a@x".into()),
            Field::VarStr("1".into()),
            Field::VarStr("ACME".into()),
            Field::VarStr("Elm".into()),
        ]
    }

    #[test]
    fn roundtrip() {
        let schema = sample_schema();
        let tuple = sample_tuple();
        let encoded = encode_record(&tuple, &schema).unwrap();
        let decoded = decode_record(&encoded, &schema).unwrap();
        assert_eq!(decoded, tuple);
    }

    #[test]
    fn key_prefix_is_first_four_bytes() {
        let schema = sample_schema();
        let tuple = sample_tuple();
        let encoded = encode_record(&tuple, &schema).unwrap();
        assert_eq!(&encoded[..KEY_SIZE], &1u32.to_le_bytes());
    }

    #[test]
    fn rejects_non_int_key_field() {
        let schema = vec![FieldType::VarStr, FieldType::Int];
        assert!(validate_key_field(&schema).is_err());
    }

    #[test]
    fn rejects_overlong_var_str() {
        let schema = vec![FieldType::VarStr];
        let tuple = vec![Field::VarStr("x".repeat(300))];
        assert!(matches!(
            encode_record(&tuple, &schema),
            Err(HeapError::LengthOverflow { .. })
        ));
    }
}
