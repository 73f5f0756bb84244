//! Row encode/decode against one column schema version.
//!
//! Wire format, all little-endian:
//!
//! ```text
//! [column_count: u16][column...]
//! column := [tag: u8][payload]
//! ```
//!
//! Tag 0 encodes null; any other tag is the column type's wire tag.
//! Fixed-width types encode their scalar directly; `Text`/`Bytes` encode
//! a `u32` length followed by the raw bytes. The count header makes a
//! buffer self-describing, so a reader can resolve the schema version
//! for an evolved table before walking the columns.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use kestrel_common::{DataType, Datum, KestrelError, KestrelResult};

/// Hard ceiling on one encoded row.
pub const MAX_ROW_BYTES: usize = 1024 * 1024;

const NULL_TAG: u8 = 0;

/// One column of a schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDesc {
    pub name: String,
    pub data_type: DataType,
    /// Whether null values are accepted for this column.
    #[serde(default)]
    pub nullable: bool,
    /// Whether the column participates in dimension fan-out (its value
    /// routes the row into an additional shard).
    #[serde(default)]
    pub is_index: bool,
    /// Whether the column is a designated timestamp column; its value
    /// supplies the write timestamp instead of an explicit one.
    #[serde(default)]
    pub is_ts_col: bool,
}

impl ColumnDesc {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
            is_index: false,
            is_ts_col: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.is_index = true;
        self
    }

    pub fn ts_col(mut self) -> Self {
        self.is_ts_col = true;
        self
    }
}

/// Encode one row against the schema version matching its column count.
/// The caller is responsible for resolving the right version first.
pub fn encode_row(values: &[Datum], schema: &[ColumnDesc]) -> KestrelResult<Vec<u8>> {
    if values.len() != schema.len() {
        return Err(KestrelError::InvalidRow(format!(
            "schema has {} columns, row has {}",
            schema.len(),
            values.len()
        )));
    }
    if values.len() > u16::MAX as usize {
        return Err(KestrelError::InvalidRow(format!(
            "too many columns: {}",
            values.len()
        )));
    }

    let mut buf = Vec::with_capacity(2 + values.len() * 9);
    buf.put_u16_le(values.len() as u16);
    for (value, col) in values.iter().zip(schema.iter()) {
        encode_column(&mut buf, value, col)?;
        if buf.len() > MAX_ROW_BYTES {
            return Err(KestrelError::InvalidRow(format!(
                "encoded row exceeds {} bytes",
                MAX_ROW_BYTES
            )));
        }
    }
    Ok(buf)
}

fn encode_column(buf: &mut Vec<u8>, value: &Datum, col: &ColumnDesc) -> KestrelResult<()> {
    if value.is_null() {
        if !col.nullable {
            return Err(KestrelError::TypeMismatch {
                column: col.name.clone(),
                expected: col.data_type,
                actual: "null".to_string(),
            });
        }
        buf.put_u8(NULL_TAG);
        return Ok(());
    }
    if !value.matches(col.data_type) {
        return Err(KestrelError::TypeMismatch {
            column: col.name.clone(),
            expected: col.data_type,
            actual: value
                .data_type()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "null".to_string()),
        });
    }

    buf.put_u8(col.data_type.wire_tag());
    match value {
        Datum::Bool(v) => buf.put_u8(*v as u8),
        Datum::Int32(v) => buf.put_i32_le(*v),
        Datum::Int64(v) => buf.put_i64_le(*v),
        Datum::UInt32(v) => buf.put_u32_le(*v),
        Datum::UInt64(v) => buf.put_u64_le(*v),
        Datum::Float64(v) => buf.put_f64_le(*v),
        Datum::Timestamp(v) => buf.put_i64_le(*v),
        Datum::Text(s) => {
            buf.put_u32_le(s.len() as u32);
            buf.put_slice(s.as_bytes());
        }
        Datum::Bytes(b) => {
            buf.put_u32_le(b.len() as u32);
            buf.put_slice(b);
        }
        Datum::Null => unreachable!("null handled above"),
    }
    Ok(())
}

/// Column count recorded in a row buffer, or `None` for an empty buffer.
/// Used by the schema-version resolution step before a full decode.
pub fn peek_column_count(buf: &[u8]) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    Some(u16::from_le_bytes([buf[0], buf[1]]) as usize)
}

/// Decode one row against the schema version matching its count header.
///
/// An empty buffer decodes to `Ok(None)`: "no row", not an error.
pub fn decode_row(buf: &[u8], schema: &[ColumnDesc]) -> KestrelResult<Option<Vec<Datum>>> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut offset = 0usize;
    let count = read_u16(buf, &mut offset)? as usize;
    if count != schema.len() {
        return Err(KestrelError::InvalidRow(format!(
            "row has {} columns but schema version has {}",
            count,
            schema.len()
        )));
    }

    let mut values = Vec::with_capacity(count);
    for col in schema {
        values.push(decode_column(buf, &mut offset, col)?);
    }
    Ok(Some(values))
}

fn decode_column(buf: &[u8], offset: &mut usize, col: &ColumnDesc) -> KestrelResult<Datum> {
    let tag = read_u8(buf, offset)?;
    if tag == NULL_TAG {
        if !col.nullable {
            return Err(KestrelError::TypeMismatch {
                column: col.name.clone(),
                expected: col.data_type,
                actual: "null".to_string(),
            });
        }
        return Ok(Datum::Null);
    }
    let ty = DataType::from_wire_tag(tag).ok_or_else(|| {
        KestrelError::InvalidRow(format!("unknown column tag {} for {}", tag, col.name))
    })?;
    if ty != col.data_type {
        return Err(KestrelError::TypeMismatch {
            column: col.name.clone(),
            expected: col.data_type,
            actual: ty.to_string(),
        });
    }

    let value = match ty {
        DataType::Bool => Datum::Bool(read_u8(buf, offset)? != 0),
        DataType::Int32 => Datum::Int32(read_u32(buf, offset)? as i32),
        DataType::Int64 => Datum::Int64(read_u64(buf, offset)? as i64),
        DataType::UInt32 => Datum::UInt32(read_u32(buf, offset)?),
        DataType::UInt64 => Datum::UInt64(read_u64(buf, offset)?),
        DataType::Float64 => Datum::Float64(f64::from_bits(read_u64(buf, offset)?)),
        DataType::Timestamp => Datum::Timestamp(read_u64(buf, offset)? as i64),
        DataType::Text => {
            let bytes = read_var_bytes(buf, offset)?;
            let text = String::from_utf8(bytes).map_err(|_| {
                KestrelError::InvalidRow(format!("column {} is not valid utf-8", col.name))
            })?;
            Datum::Text(text)
        }
        DataType::Bytes => Datum::Bytes(read_var_bytes(buf, offset)?),
    };
    Ok(value)
}

fn read_u8(buf: &[u8], offset: &mut usize) -> KestrelResult<u8> {
    if *offset + 1 > buf.len() {
        return Err(short_buffer());
    }
    let v = buf[*offset];
    *offset += 1;
    Ok(v)
}

fn read_u16(buf: &[u8], offset: &mut usize) -> KestrelResult<u16> {
    if *offset + 2 > buf.len() {
        return Err(short_buffer());
    }
    let v = u16::from_le_bytes([buf[*offset], buf[*offset + 1]]);
    *offset += 2;
    Ok(v)
}

fn read_u32(buf: &[u8], offset: &mut usize) -> KestrelResult<u32> {
    if *offset + 4 > buf.len() {
        return Err(short_buffer());
    }
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[*offset..*offset + 4]);
    *offset += 4;
    Ok(u32::from_le_bytes(raw))
}

fn read_u64(buf: &[u8], offset: &mut usize) -> KestrelResult<u64> {
    if *offset + 8 > buf.len() {
        return Err(short_buffer());
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[*offset..*offset + 8]);
    *offset += 8;
    Ok(u64::from_le_bytes(raw))
}

fn read_var_bytes(buf: &[u8], offset: &mut usize) -> KestrelResult<Vec<u8>> {
    let len = read_u32(buf, offset)? as usize;
    if *offset + len > buf.len() {
        return Err(short_buffer());
    }
    let out = buf[*offset..*offset + len].to_vec();
    *offset += len;
    Ok(out)
}

fn short_buffer() -> KestrelError {
    KestrelError::InvalidRow("row buffer truncated".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Vec<ColumnDesc> {
        vec![
            ColumnDesc::new("id", DataType::Int32).index(),
            ColumnDesc::new("name", DataType::Text),
            ColumnDesc::new("score", DataType::Float64).nullable(),
            ColumnDesc::new("active", DataType::Bool),
            ColumnDesc::new("seen", DataType::Timestamp),
            ColumnDesc::new("blob", DataType::Bytes).nullable(),
        ]
    }

    #[test]
    fn test_roundtrip_all_types() {
        let row = vec![
            Datum::Int32(42),
            Datum::Text("alice".into()),
            Datum::Float64(3.25),
            Datum::Bool(true),
            Datum::Timestamp(1_700_000_000_000),
            Datum::Bytes(vec![0xde, 0xad]),
        ];
        let buf = encode_row(&row, &schema()).unwrap();
        let decoded = decode_row(&buf, &schema()).unwrap().unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_null_roundtrip_for_nullable_column() {
        let row = vec![
            Datum::Int32(1),
            Datum::Text("x".into()),
            Datum::Null,
            Datum::Bool(false),
            Datum::Timestamp(0),
            Datum::Null,
        ];
        let buf = encode_row(&row, &schema()).unwrap();
        let decoded = decode_row(&buf, &schema()).unwrap().unwrap();
        assert_eq!(decoded[2], Datum::Null);
        assert_eq!(decoded[5], Datum::Null);
    }

    #[test]
    fn test_null_rejected_for_non_nullable_column() {
        let row = vec![
            Datum::Null,
            Datum::Text("x".into()),
            Datum::Null,
            Datum::Bool(false),
            Datum::Timestamp(0),
            Datum::Null,
        ];
        let err = encode_row(&row, &schema()).unwrap_err();
        assert!(matches!(err, KestrelError::TypeMismatch { .. }));
    }

    #[test]
    fn test_type_mismatch() {
        let row = vec![
            Datum::Text("not an int".into()),
            Datum::Text("x".into()),
            Datum::Null,
            Datum::Bool(false),
            Datum::Timestamp(0),
            Datum::Null,
        ];
        let err = encode_row(&row, &schema()).unwrap_err();
        match err {
            KestrelError::TypeMismatch { column, .. } => assert_eq!(column, "id"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_arity_mismatch_is_invalid_row() {
        let err = encode_row(&[Datum::Int32(1)], &schema()).unwrap_err();
        assert!(matches!(err, KestrelError::InvalidRow(_)));
    }

    #[test]
    fn test_empty_buffer_decodes_to_none() {
        assert!(decode_row(&[], &schema()).unwrap().is_none());
    }

    #[test]
    fn test_peek_column_count() {
        let row = vec![
            Datum::Int32(7),
            Datum::Text("y".into()),
            Datum::Null,
            Datum::Bool(true),
            Datum::Timestamp(5),
            Datum::Null,
        ];
        let buf = encode_row(&row, &schema()).unwrap();
        assert_eq!(peek_column_count(&buf), Some(6));
        assert_eq!(peek_column_count(&[]), None);
    }

    #[test]
    fn test_count_header_must_match_schema() {
        let small = vec![ColumnDesc::new("a", DataType::Int32)];
        let buf = encode_row(&[Datum::Int32(1)], &small).unwrap();
        let err = decode_row(&buf, &schema()).unwrap_err();
        assert!(matches!(err, KestrelError::InvalidRow(_)));
    }

    #[test]
    fn test_truncated_buffer_fails() {
        let buf = encode_row(
            &[
                Datum::Int32(42),
                Datum::Text("alice".into()),
                Datum::Null,
                Datum::Bool(true),
                Datum::Timestamp(1),
                Datum::Null,
            ],
            &schema(),
        )
        .unwrap();
        let err = decode_row(&buf[..buf.len() - 3], &schema()).unwrap_err();
        assert!(matches!(err, KestrelError::InvalidRow(_)));
    }
}
