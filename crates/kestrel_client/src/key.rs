//! Routing key composition and null/empty normalization.
//!
//! A routing key is the textual value hashed by the partition resolver
//! and matched by the server's index. Multi-column index keys join their
//! column values with `|` in index declaration order. Null and empty
//! values are rejected by default; with `handle_null` enabled they are
//! rewritten to distinct sentinel tokens, so a null key and an empty key
//! stay distinguishable. The setting must match on the write and read
//! paths or rows written under a sentinel become unreachable.

use kestrel_common::{Datum, KestrelError, KestrelResult};

use crate::metadata::TableHandler;

/// Sentinel stored in place of a null key component.
pub const NULL_KEY_TOKEN: &str = "!N@U#L$L%";
/// Sentinel stored in place of an empty key component.
pub const EMPTY_KEY_TOKEN: &str = "!@#$%";
/// Separator between the components of a multi-column key.
pub const KEY_SEPARATOR: &str = "|";

/// The shapes a caller can hand a key in.
#[derive(Debug, Clone)]
pub enum KeyInput {
    /// Already-composed routing key.
    Raw(String),
    /// Column name to value pairs; order is irrelevant, the index's
    /// declaration order wins.
    Map(Vec<(String, Datum)>),
    /// Values in index declaration order.
    Array(Vec<Datum>),
}

impl From<&str> for KeyInput {
    fn from(key: &str) -> Self {
        KeyInput::Raw(key.to_string())
    }
}

impl From<String> for KeyInput {
    fn from(key: String) -> Self {
        KeyInput::Raw(key)
    }
}

impl From<Vec<(String, Datum)>> for KeyInput {
    fn from(pairs: Vec<(String, Datum)>) -> Self {
        KeyInput::Map(pairs)
    }
}

impl From<Vec<Datum>> for KeyInput {
    fn from(values: Vec<Datum>) -> Self {
        KeyInput::Array(values)
    }
}

/// Textual form of one key component.
pub fn component_text(value: &Datum, handle_null: bool) -> KestrelResult<String> {
    if value.is_null() {
        return if handle_null {
            Ok(NULL_KEY_TOKEN.to_string())
        } else {
            Err(KestrelError::EmptyKey)
        };
    }
    let text = value.to_string();
    normalize_raw(&text, handle_null)
}

/// Normalize an already-composed key: empty input maps to the empty
/// sentinel under `handle_null`, otherwise it is rejected.
pub fn normalize_raw(key: &str, handle_null: bool) -> KestrelResult<String> {
    if key.is_empty() {
        return if handle_null {
            Ok(EMPTY_KEY_TOKEN.to_string())
        } else {
            Err(KestrelError::EmptyKey)
        };
    }
    Ok(key.to_string())
}

/// Compose the routing key for `input` against the table's index
/// `idx_name` (or its first index when `None`).
///
/// Map and array inputs are resolved through the index's column list;
/// a missing map entry counts as null. No network is touched here, so
/// arity and null violations fail before any RPC.
pub fn compose_key(
    input: &KeyInput,
    idx_name: Option<&str>,
    handler: &TableHandler,
    handle_null: bool,
) -> KestrelResult<String> {
    match input {
        KeyInput::Raw(key) => normalize_raw(key, handle_null),
        KeyInput::Map(pairs) => {
            let columns = handler.key_columns(idx_name)?;
            let mut parts = Vec::with_capacity(columns.len());
            for col in &columns {
                let value = pairs
                    .iter()
                    .find(|(name, _)| name == col)
                    .map(|(_, v)| v)
                    .unwrap_or(&Datum::Null);
                parts.push(component_text(value, handle_null)?);
            }
            Ok(parts.join(KEY_SEPARATOR))
        }
        KeyInput::Array(values) => {
            let columns = handler.key_columns(idx_name)?;
            if values.len() != columns.len() {
                return Err(KestrelError::KeyArityMismatch {
                    expected: columns.len(),
                    actual: values.len(),
                });
            }
            let mut parts = Vec::with_capacity(values.len());
            for value in values {
                parts.push(component_text(value, handle_null)?);
            }
            Ok(parts.join(KEY_SEPARATOR))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use kestrel_codec::ColumnDesc;
    use kestrel_common::{DataType, Endpoint, TableId};

    use crate::metadata::IndexDef;

    fn handler() -> TableHandler {
        let schema = vec![
            ColumnDesc::new("card", DataType::Text).index(),
            ColumnDesc::new("mcc", DataType::Text).index(),
            ColumnDesc::new("amount", DataType::Float64),
        ];
        TableHandler::new(TableId(1), "trades", schema)
            .with_index(IndexDef::new("card_mcc", vec!["card", "mcc"]))
            .with_uniform_partitions(2, Endpoint::new("t1:9527"), vec![])
    }

    #[test]
    fn test_raw_key_passthrough() {
        let key = compose_key(&"card-9".into(), None, &handler(), false).unwrap();
        assert_eq!(key, "card-9");
    }

    #[test]
    fn test_empty_raw_key_rejected_without_handle_null() {
        let err = compose_key(&"".into(), None, &handler(), false).unwrap_err();
        assert!(matches!(err, KestrelError::EmptyKey));
    }

    #[test]
    fn test_empty_raw_key_becomes_sentinel_with_handle_null() {
        let key = compose_key(&"".into(), None, &handler(), true).unwrap();
        assert_eq!(key, EMPTY_KEY_TOKEN);
    }

    #[test]
    fn test_map_key_follows_index_column_order() {
        // reversed insertion order must not matter
        let input = KeyInput::Map(vec![
            ("mcc".to_string(), Datum::Text("5812".into())),
            ("card".to_string(), Datum::Text("c42".into())),
        ]);
        let key = compose_key(&input, Some("card_mcc"), &handler(), false).unwrap();
        assert_eq!(key, "c42|5812");
    }

    #[test]
    fn test_map_missing_column_is_null() {
        let input = KeyInput::Map(vec![("card".to_string(), Datum::Text("c42".into()))]);
        let err = compose_key(&input, Some("card_mcc"), &handler(), false).unwrap_err();
        assert!(matches!(err, KestrelError::EmptyKey));

        let key = compose_key(&input, Some("card_mcc"), &handler(), true).unwrap();
        assert_eq!(key, format!("c42{KEY_SEPARATOR}{NULL_KEY_TOKEN}"));
    }

    #[test]
    fn test_null_and_empty_sentinels_differ() {
        let null_key = component_text(&Datum::Null, true).unwrap();
        let empty_key = component_text(&Datum::Text(String::new()), true).unwrap();
        assert_ne!(null_key, empty_key);
        assert_eq!(null_key, NULL_KEY_TOKEN);
        assert_eq!(empty_key, EMPTY_KEY_TOKEN);
    }

    #[test]
    fn test_array_key_arity_checked() {
        let input = KeyInput::Array(vec![Datum::Text("c1".into())]);
        let err = compose_key(&input, Some("card_mcc"), &handler(), false).unwrap_err();
        assert!(matches!(
            err,
            KestrelError::KeyArityMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_array_key_joined_in_order() {
        let input = KeyInput::Array(vec![Datum::Text("c1".into()), Datum::Text("5411".into())]);
        let key = compose_key(&input, Some("card_mcc"), &handler(), false).unwrap();
        assert_eq!(key, "c1|5411");
    }

    #[test]
    fn test_unknown_index_is_reported() {
        let input = KeyInput::Array(vec![Datum::Text("c1".into())]);
        let err = compose_key(&input, Some("ghost"), &handler(), false).unwrap_err();
        assert!(matches!(err, KestrelError::IndexNotFound(_)));
    }

    #[test]
    fn test_numeric_components_use_display_form() {
        let input = KeyInput::Map(vec![
            ("card".to_string(), Datum::Text("c1".into())),
            ("mcc".to_string(), Datum::Int32(5812)),
        ]);
        let key = compose_key(&input, Some("card_mcc"), &handler(), false).unwrap();
        assert_eq!(key, "c1|5812");
    }
}
