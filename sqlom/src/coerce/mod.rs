//! Bidirectional conversion between storage scalars and typed member
//! values, driven by the member's metadata entry.

pub mod legacy;

use serde_json::{Map, Number, Value};

use crate::errors::OrmError;
use crate::runtime::{SqlValue, WriteValue};
use crate::types::{ArrayEncoding, ColumnType, FieldKind, PropertyMetadata};

/// Decodes a raw storage value into its typed in-memory form.
///
/// Order: nulls pass through; hydration filters run first, each receiving
/// the previous result; the format codec runs next; static coercion by
/// declared kind runs last. Codec failures propagate unchanged. For
/// well-formed input this never fails.
pub fn decode(meta: &PropertyMetadata, raw: Value) -> Result<Value, OrmError> {
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let mut value = raw;
    for filter in &meta.filters {
        value = filter(value);
    }
    if let Some(codec) = &meta.codec {
        value = (codec.decode)(value)?;
    }

    Ok(match meta.kind {
        FieldKind::Int => Value::Number(to_i64(&value).into()),
        FieldKind::Float => Number::from_f64(to_f64(&value))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        FieldKind::Bool => Value::Bool(truthy(&value)),
        FieldKind::String => match value {
            Value::String(text) => Value::String(text),
            other => Value::String(scalar_text(&other)),
        },
        FieldKind::Array => decode_array(meta, value),
        FieldKind::Object => decode_object(value),
        FieldKind::Mixed => value,
    })
}

/// Convenience wrapper for decoding directly from a storage scalar.
pub fn decode_sql(meta: &PropertyMetadata, raw: SqlValue) -> Result<Value, OrmError> {
    decode(meta, raw.into_json())
}

/// Encodes a typed member value into its storage form.
///
/// Order: nulls and the `["exp", sql]` raw tuple pass through; booleans and
/// members whose column type is int or bool become `0`/`1` integers;
/// float columns become floats; remaining values use the format codec when
/// present, else arrays and objects JSON-encode and everything else
/// stringifies. The column type is inferred from the declared kind unless
/// overridden with `#[sqlom(column_type = "...")]`.
pub fn encode(meta: &PropertyMetadata, value: &Value) -> Result<WriteValue, OrmError> {
    if value.is_null() {
        return Ok(WriteValue::Value(SqlValue::Null));
    }
    if let Some(sql) = as_expr_tuple(value) {
        return Ok(WriteValue::Expr(sql.to_string()));
    }

    if value.is_boolean() || matches!(meta.column_type, ColumnType::Int | ColumnType::Bool) {
        return Ok(WriteValue::Value(SqlValue::Int(to_i64(value))));
    }
    if meta.column_type == ColumnType::Float {
        return Ok(WriteValue::Value(SqlValue::Float(to_f64(value))));
    }

    if let Some(codec) = &meta.codec {
        return Ok(WriteValue::Value((codec.encode)(value)?));
    }

    Ok(WriteValue::Value(match value {
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
        Value::String(text) => SqlValue::Text(text.clone()),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                SqlValue::Int(int)
            } else {
                SqlValue::Float(number.as_f64().unwrap_or(0.0))
            }
        }
        Value::Bool(_) | Value::Null => unreachable!("handled above"),
    }))
}

/// The two-element `["exp", <sql>]` tuple escape hatch.
pub fn as_expr_tuple(value: &Value) -> Option<&str> {
    let items = value.as_array()?;
    if items.len() == 2 && items[0].as_str() == Some("exp") {
        items[1].as_str()
    } else {
        None
    }
}

fn decode_array(meta: &PropertyMetadata, value: Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => value,
        Value::String(ref text) => {
            let parsed = match meta.array_encoding {
                ArrayEncoding::Json => serde_json::from_str::<Value>(text)
                    .ok()
                    .filter(|parsed| parsed.is_array() || parsed.is_object()),
                ArrayEncoding::Legacy => legacy::decode(text).ok(),
                // Custom encodings decode through the codec; by the time we
                // are here the codec has either produced a structure or the
                // value stays a stray scalar.
                ArrayEncoding::Custom => None,
            };
            parsed.unwrap_or_else(|| Value::Array(vec![value]))
        }
        scalar => Value::Array(vec![scalar]),
    }
}

fn decode_object(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        Value::String(ref text) => serde_json::from_str::<Map<String, Value>>(text)
            .map(Value::Object)
            .unwrap_or(value),
        other => other,
    }
}

fn to_i64(value: &Value) -> i64 {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .unwrap_or(0),
        Value::Bool(flag) => i64::from(*flag),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|float| float as i64))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

fn to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(number) => number.as_f64().unwrap_or(0.0),
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        Value::String(text) => text.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|float| float != 0.0).unwrap_or(false),
        Value::String(text) => {
            let trimmed = text.trim();
            !(trimmed.is_empty() || trimmed == "0" || trimmed.eq_ignore_ascii_case("false"))
        }
        Value::Null => false,
        _ => true,
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Bool(flag) => if *flag { "1" } else { "0" }.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldCodec;
    use serde_json::json;

    fn meta(kind: FieldKind) -> PropertyMetadata {
        PropertyMetadata::new("member", "member", kind)
    }

    #[test]
    fn null_passes_through_both_ways() {
        let meta = meta(FieldKind::Int);
        assert_eq!(decode(&meta, Value::Null).unwrap(), Value::Null);
        assert_eq!(
            encode(&meta, &Value::Null).unwrap(),
            WriteValue::Value(SqlValue::Null)
        );
    }

    #[test]
    fn int_members_coerce_strings_and_round_trip() {
        let meta = meta(FieldKind::Int);
        assert_eq!(decode(&meta, json!("5")).unwrap(), json!(5));
        assert_eq!(decode(&meta, json!(5.9)).unwrap(), json!(5));
        assert_eq!(
            encode(&meta, &json!(5)).unwrap(),
            WriteValue::Value(SqlValue::Int(5))
        );
    }

    #[test]
    fn bool_members_decode_storage_ints_and_encode_as_ints() {
        let meta = meta(FieldKind::Bool);
        assert_eq!(decode(&meta, json!(1)).unwrap(), json!(true));
        assert_eq!(decode(&meta, json!("0")).unwrap(), json!(false));
        assert_eq!(
            encode(&meta, &json!(true)).unwrap(),
            WriteValue::Value(SqlValue::Int(1))
        );
    }

    #[test]
    fn float_members_round_trip() {
        let meta = meta(FieldKind::Float);
        assert_eq!(decode(&meta, json!("2.5")).unwrap(), json!(2.5));
        assert_eq!(
            encode(&meta, &json!(2.5)).unwrap(),
            WriteValue::Value(SqlValue::Float(2.5))
        );
    }

    #[test]
    fn json_arrays_round_trip_without_loss() {
        let meta = meta(FieldKind::Array);
        let decoded = decode(&meta, json!("[1,\"two\",[3]]")).unwrap();
        assert_eq!(decoded, json!([1, "two", [3]]));
        let encoded = encode(&meta, &decoded).unwrap();
        assert_eq!(
            encoded,
            WriteValue::Value(SqlValue::Text("[1,\"two\",[3]]".to_string()))
        );
    }

    #[test]
    fn legacy_arrays_decode_without_the_json_path() {
        let mut meta = meta(FieldKind::Array);
        meta.array_encoding = ArrayEncoding::Legacy;
        let decoded = decode(&meta, json!("a:2:{i:0;i:1;i:1;i:2;}")).unwrap();
        assert_eq!(decoded, json!([1, 2]));
    }

    #[test]
    fn stray_scalars_wrap_into_single_element_arrays() {
        let meta = meta(FieldKind::Array);
        assert_eq!(decode(&meta, json!("plain")).unwrap(), json!(["plain"]));
        assert_eq!(decode(&meta, json!(7)).unwrap(), json!([7]));
        // A string that merely starts like JSON but fails to parse wraps too.
        assert_eq!(decode(&meta, json!("[broken")).unwrap(), json!(["[broken"]));
    }

    #[test]
    fn filters_run_before_static_coercion() {
        let mut meta = meta(FieldKind::String);
        meta.filters.push(crate::filters::trim);
        assert_eq!(decode(&meta, json!("  Ann  ")).unwrap(), json!("Ann"));
    }

    #[test]
    fn column_type_override_wins_over_the_declared_kind() {
        let mut int_column = meta(FieldKind::String);
        int_column.column_type = ColumnType::Int;
        assert_eq!(
            encode(&int_column, &json!("42")).unwrap(),
            WriteValue::Value(SqlValue::Int(42))
        );

        let mut text_column = meta(FieldKind::Int);
        text_column.column_type = ColumnType::Text;
        assert_eq!(
            encode(&text_column, &json!("007")).unwrap(),
            WriteValue::Value(SqlValue::Text("007".to_string()))
        );
    }

    #[test]
    fn expr_tuple_becomes_raw_write() {
        let meta = meta(FieldKind::Int);
        let encoded = encode(&meta, &json!(["exp", "score + 1"])).unwrap();
        assert_eq!(encoded, WriteValue::Expr("score + 1".to_string()));
    }

    struct UpperCodec;

    impl crate::types::FieldFormat for UpperCodec {
        fn decode(raw: Value) -> Result<Value, OrmError> {
            match raw {
                Value::String(text) => Ok(Value::String(text.to_uppercase())),
                other => Ok(other),
            }
        }

        fn encode(value: &Value) -> Result<SqlValue, OrmError> {
            match value {
                Value::String(text) => Ok(SqlValue::Text(text.to_lowercase())),
                other => Err(OrmError::Codec {
                    field: "member".to_string(),
                    message: format!("expected string, got {other}"),
                }),
            }
        }
    }

    #[test]
    fn codec_runs_between_filters_and_static_coercion() {
        let mut meta = meta(FieldKind::String);
        meta.codec = Some(FieldCodec::of::<UpperCodec>());
        assert_eq!(decode(&meta, json!("ann")).unwrap(), json!("ANN"));
        assert_eq!(
            encode(&meta, &json!("ANN")).unwrap(),
            WriteValue::Value(SqlValue::Text("ann".to_string()))
        );
    }

    #[test]
    fn codec_failures_propagate_unchanged() {
        let mut meta = meta(FieldKind::Mixed);
        meta.codec = Some(FieldCodec::of::<UpperCodec>());
        let err = encode(&meta, &json!(7)).unwrap_err();
        assert!(matches!(err, OrmError::Codec { .. }));
    }
}
