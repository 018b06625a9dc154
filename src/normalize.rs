//! C1: Value Normalizer & Filter Sanitizer (spec §4.1).
//!
//! Two pure functions operating on BSON/JSON values. `normalize` converts
//! datastore-native values (ObjectIds, BSON datetimes) into portable JSON
//! scalars; `sanitize_filters` strips operator/path-traversal keys out of
//! an untrusted filter mapping before it reaches the datastore driver.

use mongodb::bson::Bson;
use serde_json::{Map, Value};

/// Recursively converts a BSON value into its normalized JSON form:
/// - ObjectId -> canonical 24-hex string
/// - DateTime -> ISO-8601 UTC with millisecond precision
/// - Array -> normalized element-wise
/// - Document -> normalized value-wise, keys preserved
/// - everything else passes through unchanged
pub fn normalize_bson(value: &Bson) -> Value {
    match value {
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => Value::String(
            dt.to_chrono()
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        ),
        Bson::Array(items) => Value::Array(items.iter().map(normalize_bson).collect()),
        Bson::Document(doc) => {
            let mut map = Map::new();
            for (k, v) in doc.iter() {
                map.insert(k.clone(), normalize_bson(v));
            }
            Value::Object(map)
        }
        Bson::Double(d) => serde_json::Number::from_f64(*d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => Value::Number((*i).into()),
        Bson::Int64(i) => Value::Number((*i).into()),
        Bson::Null => Value::Null,
        Bson::Decimal128(d) => Value::String(d.to_string()),
        other => {
            // Anything else (Binary, RegEx, JavaScriptCode, MinKey/MaxKey,
            // Timestamp, ...) has no portable scalar rendering; fall back
            // to its debug form rather than panicking on exotic BSON.
            Value::String(format!("{other:?}"))
        }
    }
}

/// `normalize(v)` over an already-JSON value. Idempotent: normalizing a
/// value that has already passed through normalization is a no-op, since
/// every branch here either recurses into already-normalized children or
/// returns a pass-through scalar.
pub fn normalize_json(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(normalize_json).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map.iter() {
                out.insert(k.clone(), normalize_json(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// `sanitizeFilters(m)` (spec §4.1). Given an input assumed to be a
/// string-keyed mapping (otherwise returns an empty mapping), keeps only
/// keys that do not begin with `$` and contain no `.`; nested mappings are
/// sanitized recursively. Arrays and scalars pass through unchanged, not
/// "sanitized into mappings".
pub fn sanitize_filters(value: &Value) -> Map<String, Value> {
    let Value::Object(map) = value else {
        return Map::new();
    };
    sanitize_map(map)
}

fn sanitize_map(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, val) in map.iter() {
        if key.starts_with('$') || key.contains('.') {
            continue;
        }
        let sanitized = match val {
            Value::Object(nested) => Value::Object(sanitize_map(nested)),
            other => other.clone(),
        };
        out.insert(key.clone(), sanitized);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime};
    use serde_json::json;

    #[test]
    fn normalizes_object_id_to_canonical_hex() {
        let oid = ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap();
        assert_eq!(
            normalize_bson(&Bson::ObjectId(oid)),
            Value::String("507f1f77bcf86cd799439011".to_string())
        );
    }

    #[test]
    fn normalizes_datetime_to_iso8601_millis() {
        let dt = BsonDateTime::from_millis(1_700_000_000_000);
        let normalized = normalize_bson(&Bson::DateTime(dt));
        let s = normalized.as_str().unwrap();
        assert!(s.ends_with('Z'));
        assert!(s.contains('.'));
    }

    #[test]
    fn normalizes_nested_documents_and_arrays() {
        let oid = ObjectId::new();
        let doc = doc! {
            "a": [Bson::ObjectId(oid), Bson::Int32(1)],
            "b": { "c": "x" },
        };
        let out = normalize_bson(&Bson::Document(doc));
        assert_eq!(out["a"][0], Value::String(oid.to_hex()));
        assert_eq!(out["b"]["c"], Value::String("x".to_string()));
    }

    #[test]
    fn normalize_is_idempotent() {
        let v = json!({"a": 1, "b": [1, "x", {"c": null}]});
        let once = normalize_json(&v);
        let twice = normalize_json(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_strips_dollar_and_dotted_keys_recursively() {
        let input = json!({
            "status": "paid",
            "$where": "evil",
            "a.b": "path-traversal",
            "nested": { "$gt": 5, "safe": "ok" },
        });
        let out = sanitize_filters(&input);
        assert_eq!(out.get("status").unwrap(), "paid");
        assert!(!out.contains_key("$where"));
        assert!(!out.contains_key("a.b"));
        let nested = out.get("nested").unwrap().as_object().unwrap();
        assert!(!nested.contains_key("$gt"));
        assert_eq!(nested.get("safe").unwrap(), "ok");
    }

    #[test]
    fn sanitize_non_mapping_input_returns_empty_mapping() {
        assert!(sanitize_filters(&json!([1, 2, 3])).is_empty());
        assert!(sanitize_filters(&json!("not a map")).is_empty());
    }

    #[test]
    fn sanitize_leaves_arrays_unsanitized() {
        let input = json!({"tags": ["$a", "b.c"]});
        let out = sanitize_filters(&input);
        assert_eq!(out.get("tags").unwrap(), &json!(["$a", "b.c"]));
    }
}
