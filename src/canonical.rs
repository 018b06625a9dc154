//! Canonical JSON encoding used for reduce group-key hashing and ordering
//! (spec §9 "Group key encoding"). Object keys are emitted in the input
//! map's own order, not resorted — the spec requires group keys "emitted
//! in groupBy order", and callers (`reduce/accumulator.rs`,
//! `reduce/engine.rs`) build the group-key map by inserting fields in
//! `groupBy` declaration order, relying on `serde_json::Map`'s
//! `preserve_order` feature to carry that order through.

use serde_json::Value;
use std::fmt::Write;

/// Encodes `value` as canonical JSON, recursing into arrays and objects
/// and preserving each object's existing key order. This is distinct from
/// `Row`'s insertion-order JSON (used for the first-row header derivation)
/// only in name — canonical JSON exists purely for deterministic group-key
/// comparison and serialization, not for normalizing unrelated inputs to a
/// shared order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => {
            let _ = write!(out, "{}", serde_json::to_string(s).unwrap());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, value)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", serde_json::to_string(key).unwrap());
                write_canonical(value, out);
            }
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emits_object_keys_in_the_map_s_own_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), r#"{"b":1,"a":2}"#);
        assert_eq!(canonical_json(&b), r#"{"a":2,"b":1}"#);
        assert_ne!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn preserves_array_order() {
        let a = json!([3, 1, 2]);
        assert_eq!(canonical_json(&a), "[3,1,2]");
    }

    #[test]
    fn nested_objects_preserve_their_own_key_order() {
        let v = json!({"z": {"y": 1, "x": 2}, "a": 1});
        assert_eq!(canonical_json(&v), r#"{"z":{"y":1,"x":2},"a":1}"#);
    }

    #[test]
    fn group_key_style_maps_are_ordered_by_construction_not_sorted() {
        // Mirrors how `reduce/accumulator.rs` and `reduce/engine.rs` build
        // a group key: one `insert` per `groupBy` field, in declared order.
        let mut in_group_by_order = serde_json::Map::new();
        in_group_by_order.insert("status".to_string(), json!("paid"));
        in_group_by_order.insert("region".to_string(), json!("us"));
        assert_eq!(
            canonical_json(&Value::Object(in_group_by_order)),
            r#"{"status":"paid","region":"us"}"#
        );
    }
}
