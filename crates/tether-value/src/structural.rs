//! Structural helpers applied when values cross the external cache boundary.
//!
//! Only plain objects are recursed into. Arrays and other collections are
//! carried through as-is, and primitives pass straight through.

use tracing::trace;

use crate::classify::is_structured;
use crate::value::{Handle, Object, Value};

/// Delete every `null`/`undefined` field of `value` in place, recursing
/// into nested plain objects.
///
/// Returns `null` when `value` is itself `undefined`; otherwise returns
/// `value` (the same referent, now pruned).
pub fn prune_nullish(value: &Value) -> Value {
    if value.is_undefined() {
        return Value::Null;
    }
    if let Value::Object(fields) = value {
        prune_object(fields);
    }
    value.clone()
}

fn prune_object(fields: &Handle<Object>) {
    let nested: Vec<Handle<Object>> = {
        let mut fields = fields.write();
        fields.retain(|_, v| !v.is_nullish());
        fields
            .values()
            .filter_map(|v| v.as_object().cloned())
            .collect()
    };
    for child in &nested {
        prune_object(child);
    }
}

/// Rename field `from` to `to` at every level reached through plain
/// objects.
///
/// With `clone` set, a new tree of objects is built and `value` is left
/// untouched; otherwise each object is rewritten in place. A `from` field
/// is moved only when its value is truthy.
///
/// The two modes differ at the edges. In place, a falsy `from` field stays
/// where it is and the moved value is walked under its new name. A clone
/// never carries a `from` field, falsy or not, does not walk the moved
/// value, and lets an existing `to` field win over the moved one.
pub fn rename_key(value: &Value, from: &str, to: &str, clone: bool) -> Value {
    let Value::Object(fields) = value else {
        return value.clone();
    };
    if clone {
        rename_cloned(fields, from, to)
    } else {
        rename_in_place(fields, from, to);
        value.clone()
    }
}

fn rename_cloned(fields: &Handle<Object>, from: &str, to: &str) -> Value {
    let source = fields.read().clone();
    let mut target = Object::new();
    if let Some(moved) = source.get(from).filter(|v| v.is_truthy()) {
        target.insert(to.to_string(), moved.clone());
    }
    for (key, child) in &source {
        if key != from {
            target.insert(key.clone(), rename_key(child, from, to, true));
        }
    }
    Value::Object(Handle::new(target))
}

fn rename_in_place(fields: &Handle<Object>, from: &str, to: &str) {
    let snapshot: Vec<(String, Value)> = {
        let mut fields = fields.write();
        if let Some(moved) = fields.get(from).filter(|v| v.is_truthy()).cloned() {
            fields.insert(to.to_string(), moved);
            fields.remove(from);
        }
        fields
            .iter()
            .filter(|(key, _)| key.as_str() != from)
            .map(|(key, child)| (key.clone(), child.clone()))
            .collect()
    };
    // Children are renamed without holding the parent's lock.
    let renamed: Vec<(String, Value)> = snapshot
        .into_iter()
        .map(|(key, child)| {
            let child = rename_key(&child, from, to, false);
            (key, child)
        })
        .collect();
    fields.write().extend(renamed);
}

/// Copy `value` for the cache boundary, where a new identity must be
/// observable.
///
/// - `undefined` and `null` pass through.
/// - Arrays: a new array holding the same element references.
/// - Plain objects: a new object holding the same field references.
/// - Everything else goes through a JSON round trip. This is lossy:
///   functions become `undefined`, dates become ISO strings, maps, sets,
///   errors and buffers become empty objects, and non-finite numbers
///   become `null`.
pub fn clone_value(value: &Value) -> Value {
    match value {
        Value::Undefined | Value::Null => value.clone(),
        Value::Array(items) => Value::Array(Handle::new(items.read().clone())),
        Value::Object(fields) => Value::Object(Handle::new(fields.read().clone())),
        other => {
            trace!(kind = other.type_of(), "cloning through JSON round trip");
            other
                .to_json()
                .map(|json| Value::from_json(&json))
                .unwrap_or_default()
        }
    }
}

/// Returns `true` if `prefix[i] === values[i]` for every index of
/// `prefix`. Indices past the end of `values` compare as `undefined`.
pub fn array_starts_with(values: &[Value], prefix: &[Value]) -> bool {
    prefix.iter().enumerate().all(|(i, expected)| {
        values
            .get(i)
            .unwrap_or(&Value::Undefined)
            .strict_eq(expected)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn prune_removes_nullish_fields_recursively() {
        let v = Value::object([
            ("a", Value::from(1)),
            ("b", Value::Null),
            ("c", Value::Undefined),
            (
                "d",
                Value::object([("e", Value::Null), ("f", Value::from(2))]),
            ),
        ]);
        let pruned = prune_nullish(&v);
        assert!(pruned.strict_eq(&v));
        assert_eq!(v, Value::from(json!({"a": 1, "d": {"f": 2}})));
    }

    #[test]
    fn prune_undefined_yields_null() {
        assert_eq!(prune_nullish(&Value::Undefined), Value::Null);
    }

    #[test]
    fn prune_leaves_arrays_alone() {
        let v = Value::object([("list", Value::array([Value::Null, Value::from(1)]))]);
        prune_nullish(&v);
        assert_eq!(v.get("list").get("length"), Value::from(2));
    }

    #[test]
    fn prune_primitive_is_noop() {
        assert_eq!(prune_nullish(&Value::from(3)), Value::from(3));
    }

    #[test]
    fn rename_clone_leaves_original_untouched() {
        let v = Value::from(json!({"id": "x", "child": {"id": "y"}}));
        let renamed = rename_key(&v, "id", "_id", true);
        assert!(!renamed.strict_eq(&v));
        assert_eq!(renamed, Value::from(json!({"_id": "x", "child": {"_id": "y"}})));
        assert_eq!(v, Value::from(json!({"id": "x", "child": {"id": "y"}})));
    }

    #[test]
    fn rename_in_place_mutates_every_level() {
        let v = Value::from(json!({"id": "x", "child": {"id": "y"}}));
        let renamed = rename_key(&v, "id", "_id", false);
        assert!(renamed.strict_eq(&v));
        assert_eq!(v, Value::from(json!({"_id": "x", "child": {"_id": "y"}})));
    }

    #[test]
    fn rename_skips_arrays() {
        let v = Value::from(json!({"items": [{"id": 1}]}));
        let renamed = rename_key(&v, "id", "_id", true);
        assert_eq!(renamed, Value::from(json!({"items": [{"id": 1}]})));
    }

    #[test]
    fn rename_in_place_keeps_falsy_source_field() {
        let v = Value::from(json!({"id": 0, "n": 1}));
        let in_place = rename_key(&v, "id", "_id", false);
        assert_eq!(in_place, Value::from(json!({"id": 0, "n": 1})));
    }

    #[test]
    fn rename_clone_drops_falsy_source_field() {
        let cloned = rename_key(&Value::from(json!({"id": 0, "n": 1})), "id", "_id", true);
        assert_eq!(cloned, Value::from(json!({"n": 1})));
    }

    #[test]
    fn rename_clone_lets_existing_target_win() {
        let v = Value::from(json!({"id": "x", "_id": "y"}));
        let cloned = rename_key(&v, "id", "_id", true);
        assert_eq!(cloned, Value::from(json!({"_id": "y"})));
    }

    #[test]
    fn rename_passes_primitives_through() {
        assert_eq!(rename_key(&Value::from("s"), "a", "b", true), Value::from("s"));
    }

    #[test]
    fn clone_array_is_shallow() {
        let inner = Value::empty_object();
        let arr = Value::array([inner.clone(), Value::from(1)]);
        let copy = clone_value(&arr);
        assert!(!copy.strict_eq(&arr));
        assert!(copy.get("0").strict_eq(&inner));
    }

    #[test]
    fn clone_object_shares_nested_references() {
        let nested = Value::object([("deep", Value::from(true))]);
        let obj = Value::object([("nested", nested.clone())]);
        let copy = clone_value(&obj);
        assert!(!copy.strict_eq(&obj));
        assert!(copy.get("nested").strict_eq(&nested));
    }

    #[test]
    fn clone_nullish_passes_through() {
        assert!(clone_value(&Value::Undefined).is_undefined());
        assert_eq!(clone_value(&Value::Null), Value::Null);
    }

    #[test]
    fn clone_date_is_lossy() {
        let at = Utc.with_ymd_and_hms(2020, 5, 6, 7, 8, 9).unwrap();
        let copy = clone_value(&Value::date(at));
        assert_eq!(copy, Value::from("2020-05-06T07:08:09.000Z"));
    }

    #[test]
    fn clone_function_is_lost() {
        let f = Value::function(|_| Value::from(1));
        assert!(clone_value(&f).is_undefined());
    }

    #[test]
    fn starts_with_prefix() {
        let a = [Value::from(1), Value::from(2), Value::from(3)];
        let b = [Value::from(1), Value::from(2)];
        assert!(array_starts_with(&a, &b));
        assert!(!array_starts_with(&b, &a));
        assert!(array_starts_with(&a, &[]));
    }

    #[test]
    fn starts_with_uses_identity_for_objects() {
        let o = Value::empty_object();
        assert!(array_starts_with(&[o.clone()], &[o]));
        assert!(!array_starts_with(&[Value::empty_object()], &[Value::empty_object()]));
    }

    #[test]
    fn starts_with_past_end_matches_undefined() {
        assert!(array_starts_with(&[Value::from(1)], &[Value::from(1), Value::Undefined]));
    }
}
