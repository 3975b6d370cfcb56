//! Value classification.
//!
//! Two primitive tests coexist and deliberately disagree on functions:
//!
//! - [`is_primitive`] is the structural rule. Anything that is not an
//!   object or array counts, which makes functions primitive leaves. Dates,
//!   errors, boxed strings, buffers and the weak collections are excluded
//!   by name so traversal treats them as opaque leaves instead.
//! - [`is_primitive_cheap`] is the `typeof` rule used for cheap equality:
//!   `null`, `undefined`, or anything whose `typeof` is neither `"object"`
//!   nor `"function"`.
//!
//! Every object-typed value, dates and buffers included, is non-primitive
//! under both rules.

use crate::value::Value;

/// How traversal should treat a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// A leaf compared by value (functions included).
    Primitive,
    /// Arrays, maps, sets and their weak variants; iterated by entries.
    Collection,
    /// A plain object; iterated by its fields.
    Structured,
    /// Dates, errors, boxed strings and buffers: non-primitive leaves.
    Opaque,
}

pub fn classify(value: &Value) -> ValueKind {
    match value {
        Value::Undefined
        | Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Function(_) => ValueKind::Primitive,
        Value::Array(_) | Value::Map(_) | Value::Set(_) | Value::WeakMap(_) | Value::WeakSet(_) => {
            ValueKind::Collection
        }
        Value::Object(_) => ValueKind::Structured,
        Value::Date(_) | Value::Error(_) | Value::BoxedString(_) | Value::Buffer(_) => {
            ValueKind::Opaque
        }
    }
}

/// Structural primitive test.
pub fn is_primitive(value: &Value) -> bool {
    classify(value) == ValueKind::Primitive
}

/// `typeof`-based primitive test.
pub fn is_primitive_cheap(value: &Value) -> bool {
    value.is_nullish() || !matches!(value.type_of(), "object" | "function")
}

pub fn is_collection(value: &Value) -> bool {
    classify(value) == ValueKind::Collection
}

/// Returns `true` for plain objects, the only values whose fields the
/// structural utilities recurse into.
pub fn is_structured(value: &Value) -> bool {
    classify(value) == ValueKind::Structured
}
