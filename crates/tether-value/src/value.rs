//! The dynamic [`Value`] every store component operates on.
//!
//! Scalars (`undefined`, `null`, booleans, numbers, strings) are held
//! inline and compared by value. Every other variant is a reference: cloning
//! a `Value` clones the handle, never the referent, so identity survives
//! being passed around and [`Value::strict_eq`] can distinguish "the same
//! object" from "an equal object".

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as Json;

/// Field storage for structured objects.
pub type Object = BTreeMap<String, Value>;

/// A callable value.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// A shared, mutable referent with pointer identity.
pub struct Handle<T>(Arc<RwLock<T>>);

impl<T> Handle<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().expect("value lock poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().expect("value lock poisoned")
    }

    /// Returns `true` if both handles point at the same referent.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// Payload of an error value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
}

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Handle<Vec<Value>>),
    Object(Handle<Object>),
    Map(Handle<Vec<(Value, Value)>>),
    Set(Handle<Vec<Value>>),
    WeakMap(Handle<Vec<(Value, Value)>>),
    WeakSet(Handle<Vec<Value>>),
    Date(Arc<DateTime<Utc>>),
    Error(Arc<ErrorValue>),
    BoxedString(Arc<str>),
    Buffer(Arc<Bytes>),
    Function(NativeFn),
}

impl Value {
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(Handle::new(items.into_iter().collect()))
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(Handle::new(
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn empty_object() -> Self {
        Value::Object(Handle::new(Object::new()))
    }

    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Value::Map(Handle::new(entries.into_iter().collect()))
    }

    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Set(Handle::new(items.into_iter().collect()))
    }

    pub fn date(at: DateTime<Utc>) -> Self {
        Value::Date(Arc::new(at))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Value::Error(Arc::new(ErrorValue {
            name: "Error".into(),
            message: message.into(),
        }))
    }

    pub fn boxed_string(s: &str) -> Self {
        Value::BoxedString(Arc::from(s))
    }

    pub fn buffer(bytes: impl Into<Bytes>) -> Self {
        Value::Buffer(Arc::new(bytes.into()))
    }

    pub fn function(f: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        Value::Function(Arc::new(f))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// The result of the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            _ => "object",
        }
    }

    /// Truthiness: `undefined`, `null`, `false`, `0`, `-0`, `NaN` and `""`
    /// are falsy; everything else, including empty arrays and objects, is
    /// truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Strict equality (`===`). Scalars compare by value, with `NaN` never
    /// equal to itself; reference variants compare by identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Map(a), Value::Map(b)) | (Value::WeakMap(a), Value::WeakMap(b)) => a.ptr_eq(b),
            (Value::Set(a), Value::Set(b)) | (Value::WeakSet(a), Value::WeakSet(b)) => a.ptr_eq(b),
            (Value::Date(a), Value::Date(b)) => Arc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b),
            (Value::BoxedString(a), Value::BoxedString(b)) => Arc::ptr_eq(a, b),
            (Value::Buffer(a), Value::Buffer(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Property access (`value[key]`).
    ///
    /// Objects yield their field, arrays and strings their element at a
    /// canonical index or their `length`, maps and sets their `size`, and
    /// errors their `name` / `message`. Everything else yields `undefined`.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(fields) => fields.read().get(key).cloned().unwrap_or_default(),
            Value::Array(items) => {
                let items = items.read();
                if key == "length" {
                    return Value::Number(items.len() as f64);
                }
                parse_index(key)
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default()
            }
            Value::String(s) => string_property(s, key),
            Value::BoxedString(s) => string_property(s, key),
            Value::Map(entries) if key == "size" => Value::Number(entries.read().len() as f64),
            Value::Set(items) if key == "size" => Value::Number(items.read().len() as f64),
            Value::Error(err) => match key {
                "name" => Value::String(err.name.clone()),
                "message" => Value::String(err.message.clone()),
                _ => Value::Undefined,
            },
            Value::Buffer(bytes) if key == "byteLength" => Value::Number(bytes.len() as f64),
            _ => Value::Undefined,
        }
    }

    /// Enumerable field names of a structured object, in key order.
    /// Every other variant enumerates nothing.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Object(fields) => fields.read().keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn as_object(&self) -> Option<&Handle<Object>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Handle<Vec<Value>>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// JSON serialization. Returns `None` where the serializer would produce
    /// nothing at all (`undefined` and functions at the top level).
    ///
    /// Inside objects those fields are omitted; inside arrays they become
    /// `null`. Dates become RFC 3339 strings with millisecond precision,
    /// non-finite numbers become `null`, boxed strings unwrap, and maps,
    /// sets, errors and buffers carry no enumerable fields and become `{}`.
    pub fn to_json(&self) -> Option<Json> {
        match self {
            Value::Undefined | Value::Function(_) => None,
            Value::Null => Some(Json::Null),
            Value::Bool(b) => Some(Json::Bool(*b)),
            Value::Number(n) => Some(number_to_json(*n)),
            Value::String(s) => Some(Json::String(s.clone())),
            Value::BoxedString(s) => Some(Json::String(s.to_string())),
            Value::Date(at) => Some(Json::String(
                at.to_rfc3339_opts(SecondsFormat::Millis, true),
            )),
            Value::Array(items) => Some(Json::Array(
                items
                    .read()
                    .iter()
                    .map(|v| v.to_json().unwrap_or(Json::Null))
                    .collect(),
            )),
            Value::Object(fields) => Some(Json::Object(
                fields
                    .read()
                    .iter()
                    .filter_map(|(k, v)| v.to_json().map(|j| (k.clone(), j)))
                    .collect(),
            )),
            Value::Map(_)
            | Value::Set(_)
            | Value::WeakMap(_)
            | Value::WeakSet(_)
            | Value::Error(_)
            | Value::Buffer(_) => Some(Json::Object(serde_json::Map::new())),
        }
    }

    /// Build a fresh value tree from JSON. Every array and object in the
    /// result is a new referent.
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::array(items.iter().map(Value::from_json)),
            Json::Object(fields) => {
                Value::object(fields.iter().map(|(k, v)| (k.clone(), Value::from_json(v))))
            }
        }
    }
}

fn parse_index(key: &str) -> Option<usize> {
    let index: usize = key.parse().ok()?;
    // Only canonical indices address elements: "01" and "+1" are plain keys.
    (index.to_string() == key).then_some(index)
}

fn string_property(s: &str, key: &str) -> Value {
    if key == "length" {
        return Value::Number(s.encode_utf16().count() as f64);
    }
    parse_index(key)
        .and_then(|i| s.encode_utf16().nth(i))
        .map(|unit| Value::String(String::from_utf16_lossy(&[unit])))
        .unwrap_or_default()
}

fn number_to_json(n: f64) -> Json {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Json::Number)
            .unwrap_or(Json::Null)
    }
}

/// Structural equality, used by assertions and diffing.
///
/// Arrays, objects, maps and sets compare element-wise; dates, errors,
/// strings and buffers by content; functions by identity. Cyclic trees do
/// not terminate.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if self.strict_eq(other) {
            return true;
        }
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => *a.read() == *b.read(),
            (Value::Object(a), Value::Object(b)) => *a.read() == *b.read(),
            (Value::Map(a), Value::Map(b)) | (Value::WeakMap(a), Value::WeakMap(b)) => {
                *a.read() == *b.read()
            }
            (Value::Set(a), Value::Set(b)) | (Value::WeakSet(a), Value::WeakSet(b)) => {
                *a.read() == *b.read()
            }
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::BoxedString(a), Value::BoxedString(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(items) => f.debug_list().entries(items.read().iter()).finish(),
            Value::Object(fields) => f.debug_map().entries(fields.read().iter()).finish(),
            Value::Map(entries) => {
                f.write_str("Map ")?;
                f.debug_map()
                    .entries(entries.read().iter().map(|(k, v)| (k, v)))
                    .finish()
            }
            Value::Set(items) => {
                f.write_str("Set ")?;
                f.debug_set().entries(items.read().iter()).finish()
            }
            Value::WeakMap(_) => f.write_str("WeakMap {}"),
            Value::WeakSet(_) => f.write_str("WeakSet {}"),
            Value::Date(at) => write!(f, "Date({})", at.to_rfc3339()),
            Value::Error(err) => write!(f, "{}: {}", err.name, err.message),
            Value::BoxedString(s) => write!(f, "String({s:?})"),
            Value::Buffer(bytes) => write!(f, "ArrayBuffer({} bytes)", bytes.len()),
            Value::Function(_) => f.write_str("[Function]"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<&Json> for Value {
    fn from(json: &Json) -> Self {
        Value::from_json(json)
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Value::from_json(&json)
    }
}
