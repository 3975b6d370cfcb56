//! Observable references and raw value extraction.
//!
//! An [`ObservableRef`] wraps the value it exposes plus a private tag set.
//! Tags live beside the value rather than inside it, so enumerating the
//! reference's fields never surfaces them. Extraction picks exactly one
//! strategy per step, in priority order `prop` → `equality-fn` → `shallow`
//! → the reference's own value.

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::config::observable_configuration;
use crate::error::{Result, ValueError};
use crate::path::PathNode;
use crate::value::Value;

/// A value addressed as `resolve(node)[key]`.
#[derive(Clone, Debug, PartialEq)]
pub struct PropTag {
    pub node: PathNode,
    pub key: String,
}

/// The internal tags a reference may carry. Any combination may be set;
/// extraction consults them in field order.
#[derive(Clone, Debug, Default)]
pub struct RefTags {
    pub prop: Option<PropTag>,
    pub equality_fn: Option<ObservableRef>,
    pub shallow: Option<Value>,
}

/// The single resolution step a reference takes.
enum Strategy {
    Prop(PropTag),
    Derived(ObservableRef),
    Shallow(Value),
    Plain(Value),
}

struct RefInner {
    value: Value,
    tags: RwLock<RefTags>,
}

/// An opaque handle through which the store exposes a value location.
#[derive(Clone)]
pub struct ObservableRef {
    inner: Arc<RefInner>,
}

impl ObservableRef {
    pub fn new(value: Value) -> Self {
        Self {
            inner: Arc::new(RefInner {
                value,
                tags: RwLock::new(RefTags::default()),
            }),
        }
    }

    /// The reference's own value, as seen by ordinary enumeration.
    pub fn value(&self) -> &Value {
        &self.inner.value
    }

    /// Enumerable field names; tags are never included.
    pub fn keys(&self) -> Vec<String> {
        self.inner.value.keys()
    }

    pub fn tags(&self) -> RefTags {
        self.inner.tags.read().expect("tag lock poisoned").clone()
    }

    pub fn set_prop(&self, node: PathNode, key: impl Into<String>) {
        self.write_tags(|tags| {
            tags.prop = Some(PropTag {
                node,
                key: key.into(),
            })
        });
    }

    pub fn set_equality_fn(&self, obs: ObservableRef) {
        self.write_tags(|tags| tags.equality_fn = Some(obs));
    }

    pub fn set_shallow(&self, value: Value) {
        self.write_tags(|tags| tags.shallow = Some(value));
    }

    pub fn clear_tags(&self) {
        self.write_tags(|tags| *tags = RefTags::default());
    }

    pub fn ptr_eq(&self, other: &ObservableRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn write_tags(&self, f: impl FnOnce(&mut RefTags)) {
        let mut tags = self.inner.tags.write().expect("tag lock poisoned");
        f(&mut tags);
    }

    fn strategy(&self) -> Strategy {
        let tags = self.inner.tags.read().expect("tag lock poisoned");
        match (&tags.prop, &tags.equality_fn, &tags.shallow) {
            (Some(prop), _, _) => Strategy::Prop(prop.clone()),
            (None, Some(obs), _) => Strategy::Derived(obs.clone()),
            (None, None, Some(v)) if !v.is_undefined() => Strategy::Shallow(v.clone()),
            _ => Strategy::Plain(self.inner.value.clone()),
        }
    }
}

impl fmt::Debug for ObservableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObservableRef").field(&self.inner.value).finish()
    }
}

/// Unwrap `obs` to the concrete value it currently stands for, following
/// equality-fn derivations up to the configured
/// [`max_derivation_depth`](crate::ObservableConfig::max_derivation_depth).
pub fn extract_raw(obs: &ObservableRef) -> Result<Value> {
    extract_raw_with_limit(obs, observable_configuration().max_derivation_depth)
}

/// [`extract_raw`] with an explicit derivation depth limit.
pub fn extract_raw_with_limit(obs: &ObservableRef, max_depth: usize) -> Result<Value> {
    let mut current = obs.clone();
    for _ in 0..=max_depth {
        match current.strategy() {
            Strategy::Prop(tag) => return Ok(tag.node.value().get(&tag.key)),
            Strategy::Derived(next) => current = next,
            Strategy::Shallow(value) | Strategy::Plain(value) => return Ok(value),
        }
    }
    Err(ValueError::CyclicReference { depth: max_depth })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> Value {
        Value::from(json!({"todos": {"a": {"title": "write", "done": false}}}))
    }

    #[test]
    fn untagged_reference_resolves_to_itself() {
        let v = Value::object([("x", Value::from(1))]);
        let obs = ObservableRef::new(v.clone());
        assert!(extract_raw(&obs).unwrap().strict_eq(&v));
    }

    #[test]
    fn prop_tag_reads_through_the_tree() {
        let root = store();
        let obs = ObservableRef::new(Value::empty_object());
        obs.set_prop(PathNode::new(root.clone(), ["todos", "a"]), "title");
        assert_eq!(extract_raw(&obs).unwrap(), Value::from("write"));

        // Mutations to the tree are visible on the next extraction.
        root.get("todos")
            .get("a")
            .as_object()
            .unwrap()
            .write()
            .insert("title".into(), Value::from("ship"));
        assert_eq!(extract_raw(&obs).unwrap(), Value::from("ship"));
    }

    #[test]
    fn prop_tag_on_missing_parent_is_undefined() {
        let obs = ObservableRef::new(Value::Null);
        obs.set_prop(PathNode::new(store(), ["todos", "zzz"]), "title");
        assert!(extract_raw(&obs).unwrap().is_undefined());
    }

    #[test]
    fn prop_takes_priority_over_other_tags() {
        let obs = ObservableRef::new(Value::Null);
        obs.set_shallow(Value::from("shallow"));
        obs.set_equality_fn(ObservableRef::new(Value::from("derived")));
        obs.set_prop(PathNode::new(store(), ["todos", "a"]), "done");
        assert_eq!(extract_raw(&obs).unwrap(), Value::from(false));
    }

    #[test]
    fn equality_fn_unwraps_recursively() {
        let base = ObservableRef::new(Value::Null);
        base.set_shallow(Value::from(7));
        let mid = ObservableRef::new(Value::Null);
        mid.set_equality_fn(base);
        let top = ObservableRef::new(Value::Null);
        top.set_equality_fn(mid);
        assert_eq!(extract_raw(&top).unwrap(), Value::from(7));
    }

    #[test]
    fn undefined_shallow_falls_back_to_self() {
        let obs = ObservableRef::new(Value::from("own"));
        obs.set_shallow(Value::Undefined);
        assert_eq!(extract_raw(&obs).unwrap(), Value::from("own"));
    }

    #[test]
    fn cyclic_derivation_is_reported() {
        let a = ObservableRef::new(Value::Null);
        let b = ObservableRef::new(Value::Null);
        a.set_equality_fn(b.clone());
        b.set_equality_fn(a.clone());
        let err = extract_raw_with_limit(&a, 8).unwrap_err();
        assert_eq!(err, ValueError::CyclicReference { depth: 8 });
        // Break the cycle so the handles can be freed.
        a.clear_tags();
    }

    #[test]
    fn tags_are_not_enumerable() {
        let obs = ObservableRef::new(Value::object([("visible", Value::from(1))]));
        obs.set_shallow(Value::from(2));
        assert_eq!(obs.keys(), vec!["visible".to_string()]);
    }
}
