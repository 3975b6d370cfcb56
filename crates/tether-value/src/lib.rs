//! Value model for the Tether reactive store.
//!
//! This crate answers "what value does this reference point to right now"
//! for the rest of the store. It provides a dynamic [`Value`] with
//! reference identity, the classifiers used to decide whether to recurse
//! into a value, path-based resolution over rooted value trees, raw value
//! extraction through an observable's internal tags, and the structural
//! helpers applied at the external cache boundary.
//!
//! # Key Types
//!
//! - [`Value`] — Dynamic value; reference variants share their referent
//! - [`ValueKind`] — Primitive / collection / structured / opaque classification
//! - [`PathNode`] — A `(root, path)` coordinate inside a value tree
//! - [`ObservableRef`] — Opaque handle carrying `prop` / `equality-fn` / `shallow` tags
//! - [`ObservableConfig`] — Process-wide observable configuration
//! - [`Signal`] / [`observe`] — Minimal tracking primitive for derived keys

pub mod classify;
pub mod config;
pub mod error;
pub mod observable;
pub mod path;
pub mod reactive;
pub mod structural;
pub mod value;

pub use classify::{
    classify, is_collection, is_primitive, is_primitive_cheap, is_structured, ValueKind,
};
pub use config::{
    configure_observable, date_modified_key, observable_configuration, ObservableConfig,
    DEFAULT_DATE_MODIFIED_KEY,
};
pub use error::{Result, ValueError};
pub use observable::{extract_raw, extract_raw_with_limit, ObservableRef, PropTag, RefTags};
pub use path::{call_keyed, decompose_last, resolve, resolve_node, PathNode};
pub use reactive::{batch, observe, Observation, Signal};
pub use structural::{array_starts_with, clone_value, prune_nullish, rename_key};
pub use value::{ErrorValue, Handle, NativeFn, Object, Value};
