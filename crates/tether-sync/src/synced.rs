//! The descriptor surface a binding exposes to the store's sync wiring.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tether_value::Value;

use crate::error::SyncResult;
use crate::types::Unsubscribe;

/// A value pushed from the source into the store.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncUpdate {
    pub value: Value,
}

pub type UpdateFn = Arc<dyn Fn(SyncUpdate) + Send + Sync>;

/// How incoming values are merged into the observable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Set,
    Assign,
    Merge,
    Append,
    Prepend,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOptions {
    pub name: String,
    #[serde(default)]
    pub retry_sync: bool,
}

/// Options the binding carries through untouched for the store's sync
/// wiring.
#[derive(Clone, Debug, Default)]
pub struct SyncedOptions {
    pub initial: Option<Value>,
    pub mode: SyncMode,
    pub debounce_set: Option<Duration>,
    pub persist: Option<PersistOptions>,
}

/// Write capability of a source. Read-only sources have none.
#[async_trait]
pub trait SyncSetter: Send + Sync {
    async fn set(&self, value: Value) -> SyncResult<Value>;
}

/// A source the store can keep an observable in sync with.
#[async_trait]
pub trait SyncSource: Send + Sync {
    /// The current value, waiting for the first successful load if needed.
    async fn get(&self) -> SyncResult<Value>;

    /// Start the live feed. The returned handle ends it.
    fn subscribe(&self, update: UpdateFn) -> Unsubscribe;

    /// `None` when the source cannot be written to.
    fn setter(&self) -> Option<&dyn SyncSetter>;

    fn options(&self) -> &SyncedOptions;
}
