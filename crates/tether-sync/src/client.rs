//! Collaborator interfaces of the external query cache.
//!
//! A binding never fetches, caches or retries on its own. It drives one
//! [`QueryObserver`] and at most one [`MutationObserver`], both created
//! through a shared [`QueryClient`].

use std::sync::Arc;

use async_trait::async_trait;
use tether_value::Value;

use crate::error::QueryError;
use crate::notify::NotifyManager;
use crate::types::{
    Listener, MutationOptions, NotifyOptions, QueryObserverOptions, QueryOptions, QueryResult,
    Unsubscribe,
};

/// Entry point of an external query cache. One client is typically shared
/// by many bindings.
pub trait QueryClient: Send + Sync {
    /// Fill unset fields of `options` from the client's defaults.
    fn default_query_options(&self, options: &QueryOptions) -> QueryObserverOptions;

    fn create_observer(&self, options: Arc<QueryObserverOptions>) -> Arc<dyn QueryObserver>;

    fn create_mutation(&self, options: MutationOptions) -> Arc<dyn MutationObserver>;

    /// The coalescing primitive listeners are wrapped with.
    fn notify_manager(&self) -> Arc<NotifyManager>;
}

/// A live handle on one cache entry, retargetable through `set_options`.
pub trait QueryObserver: Send + Sync {
    /// The result the observer would report for `options` right now,
    /// including a fetch it is about to start.
    fn optimistic_result(&self, options: &Arc<QueryObserverOptions>) -> QueryResult;

    /// Replace the observer's options. With `notify` off, listeners are not
    /// told about the change itself.
    fn set_options(&self, options: Arc<QueryObserverOptions>, notify: NotifyOptions);

    fn subscribe(&self, listener: Listener) -> Unsubscribe;

    /// Re-evaluate and redeliver the current result to listeners.
    fn update_result(&self);
}

/// A write channel to the external system.
#[async_trait]
pub trait MutationObserver: Send + Sync {
    async fn mutate(&self, variables: Value) -> Result<Value, QueryError>;
}
