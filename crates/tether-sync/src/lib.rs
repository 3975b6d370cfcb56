//! External cache synchronization for the Tether reactive store.
//!
//! A [`SyncedQuery`] binds one observable to one entry of an external
//! query cache, plus an optional mutation channel for write-back. The
//! binding keeps the two sides consistent: the first `get` waits for the
//! cache's first success instead of polling, subscriptions redeliver
//! anything produced before the listener attached, and key changes are
//! pushed to the cache silently so they are never mistaken for data.
//!
//! # Modules
//!
//! - [`client`] — Collaborator traits: [`QueryClient`], [`QueryObserver`], [`MutationObserver`]
//! - [`types`] — Keys, options, results, and the [`Unsubscribe`] handle
//! - [`synced`] — The descriptor surface handed to the store: [`SyncSource`], [`SyncedOptions`]
//! - [`query`] — [`synced_query`], the binding itself
//! - [`notify`] — [`NotifyManager`], the notification coalescing primitive
//! - [`memory`] — [`InMemoryQueryClient`] for tests and embedded use
//! - [`config`] — [`QueryClientConfig`] client defaults

pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod notify;
pub mod query;
pub mod synced;
pub mod types;

pub use client::{MutationObserver, QueryClient, QueryObserver};
pub use config::QueryClientConfig;
pub use error::{QueryError, SyncError, SyncResult};
pub use memory::{InMemoryMutationObserver, InMemoryQueryClient, InMemoryQueryObserver};
pub use notify::NotifyManager;
pub use query::{synced_query, BindingEvent, QuerySetter, SyncedQuery, SyncedQueryParams};
pub use synced::{
    PersistOptions, SyncMode, SyncSetter, SyncSource, SyncUpdate, SyncedOptions, UpdateFn,
};
pub use types::{
    BoxFuture, FetchStatus, KeyFn, Listener, MutationFn, MutationOptions, NotifyOptions,
    QueryFn, QueryKey, QueryKeySource, QueryObserverOptions, QueryOptions, QueryResult,
    QueryStatus, Unsubscribe,
};
