use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tether_value::Value;

use crate::error::QueryError;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Fetches the data for a key.
pub type QueryFn = Arc<dyn Fn(QueryKey) -> BoxFuture<Result<Value, QueryError>> + Send + Sync>;

/// Performs a write through the mutation channel.
pub type MutationFn = Arc<dyn Fn(Value) -> BoxFuture<Result<Value, QueryError>> + Send + Sync>;

/// Produces the current key from reactive inputs.
pub type KeyFn = Arc<dyn Fn() -> QueryKey + Send + Sync>;

/// Receives observer results.
pub type Listener = Arc<dyn Fn(QueryResult) + Send + Sync>;

/// A cache key: an ordered list of JSON parts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryKey(Vec<Json>);

impl QueryKey {
    pub fn new(parts: Vec<Json>) -> Self {
        Self(parts)
    }

    pub fn from_parts<P: Into<Json>>(parts: impl IntoIterator<Item = P>) -> Self {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[Json] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable cache hash. Object parts hash with sorted field names, so
    /// `{"a":1,"b":2}` and `{"b":2,"a":1}` address the same entry.
    pub fn hash(&self) -> String {
        Json::Array(self.0.clone()).to_string()
    }
}

/// Where a binding gets its key: fixed, or recomputed reactively.
#[derive(Clone)]
pub enum QueryKeySource {
    Static(QueryKey),
    Dynamic(KeyFn),
}

impl QueryKeySource {
    pub fn dynamic(f: impl Fn() -> QueryKey + Send + Sync + 'static) -> Self {
        QueryKeySource::Dynamic(Arc::new(f))
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, QueryKeySource::Dynamic(_))
    }
}

impl From<QueryKey> for QueryKeySource {
    fn from(key: QueryKey) -> Self {
        QueryKeySource::Static(key)
    }
}

impl fmt::Debug for QueryKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKeySource::Static(key) => f.debug_tuple("Static").field(key).finish(),
            QueryKeySource::Dynamic(_) => f.write_str("Dynamic(<fn>)"),
        }
    }
}

/// User-facing query configuration. Unset fields take the client's defaults.
#[derive(Clone)]
pub struct QueryOptions {
    pub query_key: QueryKeySource,
    pub query_fn: Option<QueryFn>,
    pub enabled: Option<bool>,
    pub stale_time: Option<Duration>,
    pub gc_time: Option<Duration>,
    pub retry: Option<u32>,
}

impl QueryOptions {
    pub fn new(query_key: impl Into<QueryKeySource>) -> Self {
        Self {
            query_key: query_key.into(),
            query_fn: None,
            enabled: None,
            stale_time: None,
            gc_time: None,
            retry: None,
        }
    }

    pub fn with_query_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueryKey) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, QueryError>> + Send + 'static,
    {
        self.query_fn = Some(Arc::new(
            move |key| -> BoxFuture<Result<Value, QueryError>> { Box::pin(f(key)) },
        ));
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("query_key", &self.query_key)
            .field("query_fn", &self.query_fn.as_ref().map(|_| "<fn>"))
            .field("enabled", &self.enabled)
            .field("stale_time", &self.stale_time)
            .field("gc_time", &self.gc_time)
            .field("retry", &self.retry)
            .finish()
    }
}

/// A fully defaulted options snapshot as seen by an observer.
///
/// Snapshots are immutable once shared: every change produces a new
/// `Arc<QueryObserverOptions>`, and observers treat a new `Arc` as the
/// signal that targeting changed.
#[derive(Clone)]
pub struct QueryObserverOptions {
    pub query_key: QueryKey,
    pub query_hash: String,
    pub query_fn: Option<QueryFn>,
    pub enabled: bool,
    pub stale_time: Duration,
    pub gc_time: Duration,
    pub retry: u32,
}

impl QueryObserverOptions {
    /// Retarget to `key`, keeping the hash in step.
    pub fn set_query_key(&mut self, key: QueryKey) {
        self.query_hash = key.hash();
        self.query_key = key;
    }
}

impl fmt::Debug for QueryObserverOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryObserverOptions")
            .field("query_key", &self.query_key)
            .field("enabled", &self.enabled)
            .field("stale_time", &self.stale_time)
            .field("gc_time", &self.gc_time)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    #[default]
    Pending,
    Error,
    Success,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Fetching,
    Paused,
    #[default]
    Idle,
}

/// An observer's view of its query at one point in time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub data: Option<Value>,
    pub error: Option<QueryError>,
}

impl QueryResult {
    pub fn pending(fetch_status: FetchStatus) -> Self {
        Self {
            status: QueryStatus::Pending,
            fetch_status,
            data: None,
            error: None,
        }
    }

    pub fn success(data: Value) -> Self {
        Self {
            status: QueryStatus::Success,
            fetch_status: FetchStatus::Idle,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(error: QueryError) -> Self {
        Self {
            status: QueryStatus::Error,
            fetch_status: FetchStatus::Idle,
            data: None,
            error: Some(error),
        }
    }

    /// No data yet and a fetch is in flight.
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Pending && self.fetch_status == FetchStatus::Fetching
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }
}

/// Whether an option change should be announced to listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotifyOptions {
    pub notify: bool,
}

impl NotifyOptions {
    /// Update targeting without emitting a notification.
    pub fn silent() -> Self {
        Self { notify: false }
    }
}

impl Default for NotifyOptions {
    fn default() -> Self {
        Self { notify: true }
    }
}

/// Mutation channel configuration.
#[derive(Clone)]
pub struct MutationOptions {
    pub mutation_fn: MutationFn,
    pub mutation_key: Option<QueryKey>,
    pub retry: Option<u32>,
}

impl MutationOptions {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, QueryError>> + Send + 'static,
    {
        Self {
            mutation_fn: Arc::new(
                move |value| -> BoxFuture<Result<Value, QueryError>> { Box::pin(f(value)) },
            ),
            mutation_key: None,
            retry: None,
        }
    }
}

impl fmt::Debug for MutationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("mutation_key", &self.mutation_key)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Ends a subscription when invoked. Dropping it leaves the subscription
/// in place.
#[must_use = "dropping an Unsubscribe leaves the listener attached"]
pub struct Unsubscribe(Box<dyn FnOnce() + Send>);

impl Unsubscribe {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn unsubscribe(self) {
        (self.0)()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Unsubscribe")
    }
}
