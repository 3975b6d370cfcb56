//! In-memory query cache for testing and embedded use.
//!
//! [`InMemoryQueryClient`] keeps query results in a `HashMap` keyed by
//! [`QueryKey::hash`]. Observers follow the key of their latest options:
//! whenever an entry changes, every observer currently targeting it is
//! notified inside one [`NotifyManager::batch`]. Fetches run on the ambient
//! tokio runtime; without one, observers never start fetches on their own.
//!
//! An entry nobody observes is evicted once its `gc_time` has passed. The
//! sweep is scheduled on the runtime when the last observer lets go, and
//! [`InMemoryQueryClient::collect_garbage`] runs it on demand.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tether_value::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::client::{MutationObserver, QueryClient, QueryObserver};
use crate::config::QueryClientConfig;
use crate::error::QueryError;
use crate::notify::NotifyManager;
use crate::types::{
    BoxFuture, FetchStatus, Listener, MutationOptions, NotifyOptions, QueryKey, QueryKeySource,
    QueryObserverOptions, QueryOptions, QueryResult, QueryStatus, Unsubscribe,
};

type FetchWaiter = oneshot::Sender<Result<Value, QueryError>>;

struct CacheEntry {
    result: QueryResult,
    fetching: bool,
    /// Callers joined to the fetch in flight.
    waiters: Vec<FetchWaiter>,
    updated_at: Option<DateTime<Utc>>,
    gc_time: Duration,
    /// Set while no observer targets the entry.
    unobserved_since: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn new(gc_time: Duration) -> Self {
        Self {
            result: QueryResult::default(),
            fetching: false,
            waiters: Vec::new(),
            updated_at: None,
            gc_time,
            unobserved_since: Some(Utc::now()),
        }
    }

    fn current(&self) -> QueryResult {
        let mut result = self.result.clone();
        if self.fetching {
            result.fetch_status = FetchStatus::Fetching;
        }
        result
    }

    fn is_stale(&self, stale_time: Duration) -> bool {
        match self.updated_at {
            None => true,
            Some(at) => elapsed_since(at, Utc::now()) >= stale_time,
        }
    }

    fn is_collectable(&self, now: DateTime<Utc>) -> bool {
        !self.fetching
            && self
                .unobserved_since
                .is_some_and(|since| elapsed_since(since, now) >= self.gc_time)
    }
}

/// Zero when the clock went backwards.
fn elapsed_since(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - at).to_std().unwrap_or(Duration::ZERO)
}

struct Shared {
    config: QueryClientConfig,
    notify: Arc<NotifyManager>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    observers: Mutex<Vec<Weak<ObserverInner>>>,
}

impl Shared {
    fn cache(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.cache.lock().expect("query cache lock poisoned")
    }

    fn live_observers(&self) -> Vec<Arc<ObserverInner>> {
        let mut observers = self.observers.lock().expect("observer registry lock poisoned");
        observers.retain(|o| o.strong_count() > 0);
        observers.iter().filter_map(Weak::upgrade).collect()
    }

    /// Hashes targeted by an observer with at least one listener.
    fn observed_hashes(&self) -> HashSet<String> {
        self.live_observers()
            .into_iter()
            .filter(|o| !o.listeners().is_empty())
            .map(|o| o.options().query_hash.clone())
            .collect()
    }

    fn result_for(&self, options: &QueryObserverOptions) -> QueryResult {
        self.cache()
            .get(&options.query_hash)
            .map(CacheEntry::current)
            .unwrap_or_default()
    }

    fn should_fetch(&self, options: &QueryObserverOptions) -> bool {
        if !options.enabled || options.query_fn.is_none() {
            return false;
        }
        self.cache()
            .get(&options.query_hash)
            .map_or(true, |entry| !entry.fetching && entry.is_stale(options.stale_time))
    }

    fn entry<'a>(
        cache: &'a mut HashMap<String, CacheEntry>,
        hash: &str,
        gc_time: Duration,
    ) -> &'a mut CacheEntry {
        let entry = cache
            .entry(hash.to_string())
            .or_insert_with(|| CacheEntry::new(gc_time));
        entry.gc_time = entry.gc_time.max(gc_time);
        entry
    }

    /// Mark the entry as fetching. False if a fetch is already in flight.
    fn begin_fetch(&self, options: &QueryObserverOptions) -> bool {
        let mut cache = self.cache();
        let entry = Self::entry(&mut cache, &options.query_hash, options.gc_time);
        !std::mem::replace(&mut entry.fetching, true)
    }

    /// Mark the entry as fetching, or hand back a receiver for the outcome
    /// of the fetch already in flight.
    fn begin_or_join(
        &self,
        options: &QueryObserverOptions,
    ) -> Option<oneshot::Receiver<Result<Value, QueryError>>> {
        let mut cache = self.cache();
        let entry = Self::entry(&mut cache, &options.query_hash, options.gc_time);
        if entry.fetching {
            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            return Some(rx);
        }
        entry.fetching = true;
        None
    }

    fn finish_fetch(&self, hash: &str, outcome: &Result<Value, QueryError>) {
        let waiters = {
            let mut cache = self.cache();
            let entry = Self::entry(&mut cache, hash, self.config.gc_time());
            entry.fetching = false;
            match outcome {
                Ok(data) => {
                    entry.result = QueryResult::success(data.clone());
                    entry.updated_at = Some(Utc::now());
                }
                Err(error) => {
                    entry.result.status = QueryStatus::Error;
                    entry.result.fetch_status = FetchStatus::Idle;
                    entry.result.error = Some(error.clone());
                }
            }
            std::mem::take(&mut entry.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        self.notify_key(hash);
    }

    fn write_data(&self, key: &QueryKey, data: Value) {
        let hash = key.hash();
        {
            let mut cache = self.cache();
            let entry = Self::entry(&mut cache, &hash, self.config.gc_time());
            entry.result.status = QueryStatus::Success;
            entry.result.data = Some(data);
            entry.result.error = None;
            entry.updated_at = Some(Utc::now());
        }
        self.notify_key(&hash);
    }

    /// Deliver the current result to every live observer targeting `hash`.
    fn notify_key(&self, hash: &str) {
        let targets: Vec<Arc<ObserverInner>> = self
            .live_observers()
            .into_iter()
            .filter(|o| o.options().query_hash == hash)
            .collect();
        if targets.is_empty() {
            return;
        }
        self.notify.batch(|| {
            for observer in &targets {
                observer.deliver(self.result_for(&observer.options()));
            }
        });
    }

    fn spawn_fetch(self: &Arc<Self>, options: Arc<QueryObserverOptions>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %options.query_hash, "no tokio runtime, fetch not started");
            return;
        };
        if !self.begin_fetch(&options) {
            return;
        }
        let shared = Arc::clone(self);
        runtime.spawn(async move {
            let _ = shared.run_fetch(&options).await;
        });
    }

    /// Run the query function with retries and record the outcome. The
    /// entry must already be marked as fetching.
    async fn run_fetch(&self, options: &QueryObserverOptions) -> Result<Value, QueryError> {
        debug!(key = %options.query_hash, "fetch started");
        let outcome = match &options.query_fn {
            Some(query_fn) => {
                let key = options.query_key.clone();
                with_retry(&self.config, options.retry, &options.query_hash, || {
                    query_fn(key.clone())
                })
                .await
            }
            None => Err(QueryError::new("no query function configured")),
        };
        match &outcome {
            Ok(_) => debug!(key = %options.query_hash, "fetch succeeded"),
            Err(error) => warn!(key = %options.query_hash, %error, "fetch failed"),
        }
        self.finish_fetch(&options.query_hash, &outcome);
        outcome
    }

    /// An observer stopped targeting `options`' entry. Start its gc clock if
    /// nothing else observes it, and schedule a sweep for when it runs out.
    fn release(self: &Arc<Self>, options: &QueryObserverOptions) {
        if self.observed_hashes().contains(&options.query_hash) {
            return;
        }
        {
            let mut cache = self.cache();
            let Some(entry) = cache.get_mut(&options.query_hash) else {
                return;
            };
            entry.gc_time = entry.gc_time.max(options.gc_time);
            entry.unobserved_since = Some(Utc::now());
        }
        debug!(key = %options.query_hash, gc_time = ?options.gc_time, "query unobserved");
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let shared = Arc::downgrade(self);
        let delay = options.gc_time;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.collect_garbage();
            }
        });
    }

    /// Evict every unobserved entry whose gc time has passed.
    fn collect_garbage(&self) -> usize {
        let observed = self.observed_hashes();
        let now = Utc::now();
        let mut cache = self.cache();
        let before = cache.len();
        cache.retain(|hash, entry| {
            if observed.contains(hash) {
                entry.unobserved_since = None;
                return true;
            }
            entry.unobserved_since.get_or_insert(now);
            !entry.is_collectable(now)
        });
        let evicted = before - cache.len();
        if evicted > 0 {
            debug!(evicted, remaining = cache.len(), "query cache collected");
        }
        evicted
    }
}

async fn with_retry<F>(
    config: &QueryClientConfig,
    retries: u32,
    label: &str,
    mut attempt: F,
) -> Result<Value, QueryError>
where
    F: FnMut() -> BoxFuture<Result<Value, QueryError>>,
{
    let mut failures = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(error) if failures < retries => {
                failures += 1;
                let delay = config.retry_delay(failures);
                debug!(label, attempt = failures, ?delay, %error, "retrying");
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

/// An in-memory implementation of [`QueryClient`].
///
/// Cloning the client shares its cache. Data is lost when the last clone
/// is dropped.
#[derive(Clone)]
pub struct InMemoryQueryClient {
    shared: Arc<Shared>,
}

impl InMemoryQueryClient {
    pub fn new(config: QueryClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                notify: Arc::new(NotifyManager::new()),
                cache: Mutex::new(HashMap::new()),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &QueryClientConfig {
        &self.shared.config
    }

    /// Store `data` as the successful result for `key` and notify its
    /// observers.
    pub fn set_query_data(&self, key: &QueryKey, data: Value) {
        self.shared.write_data(key, data);
    }

    pub fn get_query_data(&self, key: &QueryKey) -> Option<Value> {
        self.shared
            .cache()
            .get(&key.hash())
            .and_then(|entry| entry.result.data.clone())
    }

    /// The cached result for `key`, if the key has ever been touched.
    pub fn query_state(&self, key: &QueryKey) -> Option<QueryResult> {
        self.shared.cache().get(&key.hash()).map(CacheEntry::current)
    }

    pub fn data_updated_at(&self, key: &QueryKey) -> Option<DateTime<Utc>> {
        self.shared
            .cache()
            .get(&key.hash())
            .and_then(|entry| entry.updated_at)
    }

    /// Run the query now, record the outcome and notify observers of its
    /// key. A dynamic key is evaluated once. If a fetch for the key is
    /// already in flight, its outcome is awaited instead.
    pub async fn fetch_query(&self, options: &QueryOptions) -> Result<Value, QueryError> {
        let mut defaulted = self.shared.config.apply(options);
        if let QueryKeySource::Dynamic(key_fn) = &options.query_key {
            defaulted.set_query_key(key_fn());
        }
        match self.shared.begin_or_join(&defaulted) {
            Some(in_flight) => {
                debug!(key = %defaulted.query_hash, "joining fetch in flight");
                in_flight
                    .await
                    .unwrap_or_else(|_| Err(QueryError::new("fetch in flight was abandoned")))
            }
            None => self.shared.run_fetch(&defaulted).await,
        }
    }

    /// Evict unobserved entries whose gc time has passed. Returns how many
    /// were removed.
    pub fn collect_garbage(&self) -> usize {
        self.shared.collect_garbage()
    }
}

impl Default for InMemoryQueryClient {
    fn default() -> Self {
        Self::new(QueryClientConfig::default())
    }
}

impl QueryClient for InMemoryQueryClient {
    fn default_query_options(&self, options: &QueryOptions) -> QueryObserverOptions {
        self.shared.config.apply(options)
    }

    fn create_observer(&self, options: Arc<QueryObserverOptions>) -> Arc<dyn QueryObserver> {
        let inner = Arc::new(ObserverInner {
            options: RwLock::new(options),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        });
        self.shared
            .observers
            .lock()
            .expect("observer registry lock poisoned")
            .push(Arc::downgrade(&inner));
        Arc::new(InMemoryQueryObserver {
            shared: Arc::clone(&self.shared),
            inner,
        })
    }

    fn create_mutation(&self, options: MutationOptions) -> Arc<dyn MutationObserver> {
        Arc::new(InMemoryMutationObserver {
            retry: options.retry.unwrap_or(self.shared.config.mutation_retry),
            config: self.shared.config.clone(),
            options,
        })
    }

    fn notify_manager(&self) -> Arc<NotifyManager> {
        Arc::clone(&self.shared.notify)
    }
}

struct ObserverInner {
    options: RwLock<Arc<QueryObserverOptions>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

impl ObserverInner {
    fn options(&self) -> Arc<QueryObserverOptions> {
        Arc::clone(&self.options.read().expect("observer lock poisoned"))
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners.lock().expect("observer lock poisoned")
    }

    fn deliver(&self, result: QueryResult) {
        let listeners: Vec<Listener> = self.listeners().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener(result.clone());
        }
    }
}

/// An observer on an [`InMemoryQueryClient`] cache entry.
pub struct InMemoryQueryObserver {
    shared: Arc<Shared>,
    inner: Arc<ObserverInner>,
}

impl InMemoryQueryObserver {
    /// The options the observer currently targets.
    pub fn options(&self) -> Arc<QueryObserverOptions> {
        self.inner.options()
    }
}

impl QueryObserver for InMemoryQueryObserver {
    fn optimistic_result(&self, options: &Arc<QueryObserverOptions>) -> QueryResult {
        let mut result = self.shared.result_for(options);
        if self.shared.should_fetch(options) {
            result.fetch_status = FetchStatus::Fetching;
        }
        result
    }

    fn set_options(&self, options: Arc<QueryObserverOptions>, notify: NotifyOptions) {
        let previous = std::mem::replace(
            &mut *self.inner.options.write().expect("observer lock poisoned"),
            Arc::clone(&options),
        );
        debug!(key = %options.query_hash, notify = notify.notify, "observer options updated");

        let moved = previous.query_hash != options.query_hash;
        let retargeted = moved || !previous.enabled;
        let observed = !self.inner.listeners().is_empty();
        if moved && observed {
            self.shared.release(&previous);
        }
        if retargeted && observed && self.shared.should_fetch(&options) {
            self.shared.spawn_fetch(Arc::clone(&options));
        }
        if notify.notify {
            let result = self.shared.result_for(&options);
            self.shared.notify.batch(|| self.inner.deliver(result));
        }
    }

    fn subscribe(&self, listener: Listener) -> Unsubscribe {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let first = {
            let mut listeners = self.inner.listeners();
            listeners.push((id, listener));
            listeners.len() == 1
        };
        if first {
            let options = self.inner.options();
            if self.shared.should_fetch(&options) {
                self.shared.spawn_fetch(options);
            }
        }
        let inner = Arc::downgrade(&self.inner);
        let shared = Arc::downgrade(&self.shared);
        Unsubscribe::new(move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let last = {
                let mut listeners = inner.listeners();
                listeners.retain(|(i, _)| *i != id);
                listeners.is_empty()
            };
            if !last {
                return;
            }
            if let Some(shared) = shared.upgrade() {
                shared.release(&inner.options());
            }
        })
    }

    fn update_result(&self) {
        let result = self.shared.result_for(&self.inner.options());
        self.shared.notify.batch(|| self.inner.deliver(result));
    }
}

/// A mutation channel that runs its mutation function with retries.
pub struct InMemoryMutationObserver {
    options: MutationOptions,
    retry: u32,
    config: QueryClientConfig,
}

#[async_trait]
impl MutationObserver for InMemoryMutationObserver {
    async fn mutate(&self, variables: Value) -> Result<Value, QueryError> {
        let label = self
            .options
            .mutation_key
            .as_ref()
            .map_or_else(|| "mutation".to_string(), QueryKey::hash);
        let mutation_fn = Arc::clone(&self.options.mutation_fn);
        debug!(label = %label, "mutation started");
        with_retry(&self.config, self.retry, &label, || mutation_fn(variables.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;

    fn client() -> InMemoryQueryClient {
        InMemoryQueryClient::new(QueryClientConfig {
            retry_delay_ms: 0,
            ..Default::default()
        })
    }

    fn todos() -> QueryKey {
        QueryKey::from_parts(["todos"])
    }

    fn channel_listener() -> (Listener, mpsc::UnboundedReceiver<QueryResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: Listener = Arc::new(move |result: QueryResult| {
            let _ = tx.send(result);
        });
        (listener, rx)
    }

    async fn next_success(rx: &mut mpsc::UnboundedReceiver<QueryResult>) -> QueryResult {
        loop {
            let result = rx.recv().await.unwrap();
            if result.is_success() {
                return result;
            }
        }
    }

    #[test]
    fn set_then_get_query_data() {
        let client = client();
        assert!(client.get_query_data(&todos()).is_none());
        client.set_query_data(&todos(), Value::from("a"));
        assert_eq!(client.get_query_data(&todos()), Some(Value::from("a")));
        assert!(client.query_state(&todos()).unwrap().is_success());
        assert!(client.data_updated_at(&todos()).is_some());
    }

    #[test]
    fn optimistic_result_reports_upcoming_fetch() {
        let client = client();
        let options = QueryOptions::new(todos()).with_query_fn(|_| async { Ok::<_, QueryError>(Value::Null) });
        let defaulted = Arc::new(client.default_query_options(&options));
        let observer = client.create_observer(Arc::clone(&defaulted));
        assert!(observer.optimistic_result(&defaulted).is_loading());

        let disabled = Arc::new(client.default_query_options(&options.clone().enabled(false)));
        assert!(!observer.optimistic_result(&disabled).is_loading());

        client.set_query_data(&todos(), Value::from(1));
        let result = observer.optimistic_result(&defaulted);
        assert!(!result.is_loading());
        assert_eq!(result.data, Some(Value::from(1)));
    }

    #[test]
    fn no_query_fn_means_idle() {
        let client = client();
        let defaulted = Arc::new(client.default_query_options(&QueryOptions::new(todos())));
        let observer = client.create_observer(Arc::clone(&defaulted));
        let result = observer.optimistic_result(&defaulted);
        assert_eq!(result.status, QueryStatus::Pending);
        assert_eq!(result.fetch_status, FetchStatus::Idle);
    }

    #[tokio::test]
    async fn subscribing_starts_fetch() {
        let client = client();
        let options = QueryOptions::new(todos()).with_query_fn(|key: QueryKey| async move {
            Ok::<_, QueryError>(Value::from(key.hash()))
        });
        let observer = client.create_observer(Arc::new(client.default_query_options(&options)));
        let (listener, mut rx) = channel_listener();
        let _unsubscribe = observer.subscribe(listener);

        let result = next_success(&mut rx).await;
        assert_eq!(result.data, Some(Value::from(r#"["todos"]"#)));
        assert_eq!(client.get_query_data(&todos()), result.data);
    }

    #[tokio::test]
    async fn fetch_query_retries_then_records_error() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let options = QueryOptions::new(todos()).retry(2).with_query_fn({
            let calls = Arc::clone(&calls);
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<Value, _>(QueryError::new("offline")) }
            }
        });
        let err = client.fetch_query(&options).await.unwrap_err();
        assert_eq!(err, QueryError::new("offline"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let state = client.query_state(&todos()).unwrap();
        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(state.fetch_status, FetchStatus::Idle);
    }

    #[tokio::test]
    async fn fetch_query_evaluates_dynamic_key() {
        let client = client();
        let options = QueryOptions::new(QueryKeySource::dynamic(|| QueryKey::from_parts(["user", "7"])))
            .with_query_fn(|_| async { Ok::<_, QueryError>(Value::from(7)) });
        client.fetch_query(&options).await.unwrap();
        assert_eq!(
            client.get_query_data(&QueryKey::from_parts(["user", "7"])),
            Some(Value::from(7))
        );
    }

    #[test]
    fn silent_set_options_does_not_notify() {
        let client = client();
        let defaulted = Arc::new(client.default_query_options(&QueryOptions::new(todos())));
        let observer = client.create_observer(Arc::clone(&defaulted));
        let (listener, mut rx) = channel_listener();
        let _unsubscribe = observer.subscribe(listener);

        let mut next = QueryObserverOptions::clone(&defaulted);
        next.set_query_key(QueryKey::from_parts(["other"]));
        observer.set_options(Arc::new(next.clone()), NotifyOptions::silent());
        assert!(rx.try_recv().is_err());

        observer.set_options(Arc::new(next), NotifyOptions::default());
        assert_eq!(rx.try_recv().unwrap().status, QueryStatus::Pending);
    }

    #[test]
    fn observers_follow_their_latest_key() {
        let client = client();
        let defaulted = Arc::new(client.default_query_options(&QueryOptions::new(todos())));
        let observer = client.create_observer(Arc::clone(&defaulted));
        let (listener, mut rx) = channel_listener();
        let _unsubscribe = observer.subscribe(listener);

        let mut next = QueryObserverOptions::clone(&defaulted);
        next.set_query_key(QueryKey::from_parts(["other"]));
        observer.set_options(Arc::new(next), NotifyOptions::silent());

        client.set_query_data(&todos(), Value::from("stale key"));
        assert!(rx.try_recv().is_err());
        client.set_query_data(&QueryKey::from_parts(["other"]), Value::from("fresh"));
        assert_eq!(rx.try_recv().unwrap().data, Some(Value::from("fresh")));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let client = client();
        let observer =
            client.create_observer(Arc::new(client.default_query_options(&QueryOptions::new(todos()))));
        let (listener, mut rx) = channel_listener();
        observer.subscribe(listener).unsubscribe();
        client.set_query_data(&todos(), Value::from(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn update_result_redelivers_current_data() {
        let client = client();
        client.set_query_data(&todos(), Value::from(5));
        let observer =
            client.create_observer(Arc::new(client.default_query_options(&QueryOptions::new(todos()))));
        let (listener, mut rx) = channel_listener();
        let _unsubscribe = observer.subscribe(listener);
        observer.update_result();
        assert_eq!(rx.try_recv().unwrap().data, Some(Value::from(5)));
    }

    fn gc_client() -> InMemoryQueryClient {
        InMemoryQueryClient::new(QueryClientConfig {
            retry_delay_ms: 0,
            gc_time_ms: 0,
            ..Default::default()
        })
    }

    #[test]
    fn unobserved_entry_is_collected() {
        let client = gc_client();
        client.set_query_data(&todos(), Value::from(1));
        assert_eq!(client.collect_garbage(), 1);
        assert!(client.get_query_data(&todos()).is_none());
    }

    #[test]
    fn entry_within_gc_time_is_kept() {
        let client = client();
        client.set_query_data(&todos(), Value::from(1));
        assert_eq!(client.collect_garbage(), 0);
        assert_eq!(client.get_query_data(&todos()), Some(Value::from(1)));
    }

    #[test]
    fn observed_entry_survives_until_released() {
        let client = gc_client();
        let observer =
            client.create_observer(Arc::new(client.default_query_options(&QueryOptions::new(todos()))));
        let (listener, _rx) = channel_listener();
        let unsubscribe = observer.subscribe(listener);
        client.set_query_data(&todos(), Value::from(1));
        assert_eq!(client.collect_garbage(), 0);
        assert_eq!(client.get_query_data(&todos()), Some(Value::from(1)));

        unsubscribe.unsubscribe();
        assert_eq!(client.collect_garbage(), 1);
    }

    #[test]
    fn retargeting_releases_previous_key() {
        let client = gc_client();
        let defaulted = Arc::new(client.default_query_options(&QueryOptions::new(todos())));
        let observer = client.create_observer(Arc::clone(&defaulted));
        let (listener, _rx) = channel_listener();
        let _unsubscribe = observer.subscribe(listener);
        client.set_query_data(&todos(), Value::from(1));

        let mut next = QueryObserverOptions::clone(&defaulted);
        next.set_query_key(QueryKey::from_parts(["other"]));
        observer.set_options(Arc::new(next), NotifyOptions::silent());
        client.set_query_data(&QueryKey::from_parts(["other"]), Value::from(2));

        assert_eq!(client.collect_garbage(), 1);
        assert!(client.get_query_data(&todos()).is_none());
        assert_eq!(
            client.get_query_data(&QueryKey::from_parts(["other"])),
            Some(Value::from(2))
        );
    }

    #[tokio::test]
    async fn release_schedules_collection() {
        let client = gc_client();
        let observer =
            client.create_observer(Arc::new(client.default_query_options(&QueryOptions::new(todos()))));
        let (listener, _rx) = channel_listener();
        let unsubscribe = observer.subscribe(listener);
        client.set_query_data(&todos(), Value::from(1));

        unsubscribe.unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(client.query_state(&todos()).is_none());
    }

    #[tokio::test]
    async fn fetch_query_joins_fetch_in_flight() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let gate = Arc::new(tokio::sync::Notify::new());
        let options = QueryOptions::new(todos()).with_query_fn({
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Ok::<_, QueryError>(Value::from("once"))
                }
            }
        });
        let observer = client.create_observer(Arc::new(client.default_query_options(&options)));
        let (listener, mut rx) = channel_listener();
        let _unsubscribe = observer.subscribe(listener);
        assert!(client.query_state(&todos()).unwrap().is_loading());

        gate.notify_one();
        let value = client.fetch_query(&options).await.unwrap();
        assert_eq!(value, Value::from("once"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(next_success(&mut rx).await.data, Some(Value::from("once")));
    }

    #[tokio::test]
    async fn mutation_retries_until_success() {
        let client = client();
        let calls = Arc::new(AtomicU32::new(0));
        let mutation = MutationOptions {
            retry: Some(1),
            ..MutationOptions::new({
                let calls = Arc::clone(&calls);
                move |value: Value| {
                    let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
                    async move {
                        if first {
                            Err(QueryError::new("conflict"))
                        } else {
                            Ok(value)
                        }
                    }
                }
            })
        };
        let mutator = client.create_mutation(mutation);
        assert_eq!(mutator.mutate(Value::from("x")).await.unwrap(), Value::from("x"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mutation_without_retry_fails_verbatim() {
        let client = client();
        let mutator = client.create_mutation(MutationOptions::new(|_| async {
            Err::<Value, _>(QueryError::new("forbidden"))
        }));
        assert_eq!(mutator.mutate(Value::Null).await.unwrap_err(), QueryError::new("forbidden"));
    }
}
