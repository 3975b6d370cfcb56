//! Binding an observable to one external query.
//!
//! [`synced_query`] creates exactly one [`QueryObserver`] and, when a
//! mutation is configured, exactly one [`MutationObserver`]. Both live as
//! long as the returned [`SyncedQuery`]; a key change retargets the
//! existing observer instead of replacing it.
//!
//! With a dynamic key, the key function runs inside [`observe`]. Each run
//! emits a [`BindingEvent::KeyChanged`] that the binding turns into a fresh
//! options snapshot, pushed to the observer silently. The most recent key
//! always wins.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;
use tether_value::{observe, Observation, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{MutationObserver, QueryClient, QueryObserver};
use crate::error::{QueryError, SyncError, SyncResult};
use crate::notify::NotifyManager;
use crate::synced::{SyncSetter, SyncSource, SyncUpdate, SyncedOptions, UpdateFn};
use crate::types::{
    Listener, MutationOptions, NotifyOptions, QueryKey, QueryKeySource, QueryObserverOptions,
    QueryOptions, QueryResult, QueryStatus, Unsubscribe,
};

/// Everything needed to bind one observable to one query.
pub struct SyncedQueryParams {
    pub query_client: Arc<dyn QueryClient>,
    pub query: QueryOptions,
    /// Write channel. Without it the binding is read-only.
    pub mutation: Option<MutationOptions>,
    /// Carried through to the store's sync wiring.
    pub synced: SyncedOptions,
}

impl SyncedQueryParams {
    pub fn new(query_client: Arc<dyn QueryClient>, query: QueryOptions) -> Self {
        Self {
            query_client,
            query,
            mutation: None,
            synced: SyncedOptions::default(),
        }
    }

    pub fn with_mutation(mut self, mutation: MutationOptions) -> Self {
        self.mutation = Some(mutation);
        self
    }

    pub fn with_synced(mut self, synced: SyncedOptions) -> Self {
        self.synced = synced;
        self
    }
}

/// Inputs that change a binding's targeting.
#[derive(Clone, Debug, PartialEq)]
pub enum BindingEvent {
    /// The dynamic key function produced a new key.
    KeyChanged(QueryKey),
}

type InitialWaiter = oneshot::Sender<Result<Value, QueryError>>;

struct BindingState {
    latest_options: Arc<QueryObserverOptions>,
    key_from_fn: Option<QueryKey>,
    pending_initial: Option<InitialWaiter>,
}

struct Binding {
    id: Uuid,
    dynamic: bool,
    state: Mutex<BindingState>,
    observer: OnceLock<Arc<dyn QueryObserver>>,
}

impl Binding {
    fn lock(&self) -> MutexGuard<'_, BindingState> {
        self.state.lock().expect("binding lock poisoned")
    }

    fn latest_options(&self) -> Arc<QueryObserverOptions> {
        Arc::clone(&self.lock().latest_options)
    }

    fn handle(&self, event: BindingEvent) {
        match event {
            BindingEvent::KeyChanged(key) => {
                debug!(binding_id = %self.id, key = %key.hash(), "query key recomputed");
                self.update_query_options(key);
            }
        }
    }

    /// Record the key function's latest key, replace `latest_options` with a
    /// new snapshot and push it to the observer without notifying listeners.
    ///
    /// The push happens under the binding lock so the observer always ends
    /// up on the snapshot stored last.
    fn update_query_options(&self, key_from_fn: QueryKey) {
        let mut state = self.lock();
        state.key_from_fn = Some(key_from_fn);
        let mut next = QueryObserverOptions::clone(&state.latest_options);
        if self.dynamic {
            if let Some(key) = &state.key_from_fn {
                next.set_query_key(key.clone());
            }
        }
        let next = Arc::new(next);
        state.latest_options = Arc::clone(&next);
        if let Some(observer) = self.observer.get() {
            observer.set_options(next, NotifyOptions::silent());
        }
    }

    fn take_pending(&self) -> Option<InitialWaiter> {
        self.lock().pending_initial.take()
    }

    fn deliver(&self, result: QueryResult, update: &UpdateFn) {
        match result.status {
            QueryStatus::Success => {
                let value = result.data.unwrap_or_default();
                if let Some(waiter) = self.take_pending() {
                    debug!(binding_id = %self.id, "initial load resolved");
                    let _ = waiter.send(Ok(value.clone()));
                }
                update(SyncUpdate { value });
            }
            QueryStatus::Error => {
                if let Some(waiter) = self.take_pending() {
                    let error = result
                        .error
                        .unwrap_or_else(|| QueryError::new("query failed without an error"));
                    warn!(binding_id = %self.id, %error, "initial load failed");
                    let _ = waiter.send(Err(error));
                }
            }
            QueryStatus::Pending => {}
        }
    }
}

/// Write-back through the binding's mutation channel.
pub struct QuerySetter {
    binding_id: Uuid,
    mutator: Arc<dyn MutationObserver>,
}

#[async_trait]
impl SyncSetter for QuerySetter {
    async fn set(&self, value: Value) -> SyncResult<Value> {
        debug!(binding_id = %self.binding_id, "forwarding write to mutation channel");
        self.mutator.mutate(value).await.map_err(|error| {
            warn!(binding_id = %self.binding_id, %error, "mutation failed");
            SyncError::Mutation(error)
        })
    }
}

/// A live binding between an observable and an external query.
pub struct SyncedQuery {
    binding: Arc<Binding>,
    observer: Arc<dyn QueryObserver>,
    setter: Option<QuerySetter>,
    notify: Arc<NotifyManager>,
    options: SyncedOptions,
    _key_observation: Option<Observation>,
}

impl SyncedQuery {
    /// Identifier used in this binding's log records.
    pub fn binding_id(&self) -> Uuid {
        self.binding.id
    }

    /// The options snapshot the observer was last given.
    pub fn latest_options(&self) -> Arc<QueryObserverOptions> {
        self.binding.latest_options()
    }

    /// Retarget the binding. Dynamic-key bindings feed this from their key
    /// function; a static binding ignores the key and only refreshes its
    /// options snapshot.
    pub fn handle(&self, event: BindingEvent) {
        self.binding.handle(event);
    }
}

/// Bind an observable to the query described by `params`.
pub fn synced_query(params: SyncedQueryParams) -> SyncedQuery {
    let SyncedQueryParams {
        query_client,
        query,
        mutation,
        synced,
    } = params;

    let binding = Arc::new(Binding {
        id: Uuid::now_v7(),
        dynamic: query.query_key.is_dynamic(),
        state: Mutex::new(BindingState {
            latest_options: Arc::new(query_client.default_query_options(&query)),
            key_from_fn: None,
            pending_initial: None,
        }),
        observer: OnceLock::new(),
    });

    let key_observation = match &query.query_key {
        QueryKeySource::Dynamic(key_fn) => {
            let key_fn = Arc::clone(key_fn);
            let binding = Arc::clone(&binding);
            Some(observe(move || {
                let key = key_fn();
                binding.handle(BindingEvent::KeyChanged(key));
            }))
        }
        QueryKeySource::Static(_) => None,
    };

    let observer = query_client.create_observer(binding.latest_options());
    if binding.observer.set(Arc::clone(&observer)).is_err() {
        unreachable!("a binding's observer is created once, at construction");
    }

    let setter = mutation.map(|options| QuerySetter {
        binding_id: binding.id,
        mutator: query_client.create_mutation(options),
    });

    info!(
        binding_id = %binding.id,
        dynamic = binding.dynamic,
        writable = setter.is_some(),
        "synced query bound"
    );

    SyncedQuery {
        binding,
        observer,
        setter,
        notify: query_client.notify_manager(),
        options: synced,
        _key_observation: key_observation,
    }
}

#[async_trait]
impl SyncSource for SyncedQuery {
    /// The cached result if there is one, otherwise the first successful
    /// delivery to a subscriber. Only the most recent waiting `get` is kept;
    /// an earlier one fails with [`SyncError::InitialLoadSuperseded`].
    async fn get(&self) -> SyncResult<Value> {
        let waiter = {
            let mut state = self.binding.lock();
            let result = self.observer.optimistic_result(&state.latest_options);
            if !result.is_loading() {
                if result.status == QueryStatus::Error {
                    if let Some(error) = result.error {
                        return Err(SyncError::Query(error));
                    }
                }
                return Ok(result.data.unwrap_or_default());
            }
            let (tx, rx) = oneshot::channel();
            if state.pending_initial.replace(tx).is_some() {
                warn!(binding_id = %self.binding.id, "pending initial load superseded");
            }
            rx
        };
        debug!(binding_id = %self.binding.id, "waiting for first successful result");
        match waiter.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(SyncError::Query(error)),
            Err(_) => Err(SyncError::InitialLoadSuperseded),
        }
    }

    fn subscribe(&self, update: UpdateFn) -> Unsubscribe {
        let binding = Arc::downgrade(&self.binding);
        let listener: Listener = self.notify.batch_calls(move |result: QueryResult| {
            if let Some(binding) = binding.upgrade() {
                binding.deliver(result, &update);
            }
        });
        let unsubscribe = self.observer.subscribe(listener);
        // Redeliver anything produced before the listener attached.
        self.observer.update_result();
        debug!(binding_id = %self.binding.id, "subscribed to query observer");
        unsubscribe
    }

    fn setter(&self) -> Option<&dyn SyncSetter> {
        self.setter.as_ref().map(|s| s as &dyn SyncSetter)
    }

    fn options(&self) -> &SyncedOptions {
        &self.options
    }
}
