use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{
    FetchMoreOptions, FetchPolicy, QueryConfig, QueryHandle, QuerySnapshot,
    SubscribeOptions, Subscription, Variables,
};

/// Async fetch function driving a [`FetchQuery`].
pub type FetchFn<T, E> = Arc<
    dyn Fn(Option<Variables>) -> BoxFuture<'static, Result<T, E>>
        + Send
        + Sync,
>;

struct FetchState<T, E> {
    snapshot: QuerySnapshot<T, E>,
    config: QueryConfig,
    /// Bumped when a fetch starts; a fetch that finishes under an older
    /// generation has been superseded and must not touch the snapshot.
    generation: u64,
    poller: Option<JoinHandle<()>>,
}

/// Eager query engine over a caller-supplied fetch function.
///
/// Owns the loading/error/data bookkeeping around each fetch: the loading
/// flag is set synchronously when a fetch begins, errors are cleared on
/// start, and a failed fetch keeps previously fetched data visible
/// alongside its error. Clones share state and identity.
pub struct FetchQuery<T, E> {
    state: Arc<Mutex<FetchState<T, E>>>,
    fetch_fn: FetchFn<T, E>,
    notify: Arc<watch::Sender<()>>,
}

impl<T, E> Clone for FetchQuery<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            fetch_fn: Arc::clone(&self.fetch_fn),
            notify: Arc::clone(&self.notify),
        }
    }
}

impl<T, E> FetchQuery<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Create a query with the given configuration. An `Active`, unskipped
    /// query starts fetching immediately; a `Standby` or skipped one stays
    /// quiescent until reconfigured.
    pub fn new<F, Fut>(config: QueryConfig, fetch_fn: F) -> Self
    where
        F: Fn(Option<Variables>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (notify, _) = watch::channel(());
        let query = Self {
            state: Arc::new(Mutex::new(FetchState {
                snapshot: QuerySnapshot::quiescent(),
                config: config.clone(),
                generation: 0,
                poller: None,
            })),
            fetch_fn: Arc::new(move |variables| Box::pin(fetch_fn(variables))),
            notify: Arc::new(notify),
        };
        if Self::should_fetch(&config) {
            query.spawn_fetch(config.variables);
        }
        query
    }

    fn should_fetch(config: &QueryConfig) -> bool {
        config.fetch_policy == FetchPolicy::Active && !config.skip
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FetchState<T, E>> {
        self.state.lock().expect("fetch state poisoned")
    }

    /// Variables for an auxiliary fetch: explicit overrides win, otherwise
    /// the configured ones.
    fn effective_variables(
        &self,
        overrides: Option<Variables>,
    ) -> Option<Variables> {
        if overrides.is_some() {
            return overrides;
        }
        self.lock().config.variables.clone()
    }

    /// Mark the snapshot as fetching and claim a generation.
    fn begin_fetch(&self) -> u64 {
        let generation = {
            let mut state = self.lock();
            state.generation += 1;
            state.snapshot.loading = true;
            state.snapshot.called = true;
            state.snapshot.error = None;
            state.generation
        };
        self.notify.send_replace(());
        tracing::debug!(generation, "query fetch started");
        generation
    }

    /// Record a finished fetch, unless a newer one claimed the snapshot in
    /// the meantime.
    fn finish_fetch(
        &self,
        generation: u64,
        outcome: Result<T, E>,
    ) -> QuerySnapshot<T, E> {
        let snapshot = {
            let mut state = self.lock();
            if state.generation != generation {
                tracing::trace!(generation, "stale fetch discarded");
                return state.snapshot.clone();
            }
            match outcome {
                Ok(data) => {
                    state.snapshot.data = Some(data);
                    state.snapshot.error = None;
                }
                Err(error) => {
                    state.snapshot.error = Some(error);
                }
            }
            state.snapshot.loading = false;
            state.snapshot.clone()
        };
        self.notify.send_replace(());
        tracing::debug!(generation, "query fetch settled");
        snapshot
    }

    /// Begin a fetch without waiting for it. The loading transition is
    /// applied before this returns.
    fn spawn_fetch(&self, variables: Option<Variables>) {
        let generation = self.begin_fetch();
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = (this.fetch_fn)(variables).await;
            this.finish_fetch(generation, outcome);
        });
    }

    /// Run one fetch to completion.
    async fn run_fetch(
        &self,
        variables: Option<Variables>,
    ) -> QuerySnapshot<T, E> {
        let generation = self.begin_fetch();
        let outcome = (self.fetch_fn)(variables).await;
        self.finish_fetch(generation, outcome)
    }

    fn apply_config(&self, config: QueryConfig) {
        let (start, variables) = {
            let mut state = self.lock();
            let previous =
                std::mem::replace(&mut state.config, config.clone());
            let became_active = Self::should_fetch(&config)
                && !Self::should_fetch(&previous);
            let variables_changed = Self::should_fetch(&config)
                && previous.variables != config.variables;
            let start = (became_active && !state.snapshot.called)
                || variables_changed;
            (start, state.config.variables.clone())
        };
        if start {
            self.spawn_fetch(variables);
        }
    }

    async fn refetch_inner(
        &self,
        variables: Option<Variables>,
    ) -> QuerySnapshot<T, E> {
        let variables = {
            let mut state = self.lock();
            if let Some(variables) = variables {
                state.config.variables = Some(variables);
            }
            state.config.variables.clone()
        };
        self.run_fetch(variables).await
    }

    async fn fetch_more_inner(
        &self,
        options: FetchMoreOptions<T>,
    ) -> QuerySnapshot<T, E> {
        let FetchMoreOptions { variables, merge } = options;
        let variables = self.effective_variables(variables);
        let generation = self.begin_fetch();
        let outcome = (self.fetch_fn)(variables).await;

        let snapshot = {
            let mut state = self.lock();
            if state.generation != generation {
                tracing::trace!(generation, "stale fetch-more discarded");
                return state.snapshot.clone();
            }
            match outcome {
                Ok(page) => {
                    let existing = state.snapshot.data.take();
                    state.snapshot.data = Some(merge(existing, page));
                    state.snapshot.error = None;
                }
                Err(error) => {
                    state.snapshot.error = Some(error);
                }
            }
            state.snapshot.loading = false;
            state.snapshot.clone()
        };
        self.notify.send_replace(());
        tracing::debug!(generation, "fetch-more settled");
        snapshot
    }

    fn apply_update(
        &self,
        update: Box<dyn FnOnce(Option<T>) -> Option<T> + Send>,
    ) {
        {
            let mut state = self.lock();
            let data = state.snapshot.data.take();
            state.snapshot.data = update(data);
        }
        self.notify.send_replace(());
    }

    fn start_poll(&self, interval: Duration) {
        // The poll task only holds a weak reference, so it winds down once
        // every handle to this query is gone.
        let state = Arc::downgrade(&self.state);
        let fetch_fn = Arc::clone(&self.fetch_fn);
        let notify = Arc::clone(&self.notify);
        let handle = tokio::spawn(async move {
            poll_loop(interval, state, fetch_fn, notify).await;
        });
        let mut state = self.lock();
        if let Some(previous) = state.poller.replace(handle) {
            previous.abort();
        }
    }

    fn stop_poll(&self) {
        let mut state = self.lock();
        if let Some(poller) = state.poller.take() {
            poller.abort();
        }
    }

    fn spawn_subscription(&self, options: SubscribeOptions<T>) -> Subscription {
        let SubscribeOptions {
            mut updates,
            mut merge,
        } = options;
        let this = self.clone();
        let task = tokio::spawn(async move {
            while let Some(update) = updates.next().await {
                {
                    let mut state = this.lock();
                    let data = state.snapshot.data.take();
                    state.snapshot.data = merge(data, update);
                }
                this.notify.send_replace(());
                tracing::trace!("subscription update applied");
            }
        });
        Subscription::new(move || task.abort())
    }
}

async fn poll_loop<T, E>(
    interval: Duration,
    state: Weak<Mutex<FetchState<T, E>>>,
    fetch_fn: FetchFn<T, E>,
    notify: Arc<watch::Sender<()>>,
) where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; polling starts one interval out.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(shared) = state.upgrade() else {
            return;
        };
        let query = FetchQuery {
            state: shared,
            fetch_fn: Arc::clone(&fetch_fn),
            notify: Arc::clone(&notify),
        };
        let (active, variables) = {
            let state = query.lock();
            (
                FetchQuery::<T, E>::should_fetch(&state.config),
                state.config.variables.clone(),
            )
        };
        if active {
            query.run_fetch(variables).await;
        }
    }
}

#[async_trait]
impl<T, E> QueryHandle for FetchQuery<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Data = T;
    type Error = E;

    fn configure(&self, config: QueryConfig) {
        self.apply_config(config);
    }

    fn snapshot(&self) -> QuerySnapshot<T, E> {
        self.lock().snapshot.clone()
    }

    fn updates(&self) -> watch::Receiver<()> {
        self.notify.subscribe()
    }

    async fn refetch(
        &self,
        variables: Option<Variables>,
    ) -> QuerySnapshot<T, E> {
        self.refetch_inner(variables).await
    }

    async fn fetch_more(
        &self,
        options: FetchMoreOptions<T>,
    ) -> QuerySnapshot<T, E> {
        self.fetch_more_inner(options).await
    }

    fn update_query(
        &self,
        update: Box<dyn FnOnce(Option<T>) -> Option<T> + Send>,
    ) {
        self.apply_update(update);
    }

    fn start_polling(&self, interval: Duration) {
        self.start_poll(interval);
    }

    fn stop_polling(&self) {
        self.stop_poll();
    }

    fn subscribe_to_more(&self, options: SubscribeOptions<T>) -> Subscription {
        self.spawn_subscription(options)
    }
}
