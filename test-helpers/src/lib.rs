//! Scripted query doubles and telemetry setup shared by the integration
//! tests.
//!
//! [`ScriptedQuery`] implements [`QueryHandle`] with no behavior of its
//! own: tests drive every raw-result transition by hand and inspect every
//! operation the wrapper under test performed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use query::{
    FetchMoreOptions, QueryConfig, QueryHandle, QuerySnapshot,
    SubscribeOptions, Subscription, Variables,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Error type reported by scripted queries.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    #[error("{0}")]
    Backend(String),
}

/// Raw snapshot type served by a [`ScriptedQuery`].
pub type ScriptSnapshot = QuerySnapshot<Variables, ScriptError>;

#[derive(Default)]
struct Script {
    snapshot: ScriptSnapshot,
    configures: Vec<QueryConfig>,
    refetch_variables: Vec<Option<Variables>>,
    refetch_outcomes: VecDeque<ScriptSnapshot>,
    fetch_more_variables: Vec<Option<Variables>>,
    update_query_calls: usize,
    polling_intervals: Vec<Duration>,
    polling_stops: usize,
    subscriptions: usize,
}

/// A fully scripted [`QueryHandle`].
#[derive(Clone)]
pub struct ScriptedQuery {
    script: Arc<Mutex<Script>>,
    notify: Arc<watch::Sender<()>>,
}

impl ScriptedQuery {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(());
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            notify: Arc::new(notify),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().expect("script poisoned")
    }

    fn mutate(&self, mutation: impl FnOnce(&mut Script)) {
        mutation(&mut self.lock());
        self.notify.send_replace(());
    }

    /// Put the raw result into a loading state.
    pub fn begin_loading(&self) {
        self.mutate(|script| {
            script.snapshot.loading = true;
            script.snapshot.called = true;
            script.snapshot.error = None;
        });
        tracing::debug!("scripted query loading");
    }

    /// Settle the raw result with data.
    pub fn settle_with_data(&self, data: Variables) {
        self.mutate(move |script| {
            script.snapshot.loading = false;
            script.snapshot.called = true;
            script.snapshot.data = Some(data);
            script.snapshot.error = None;
        });
        tracing::debug!("scripted query settled with data");
    }

    /// Settle the raw result with an error.
    pub fn settle_with_error(&self, message: &str) {
        let error = ScriptError::Backend(message.into());
        self.mutate(move |script| {
            script.snapshot.loading = false;
            script.snapshot.called = true;
            script.snapshot.error = Some(error);
        });
        tracing::debug!("scripted query settled with error");
    }

    /// Replace the raw result wholesale.
    pub fn set_snapshot(&self, snapshot: ScriptSnapshot) {
        self.mutate(move |script| script.snapshot = snapshot);
    }

    /// Queue the outcome served (and adopted as the raw result) by the
    /// next refetch call.
    pub fn push_refetch_outcome(&self, outcome: ScriptSnapshot) {
        self.lock().refetch_outcomes.push_back(outcome);
    }

    /// Every configuration applied to the handle, oldest first.
    pub fn configures(&self) -> Vec<QueryConfig> {
        self.lock().configures.clone()
    }

    /// Variables of each refetch call, oldest first.
    pub fn refetch_variables(&self) -> Vec<Option<Variables>> {
        self.lock().refetch_variables.clone()
    }

    /// Variables of each fetch-more call, oldest first.
    pub fn fetch_more_variables(&self) -> Vec<Option<Variables>> {
        self.lock().fetch_more_variables.clone()
    }

    pub fn update_query_calls(&self) -> usize {
        self.lock().update_query_calls
    }

    pub fn polling_intervals(&self) -> Vec<Duration> {
        self.lock().polling_intervals.clone()
    }

    pub fn polling_stops(&self) -> usize {
        self.lock().polling_stops
    }

    pub fn subscriptions(&self) -> usize {
        self.lock().subscriptions
    }
}

impl Default for ScriptedQuery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryHandle for ScriptedQuery {
    type Data = Variables;
    type Error = ScriptError;

    fn configure(&self, config: QueryConfig) {
        self.lock().configures.push(config);
    }

    fn snapshot(&self) -> ScriptSnapshot {
        self.lock().snapshot.clone()
    }

    fn updates(&self) -> watch::Receiver<()> {
        self.notify.subscribe()
    }

    async fn refetch(&self, variables: Option<Variables>) -> ScriptSnapshot {
        let outcome = {
            let mut script = self.lock();
            script.refetch_variables.push(variables);
            match script.refetch_outcomes.pop_front() {
                Some(outcome) => {
                    script.snapshot = outcome.clone();
                    outcome
                }
                None => script.snapshot.clone(),
            }
        };
        self.notify.send_replace(());
        outcome
    }

    async fn fetch_more(
        &self,
        options: FetchMoreOptions<Variables>,
    ) -> ScriptSnapshot {
        let mut script = self.lock();
        script.fetch_more_variables.push(options.variables);
        script.snapshot.clone()
    }

    fn update_query(
        &self,
        update: Box<dyn FnOnce(Option<Variables>) -> Option<Variables> + Send>,
    ) {
        self.mutate(|script| {
            script.update_query_calls += 1;
            let data = script.snapshot.data.take();
            script.snapshot.data = update(data);
        });
    }

    fn start_polling(&self, interval: Duration) {
        self.lock().polling_intervals.push(interval);
    }

    fn stop_polling(&self) {
        self.lock().polling_stops += 1;
    }

    fn subscribe_to_more(
        &self,
        options: SubscribeOptions<Variables>,
    ) -> Subscription {
        drop(options);
        self.lock().subscriptions += 1;
        Subscription::new(|| {})
    }
}

/// Wait (bounded) until the query's snapshot satisfies the predicate,
/// re-checking after every update tick.
pub async fn wait_for<Q, F>(
    query: &Q,
    mut predicate: F,
) -> QuerySnapshot<Q::Data, Q::Error>
where
    Q: QueryHandle,
    F: FnMut(&QuerySnapshot<Q::Data, Q::Error>) -> bool,
{
    let mut updates = query.updates();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = query.snapshot();
            if predicate(&snapshot) {
                return snapshot;
            }
            updates
                .changed()
                .await
                .expect("query dropped while waiting");
        }
    })
    .await
    .expect("timed out waiting for query state")
}

/// Wait until the query has fetched at least once and settled.
pub async fn wait_settled<Q: QueryHandle>(
    query: &Q,
) -> QuerySnapshot<Q::Data, Q::Error> {
    wait_for(query, |snapshot| snapshot.called && snapshot.is_settled()).await
}

/// Initialize tracing for tests. Safe to call from every test; only the
/// first call installs the subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("error"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
