use std::future::Future;
use std::time::Duration;

use futures::future::Either;
use tokio::sync::oneshot;

use crate::{
    FetchMoreOptions, FetchPolicy, QueryConfig, QueryHandle, QuerySnapshot,
    SubscribeOptions, Subscription, Variables,
};

/// Base options for a lazy query.
#[derive(Debug, Clone, Default)]
pub struct LazyQueryOptions {
    /// Variables applied until an execute call overrides them.
    pub variables: Option<Variables>,
    /// Fetch policy restored once the query is triggered.
    pub fetch_policy: FetchPolicy,
}

/// Per-call options for [`LazyQuery::execute`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub variables: Option<Variables>,
}

struct ExecutionState<T, E> {
    triggered: bool,
    options: Option<ExecuteOptions>,
    /// One-shot completion channel armed by the Idle → Triggered execute
    /// call. Taken exactly once, on the first settled result observed
    /// afterwards.
    resolver: Option<oneshot::Sender<QuerySnapshot<T, E>>>,
}

/// Defers execution of an eager query until explicitly triggered.
///
/// The wrapped handle is held in [`FetchPolicy::Standby`], registered but
/// fetching nothing, until [`execute`](Self::execute) is called or any
/// promoted eager operation runs. Until then [`result`](Self::result)
/// reports the quiescent shape regardless of the handle's raw state.
///
/// State transitions are driven by explicit dispatch: after the
/// underlying query recomputes its result, the owner calls
/// [`on_result`](Self::on_result) (or lets [`settle`](Self::settle) do
/// so), which fulfils the pending execution once the result has settled.
pub struct LazyQuery<Q: QueryHandle> {
    handle: Q,
    options: LazyQueryOptions,
    state: ExecutionState<Q::Data, Q::Error>,
}

impl<Q: QueryHandle> LazyQuery<Q> {
    /// Wrap an eager query, holding it in standby until triggered.
    ///
    /// The handle is reconfigured with the base variables immediately, so
    /// construct it in standby (or unfetched) state; variables for a lazy
    /// query belong in [`LazyQueryOptions`] and [`ExecuteOptions`].
    pub fn new(handle: Q, options: LazyQueryOptions) -> Self {
        handle.configure(QueryConfig {
            fetch_policy: FetchPolicy::Standby,
            variables: options.variables.clone(),
            skip: false,
        });
        Self {
            handle,
            options,
            state: ExecutionState {
                triggered: false,
                options: None,
                resolver: None,
            },
        }
    }

    /// The wrapped handle.
    pub fn handle(&self) -> &Q {
        &self.handle
    }

    /// True once the query has been triggered, explicitly or through a
    /// promoted eager operation.
    pub fn triggered(&self) -> bool {
        self.state.triggered
    }

    /// Config restored on trigger: per-call variables replace the base
    /// ones wholesale.
    fn live_config(&self) -> QueryConfig {
        let variables = self
            .state
            .options
            .as_ref()
            .and_then(|options| options.variables.clone())
            .or_else(|| self.options.variables.clone());
        QueryConfig {
            fetch_policy: self.options.fetch_policy,
            variables,
            skip: false,
        }
    }

    fn mark_triggered(&mut self, source: &'static str) {
        if self.state.triggered {
            return;
        }
        self.state.triggered = true;
        self.handle.configure(self.live_config());
        tracing::debug!(source, "lazy query triggered");
    }

    /// Trigger the query.
    ///
    /// The first call transitions to triggered, restores the live fetch
    /// policy on the handle, and resolves once the query next settles.
    /// Any later call instead delegates to [`QueryHandle::refetch`] with
    /// the new variables and resolves with that refetch's own outcome,
    /// independent of the pending execution.
    ///
    /// The returned future never errors: failures surface only in the
    /// snapshot's `error` field.
    pub fn execute(
        &mut self,
        options: Option<ExecuteOptions>,
    ) -> impl Future<Output = QuerySnapshot<Q::Data, Q::Error>> + Send + use<Q>
    {
        if self.state.triggered {
            let handle = self.handle.clone();
            let variables = options.and_then(|options| options.variables);
            return Either::Right(async move {
                handle.refetch(variables).await
            });
        }

        let (tx, rx) = oneshot::channel();
        self.state.options = options;
        self.state.resolver = Some(tx);
        self.mark_triggered("execute");
        Either::Left(async move {
            // The controller settles the channel from its Drop impl, so
            // the sender cannot vanish silently; this fallback is
            // unreachable in practice.
            rx.await.unwrap_or_else(|_| QuerySnapshot::quiescent())
        })
    }

    /// Completion dispatch, run after each result recomputation.
    ///
    /// Fulfils the pending execution on the first settled result and
    /// clears the resolver in the same step, so later settled results are
    /// no-ops.
    pub fn on_result(&mut self) {
        if self.state.resolver.is_none() {
            return;
        }
        let snapshot = self.handle.snapshot();
        if snapshot.loading {
            return;
        }
        if let Some(resolver) = self.state.resolver.take() {
            tracing::trace!("resolving pending execution");
            let _ = resolver.send(snapshot);
        }
    }

    /// Dispatch [`on_result`](Self::on_result) after each update until the
    /// pending execution, if any, has resolved.
    pub async fn settle(&mut self) {
        let mut updates = self.handle.updates();
        loop {
            self.on_result();
            if self.state.resolver.is_none() {
                return;
            }
            if updates.changed().await.is_err() {
                return;
            }
        }
    }

    /// Live result view: quiescent until triggered, raw passthrough after.
    ///
    /// Pre-trigger errors are deliberately masked along with everything
    /// else; the underlying query's error surfaces only once triggered.
    pub fn result(&self) -> QuerySnapshot<Q::Data, Q::Error> {
        if self.state.triggered {
            self.handle.snapshot()
        } else {
            QuerySnapshot::quiescent()
        }
    }

    /// Operations on the underlying query, with trigger promotion.
    pub fn ops(&mut self) -> EagerOps<'_, Q> {
        EagerOps { lazy: self }
    }
}

impl<Q: QueryHandle> Drop for LazyQuery<Q> {
    fn drop(&mut self) {
        // A pending execute future must not hang once the controller is
        // gone; settle it with whatever the query last reported.
        if let Some(resolver) = self.state.resolver.take() {
            let _ = resolver.send(self.handle.snapshot());
        }
    }
}

/// Underlying query operations, promoted to count as the trigger.
///
/// Refetch, fetch-more, update-query, start-polling and
/// subscribe-to-more all imply that data activity has begun, so invoking
/// any of them (even before an explicit [`LazyQuery::execute`] call)
/// marks the query triggered and then performs the operation. Stopping a
/// poll implies no such thing and is passed through unpromoted.
pub struct EagerOps<'a, Q: QueryHandle> {
    lazy: &'a mut LazyQuery<Q>,
}

impl<Q: QueryHandle> EagerOps<'_, Q> {
    pub async fn refetch(
        &mut self,
        variables: Option<Variables>,
    ) -> QuerySnapshot<Q::Data, Q::Error> {
        self.lazy.mark_triggered("refetch");
        self.lazy.handle.refetch(variables).await
    }

    pub async fn fetch_more(
        &mut self,
        options: FetchMoreOptions<Q::Data>,
    ) -> QuerySnapshot<Q::Data, Q::Error> {
        self.lazy.mark_triggered("fetch_more");
        self.lazy.handle.fetch_more(options).await
    }

    pub fn update_query(
        &mut self,
        update: Box<dyn FnOnce(Option<Q::Data>) -> Option<Q::Data> + Send>,
    ) {
        self.lazy.mark_triggered("update_query");
        self.lazy.handle.update_query(update);
    }

    pub fn start_polling(&mut self, interval: Duration) {
        self.lazy.mark_triggered("start_polling");
        self.lazy.handle.start_polling(interval);
    }

    pub fn stop_polling(&mut self) {
        self.lazy.handle.stop_polling();
    }

    pub fn subscribe_to_more(
        &mut self,
        options: SubscribeOptions<Q::Data>,
    ) -> Subscription {
        self.lazy.mark_triggered("subscribe_to_more");
        self.lazy.handle.subscribe_to_more(options)
    }
}
