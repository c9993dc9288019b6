use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::QuerySnapshot;

/// Per-query variables, carried as loose JSON like the wire format.
pub type Variables = serde_json::Value;

/// Network activity policy for a query subscription.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum FetchPolicy {
    /// Fetch normally.
    #[default]
    Active,
    /// Keep the subscription registered without initiating any network
    /// activity.
    Standby,
}

/// Subscription configuration, applied with [`QueryHandle::configure`].
#[derive(Debug, Clone, Default)]
pub struct QueryConfig {
    pub fetch_policy: FetchPolicy,
    /// Variables for subsequent fetches.
    pub variables: Option<Variables>,
    /// Skip the query entirely. The lazy layer leaves this unset and uses
    /// `Standby` instead, so the subscription stays registered while
    /// dormant.
    pub skip: bool,
}

/// Combines the existing payload with a newly fetched page.
pub type MergeFn<T> = Box<dyn FnOnce(Option<T>, T) -> T + Send>;

/// Options for [`QueryHandle::fetch_more`].
pub struct FetchMoreOptions<T> {
    /// Variables for the additional fetch; falls back to the configured
    /// ones when unset.
    pub variables: Option<Variables>,
    pub merge: MergeFn<T>,
}

/// Folds a pushed update into the current payload.
pub type SubscriptionMergeFn<T> =
    Box<dyn FnMut(Option<T>, serde_json::Value) -> Option<T> + Send>;

/// Options for [`QueryHandle::subscribe_to_more`].
pub struct SubscribeOptions<T> {
    /// Stream of pushed updates.
    pub updates: BoxStream<'static, serde_json::Value>,
    pub merge: SubscriptionMergeFn<T>,
}

/// Guard for an active subscription. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Tear the subscription down explicitly.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// An eager query primitive.
///
/// This is the seam to the underlying client: deduplication, caching, and
/// transport all live behind it. Clones share identity: they observe and
/// reconfigure the same logical subscription, so a handle can be handed to
/// a wrapper and reconfigured later without losing its state.
#[async_trait]
pub trait QueryHandle: Clone + Send + Sync + 'static {
    type Data: Clone + Send + 'static;
    type Error: Clone + Send + 'static;

    /// Reconfigure the subscription without losing identity.
    fn configure(&self, config: QueryConfig);

    /// Current result.
    fn snapshot(&self) -> QuerySnapshot<Self::Data, Self::Error>;

    /// Ticks after every result recomputation. Drivers await this to know
    /// when to dispatch completion callbacks.
    fn updates(&self) -> watch::Receiver<()>;

    /// Re-run the query, optionally with new variables, returning the
    /// settled result.
    async fn refetch(
        &self,
        variables: Option<Variables>,
    ) -> QuerySnapshot<Self::Data, Self::Error>;

    /// Fetch an additional page and merge it into the payload.
    async fn fetch_more(
        &self,
        options: FetchMoreOptions<Self::Data>,
    ) -> QuerySnapshot<Self::Data, Self::Error>;

    /// Rewrite the local payload without any network activity.
    fn update_query(
        &self,
        update: Box<dyn FnOnce(Option<Self::Data>) -> Option<Self::Data> + Send>,
    );

    /// Refetch on a fixed interval until stopped.
    fn start_polling(&self, interval: Duration);

    /// Stop a running poll loop, if any.
    fn stop_polling(&self);

    /// Fold pushed updates into the payload until unsubscribed.
    fn subscribe_to_more(
        &self,
        options: SubscribeOptions<Self::Data>,
    ) -> Subscription;
}
