//! Deferred execution for data queries.
//!
//! [`LazyQuery`] wraps an eager [`QueryHandle`] and holds it in standby
//! (registered, fetching nothing) until [`LazyQuery::execute`] or any
//! promoted eager operation triggers it. [`FetchQuery`] is a ready-made
//! handle backed by an async fetch function.
//!
//! ```no_run
//! use query::{
//!     FetchPolicy, FetchQuery, LazyQuery, LazyQueryOptions, QueryConfig,
//! };
//! use serde_json::json;
//!
//! # async fn demo() {
//! let backend = FetchQuery::new(
//!     QueryConfig {
//!         fetch_policy: FetchPolicy::Standby,
//!         ..Default::default()
//!     },
//!     |variables| async move { Ok::<_, String>(json!({ "echo": variables })) },
//! );
//! let mut search = LazyQuery::new(backend, LazyQueryOptions::default());
//! assert!(!search.result().called);
//!
//! // Nothing fetches until execute; the future resolves once the query
//! // settles, driven by the completion dispatch in `settle`.
//! let execution = search.execute(None);
//! let (snapshot, _) = tokio::join!(execution, search.settle());
//! assert!(snapshot.called);
//! # }
//! ```

pub mod fetch;
pub mod handle;
pub mod lazy;
pub mod snapshot;

pub use fetch::{FetchFn, FetchQuery};
pub use handle::{
    FetchMoreOptions, FetchPolicy, MergeFn, QueryConfig, QueryHandle,
    SubscribeOptions, Subscription, SubscriptionMergeFn, Variables,
};
pub use lazy::{EagerOps, ExecuteOptions, LazyQuery, LazyQueryOptions};
pub use snapshot::QuerySnapshot;
