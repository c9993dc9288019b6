//! Resolution timing of the pending execution: fires exactly once, on the
//! first settled result observed after triggering.

use anyhow::Result;
use query::{LazyQuery, LazyQueryOptions};
use serde_json::json;
use test_helpers::{ScriptError, ScriptedQuery, init_tracing};

#[tokio::test]
async fn resolver_fires_exactly_once() -> Result<()> {
    init_tracing();
    let script = ScriptedQuery::new();
    let mut lazy = LazyQuery::new(script.clone(), LazyQueryOptions::default());

    let execution = lazy.execute(None);
    script.begin_loading();
    script.settle_with_data(json!("first"));
    lazy.settle().await;

    // Later settled transitions must not resolve anything again.
    script.begin_loading();
    script.settle_with_data(json!("second"));
    lazy.on_result();
    lazy.on_result();

    let snapshot = execution.await;
    assert_eq!(snapshot.data, Some(json!("first")));

    Ok(())
}

#[tokio::test]
async fn already_settled_result_resolves_immediately() -> Result<()> {
    init_tracing();
    let script = ScriptedQuery::new();
    let mut lazy = LazyQuery::new(script.clone(), LazyQueryOptions::default());

    // The raw result is already settled (nothing ever loaded), so the
    // first dispatch resolves the execution with it as-is.
    let execution = lazy.execute(None);
    lazy.settle().await;

    let snapshot = execution.await;
    assert!(!snapshot.loading);
    assert_eq!(snapshot.data, None);

    Ok(())
}

#[tokio::test]
async fn errors_pass_through_once_triggered() -> Result<()> {
    init_tracing();
    let script = ScriptedQuery::new();
    let mut lazy = LazyQuery::new(script.clone(), LazyQueryOptions::default());

    let execution = lazy.execute(None);
    script.begin_loading();
    script.settle_with_error("boom");
    lazy.settle().await;

    let snapshot = execution.await;
    assert_eq!(
        snapshot.error,
        Some(ScriptError::Backend("boom".into()))
    );
    assert_eq!(snapshot.data, None);
    assert!(lazy.result().error.is_some());

    Ok(())
}

#[tokio::test]
async fn dropping_controller_settles_pending_execution() -> Result<()> {
    init_tracing();
    let script = ScriptedQuery::new();
    let mut lazy = LazyQuery::new(script.clone(), LazyQueryOptions::default());

    let execution = lazy.execute(None);
    script.begin_loading();
    script.settle_with_data(json!(42));
    drop(lazy);

    // The pending future settles with the last raw result instead of
    // hanging forever.
    let snapshot = execution.await;
    assert_eq!(snapshot.data, Some(json!(42)));

    Ok(())
}
