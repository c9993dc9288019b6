use anyhow::Result;
use query::{
    ExecuteOptions, FetchPolicy, LazyQuery, LazyQueryOptions, QuerySnapshot,
};
use serde_json::json;
use test_helpers::{ScriptedQuery, init_tracing};

#[tokio::test]
async fn execute_resolves_with_first_settled_result() -> Result<()> {
    init_tracing();
    let script = ScriptedQuery::new();
    let mut lazy = LazyQuery::new(script.clone(), LazyQueryOptions::default());

    let execution = lazy.execute(None);
    assert!(lazy.triggered());

    // Triggering restores the live fetch policy on the handle.
    let configures = script.configures();
    assert_eq!(configures.len(), 2);
    assert_eq!(configures[0].fetch_policy, FetchPolicy::Standby);
    assert_eq!(configures[1].fetch_policy, FetchPolicy::Active);

    script.begin_loading();
    script.settle_with_data(json!({"user": "alice"}));
    lazy.settle().await;

    let snapshot = execution.await;
    assert!(!snapshot.loading);
    assert!(snapshot.called);
    assert_eq!(snapshot.data, Some(json!({"user": "alice"})));

    // The live view now passes the raw result through.
    let result = lazy.result();
    assert_eq!(result.data, Some(json!({"user": "alice"})));
    assert!(result.called);

    Ok(())
}

#[tokio::test]
async fn execute_applies_per_call_variables() -> Result<()> {
    init_tracing();
    let script = ScriptedQuery::new();
    let mut lazy = LazyQuery::new(
        script.clone(),
        LazyQueryOptions {
            variables: Some(json!({"limit": 10})),
            fetch_policy: FetchPolicy::Active,
        },
    );

    let _execution = lazy.execute(Some(ExecuteOptions {
        variables: Some(json!({"limit": 50})),
    }));

    let configures = script.configures();
    assert_eq!(configures[0].variables, Some(json!({"limit": 10})));
    // Per-call variables replace the base ones wholesale.
    assert_eq!(configures[1].variables, Some(json!({"limit": 50})));
    assert!(!configures[1].skip);

    Ok(())
}

#[tokio::test]
async fn execute_waits_for_loading_to_finish() -> Result<()> {
    init_tracing();
    let script = ScriptedQuery::new();
    let mut lazy = LazyQuery::new(script.clone(), LazyQueryOptions::default());

    let execution = lazy.execute(None);
    script.begin_loading();

    let driver = async {
        // The raw result is still loading, so nothing resolves until the
        // settled transition arrives.
        lazy.settle().await;
    };
    let transitions = async {
        tokio::task::yield_now().await;
        script.settle_with_data(json!([1, 2, 3]));
    };
    let (snapshot, _, _) = tokio::join!(execution, driver, transitions);

    assert_eq!(snapshot.data, Some(json!([1, 2, 3])));
    assert!(snapshot.called);

    Ok(())
}

#[tokio::test]
async fn second_execute_reroutes_to_refetch() -> Result<()> {
    init_tracing();
    let script = ScriptedQuery::new();
    let mut lazy = LazyQuery::new(script.clone(), LazyQueryOptions::default());

    let first = lazy.execute(Some(ExecuteOptions {
        variables: Some(json!({"page": 1})),
    }));
    script.begin_loading();

    // Queue what the refetch reports for the second call.
    let refetched = QuerySnapshot {
        loading: false,
        data: Some(json!({"page": 2, "items": ["c"]})),
        error: None,
        called: true,
    };
    script.push_refetch_outcome(refetched.clone());

    let second = lazy
        .execute(Some(ExecuteOptions {
            variables: Some(json!({"page": 2})),
        }))
        .await;
    assert_eq!(second, refetched);
    assert_eq!(script.refetch_variables(), vec![Some(json!({"page": 2}))]);
    // No reconfiguration happened for the second call.
    assert_eq!(script.configures().len(), 2);

    // The first call resolves independently, from the next settled
    // transition the dispatcher observes.
    script.settle_with_data(json!({"page": 1, "items": ["a", "b"]}));
    lazy.settle().await;
    let first = first.await;
    assert_eq!(first.data, Some(json!({"page": 1, "items": ["a", "b"]})));

    Ok(())
}
