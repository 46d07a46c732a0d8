//! Integration tests for registry loading, hot swap and fan-out calls

use plughub_host::{
    HubError, HubStatus, Hubs, MemoryUnit, OperationTable, Unit, UnitId, UnitType, Value,
    Version,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn v(s: &str) -> Version {
    s.parse().expect("valid version")
}

fn ping_unit(id: &str, version: &str, answer: i64) -> Arc<dyn Unit> {
    MemoryUnit::builder(id, v(version))
        .operation("ping", 1, move |_| Ok(vec![json!(answer)]))
        .shared()
}

#[derive(Debug)]
struct NativeUnit {
    id: UnitId,
    operations: OperationTable,
}

impl Unit for NativeUnit {
    fn id(&self) -> &UnitId {
        &self.id
    }
    fn unit_type(&self) -> UnitType {
        UnitType::Native
    }
    fn version(&self) -> Version {
        Version::new(1, 0, 0)
    }
    fn operations(&self) -> &OperationTable {
        &self.operations
    }
}

#[tokio::test]
async fn test_ping_scenario() {
    let hubs = Hubs::new();
    hubs.load_plugin(ping_unit("A", "1.0.0", 42)).await.unwrap();

    let results = hubs.call("ping", &[]).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].error.is_none());
    assert_eq!(results[0].hub_id, Some(UnitId::from("A")));
    assert_eq!(results[0].content, vec![json!(42)]);

    let err = hubs
        .load_plugin(ping_unit("A", "0.9.0", 7))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Version { .. }));

    let results = hubs.call("ping", &[]).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].content, vec![json!(42)]);

    let hub = hubs.get("A").await.unwrap();
    hubs.unload_plugin("A").await.unwrap();

    let result = hub.call("ping", &[]);
    assert!(matches!(result.error, Some(HubError::NotLoaded)));
    assert!(hubs.call("ping", &[]).await.is_empty());
}

#[tokio::test]
async fn test_newer_version_hot_swaps() {
    let pairs = [
        ("1.0.0", "1.0.1"),
        ("1.0.9", "1.1.0"),
        ("1.9.0", "1.10.0"),
        ("0.1.0", "2.0.0"),
    ];

    for (older, newer) in pairs {
        let hubs = Hubs::new();
        hubs.load_plugin(ping_unit("A", older, 1)).await.unwrap();
        hubs.load_plugin(ping_unit("A", newer, 2)).await.unwrap();

        let hub = hubs.get("A").await.unwrap();
        assert_eq!(hub.unit().unwrap().version(), v(newer));
        assert_eq!(hub.status(), HubStatus::Ready);
        assert_eq!(hubs.call("ping", &[]).await[0].content, vec![json!(2)]);

        let err = hubs
            .load_plugin(ping_unit("A", older, 3))
            .await
            .unwrap_err();
        match err {
            HubError::Version {
                id,
                loaded,
                offered,
            } => {
                assert_eq!(id.as_str(), "A");
                assert_eq!(loaded, v(newer));
                assert_eq!(offered, v(older));
            }
            other => panic!("Expected version error, got {:?}", other),
        }
        assert_eq!(hub.unit().unwrap().version(), v(newer));
    }
}

#[tokio::test]
async fn test_equal_version_is_rejected() {
    let hubs = Hubs::new();
    hubs.load_plugin(ping_unit("A", "1.0.0", 1)).await.unwrap();
    let err = hubs
        .load_plugin(ping_unit("A", "1.0.0", 2))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Version { .. }));
    assert_eq!(hubs.call("ping", &[]).await[0].content, vec![json!(1)]);
}

#[tokio::test]
async fn test_hot_swap_runs_lifecycle_hooks() {
    let inits = Arc::new(AtomicUsize::new(0));
    let releases = Arc::new(AtomicUsize::new(0));

    let make = |version: &str| {
        let inits = inits.clone();
        let releases = releases.clone();
        MemoryUnit::builder("A", v(version))
            .on_initialize(move || {
                inits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .on_release(move || {
                releases.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .shared()
    };

    let hubs = Hubs::new();
    hubs.load_plugin(make("1.0.0")).await.unwrap();
    hubs.load_plugin(make("2.0.0")).await.unwrap();
    assert_eq!(inits.load(Ordering::SeqCst), 2);
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    hubs.unload_plugin("A").await.unwrap();
    assert_eq!(releases.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unsupported_type_is_rejected() {
    let hubs = Hubs::new();
    let unit = Arc::new(NativeUnit {
        id: UnitId::from("native"),
        operations: OperationTable::new(),
    });
    let err = hubs.load_plugin(unit).await.unwrap_err();
    assert!(matches!(err, HubError::UnsupportedType(UnitType::Native)));
    assert!(hubs.is_empty().await);
}

#[tokio::test]
async fn test_unload_unknown_id_is_not_found() {
    let hubs = Hubs::new();
    let err = hubs.unload_plugin("ghost").await.unwrap_err();
    assert!(matches!(err, HubError::NotFound(ref id) if id.as_str() == "ghost"));

    hubs.load_plugin(ping_unit("A", "1.0.0", 1)).await.unwrap();
    assert!(hubs.unload_plugin("A").await.is_ok());
    assert!(matches!(
        hubs.unload_plugin("A").await,
        Err(HubError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_fan_out_only_reaches_matching_hubs() {
    let hubs = Hubs::new();
    hubs.load_plugin(ping_unit("A", "1.0.0", 1)).await.unwrap();
    hubs.load_plugin(ping_unit("B", "1.0.0", 2)).await.unwrap();
    hubs.load_plugin(
        MemoryUnit::builder("C", v("1.0.0"))
            .operation("echo", 1, |args| Ok(vec![Value::Array(args.to_vec())]))
            .shared(),
    )
    .await
    .unwrap();
    assert_eq!(hubs.len().await, 3);

    let mut answers: Vec<i64> = hubs
        .call("ping", &[])
        .await
        .into_iter()
        .map(|r| r.into_result().unwrap()[0].as_i64().unwrap())
        .collect();
    answers.sort_unstable();
    assert_eq!(answers, vec![1, 2]);

    let echoed = hubs.call("echo", &[json!("hi"), json!(3)]).await;
    assert_eq!(echoed.len(), 1);
    assert_eq!(echoed[0].hub_id, Some(UnitId::from("C")));
    assert_eq!(echoed[0].content, vec![json!(["hi", 3])]);

    assert!(hubs.call("missing", &[]).await.is_empty());
}

#[tokio::test]
async fn test_fan_out_carries_per_hub_errors() {
    let hubs = Hubs::new();
    hubs.load_plugin(ping_unit("A", "1.0.0", 1)).await.unwrap();
    hubs.load_plugin(
        MemoryUnit::builder("B", v("1.0.0"))
            .operation("ping", 1, |_| {
                Err(plughub_host::UnitError::failed("backend offline"))
            })
            .shared(),
    )
    .await
    .unwrap();

    let results = hubs.call("ping", &[]).await;
    assert_eq!(results.len(), 2);
    let failed: Vec<_> = results.iter().filter(|r| !r.is_ok()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].hub_id, Some(UnitId::from("B")));
    assert!(failed[0].content.is_empty());
    assert!(matches!(
        failed[0].error,
        Some(HubError::Invocation { .. })
    ));
}

#[tokio::test]
async fn test_async_fan_out() {
    let hubs = Hubs::new();
    hubs.load_plugin(ping_unit("A", "1.0.0", 1)).await.unwrap();
    hubs.load_plugin(ping_unit("B", "1.0.0", 2)).await.unwrap();

    let (receivers, cancel) = hubs.async_call("ping", &[]).await;
    assert_eq!(receivers.len(), 2);
    assert!(!cancel.is_cancelled());

    let mut answers = Vec::new();
    for rx in &receivers {
        let result = rx.recv().await.unwrap();
        answers.push(result.content[0].as_i64().unwrap());
        assert!(rx.try_recv().is_none());
    }
    answers.sort_unstable();
    assert_eq!(answers, vec![1, 2]);

    let (receivers, _cancel) = hubs.async_call("missing", &[]).await;
    assert!(receivers.is_empty());
}

#[tokio::test]
async fn test_async_fan_out_cancellation_is_advisory() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let hubs = Hubs::new();
    hubs.load_plugin(
        MemoryUnit::builder("A", v("1.0.0"))
            .operation("tick", 0, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![])
            })
            .shared(),
    )
    .await
    .unwrap();

    let (receivers, cancel) = hubs.async_call("tick", &[]).await;
    cancel.cancel();

    // The work already happened
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // but cancelled receivers no longer yield
    assert!(receivers[0].is_cancelled());
    assert!(receivers[0].recv().await.is_none());

    let hub = hubs.get("A").await.unwrap();
    let delivered = hub.receiver().recv().await.unwrap();
    assert!(delivered.is_ok());
    assert!(delivered.content.is_empty());
}
