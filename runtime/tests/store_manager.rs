//! Integration tests for store assembly: shared namespaces, the registry,
//! deferred policies and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use statewire_core::{ActionDescriptor, ErrorValue, Value};
use statewire_runtime::controller::LAST_THROWN_ERROR;
use statewire_runtime::{
    Controller, DeferredPolicy, ManagerError, OperationError, Registry, Route, StateSpec, StoreConfig,
    StoreError, StoreManager, Watcher, END_ACTION,
};
use statewire_testing::init_test_tracing;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

// ============================================================================
// Test Fixtures
// ============================================================================

fn echo(component: &str, namespace: &str, operation: &str, key: &'static str) -> Controller {
    Controller::builder(component)
        .namespace(namespace)
        .operation_sync(operation, move |payload| Ok(Value::object([(key, payload)])))
        .state(StateSpec::new().derive(key, move |s| s.get(key).cloned().unwrap_or_default()))
        .build()
        .unwrap()
}

/// Operation that waits for a permit, so tests decide when it finishes.
fn gated(policy: Option<DeferredPolicy>, gate: Arc<Semaphore>) -> Controller {
    let builder = Controller::builder("Gated").operation("load", move |payload| {
        let gate = Arc::clone(&gate);
        async move {
            let permit = gate.acquire().await.map_err(|e| ErrorValue::new(e.to_string()))?;
            permit.forget();
            Ok::<_, ErrorValue>(Value::object([("loaded", payload)]))
        }
    });
    match policy {
        Some(policy) => builder.deferred_policy(policy),
        None => builder,
    }
    .build()
    .unwrap()
}

fn manager_for(routes: Vec<Route>, registry: Registry, config: StoreConfig) -> StoreManager {
    init_test_tracing();
    StoreManager::new(routes, registry, None, config).unwrap()
}

// ============================================================================
// Shared namespaces
// ============================================================================

#[tokio::test]
async fn controllers_sharing_a_namespace_see_each_others_writes() {
    let left = echo("Left", "shared", "setLeft", "left");
    let right = echo("Right", "shared", "setRight", "right");

    let mut registry = Registry::new();
    right.direct_connect(&mut registry, None);
    let manager = manager_for(
        vec![Route::controller("/", left.clone())],
        registry,
        StoreConfig::default(),
    );
    assert_eq!(manager.namespaces().collect::<Vec<_>>(), ["shared"]);

    // Initial state is the union of both declarations
    let initial = &manager.snapshot()["shared"];
    assert_eq!(initial.get("left"), Some(&Value::Null));
    assert_eq!(initial.get("right"), Some(&Value::Null));
    assert_eq!(initial.get(LAST_THROWN_ERROR), Some(&Value::Null));

    let after_left = left.dispatch("setLeft", Value::from(1)).unwrap().await.unwrap();
    assert_eq!(after_left.get("left"), Some(&Value::from(1)));

    let after_right = right.dispatch("setRight", Value::from(2)).unwrap().await.unwrap();
    assert_eq!(after_right.get("left"), Some(&Value::from(1)));
    assert_eq!(after_right.get("right"), Some(&Value::from(2)));

    // Both live views read the one shared slice
    assert_eq!(left.state().get("right"), Some(&Value::from(2)));
    assert_eq!(right.state(), manager.snapshot()["shared"]);

    manager.shutdown(None).await.unwrap();
}

#[tokio::test]
async fn same_named_route_and_registry_controllers_share_a_slice() {
    let global = Controller::builder("Apps")
        .operation_sync("loadGlobal", |_| Ok(Value::object([("g", Value::from("global"))])))
        .state(StateSpec::new().constant("g", Value::from(1)))
        .build()
        .unwrap();
    let routed = Controller::builder("Apps")
        .operation_sync("loadRouted", |_| Ok(Value::object([("r", Value::from("routed"))])))
        .state(StateSpec::new().constant("r", Value::from(2)))
        .build()
        .unwrap();

    let mut registry = Registry::new();
    global.direct_connect(&mut registry, None);
    let manager = manager_for(
        vec![Route::controller("/", routed.clone())],
        registry,
        StoreConfig::default(),
    );

    let initial = &manager.snapshot()["apps"];
    assert_eq!(initial.keys().map(String::as_str).collect::<Vec<_>>(), ["g", LAST_THROWN_ERROR, "r"]);
    assert!(global.is_bound());

    global.dispatch("loadGlobal", Value::Null).unwrap().await.unwrap();
    let merged = routed.dispatch("loadRouted", Value::Null).unwrap().await.unwrap();
    assert_eq!(merged.get("g"), Some(&Value::from("global")));
    assert_eq!(merged.get("r"), Some(&Value::from("routed")));
    assert_eq!(global.state(), manager.snapshot()["apps"]);

    manager.shutdown(None).await.unwrap();
}

#[tokio::test]
async fn registry_controllers_are_mounted_by_name() {
    let settings = Controller::builder("Settings")
        .operation_sync("saveTheme", |payload| Ok(Value::object([("theme", payload)])))
        .build()
        .unwrap();
    let mut registry = Registry::new();
    settings.direct_connect(&mut registry, None);

    let manager = manager_for(Vec::new(), registry, StoreConfig::default());
    assert!(manager.controllers().is_empty());
    assert!(manager.action_creators().contains_key("saveTheme@@reducer"));

    settings.dispatch("saveTheme", Value::from("dark")).unwrap().await.unwrap();
    assert_eq!(manager.snapshot()["settings"].get("theme"), Some(&Value::from("dark")));

    manager.shutdown(None).await.unwrap();
}

#[tokio::test]
async fn registered_dispatchers_and_global_watchers_run() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    let mut registry = Registry::new();
    let descriptor = ActionDescriptor::from_handler("APPS", Some("Apps"));
    let kind = descriptor.kind().to_string();
    registry.register_dispatcher(kind.clone(), descriptor);
    registry.add_watcher(Watcher::standalone(kind.clone(), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let manager = manager_for(Vec::new(), registry, StoreConfig::default());
    let mut observed = manager.store().subscribe_actions();

    manager.dispatch_action(&kind, Value::Null).unwrap();
    assert_eq!(observed.recv().await.unwrap().kind, kind);
    assert!(matches!(
        manager.dispatch_action("fetchMissing", Value::Null),
        Err(ManagerError::UnknownAction(_))
    ));

    manager.shutdown(None).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Deferred policies
// ============================================================================

#[tokio::test]
async fn latest_wins_supersedes_the_earlier_caller() {
    let gate = Arc::new(Semaphore::new(0));
    let controller = gated(None, Arc::clone(&gate));
    let manager = manager_for(
        vec![Route::controller("/", controller.clone())],
        Registry::new(),
        StoreConfig::default(),
    );

    let first = controller.dispatch("load", Value::from(1)).unwrap();
    let second = controller.dispatch("load", Value::from(2)).unwrap();
    gate.add_permits(2);

    assert!(matches!(first.await, Err(OperationError::Superseded { .. })));
    // The live slot is settled by the first completion to arrive
    let settled = second.await.unwrap();
    assert_eq!(settled.get("loaded"), Some(&Value::from(1)));

    manager.shutdown(None).await.unwrap();
}

#[tokio::test]
async fn correlated_settles_each_caller_with_its_own_completion() {
    let gate = Arc::new(Semaphore::new(0));
    let controller = gated(None, Arc::clone(&gate));
    let manager = manager_for(
        vec![Route::controller("/", controller.clone())],
        Registry::new(),
        StoreConfig::default().with_deferred_policy(DeferredPolicy::Correlated),
    );

    let first = controller.dispatch("load", Value::from(1)).unwrap();
    let second = controller.dispatch("load", Value::from(2)).unwrap();
    gate.add_permits(2);

    assert_eq!(first.await.unwrap().get("loaded"), Some(&Value::from(1)));
    assert_eq!(second.await.unwrap().get("loaded"), Some(&Value::from(2)));

    manager.shutdown(None).await.unwrap();
}

#[tokio::test]
async fn controller_policy_overrides_store_default() {
    let gate = Arc::new(Semaphore::new(0));
    let controller = gated(Some(DeferredPolicy::Correlated), Arc::clone(&gate));
    let manager = manager_for(
        vec![Route::controller("/", controller.clone())],
        Registry::new(),
        StoreConfig::default().with_deferred_policy(DeferredPolicy::LatestWins),
    );

    let first = controller.dispatch("load", Value::from("a")).unwrap();
    let second = controller.dispatch("load", Value::from("b")).unwrap();
    gate.add_permits(2);

    assert_eq!(first.await.unwrap().get("loaded"), Some(&Value::from("a")));
    assert_eq!(second.await.unwrap().get("loaded"), Some(&Value::from("b")));

    manager.shutdown(None).await.unwrap();
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn shutdown_drains_queued_dispatches() {
    let gate = Arc::new(Semaphore::new(0));
    let controller = gated(Some(DeferredPolicy::Correlated), Arc::clone(&gate));
    let manager = manager_for(
        vec![Route::controller("/", controller.clone())],
        Registry::new(),
        StoreConfig::default(),
    );

    let first = controller.dispatch("load", Value::from(1)).unwrap();
    let second = controller.dispatch("load", Value::from(2)).unwrap();
    manager.close();
    assert!(manager.store().is_closed());
    gate.add_permits(2);

    manager.shutdown(Some(Duration::from_secs(1))).await.unwrap();
    assert!(first.await.is_ok());
    assert_eq!(second.await.unwrap().get("loaded"), Some(&Value::from(2)));
}

#[tokio::test]
async fn shutdown_times_out_on_stuck_operations() {
    let gate = Arc::new(Semaphore::new(0));
    let controller = gated(None, Arc::clone(&gate));
    let manager = manager_for(
        vec![Route::controller("/", controller.clone())],
        Registry::new(),
        StoreConfig::default().with_shutdown_timeout(Duration::from_millis(30)),
    );

    let pending = controller.dispatch("load", Value::Null).unwrap();
    let err = manager.shutdown(None).await.unwrap_err();
    assert_eq!(err, StoreError::ShutdownTimeout(1));

    // The aborted watcher never completes; dropping every owner abandons the caller
    drop(manager);
    drop(controller);
    assert!(matches!(pending.await, Err(OperationError::Abandoned { .. })));
}

#[tokio::test]
async fn closed_store_still_reduces_but_runs_nothing() {
    let controller = echo("Echo", "echo", "say", "said");
    let manager = manager_for(
        vec![Route::controller("/", controller.clone())],
        Registry::new(),
        StoreConfig::default(),
    );
    let mut observed = manager.store().subscribe_actions();
    manager.shutdown(None).await.unwrap();
    assert_eq!(observed.recv().await.unwrap().kind, END_ACTION);

    // A completion dispatched by hand is still reduced
    manager
        .dispatch_action("say@@reducer", Value::object([("said", Value::from("late"))]))
        .unwrap();
    assert_eq!(controller.state().get("said"), Some(&Value::from("late")));
    assert_eq!(controller.state().get(LAST_THROWN_ERROR), Some(&Value::Null));
}

#[tokio::test]
async fn view_props_rerender_on_change() {
    let controller = echo("Echo", "echo", "say", "said");
    let manager = manager_for(
        vec![Route::controller("/", controller.clone())],
        Registry::new(),
        StoreConfig::default(),
    );
    let mut changes = manager.subscribe();

    let operations = manager.render_props(&controller).unwrap().operations;
    operations.call("say", Value::from("hi")).unwrap().await.unwrap();

    assert!(changes.has_changed().unwrap());
    changes.mark_unchanged();
    let props = manager.render_props(&controller).unwrap();
    assert_eq!(props.values["said"], Value::from("hi"));

    manager.shutdown(None).await.unwrap();
}
