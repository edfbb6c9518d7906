//! Apps controller demo
//!
//! Mounts an `AppController` at `/`, fetches apps from a slow backend, fails
//! once on purpose, recovers, then prints the store and the metrics it
//! recorded.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=info,statewire_runtime=debug cargo run -p app-controller-demo
//! ```
//!
//! `STATEWIRE_DEFERRED_POLICY=correlated` switches how overlapping fetches
//! settle.

#![allow(missing_docs)]

use anyhow::Context as _;
use statewire_core::{ErrorValue, Value};
use statewire_runtime::controller::{LAST_ERROR, LAST_THROWN_ERROR};
use statewire_runtime::metrics::MetricsRecorder;
use statewire_runtime::{Controller, OperationError, Registry, Route, StateSpec, StoreConfig, StoreManager};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const BACKEND_LATENCY: Duration = Duration::from_millis(150);

/// Backend the controller talks to
async fn fetch_apps(fail: bool) -> Result<Value, ErrorValue> {
    tokio::time::sleep(BACKEND_LATENCY).await;
    if fail {
        return Err(ErrorValue::new("Not Found").with_field("statusCode", 404));
    }
    Ok(Value::from(serde_json::json!({
        "apps": [
            { "id": "1234-abc", "name": "TestApp" },
            { "id": "5678-def", "name": "OtherApp" },
        ]
    })))
}

fn app_controller() -> anyhow::Result<Controller> {
    let controller = Controller::builder("AppController")
        .operation("fetchApps", |payload| async move {
            let fail = payload.get("fail").is_some_and(Value::is_truthy);
            let response = fetch_apps(fail).await?;
            Ok::<_, ErrorValue>(Value::object([(
                "currentApps",
                response.get("apps").cloned().unwrap_or_else(Value::empty_array),
            )]))
        })
        .operation_sync("selectApp", |payload| Ok(Value::object([("selected", payload)])))
        .state(
            StateSpec::new()
                .derive("currentApps", |s| {
                    s.get("currentApps").cloned().unwrap_or_else(Value::empty_array)
                })
                .derive("selected", |s| s.get("selected").cloned().unwrap_or_default())
                .derive(LAST_ERROR, |s| s.get(LAST_ERROR).cloned().unwrap_or_default()),
        )
        .build()?;
    Ok(controller)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,statewire_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let recorder = MetricsRecorder::install()?;
    let config = StoreConfig::from_env().context("reading STATEWIRE_* configuration")?;
    tracing::info!(?config, "Starting apps demo");

    let controller = app_controller()?;
    let manager = StoreManager::new(
        vec![Route::controller("/", controller.clone())],
        Registry::new(),
        None,
        config,
    )?;

    // Overlapping fetches: under the default policy the first caller is superseded
    let first = controller.dispatch("fetchApps", Value::Null)?;
    let second = controller.dispatch("fetchApps", Value::Null)?;
    match first.await {
        Ok(slice) => tracing::info!(apps = ?slice.get("currentApps"), "First fetch settled"),
        Err(OperationError::Superseded { operation }) => {
            tracing::info!(operation, "First fetch superseded by the second");
        },
        Err(err) => return Err(err.into()),
    }
    let slice = second.await?;
    tracing::info!(apps = ?slice.get("currentApps"), "Second fetch settled");

    // A failing fetch is recorded on the slice and rejects the caller
    let failing = controller.dispatch("fetchApps", Value::from(serde_json::json!({ "fail": true })))?;
    if let Err(err) = failing.await {
        tracing::warn!(%err, "Fetch failed");
    }
    let props = manager.render_props(&controller)?;
    tracing::info!(thrown = ?props.values.get(LAST_THROWN_ERROR), "View after failure");

    // Any successful operation clears the thrown error
    let view_ops = props.operations;
    view_ops.call("selectApp", Value::from("1234-abc"))?.await?;
    let props = manager.render_props(&controller)?;
    tracing::info!(
        selected = ?props.values.get("selected"),
        thrown = ?props.values.get(LAST_THROWN_ERROR),
        "View after recovery"
    );

    manager.shutdown(None).await?;

    println!("{}", serde_json::to_string_pretty(&manager.snapshot_json())?);
    if let Some(text) = recorder.render() {
        println!("{text}");
    }
    Ok(())
}
