//! # Statewire Testing
//!
//! Testing utilities and helpers for Statewire controllers and stores.
//!
//! This crate provides:
//! - [`ReducerTest`]: Given-When-Then harness for reducers
//! - [`mocks::FakeAppsApi`]: a slow backend that resolves or fails on cue
//! - [`init_test_tracing`]: log output for tests, filtered by `RUST_LOG`
//!
//! ## Example
//!
//! ```
//! use statewire_testing::mocks::FakeAppsApi;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let api = FakeAppsApi::new(Duration::from_millis(1));
//! let apps = api.fetch_apps().await;
//! assert!(apps.is_ok());
//! # });
//! ```


pub use reducer_test::{assertions, ReducerTest};

use std::sync::Once;

static TRACING: Once = Once::new();

/// Install a test subscriber writing through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        // Another subscriber may already be installed by the test binary
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Mock backends for operation bodies.
pub mod mocks {
    use statewire_core::{ErrorValue, Value};
    use std::time::Duration;

    /// A slow apps backend.
    ///
    /// Every call sleeps for the configured delay before answering, so
    /// operations built on it are genuinely in flight for a while.
    #[derive(Debug, Clone, Copy)]
    pub struct FakeAppsApi {
        delay: Duration,
    }

    impl Default for FakeAppsApi {
        fn default() -> Self {
            Self::new(Duration::from_millis(50))
        }
    }

    impl FakeAppsApi {
        /// Create a backend answering after `delay`
        #[must_use]
        pub const fn new(delay: Duration) -> Self {
            Self { delay }
        }

        /// The app list every successful fetch returns
        #[must_use]
        pub fn apps() -> Value {
            Value::from(serde_json::json!([{ "id": "1234-abc", "name": "TestApp" }]))
        }

        /// Resolve with `{apps: [...]}` after the delay.
        ///
        /// # Errors
        ///
        /// Never fails; the signature matches an operation body.
        pub async fn fetch_apps(&self) -> Result<Value, ErrorValue> {
            tokio::time::sleep(self.delay).await;
            Ok(Value::object([("apps", Self::apps())]))
        }

        /// Fail with a `Not Found` error carrying `statusCode: 404` after the delay.
        ///
        /// # Errors
        ///
        /// Always.
        pub async fn fetch_apps_not_found(&self) -> Result<Value, ErrorValue> {
            tokio::time::sleep(self.delay).await;
            Err(ErrorValue::new("Not Found").with_field("statusCode", 404))
        }
    }
}
