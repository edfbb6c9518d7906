//! Watchers and their supervisor
//!
//! A watcher waits on its store queue for one action type. Operation watchers
//! run the operation body for each dispatch and dispatch its completion;
//! standalone watchers hand the payload to a callback.
//!
//! Each watcher handles one action at a time. Dispatches arriving while an
//! invocation is in flight wait in the queue, in order.

use crate::controller::OperationFn;
use crate::error::StoreError;
use crate::store::{Dispatcher, Store};
use futures::FutureExt;
use statewire_core::{Action, ActionDescriptor, Completion, ErrorValue, Reducer, Value};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Fire-and-forget callback run for every dispatch of a watched type.
pub type WatchFn = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Clone)]
enum WatcherKind {
    Operation {
        dispatch: ActionDescriptor,
        completion: ActionDescriptor,
        handler: OperationFn,
    },
    Standalone {
        kind: String,
        callback: WatchFn,
    },
}

/// A long-lived process bound to one action type
#[derive(Clone)]
pub struct Watcher(WatcherKind);

impl Watcher {
    pub(crate) fn operation(
        dispatch: ActionDescriptor,
        completion: ActionDescriptor,
        handler: OperationFn,
    ) -> Self {
        Self(WatcherKind::Operation {
            dispatch,
            completion,
            handler,
        })
    }

    /// Watcher invoking `callback` with the payload of every `kind` dispatch.
    pub fn standalone<F>(kind: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Self(WatcherKind::Standalone {
            kind: kind.into(),
            callback: Arc::new(callback),
        })
    }

    /// Action type this watcher waits on
    #[must_use]
    pub fn kind(&self) -> &str {
        match &self.0 {
            WatcherKind::Operation { dispatch, .. } => dispatch.kind(),
            WatcherKind::Standalone { kind, .. } => kind,
        }
    }

    /// Whether this watcher runs an operation body
    #[must_use]
    pub const fn is_operation(&self) -> bool {
        matches!(self.0, WatcherKind::Operation { .. })
    }

    /// Run until the queue ends.
    async fn run(self, mut queue: mpsc::UnboundedReceiver<Action>, dispatcher: Dispatcher) {
        metrics::gauge!("statewire_watchers_active").increment(1.0);
        tracing::debug!(kind = self.kind(), "Watcher started");

        match &self.0 {
            WatcherKind::Operation {
                dispatch,
                completion,
                handler,
            } => {
                while let Some(action) = queue.recv().await {
                    run_operation(dispatch, completion, handler, action, &dispatcher).await;
                }
            },
            WatcherKind::Standalone { kind, callback } => {
                while let Some(action) = queue.recv().await {
                    tracing::trace!(kind, "Standalone watcher invoked");
                    callback(action.payload);
                }
            },
        }

        metrics::gauge!("statewire_watchers_active").decrement(1.0);
        tracing::debug!(kind = self.kind(), "Watcher stopped");
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("kind", &self.kind())
            .field("operation", &self.is_operation())
            .finish()
    }
}

#[tracing::instrument(skip_all, fields(operation = dispatch.name()), name = "operation_watcher")]
async fn run_operation(
    dispatch: &ActionDescriptor,
    completion: &ActionDescriptor,
    handler: &OperationFn,
    action: Action,
    dispatcher: &Dispatcher,
) {
    let data = match invoke(handler, action.payload).await {
        Ok(data) => data,
        Err(err) => {
            tracing::error!(error = %err, "An error occurred while processing the result of an operation");
            Value::Error(err)
        },
    };

    let done = completion
        .action(Completion::new(dispatch, data).into_payload())
        .with_dispatch_id(action.dispatch_id);
    if let Err(err) = dispatcher.dispatch(done) {
        tracing::error!(error = %err, "An error occurred while running an operation");
    }
}

/// Run an operation body, turning panics (while building or while polling
/// its future) into errors.
pub(crate) async fn invoke(handler: &OperationFn, payload: Value) -> Result<Value, ErrorValue> {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
        Ok(future) => future,
        Err(panic) => return Err(panic_error(&*panic)),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(panic_error(&*panic)),
    }
}

fn panic_error(panic: &(dyn Any + Send)) -> ErrorValue {
    metrics::counter!("statewire_operation_panics_total").increment(1);
    let message = panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "operation panicked".to_string());
    ErrorValue::new(message).with_field("panicked", true)
}

/// Root process running every watcher concurrently
///
/// One watcher failing does not stop the others.
pub struct Supervisor {
    tasks: JoinSet<()>,
}

impl Supervisor {
    /// Register every watcher's queue with `store`, then spawn them.
    ///
    /// Queues are registered before anything runs, so no dispatch made after
    /// this returns can be missed.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start<R>(store: &Store<R>, watchers: Vec<Watcher>) -> Self
    where
        R: Reducer<Action = Action> + 'static,
        R::State: Send + Sync + 'static,
    {
        let queued: Vec<_> = watchers
            .into_iter()
            .map(|watcher| {
                let queue = store.take(watcher.kind());
                (watcher, queue)
            })
            .collect();

        let mut tasks = JoinSet::new();
        for (watcher, queue) in queued {
            tasks.spawn(watcher.run(queue, store.dispatcher()));
        }
        tracing::info!(watchers = tasks.len(), "Supervisor started");
        Self { tasks }
    }

    /// Watchers still running
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether every watcher has stopped
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every watcher to stop, aborting stragglers after `timeout`.
    ///
    /// Watchers only stop once the store is closed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] with the number of watchers
    /// still running when the timeout expired.
    pub async fn join(&mut self, timeout: Duration) -> Result<(), StoreError> {
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    if err.is_panic() {
                        tracing::error!(error = %err, "Watcher panicked");
                    }
                }
            }
        })
        .await;

        if drained.is_ok() {
            tracing::info!("All watchers stopped");
            return Ok(());
        }

        let remaining = self.tasks.len();
        tracing::error!(remaining, "Shutdown timeout: {} watchers still running", remaining);
        self.tasks.abort_all();
        Err(StoreError::ShutdownTimeout(remaining))
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("watchers", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use statewire_core::{ReducerMap, Slice};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    fn empty_store() -> Store<ReducerMap> {
        Store::new(Slice::new(), ReducerMap::default())
    }

    fn handler<F>(f: F) -> OperationFn
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Value, ErrorValue>> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    #[tokio::test]
    async fn sync_panics_become_errors() {
        let op = handler(|_| panic!("exploded"));
        let err = invoke(&op, Value::Null).await.unwrap_err();
        assert_eq!(err.message(), "exploded");
        assert_eq!(err.field("panicked"), Some(&serde_json::Value::Bool(true)));
    }

    #[tokio::test]
    async fn async_panics_become_errors() {
        let op = handler(|_| async { panic!("later") }.boxed());
        let err = invoke(&op, Value::Null).await.unwrap_err();
        assert_eq!(err.message(), "later");
    }

    #[tokio::test]
    async fn operation_watcher_dispatches_completion_with_dispatch_id() {
        let store = empty_store();
        let dispatch = ActionDescriptor::from_name("fetchApps");
        let completion = ActionDescriptor::completion_of("fetchApps");
        let mut completions = store.take(completion.kind());

        let op = handler(|payload| async move { Ok(payload) }.boxed());
        let mut supervisor = Supervisor::start(
            &store,
            vec![Watcher::operation(dispatch.clone(), completion, op)],
        );
        assert_eq!(supervisor.len(), 1);

        store.dispatch(dispatch.action(Value::from("hello")).with_dispatch_id(Some(7)));
        let done = completions.recv().await.unwrap();
        assert_eq!(done.dispatch_id, Some(7));
        let decoded = Completion::from_payload(&done.payload).unwrap();
        assert_eq!(decoded.data, Value::from("hello"));
        assert_eq!(decoded.initiator, "fetchApps");

        store.close();
        supervisor.join(Duration::from_secs(1)).await.unwrap();
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn standalone_watcher_sees_payload_once() {
        let store = empty_store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut supervisor = Supervisor::start(
            &store,
            vec![Watcher::standalone("otherAction", move |payload| {
                sink.lock().unwrap().push(payload);
            })],
        );

        store.dispatch(Action::new("otherAction", Value::from("something")));
        store.dispatch(Action::new("unrelated", Value::Null));
        store.close();
        supervisor.join(Duration::from_secs(1)).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Value::from("something")]);
    }

    #[tokio::test]
    async fn queued_dispatches_are_handled_in_order() {
        let store = empty_store();
        let dispatch = ActionDescriptor::from_name("step");
        let completion = ActionDescriptor::completion_of("step");
        let mut completions = store.take(completion.kind());

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let gate = Arc::new(Mutex::new(Some(release_rx)));
        let op = handler(move |payload| {
            let gate = gate.lock().unwrap().take();
            async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                Ok(payload)
            }
            .boxed()
        });
        let mut supervisor =
            Supervisor::start(&store, vec![Watcher::operation(dispatch.clone(), completion, op)]);

        store.dispatch(dispatch.action(Value::from(1)));
        store.dispatch(dispatch.action(Value::from(2)));
        release_tx.send(()).unwrap();

        for expected in [1, 2] {
            let done = completions.recv().await.unwrap();
            let data = Completion::from_payload(&done.payload).unwrap().data;
            assert_eq!(data, Value::from(expected));
        }

        store.close();
        supervisor.join(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn join_times_out_while_store_is_open() {
        let store = empty_store();
        let mut supervisor = Supervisor::start(
            &store,
            vec![Watcher::standalone("never", |_| {})],
        );
        let err = supervisor.join(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, StoreError::ShutdownTimeout(1));
    }
}
