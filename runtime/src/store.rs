//! The single-writer store
//!
//! [`Store`] owns the root state. The reducer is the only code that writes
//! it, and it runs synchronously inside [`Store::dispatch`] while the write
//! lock is held. After reducing, the action is handed to:
//!
//! 1. every watcher queue registered for its type with [`Store::take`]
//! 2. every action observer ([`Store::subscribe_actions`])
//! 3. the change counter views re-render from ([`Store::subscribe`])
//!
//! Dispatching [`END_ACTION`] (what [`Store::close`] does) drops every
//! watcher queue. Watchers drain what was already queued and then stop.

use crate::config::StoreConfig;
use crate::error::StoreError;
use statewire_core::{Action, Reducer, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch};

/// Halt signal recognised by the store
pub const END_ACTION: &str = "@@statewire/END";

/// Single-writer store over a reducer's state
pub struct Store<R: Reducer<Action = Action>> {
    inner: Arc<StoreInner<R>>,
}

type Takers = HashMap<String, Vec<mpsc::UnboundedSender<Action>>>;

struct StoreInner<R: Reducer<Action = Action>> {
    state: RwLock<R::State>,
    reducer: R,
    takers: Mutex<Takers>,
    closed: AtomicBool,
    /// Every dispatched action, for observers
    action_broadcast: broadcast::Sender<Action>,
    version: watch::Sender<u64>,
}

impl<R> Store<R>
where
    R: Reducer<Action = Action> + 'static,
    R::State: Send + Sync + 'static,
{
    /// Create a store with default configuration.
    #[must_use]
    pub fn new(initial_state: R::State, reducer: R) -> Self {
        Self::with_config(initial_state, reducer, &StoreConfig::default())
    }

    /// Create a store with explicit configuration.
    #[must_use]
    pub fn with_config(initial_state: R::State, reducer: R, config: &StoreConfig) -> Self {
        let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));
        let (version, _) = watch::channel(0);

        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(initial_state),
                reducer,
                takers: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                action_broadcast,
                version,
            }),
        }
    }

    /// Reduce `action` into the state, then hand it to watchers and observers.
    ///
    /// Reducers run while the write lock is held, so concurrent dispatches
    /// serialize here.
    ///
    /// # Panics
    ///
    /// A panicking reducer propagates to the caller.
    #[tracing::instrument(skip(self, action), fields(kind = %action.kind), name = "store_dispatch")]
    pub fn dispatch(&self, action: Action) {
        self.inner.dispatch(action);
    }

    /// Register a watcher queue for actions of type `kind`.
    ///
    /// The queue is FIFO. It ends once the store is closed and everything
    /// already queued has been received.
    #[must_use]
    pub fn take(&self, kind: &str) -> mpsc::UnboundedReceiver<Action> {
        let (tx, rx) = mpsc::unbounded_channel();
        // The halt flips `closed` under this lock
        let mut takers = self.inner.takers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            tracing::debug!(kind, "Store is closed, watcher queue ends immediately");
            return rx;
        }
        takers.entry(kind.to_string()).or_default().push(tx);
        rx
    }

    /// Read state through a closure.
    pub fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&R::State) -> T,
    {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Clone of the current state
    #[must_use]
    pub fn snapshot(&self) -> R::State
    where
        R::State: Clone,
    {
        self.state(Clone::clone)
    }

    /// Change counter, bumped after every dispatch.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    /// Observe every dispatched action.
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<Action> {
        self.inner.action_broadcast.subscribe()
    }

    /// Weak dispatch handle for watchers and controllers.
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        let target: Weak<dyn DispatchTarget> = Arc::downgrade(&self.inner) as Weak<dyn DispatchTarget>;
        Dispatcher { target }
    }

    /// Dispatch the halt signal.
    pub fn close(&self) {
        self.dispatch(Action::new(END_ACTION, Value::Null));
    }

    /// Whether the halt signal has been dispatched
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl<R: Reducer<Action = Action>> Clone for Store<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Reducer<Action = Action>> fmt::Debug for Store<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .field("version", &*self.inner.version.borrow())
            .finish_non_exhaustive()
    }
}

impl<R: Reducer<Action = Action>> StoreInner<R> {
    fn dispatch(&self, action: Action) {
        metrics::counter!("statewire_dispatch_total").increment(1);
        tracing::trace!("Processing action");

        let mut takers = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let start = Instant::now();
            self.reducer.reduce(&mut state, &action);
            metrics::histogram!("statewire_reducer_duration_seconds")
                .record(start.elapsed().as_secs_f64());
            // Locked before the state is released: a reduced action always
            // reaches its queues ahead of a racing halt.
            self.takers.lock().unwrap_or_else(PoisonError::into_inner)
        };

        self.version.send_modify(|version| *version += 1);
        // No observers is fine
        let _ = self.action_broadcast.send(action.clone());

        if action.kind == END_ACTION {
            self.halt(&mut takers);
        } else {
            Self::deliver(&mut takers, action);
        }
    }

    fn deliver(takers: &mut Takers, action: Action) {
        let Some(queues) = takers.get_mut(&action.kind) else {
            return;
        };
        queues.retain(|queue| queue.send(action.clone()).is_ok());
        tracing::trace!(watchers = queues.len(), "Action delivered to watchers");
    }

    fn halt(&self, takers: &mut Takers) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let queues: usize = takers.values().map(Vec::len).sum();
        takers.clear();
        tracing::info!(watchers = queues, "Store closed, watchers will drain and stop");
    }
}

/// Type-erased dispatch target, so one [`Dispatcher`] works for any reducer.
trait DispatchTarget: Send + Sync {
    fn dispatch_action(&self, action: Action);
}

impl<R> DispatchTarget for StoreInner<R>
where
    R: Reducer<Action = Action>,
    R::State: Send + Sync,
{
    fn dispatch_action(&self, action: Action) {
        self.dispatch(action);
    }
}

/// Weak handle dispatching into a [`Store`]
///
/// Holding one does not keep the store alive.
#[derive(Clone)]
pub struct Dispatcher {
    target: Weak<dyn DispatchTarget>,
}

impl Dispatcher {
    /// Dispatch `action` into the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Released`] if the store has been dropped.
    pub fn dispatch(&self, action: Action) -> Result<(), StoreError> {
        let target = self.target.upgrade().ok_or(StoreError::Released)?;
        let span = tracing::trace_span!("dispatcher", kind = %action.kind);
        let _enter = span.enter();
        target.dispatch_action(action);
        Ok(())
    }

    /// Whether the store is still alive
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.target.strong_count() > 0
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("live", &self.is_live())
            .finish()
    }
}
