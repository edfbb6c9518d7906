//! Deferred results for dispatched operations
//!
//! Every dispatch hands its caller a [`Pending`] backed by a oneshot channel.
//! The completion reducer settles the channel once the operation's
//! completion action has been reduced into the store.

use crate::error::OperationError;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use statewire_core::{ErrorValue, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// How overlapping dispatches of one operation share result slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredPolicy {
    /// One live slot per operation. A newer dispatch takes the slot over and
    /// the earlier caller fails with [`OperationError::Superseded`].
    #[default]
    LatestWins,

    /// Every dispatch settles exactly its own handle.
    Correlated,
}

impl FromStr for DeferredPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" | "latest_wins" | "latest-wins" => Ok(Self::LatestWins),
            "correlated" => Ok(Self::Correlated),
            other => Err(format!("unknown deferred policy \"{other}\", expected latest or correlated")),
        }
    }
}

impl fmt::Display for DeferredPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LatestWins => f.write_str("latest"),
            Self::Correlated => f.write_str("correlated"),
        }
    }
}

type Settlement = Result<Value, OperationError>;

/// Result slots of one controller, keyed by operation wire type
pub(crate) struct DeferredTable {
    policy: OnceLock<DeferredPolicy>,
    next_id: AtomicU64,
    slots: Mutex<HashMap<String, Vec<(u64, oneshot::Sender<Settlement>)>>>,
}

impl DeferredTable {
    pub(crate) fn new(policy: Option<DeferredPolicy>) -> Self {
        let cell = OnceLock::new();
        if let Some(policy) = policy {
            let _ = cell.set(policy);
        }
        Self {
            policy: cell,
            next_id: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn policy(&self) -> DeferredPolicy {
        *self.policy.get_or_init(DeferredPolicy::default)
    }

    /// Fix the policy unless the controller already picked one.
    pub(crate) fn apply_default(&self, policy: DeferredPolicy) {
        let _ = self.policy.set(policy);
    }

    /// Allocate a slot for a new dispatch of `kind`.
    pub(crate) fn allocate(&self, kind: &str, operation: &str) -> (u64, oneshot::Receiver<Settlement>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let policy = self.policy();

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(kind.to_string()).or_default();
        if policy == DeferredPolicy::LatestWins {
            for (replaced, sender) in slot.drain(..) {
                tracing::debug!(operation, replaced, "Pending dispatch superseded");
                let _ = sender.send(Err(OperationError::Superseded {
                    operation: operation.to_string(),
                }));
            }
        }
        slot.push((id, tx));
        (id, rx)
    }

    /// Drop a slot whose dispatch never reached the store.
    pub(crate) fn cancel(&self, kind: &str, id: u64) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get_mut(kind) {
            slot.retain(|(slot_id, _)| *slot_id != id);
        }
    }

    pub(crate) fn resolve(&self, kind: &str, dispatch_id: Option<u64>, value: Value) {
        self.settle(kind, dispatch_id, Ok(value));
    }

    pub(crate) fn reject(&self, kind: &str, dispatch_id: Option<u64>, error: ErrorValue) {
        self.settle(kind, dispatch_id, Err(OperationError::Failed(error)));
    }

    fn settle(&self, kind: &str, dispatch_id: Option<u64>, settlement: Settlement) {
        let sender = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(slot) = slots.get_mut(kind) else {
                return;
            };
            match self.policy() {
                DeferredPolicy::LatestWins => slot.pop(),
                DeferredPolicy::Correlated => dispatch_id
                    .and_then(|id| slot.iter().position(|(slot_id, _)| *slot_id == id))
                    .map(|index| slot.remove(index)),
            }
        };

        match sender {
            Some((id, sender)) => {
                // The caller may have stopped waiting
                let _ = sender.send(settlement);
                tracing::trace!(kind, id, "Deferred settled");
            },
            None => tracing::trace!(kind, ?dispatch_id, "No pending caller to settle"),
        }
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self, kind: &str) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(kind)
            .map_or(0, Vec::len)
    }
}

/// Future result of a dispatched or directly called operation
///
/// Resolves to the merged namespace slice (dispatch) or the operation's own
/// result (direct call).
#[must_use = "a Pending does nothing unless awaited"]
pub struct Pending {
    operation: String,
    future: BoxFuture<'static, Result<Value, OperationError>>,
}

impl Pending {
    pub(crate) fn deferred(operation: &str, rx: oneshot::Receiver<Settlement>) -> Self {
        let name = operation.to_string();
        Self {
            operation: operation.to_string(),
            future: async move {
                rx.await
                    .unwrap_or_else(|_| Err(OperationError::Abandoned { operation: name }))
            }
            .boxed(),
        }
    }

    pub(crate) fn direct<F>(operation: &str, future: F) -> Self
    where
        F: Future<Output = Result<Value, ErrorValue>> + Send + 'static,
    {
        Self {
            operation: operation.to_string(),
            future: future.map(|outcome| outcome.map_err(OperationError::Failed)).boxed(),
        }
    }

    /// Name of the operation this result belongs to
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl Future for Pending {
    type Output = Result<Value, OperationError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert_eq, Just, Strategy};

    #[tokio::test]
    async fn latest_wins_supersedes_earlier_callers() {
        let table = DeferredTable::new(None);
        let (_, first) = table.allocate("fetchApps", "fetchApps");
        let (_, second) = table.allocate("fetchApps", "fetchApps");
        assert_eq!(table.outstanding("fetchApps"), 1);

        // Stale id still settles the live slot
        table.resolve("fetchApps", Some(1), Value::from("done"));

        let first = Pending::deferred("fetchApps", first).await;
        assert!(matches!(first, Err(OperationError::Superseded { .. })));
        assert_eq!(Pending::deferred("fetchApps", second).await, Ok(Value::from("done")));
    }

    #[tokio::test]
    async fn correlated_settles_by_dispatch_id() {
        let table = DeferredTable::new(Some(DeferredPolicy::Correlated));
        let (first_id, first) = table.allocate("load", "load");
        let (second_id, second) = table.allocate("load", "load");

        table.reject("load", Some(second_id), ErrorValue::new("second failed"));
        table.resolve("load", Some(first_id), Value::from(1));
        table.resolve("load", None, Value::from(2));

        assert_eq!(Pending::deferred("load", first).await, Ok(Value::from(1)));
        let second = Pending::deferred("load", second).await;
        assert_eq!(
            second.as_ref().err().and_then(OperationError::as_failure).map(ErrorValue::message),
            Some("second failed")
        );
        assert_eq!(table.outstanding("load"), 0);
    }

    #[tokio::test]
    async fn dropped_slots_are_abandoned() {
        let table = DeferredTable::new(Some(DeferredPolicy::Correlated));
        let (id, rx) = table.allocate("load", "load");
        table.cancel("load", id);
        assert!(matches!(
            Pending::deferred("load", rx).await,
            Err(OperationError::Abandoned { .. })
        ));
    }

    #[test]
    fn default_policy_applies_only_once() {
        let table = DeferredTable::new(None);
        table.apply_default(DeferredPolicy::Correlated);
        table.apply_default(DeferredPolicy::LatestWins);
        assert_eq!(table.policy(), DeferredPolicy::Correlated);

        let fixed = DeferredTable::new(Some(DeferredPolicy::LatestWins));
        fixed.apply_default(DeferredPolicy::Correlated);
        assert_eq!(fixed.policy(), DeferredPolicy::LatestWins);
    }

    #[test]
    fn pending_waits_for_settlement() {
        let table = DeferredTable::new(None);
        let (id, rx) = table.allocate("load", "load");
        let mut pending = tokio_test::task::spawn(Pending::deferred("load", rx));

        tokio_test::assert_pending!(pending.poll());
        table.resolve("load", Some(id), Value::from(true));
        assert!(pending.is_woken());
        tokio_test::assert_ready_eq!(pending.poll(), Ok(Value::from(true)));
    }

    proptest::proptest! {
        #[test]
        fn correlated_settles_in_any_order(order in Just((1..=8_i64).collect::<Vec<_>>()).prop_shuffle()) {
            let table = DeferredTable::new(Some(DeferredPolicy::Correlated));
            let mut receivers: Vec<_> = (1..=8_i64)
                .map(|n| {
                    let (id, rx) = table.allocate("load", "load");
                    (n, id, rx)
                })
                .collect();

            for n in &order {
                let (_, id, _) = &receivers[usize::try_from(n - 1).unwrap()];
                table.resolve("load", Some(*id), Value::from(*n));
            }

            prop_assert_eq!(table.outstanding("load"), 0);
            for (n, _, rx) in &mut receivers {
                prop_assert_eq!(rx.try_recv().unwrap(), Ok(Value::from(*n)));
            }
        }
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!("latest".parse(), Ok(DeferredPolicy::LatestWins));
        assert_eq!(" Correlated ".parse(), Ok(DeferredPolicy::Correlated));
        assert!("sometimes".parse::<DeferredPolicy>().is_err());
    }
}
