//! Completion reducers
//!
//! The reducer registered for `<operation>@@reducer`. It is the only place an
//! operation's outcome reaches the namespace slice:
//!
//! - an error outcome is tagged with the operation name, stored under
//!   `lastThrownError` and rejects the caller
//! - any other outcome clears a previous `lastThrownError`, is shallow-merged
//!   into the slice and resolves the caller with the merged slice
//!
//! The live container is written before the caller is settled, so a resumed
//! caller always observes the new state.

use super::deferred::DeferredTable;
use super::state::{StateContainer, LAST_ERROR, LAST_THROWN_ERROR};
use statewire_core::{Action, ActionDescriptor, Completion, ErrorValue, Slice, SliceReducerFn, Value};
use std::sync::Arc;

/// Build the completion reducer for `operation`.
pub(crate) fn completion_reducer(
    operation: &ActionDescriptor,
    deferreds: Arc<DeferredTable>,
    container: Arc<StateContainer>,
) -> SliceReducerFn {
    let kind = operation.kind().to_string();
    Arc::new(move |state: &Slice, action: &Action| {
        reduce_completion(state, action, &kind, &deferreds, &container)
    })
}

fn reduce_completion(
    state: &Slice,
    action: &Action,
    kind: &str,
    deferreds: &DeferredTable,
    container: &StateContainer,
) -> Slice {
    let (initiator, payload) = match Completion::from_payload(&action.payload) {
        Some(completion) => (Some(completion.initiator), completion.data),
        None => (None, action.payload.clone()),
    };

    let mut next = state.clone();
    let had_thrown_error = next.get(LAST_THROWN_ERROR).is_some_and(Value::is_error);
    if had_thrown_error && !payload.is_error() {
        next.insert(LAST_THROWN_ERROR.to_string(), Value::Null);
    }

    match payload {
        Value::Error(err) => {
            let err = err.tagged(initiator.as_deref());
            next.insert(LAST_THROWN_ERROR.to_string(), Value::Error(err.clone()));
            container.write(next.clone());
            metrics::counter!("statewire_operation_failures_total").increment(1);
            tracing::debug!(kind, error = %err, "Operation failed");
            deferreds.reject(kind, action.dispatch_id, err);
        },
        other => {
            if let Value::Object(fields) = other {
                next.extend(fields);
            }
            tag_last_error(&mut next, container, initiator.as_deref());
            container.write(next.clone());
            deferreds.resolve(kind, action.dispatch_id, Value::Object(next.clone()));
        },
    }

    next
}

/// Tag a `lastError` the operation just returned.
///
/// An error that is the very instance already in the container was carried
/// over, not returned, and keeps its original tag.
fn tag_last_error(next: &mut Slice, container: &StateContainer, initiator: Option<&str>) {
    let fresh = match next.get(LAST_ERROR) {
        Some(Value::Error(current)) => {
            let carried_over = matches!(
                container.get(LAST_ERROR),
                Some(Value::Error(previous)) if ErrorValue::same(&previous, current)
            );
            (!carried_over).then(|| current.tagged(initiator))
        },
        _ => None,
    };
    if let Some(fresh) = fresh {
        next.insert(LAST_ERROR.to_string(), Value::Error(fresh));
    }
}

#[cfg(test)]
#[allow(clippy::panic)] // Test code
mod tests {
    use super::*;
    use crate::error::OperationError;
    use crate::controller::deferred::Pending;

    struct Fixture {
        op: ActionDescriptor,
        done: ActionDescriptor,
        deferreds: Arc<DeferredTable>,
        container: Arc<StateContainer>,
        reducer: SliceReducerFn,
    }

    fn fixture(initial: Slice) -> Fixture {
        let op = ActionDescriptor::from_name("fetchApps");
        let done = ActionDescriptor::completion_of("fetchApps");
        let deferreds = Arc::new(DeferredTable::new(None));
        let container = Arc::new(StateContainer::new(initial));
        let reducer = completion_reducer(&op, Arc::clone(&deferreds), Arc::clone(&container));
        Fixture { op, done, deferreds, container, reducer }
    }

    fn complete(f: &Fixture, state: &Slice, data: Value) -> Slice {
        let action = f.done.action(Completion::new(&f.op, data).into_payload());
        (f.reducer)(state, &action)
    }

    #[tokio::test]
    async fn success_merges_and_resolves_with_slice() {
        let initial = Slice::from([
            ("currentApps".to_string(), Value::empty_array()),
            (LAST_THROWN_ERROR.to_string(), Value::Null),
        ]);
        let f = fixture(initial.clone());
        let (_, rx) = f.deferreds.allocate(f.op.kind(), f.op.name());

        let apps = Value::object([("currentApps", Value::from(vec![Value::from("one")]))]);
        let next = complete(&f, &initial, apps);

        assert_eq!(next["currentApps"], Value::from(vec![Value::from("one")]));
        assert_eq!(f.container.read(), next);
        assert_eq!(Pending::deferred("fetchApps", rx).await, Ok(Value::Object(next)));
    }

    #[tokio::test]
    async fn error_is_tagged_stored_and_rejected() {
        let initial = Slice::from([("currentApps".to_string(), Value::empty_array())]);
        let f = fixture(initial.clone());
        let (_, rx) = f.deferreds.allocate(f.op.kind(), f.op.name());

        let next = complete(&f, &initial, Value::Error(ErrorValue::new("Not Found")));

        let stored = next[LAST_THROWN_ERROR].as_error().cloned();
        assert_eq!(stored.as_ref().and_then(ErrorValue::initiator), Some("fetchApps"));
        assert_eq!(next["currentApps"], Value::empty_array());

        match Pending::deferred("fetchApps", rx).await {
            Err(OperationError::Failed(err)) => {
                assert!(stored.is_some_and(|stored| ErrorValue::same(&stored, &err)));
            },
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn success_clears_previous_thrown_error() {
        let initial = Slice::from([(
            LAST_THROWN_ERROR.to_string(),
            Value::Error(ErrorValue::new("old")),
        )]);
        let f = fixture(initial.clone());
        let next = complete(&f, &initial, Value::Null);
        assert_eq!(next[LAST_THROWN_ERROR], Value::Null);
    }

    #[test]
    fn returned_last_error_is_tagged_but_carried_over_one_is_not() {
        let f = fixture(Slice::new());
        let returned = ErrorValue::new("caught");
        let next = complete(
            &f,
            &Slice::new(),
            Value::object([(LAST_ERROR, Value::Error(returned.clone()))]),
        );
        let tagged = next[LAST_ERROR].as_error().cloned();
        assert_eq!(tagged.as_ref().and_then(ErrorValue::initiator), Some("fetchApps"));
        assert!(tagged.as_ref().is_some_and(|t| !ErrorValue::same(t, &returned)));

        // The slice now holds the tagged instance; a later completion that
        // carries it forward keeps it as is.
        let Some(tagged) = tagged else { return };
        let again = complete(
            &f,
            &next,
            Value::object([(LAST_ERROR, Value::Error(tagged.clone()))]),
        );
        assert!(again[LAST_ERROR].as_error().is_some_and(|e| ErrorValue::same(e, &tagged)));
    }

    #[test]
    fn foreign_payloads_merge_without_initiator() {
        let f = fixture(Slice::new());
        let action = f.done.action(Value::object([("plain", Value::from(true))]));
        let next = (f.reducer)(&Slice::new(), &action);
        assert_eq!(next["plain"], Value::from(true));

        let failed = f.done.action(Value::Error(ErrorValue::new("raw")));
        let next = (f.reducer)(&Slice::new(), &failed);
        assert_eq!(next[LAST_THROWN_ERROR].as_error().and_then(ErrorValue::initiator), None);
    }
}
