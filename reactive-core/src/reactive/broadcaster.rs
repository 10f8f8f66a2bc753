//! The broadcast/subscriber pipeline (§4.2, L2).
//!
//! Dispatch is decoupled from *producing* a [`StateChange`] (the
//! interceptor's job) and from *deciding where it relays to* (the relational
//! graph's job, §4.4) — this module only knows how to fan one event out to a
//! fixed subscriber list, and how to route a validation failure to exception
//! handlers or the diagnostics channel. Every host callback runs inside
//! `catch_unwind`, mirroring the source crate's dev-tool dispatch (§7
//! "Propagation": one broken subscriber never blocks its siblings).

use super::diagnostics;
use super::error::ReactiveError;
use super::handle::{ExceptionCallback, Subscriber};

/// Invoke every subscriber with `change`, isolating panics. Internal
/// subscribers (installed by the relational graph to relay child events
/// upward, §4.4) and external ones are dispatched identically here — the
/// distinction only matters to callers deciding *whether* to relay at all
/// (the link graph skips relaying back to the handle that produced the
/// event, via [`StateChange::emitter`](super::change::StateChange::emitter)).
pub fn broadcast(subscribers: &[Subscriber], change: &super::change::StateChange) {
    for sub in subscribers {
        let callback = sub.callback.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback(change);
        }));
        if result.is_err() {
            diagnostics::capture(&ReactiveError::External {
                message: format!("subscriber {} panicked", sub.id),
            });
        }
    }
}

/// Run every registered exception handler against `error`, isolating panics.
/// Returns whether at least one handler was present (§4.2 "Error path": a
/// validation failure with zero handlers may still need to be escalated).
pub fn dispatch_exception(handlers: &[(u64, ExceptionCallback)], error: &ReactiveError) -> bool {
    for (id, handler) in handlers {
        let handler = handler.clone();
        let error_clone = error.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handler(&error_clone);
        }));
        if result.is_err() {
            diagnostics::capture(&ReactiveError::External {
                message: format!("exception handler {id} panicked"),
            });
        }
    }
    !handlers.is_empty()
}

/// Route a freshly-produced `StateChange` according to §4.2: an error-bearing
/// change goes to exception handlers (and, with zero handlers under strict
/// production configuration, is escalated to a hard `Err`); anything else
/// reaches every subscriber. Takes the pieces rather than a `&Metadata` so
/// callers can clone them out of a lock guard before dispatch (reentrant
/// subscriber callbacks must never run while a registry shard lock is held).
pub fn emit(
    subscribers: &[Subscriber],
    exception_handlers: &[(u64, ExceptionCallback)],
    escalate: bool,
    change: &super::change::StateChange,
) -> super::error::Result<()> {
    if let Some(error) = &change.error {
        let handled = dispatch_exception(exception_handlers, error);
        if !handled {
            diagnostics::capture(error);
            if escalate {
                return Err(error.clone());
            }
        }
        Ok(())
    } else {
        broadcast(subscribers, change);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::change::{ChangeType, StateChange};
    use crate::reactive::handle::Subscriber;
    use crate::reactive::id::HandleId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn broadcast_reaches_every_subscriber_and_survives_a_panic() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_a = hits.clone();
        let hits_b = hits.clone();
        let subscribers = vec![
            Subscriber {
                id: 1,
                callback: Arc::new(move |_| {
                    hits_a.fetch_add(1, Ordering::SeqCst);
                    panic!("boom");
                }),
                internal: false,
            },
            Subscriber {
                id: 2,
                callback: Arc::new(move |_| {
                    hits_b.fetch_add(1, Ordering::SeqCst);
                }),
                internal: true,
            },
        ];
        let change = StateChange::new(ChangeType::Set, HandleId::new());
        broadcast(&subscribers, &change);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unhandled_validation_error_is_not_escalated_outside_strict_production() {
        let id = HandleId::new();
        let change = StateChange::new(ChangeType::Set, id).with_error(
            ReactiveError::Validation {
                handle: id,
                path: "name".into(),
                message: "bad".into(),
                issues: vec![],
            },
            vec![],
        );
        assert!(emit(&[], &[], false, &change).is_ok());
    }

    #[test]
    fn unhandled_validation_error_escalates_under_strict_production() {
        let id = HandleId::new();
        let change = StateChange::new(ChangeType::Set, id).with_error(
            ReactiveError::Validation {
                handle: id,
                path: "name".into(),
                message: "bad".into(),
                issues: vec![],
            },
            vec![],
        );
        assert!(emit(&[], &[], true, &change).is_err());
    }

    #[test]
    fn handled_validation_error_never_escalates() {
        let id = HandleId::new();
        let handlers: Vec<(u64, ExceptionCallback)> = vec![(1, Arc::new(|_| {}))];
        let change = StateChange::new(ChangeType::Set, id).with_error(
            ReactiveError::Validation {
                handle: id,
                path: "name".into(),
                message: "bad".into(),
                issues: vec![],
            },
            vec![],
        );
        assert!(emit(&[], &handlers, true, &change).is_ok());
    }
}
