//! The active-observer stack (§4.5, §9 "Thread-local active observer").
//!
//! Generalizes the source crate's thread-local subscriber-tracking context:
//! instead of recording bare signal ids, each frame records which
//! `(handle, key)` pairs were read while it was active, since an observer
//! here tracks specific keys on specific handles rather than whole opaque
//! signals. Nesting works the same way — entering pushes a frame, the guard
//! pops it on drop (even on panic), and a read always registers against the
//! innermost frame.

use std::cell::RefCell;

use super::id::{HandleId, ObserverId};
use super::observer::TrackedKey;

thread_local! {
    static STACK: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
}

struct Frame {
    observer: ObserverId,
    reads: Vec<(HandleId, TrackedKey)>,
}

/// RAII guard for one active-observer frame. While alive, reads performed
/// through [`Interceptor`](super::interceptor) traps are recorded against
/// this frame; dropping it (including via panic unwinding) pops the frame.
pub struct ActiveObserver {
    observer: ObserverId,
}

impl ActiveObserver {
    pub fn enter(observer: ObserverId) -> Self {
        STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                observer,
                reads: Vec::new(),
            });
        });
        Self { observer }
    }

    pub fn is_active() -> bool {
        STACK.with(|stack| !stack.borrow().is_empty())
    }

    pub fn current() -> Option<ObserverId> {
        STACK.with(|stack| stack.borrow().last().map(|f| f.observer))
    }

    /// Record that `handle`'s `key` was read by the innermost active frame,
    /// if any. Called by every interceptor read-trap (§4.3).
    pub fn record_read(handle: HandleId, key: TrackedKey) {
        STACK.with(|stack| {
            if let Some(frame) = stack.borrow_mut().last_mut() {
                frame.reads.push((handle, key));
            }
        });
    }

    /// The `(handle, key)` pairs recorded by the innermost active frame so
    /// far.
    pub fn reads() -> Vec<(HandleId, TrackedKey)> {
        STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|f| f.reads.clone())
                .unwrap_or_default()
        })
    }
}

impl Drop for ActiveObserver {
    fn drop(&mut self) {
        STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(frame) = popped {
                debug_assert_eq!(
                    frame.observer, self.observer,
                    "ActiveObserver frame mismatch: expected {:?}, got {:?}",
                    self.observer, frame.observer
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::value::PathKey;

    #[test]
    fn tracks_reads_within_a_frame() {
        let observer = ObserverId::new();
        let handle = HandleId::new();

        assert!(!ActiveObserver::is_active());
        {
            let _guard = ActiveObserver::enter(observer);
            assert_eq!(ActiveObserver::current(), Some(observer));
            ActiveObserver::record_read(handle, TrackedKey::Key(PathKey::from("a")));
            ActiveObserver::record_read(handle, TrackedKey::ArrayMutations);
            assert_eq!(ActiveObserver::reads().len(), 2);
        }
        assert!(!ActiveObserver::is_active());
    }

    #[test]
    fn nested_frames_isolate_reads() {
        let outer = ObserverId::new();
        let inner = ObserverId::new();
        let handle = HandleId::new();

        let _outer_guard = ActiveObserver::enter(outer);
        ActiveObserver::record_read(handle, TrackedKey::Key(PathKey::from("x")));

        {
            let _inner_guard = ActiveObserver::enter(inner);
            ActiveObserver::record_read(handle, TrackedKey::Key(PathKey::from("y")));
            assert_eq!(ActiveObserver::reads().len(), 1);
        }

        assert_eq!(ActiveObserver::current(), Some(outer));
        assert_eq!(ActiveObserver::reads().len(), 1);
    }
}
