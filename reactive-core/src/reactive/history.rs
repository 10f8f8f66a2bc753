//! History recorder (§4.7, L7).
//!
//! Subscribes to a handle and records every `StateChange` it broadcasts into
//! a backward stack, debounce-merging same-key `set` events so a burst of
//! keystrokes into one field collapses into a single undo step (§3 "History
//! merge"). `undo`/`redo` walk the stacks by applying each entry's inverse —
//! built from a fixed type -> inverse-operation table, the same shape a
//! typed command-pattern undo stack would use, rather than a generic
//! structural diff/patch.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::batcher::Debouncer;
use super::change::{ChangeType, StateChange};
use super::error::Result;
use super::handle::{HandleConfig, ReactiveHandle, SubscriptionToken};
use super::interceptor::{map, record, sequence, set as set_ops};
use super::registry::registry;
use super::value::{Key, Value};

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
const DEFAULT_MAX_HISTORY: usize = 100;

/// One recorded, already-debounced mutation.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub change: StateChange,
}

/// Options accepted by [`History::record_with_options`] (§4.7: "a reactive
/// handle `S` plus options `{debounce=100ms, maxHistory=100,
/// resettable=false}`").
#[derive(Debug, Clone, Copy)]
pub struct HistoryOptions {
    pub debounce: Duration,
    pub max_history: usize,
    pub resettable: bool,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            max_history: DEFAULT_MAX_HISTORY,
            resettable: false,
        }
    }
}

/// Records a handle's mutation history and replays inverses for undo/redo
/// (§6 `undoable`, §4.7).
pub struct History {
    handle: ReactiveHandle,
    debouncer: Debouncer<Vec<Key>, StateChange>,
    backward: Mutex<Vec<HistoryEntry>>,
    forward: Mutex<Vec<HistoryEntry>>,
    /// Populated only when `resettable`: every merged entry in the order it
    /// was originally applied, never trimmed by `max_history` nor touched by
    /// undo/redo, so `reset()` can walk all the way back to the start (§4.7
    /// "change: only populated when resettable=true, records original order
    /// for full reset").
    change: Mutex<Vec<HistoryEntry>>,
    max_history: usize,
    resettable: bool,
    /// Guards against the history recorder reacting to its own undo/redo
    /// replay (§4.7 "guarded by isBusy").
    is_busy: std::sync::atomic::AtomicBool,
    token: SubscriptionToken,
}

impl History {
    /// Start recording `handle`'s mutations with the default options (300ms
    /// debounce, 100-entry cap, not resettable).
    pub fn record(handle: ReactiveHandle) -> Arc<Self> {
        Self::record_with_options(handle, HistoryOptions::default())
    }

    pub fn record_with_window(handle: ReactiveHandle, window: Duration) -> Arc<Self> {
        Self::record_with_options(
            handle,
            HistoryOptions {
                debounce: window,
                ..HistoryOptions::default()
            },
        )
    }

    pub fn record_with_options(handle: ReactiveHandle, options: HistoryOptions) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let weak = weak.clone();
            let token = registry().subscribe(
                handle,
                Arc::new(move |change: &StateChange| {
                    if let Some(history) = weak.upgrade() {
                        history.capture(change.clone());
                    }
                }),
            );
            Self {
                handle,
                debouncer: Debouncer::new(options.debounce),
                backward: Mutex::new(Vec::new()),
                forward: Mutex::new(Vec::new()),
                change: Mutex::new(Vec::new()),
                max_history: options.max_history,
                resettable: options.resettable,
                is_busy: std::sync::atomic::AtomicBool::new(false),
                token,
            }
        })
    }

    fn is_busy(&self) -> bool {
        self.is_busy.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn capture(&self, change: StateChange) {
        if self.is_busy() || matches!(change.change_type, ChangeType::Init) {
            return;
        }
        self.forward.lock().clear();
        let key = change.keys.clone();
        if matches!(change.change_type, ChangeType::Set) && !key.is_empty() {
            self.debouncer.push(key, change, merge_set);
        } else {
            self.flush_pending();
            self.push_backward(change);
        }
    }

    /// Append a merged entry to `backward`, dropping the oldest once
    /// `max_history` is reached (§4.7 "if backward.length == maxHistory,
    /// drop the oldest"), and mirror it into `change` when resettable.
    fn push_backward(&self, change: StateChange) {
        if self.resettable {
            self.change.lock().push(HistoryEntry {
                change: change.clone(),
            });
        }
        let mut backward = self.backward.lock();
        if backward.len() == self.max_history {
            backward.remove(0);
        }
        backward.push(HistoryEntry { change });
    }

    /// Push every debounce-window-elapsed entry onto the backward stack.
    /// Called automatically by `capture` ahead of a non-mergeable event, and
    /// exposed for hosts to call on an idle tick.
    pub fn flush_pending(&self) {
        for (_, change) in self.debouncer.tick() {
            self.push_backward(change);
        }
    }

    pub fn flush_all_pending(&self) {
        for (_, change) in self.debouncer.flush_all() {
            self.push_backward(change);
        }
    }

    pub fn backward_len(&self) -> usize {
        self.backward.lock().len()
    }

    pub fn forward_len(&self) -> usize {
        self.forward.lock().len()
    }

    pub fn can_backward(&self) -> bool {
        !self.debouncer.is_empty() || !self.backward.lock().is_empty()
    }

    pub fn can_forward(&self) -> bool {
        !self.forward.lock().is_empty()
    }

    pub fn can_reset(&self) -> bool {
        self.resettable && !self.change.lock().is_empty()
    }

    /// The backward stack's changes, oldest first (§6 `backwardList`).
    pub fn backward_list(&self) -> Vec<StateChange> {
        self.backward.lock().iter().map(|e| e.change.clone()).collect()
    }

    /// The forward (redo) stack's changes, oldest-undone first (§6
    /// `forwardList`).
    pub fn forward_list(&self) -> Vec<StateChange> {
        self.forward.lock().iter().map(|e| e.change.clone()).collect()
    }

    /// Apply the inverse of the most recent backward entry and move it onto
    /// the forward (redo) stack. Returns `false` if there is nothing to
    /// undo.
    pub fn undo(&self) -> Result<bool> {
        self.flush_all_pending();
        let entry = match self.backward.lock().pop() {
            Some(e) => e,
            None => return Ok(false),
        };
        self.is_busy.store(true, std::sync::atomic::Ordering::SeqCst);
        let result = apply_inverse(self.handle, &entry.change);
        self.is_busy.store(false, std::sync::atomic::Ordering::SeqCst);
        result?;
        self.forward.lock().push(entry);
        Ok(true)
    }

    /// Re-apply the most recently undone entry. Returns `false` if there is
    /// nothing to redo.
    pub fn redo(&self) -> Result<bool> {
        let entry = match self.forward.lock().pop() {
            Some(e) => e,
            None => return Ok(false),
        };
        self.is_busy.store(true, std::sync::atomic::Ordering::SeqCst);
        let result = apply_forward(self.handle, &entry.change);
        self.is_busy.store(false, std::sync::atomic::Ordering::SeqCst);
        result?;
        self.backward.lock().push(entry);
        Ok(true)
    }

    /// Undo every recorded change in reverse order and clear every stack
    /// (§4.7 `reset()`: "if resettable, undo every event in `change` in
    /// reverse, then clear all sequences"). A no-op, diagnosed by returning
    /// `Ok(false)`, when the recorder was not constructed with
    /// `resettable=true`.
    pub fn reset(&self) -> Result<bool> {
        if !self.resettable {
            return Ok(false);
        }
        self.flush_all_pending();
        self.is_busy.store(true, std::sync::atomic::Ordering::SeqCst);
        let changes: Vec<StateChange> = self.change.lock().drain(..).map(|e| e.change).collect();
        let result = changes
            .iter()
            .rev()
            .try_for_each(|change| apply_inverse(self.handle, change));
        self.is_busy.store(false, std::sync::atomic::Ordering::SeqCst);
        result?;
        self.backward.lock().clear();
        self.forward.lock().clear();
        Ok(true)
    }

    pub fn clear(&self) {
        self.debouncer.flush_all();
        self.backward.lock().clear();
        self.forward.lock().clear();
        self.change.lock().clear();
    }

    pub fn stop(&self) {
        registry().unsubscribe(self.token);
    }
}

/// Same-keys `set` coalescing (§3 "History merge"): keep the earliest
/// `prev`, the latest `value`.
fn merge_set(old: StateChange, new: StateChange) -> StateChange {
    new.with_prev(old.prev)
}

/// Walk all but the last segment of `change.keys` down from `handle` to find
/// the handle the event's last key segment actually applies to — a nested
/// `record.set(handle.user.name, ...)` lifts as keys `[user, name]` (§3
/// invariant 3), so the interceptor call must target the `user` handle, not
/// the root one. Falls back to `handle` itself if any segment fails to
/// resolve (e.g. the intermediate child was since destroyed).
fn resolve_owner(handle: ReactiveHandle, keys: &[Key]) -> ReactiveHandle {
    if keys.len() <= 1 {
        return handle;
    }
    let reg = registry();
    let mut current = handle.id;
    for key in &keys[..keys.len() - 1] {
        match reg.links().child_at(current, key) {
            Some(child) => current = child,
            None => return handle,
        }
    }
    let shape = reg.shape_of(current).unwrap_or(handle.shape);
    ReactiveHandle::new(current, shape)
}

/// Re-apply a previously-undone forward entry by replaying its original
/// effect (the mirror image of [`apply_inverse`]).
fn apply_forward(handle: ReactiveHandle, change: &StateChange) -> Result<()> {
    apply_with(handle, change, true)
}

fn apply_inverse(handle: ReactiveHandle, change: &StateChange) -> Result<()> {
    apply_with(handle, change, false)
}

/// Shared driver for both undo (`forward = false`, uses `prev`/original
/// keys) and redo (`forward = true`, replays `value`). Each `ChangeType`
/// maps to one interceptor call — the "inverse-application table" (§4.7).
fn apply_with(handle: ReactiveHandle, change: &StateChange, forward: bool) -> Result<()> {
    let target = if forward { &change.value } else { &change.prev };
    let owner = resolve_owner(handle, &change.keys);
    match change.change_type {
        ChangeType::Set => {
            let key = change.keys.last().cloned().unwrap_or(Key::Str(String::new()));
            match key {
                Key::Str(s) => record::set(owner, &s, target.clone()),
                other => map::set(owner, other, target.clone()),
            }
        }
        ChangeType::Delete => {
            let key = change.keys.last().cloned().unwrap_or(Key::Str(String::new()));
            if forward {
                match key {
                    Key::Str(s) => record::delete(owner, &s),
                    other => map::delete(owner, other),
                }
            } else {
                match key {
                    Key::Str(s) => record::set(owner, &s, change.prev.clone()),
                    other => map::set(owner, other, change.prev.clone()),
                }
            }
        }
        ChangeType::Assign => {
            if let Value::Record(patch) = target {
                registry().assign(handle, patch.clone().into_iter().collect())
            } else {
                Ok(())
            }
        }
        ChangeType::Remove => {
            if forward {
                if let Value::Record(removed) = &change.prev {
                    registry().remove(handle, removed.keys().cloned().map(Key::Str).collect())
                } else {
                    Ok(())
                }
            } else if let Value::Record(removed) = &change.prev {
                registry().assign(handle, removed.clone().into_iter().collect())
            } else {
                Ok(())
            }
        }
        ChangeType::Clear => {
            if forward {
                registry().clear(handle)
            } else {
                restore_whole_collection(handle, &change.prev)
            }
        }
        ChangeType::Push => {
            if forward {
                if let Value::Sequence(items) = &change.value {
                    sequence::push(handle, items.clone())
                } else {
                    Ok(())
                }
            } else if let Value::Sequence(items) = &change.value {
                for _ in items {
                    sequence::pop(handle)?;
                }
                Ok(())
            } else {
                Ok(())
            }
        }
        ChangeType::Pop => {
            if forward {
                sequence::pop(handle).map(|_| ())
            } else {
                sequence::push(handle, vec![change.prev.clone()])
            }
        }
        ChangeType::Shift => {
            if forward {
                sequence::shift(handle).map(|_| ())
            } else {
                sequence::unshift(handle, vec![change.prev.clone()])
            }
        }
        ChangeType::Unshift => {
            if forward {
                if let Value::Sequence(items) = &change.value {
                    sequence::unshift(handle, items.clone())
                } else {
                    Ok(())
                }
            } else if let Value::Sequence(items) = &change.value {
                for _ in items {
                    sequence::shift(handle)?;
                }
                Ok(())
            } else {
                Ok(())
            }
        }
        ChangeType::Splice => {
            // `value` is the splice call's own argument tuple, `[start,
            // deleteCount, ...items]` (spec.md §3 "value": "new value ... or
            // arguments tuple"), not the resulting sequence — redo replays it
            // verbatim, undo replaces the inserted span (`items.len()` wide,
            // at the same `start`) with `prev`, the removed slice.
            let (start, items) = match &change.value {
                Value::Sequence(args) if args.len() >= 2 => {
                    let start = match &args[0] {
                        Value::Number(n) => *n as usize,
                        _ => 0,
                    };
                    (start, args[2..].to_vec())
                }
                _ => (0, Vec::new()),
            };
            if forward {
                let delete_count = match &change.prev {
                    Value::Sequence(prev) => prev.len(),
                    _ => 0,
                };
                sequence::splice(handle, start, delete_count, items)
            } else if let Value::Sequence(prev) = &change.prev {
                sequence::splice(handle, start, items.len(), prev.clone())
            } else {
                Ok(())
            }
        }
        ChangeType::Sort | ChangeType::Reverse | ChangeType::Fill | ChangeType::CopyWithin => {
            restore_whole_collection(handle, target)
        }
        ChangeType::Add => {
            let item = scalar_to_key(target);
            if forward {
                set_ops::add(handle, item)
            } else {
                set_ops::delete(handle, item)
            }
        }
        ChangeType::Init => Ok(()),
    }
}

fn scalar_to_key(value: &Value) -> Key {
    match value {
        Value::String(s) => Key::Str(s.clone()),
        Value::Number(n) => Key::Int(*n as i64),
        Value::Bool(b) => Key::Bool(*b),
        _ => Key::Str(String::new()),
    }
}

/// Replace an entire sequence/record/map's contents with `target`, used by
/// structural inverses (`sort`, `reverse`, `fill`, `copyWithin`, `clear`)
/// where there is no narrower single-slot inverse.
fn restore_whole_collection(handle: ReactiveHandle, target: &Value) -> Result<()> {
    match target {
        Value::Sequence(items) => {
            let len = sequence::len(handle);
            sequence::splice(handle, 0, len, items.clone())
        }
        Value::Record(fields) => {
            registry().assign(handle, fields.clone().into_iter().collect())
        }
        _ => Ok(()),
    }
}

/// Build an inverse-applying closure for a captured sequence of events,
/// without a long-lived `History` subscription (§6 `undoable(fn)`).
pub fn undoable(handle: ReactiveHandle, run: impl FnOnce()) -> impl Fn() -> Result<()> {
    let recorder = super::devtools::RecordingHook::new();
    let token = registry().devtools().register(recorder.clone());
    run();
    registry().devtools().unregister(token);
    let changes: Vec<StateChange> = recorder
        .take()
        .into_iter()
        .filter_map(|event| match event {
            super::devtools::DevToolEvent::Change { change } if change.emitter == handle.id => {
                Some(change)
            }
            _ => None,
        })
        .collect();
    move || {
        for change in changes.iter().rev() {
            apply_inverse(handle, change)?;
        }
        Ok(())
    }
}
