//! Handler registry keyed by event type.
//!
//! Delivery takes a snapshot of the matching handlers and releases the lock
//! before invoking anything, so handlers may subscribe or unsubscribe from
//! inside a callback. Every entry carries an `active` flag that is cleared
//! before removal and checked right before each invocation.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use tracing::error;

use crate::realtime::proto::WILDCARD;

pub type Handler = Box<dyn Fn(&Value) + Send + Sync + 'static>;

pub(crate) struct HandlerEntry {
    id: u64,
    active: AtomicBool,
    handler: Handler,
}

impl HandlerEntry {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Clears the active flag; returns whether it was still set.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    fn invoke(&self, event_type: &str, payload: &Value) {
        if !self.is_active() {
            return;
        }
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (self.handler)(payload))) {
            error!(
                event = "realtime_handler_panicked",
                event_type,
                handler_id = self.id,
                message = %panic_message(panic.as_ref())
            );
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    next_id: u64,
    handlers: HashMap<String, Vec<Arc<HandlerEntry>>>,
}

impl Registry {
    pub(crate) fn insert(&mut self, event_type: &str, handler: Handler) -> Arc<HandlerEntry> {
        self.next_id += 1;
        let entry = Arc::new(HandlerEntry {
            id: self.next_id,
            active: AtomicBool::new(true),
            handler,
        });
        self.handlers
            .entry(event_type.to_string())
            .or_default()
            .push(Arc::clone(&entry));
        entry
    }

    /// Removes one handler; drops the event type once it has no handlers.
    pub(crate) fn remove(&mut self, event_type: &str, id: u64) -> bool {
        let Some(entries) = self.handlers.get_mut(event_type) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.handlers.remove(event_type);
        }
        removed
    }

    pub(crate) fn snapshot(&self, event_type: &str) -> Vec<Arc<HandlerEntry>> {
        self.handlers.get(event_type).cloned().unwrap_or_default()
    }

    /// Deactivates and drops every handler.
    pub(crate) fn clear(&mut self) {
        for entry in self.handlers.values().flatten() {
            entry.deactivate();
        }
        self.handlers.clear();
    }

    pub(crate) fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map_or(0, Vec::len)
    }

    #[cfg(test)]
    fn contains(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Invokes only the handlers registered under `event_type` by name.
pub(crate) fn deliver_named(registry: &Mutex<Registry>, event_type: &str, payload: &Value) {
    if event_type == WILDCARD {
        return;
    }
    let direct = lock(registry).snapshot(event_type);
    for entry in &direct {
        entry.invoke(event_type, payload);
    }
}

/// Fans one event out to its own handlers, then to wildcard handlers with
/// the event type attached.
pub(crate) fn deliver(registry: &Mutex<Registry>, event_type: &str, payload: &Value) {
    let (direct, wildcard) = {
        let registry = lock(registry);
        let direct = if event_type == WILDCARD {
            Vec::new()
        } else {
            registry.snapshot(event_type)
        };
        (direct, registry.snapshot(WILDCARD))
    };

    for entry in &direct {
        entry.invoke(event_type, payload);
    }

    if wildcard.is_empty() {
        return;
    }
    let tagged = tag_with_event_type(event_type, payload);
    for entry in &wildcard {
        entry.invoke(event_type, &tagged);
    }
}

/// Object payloads gain a `type` field; anything else is wrapped as
/// `{"type": ..., "data": ...}`. The event type wins over a payload field
/// of the same name, unlike a plain `{type, ...payload}` spread where the
/// payload's own `type` would survive.
pub(crate) fn tag_with_event_type(event_type: &str, payload: &Value) -> Value {
    match payload {
        Value::Object(fields) => {
            let mut fields = fields.clone();
            fields.insert("type".to_string(), Value::String(event_type.to_string()));
            Value::Object(fields)
        }
        other => json!({ "type": event_type, "data": other }),
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
