//! Subscriber registry for notifications and lifecycle events.
//!
//! Each event name maps to an ordered list of entries. An entry is either a
//! persistent subscription or a one-shot subscription that the registry drops
//! the moment it is handed out for delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::error::{Error, Result};

type Callback = dyn Fn(Option<&Value>) + Send + Sync;

/// Cloneable handle to a notification callback.
///
/// Two handles are equal only when they are clones of the same
/// `Listener::new` call; structurally identical closures are distinct.
#[derive(Clone)]
pub struct Listener(Arc<Callback>);

impl Listener {
    pub fn new(callback: impl Fn(Option<&Value>) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub fn call(&self, params: Option<&Value>) {
        (self.0)(params);
    }

    #[must_use]
    pub fn same(&self, other: &Listener) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl Eq for Listener {}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Listener")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// A listener selected for one delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub listener: Listener,
    pub once: bool,
}

impl Delivery {
    /// Invoke the listener. One-shot listeners are called without params.
    pub fn deliver(&self, params: Option<&Value>) {
        if self.once {
            self.listener.call(None);
        } else {
            self.listener.call(params);
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    listener: Listener,
    once: bool,
}

/// Ordered event name → listeners mapping.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    entries: Mutex<HashMap<String, Vec<Entry>>>,
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `event`. Duplicates are allowed.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `event` is empty.
    pub fn add(&self, event: &str, listener: &Listener, once: bool) -> Result<()> {
        validate_event(event)?;
        self.lock()
            .entry(event.to_string())
            .or_default()
            .push(Entry {
                listener: listener.clone(),
                once,
            });
        Ok(())
    }

    /// Remove the first registration of `listener` under `event`.
    ///
    /// Returns whether anything was removed; unknown pairs are a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if `event` is empty.
    pub fn remove(&self, event: &str, listener: &Listener) -> Result<bool> {
        validate_event(event)?;
        let mut entries = self.lock();
        let Some(list) = entries.get_mut(event) else {
            return Ok(false);
        };
        let Some(index) = list.iter().position(|e| e.listener.same(listener)) else {
            return Ok(false);
        };
        list.remove(index);
        if list.is_empty() {
            entries.remove(event);
        }
        Ok(true)
    }

    /// Snapshot the listeners for one delivery of `event`, in registration
    /// order. One-shot entries are removed from the registry as they are taken.
    #[must_use]
    pub fn take_deliveries(&self, event: &str) -> Vec<Delivery> {
        let mut entries = self.lock();
        let Some(list) = entries.get_mut(event) else {
            return Vec::new();
        };

        let deliveries = list
            .iter()
            .map(|e| Delivery {
                listener: e.listener.clone(),
                once: e.once,
            })
            .collect();

        list.retain(|e| !e.once);
        if list.is_empty() {
            entries.remove(event);
        }
        deliveries
    }

    /// Number of registrations for `event`.
    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Entry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_event(event: &str) -> Result<()> {
    if event.is_empty() {
        return Err(Error::invalid_argument(
            "must supply an event name and a listener",
        ));
    }
    Ok(())
}
