//! Capability table built from the server's introspection listing.
//!
//! `JSONRPC.Introspect` returns an object whose `methods` keys are fully
//! qualified names such as `Player.PlayPause`. Each name is split on its first
//! separator and bound to a [`MethodHandle`] under `table[namespace][name]`.
//! The names are used as-is; nothing about their schema is checked.

use std::collections::BTreeMap;
use std::sync::Weak;

use serde_json::Value;
use tracing::debug;

use crate::dispatcher::{Dispatcher, PendingCall};
use crate::error::{Error, Result};
use crate::protocol::METHOD_SEPARATOR;

/// Split `Namespace.Name` on the first separator.
#[must_use]
pub fn split_method(full: &str) -> Option<(&str, &str)> {
    full.split_once(METHOD_SEPARATOR)
        .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
}

/// A remote method bound to the dispatcher that discovered it.
#[derive(Clone)]
pub struct MethodHandle {
    method: String,
    dispatcher: Weak<Dispatcher>,
}

impl MethodHandle {
    pub(crate) fn new(method: impl Into<String>, dispatcher: Weak<Dispatcher>) -> Self {
        Self {
            method: method.into(),
            dispatcher,
        }
    }

    /// Fully qualified method name sent on the wire.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Invoke the bound method with `params`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` if the owning client is gone or not open.
    pub fn call(&self, params: Option<Value>) -> Result<PendingCall> {
        let dispatcher = self.dispatcher.upgrade().ok_or(Error::NotConnected)?;
        dispatcher.invoke(&self.method, params)
    }
}

impl std::fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodHandle")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Namespace → bare name → bound method.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    namespaces: BTreeMap<String, BTreeMap<String, MethodHandle>>,
}

impl Capabilities {
    /// Build the table from an introspection result.
    ///
    /// # Errors
    ///
    /// Returns `Error::Discovery` if the result has no `methods` object.
    pub fn from_introspection(result: &Value, dispatcher: &Weak<Dispatcher>) -> Result<Self> {
        let Some(methods) = result.get("methods").and_then(Value::as_object) else {
            return Err(Error::Discovery(
                "introspection result has no methods listing".to_string(),
            ));
        };

        let mut table = Self::default();
        for full in methods.keys() {
            let Some((namespace, name)) = split_method(full) else {
                debug!("Skipping unqualified method name: {}", full);
                continue;
            };
            table
                .namespaces
                .entry(namespace.to_string())
                .or_default()
                .insert(
                    name.to_string(),
                    MethodHandle::new(full.clone(), dispatcher.clone()),
                );
        }
        Ok(table)
    }

    #[must_use]
    pub fn get(&self, namespace: &str, name: &str) -> Option<&MethodHandle> {
        self.namespaces.get(namespace)?.get(name)
    }

    #[must_use]
    pub fn namespace(&self, namespace: &str) -> Option<&BTreeMap<String, MethodHandle>> {
        self.namespaces.get(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// Every bound method, ordered by namespace then name.
    pub fn iter(&self) -> impl Iterator<Item = &MethodHandle> {
        self.namespaces.values().flat_map(BTreeMap::values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_method() {
        assert_eq!(split_method("Player.PlayPause"), Some(("Player", "PlayPause")));
        assert_eq!(split_method("A.B.C"), Some(("A", "B.C")));
        assert_eq!(split_method("Introspect"), None);
        assert_eq!(split_method(".Name"), None);
        assert_eq!(split_method("Namespace."), None);
    }

    #[test]
    fn test_from_introspection_groups_by_namespace() {
        let listing = json!({
            "methods": {
                "Player.PlayPause": {},
                "Player.GetProperties": {},
                "VideoLibrary.GetMovies": {},
                "Orphan": {}
            }
        });

        let table = Capabilities::from_introspection(&listing, &Weak::new()).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(
            table.namespaces().collect::<Vec<_>>(),
            vec!["Player", "VideoLibrary"]
        );
        assert_eq!(
            table.get("Player", "PlayPause").unwrap().method(),
            "Player.PlayPause"
        );
        assert_eq!(table.namespace("Player").unwrap().len(), 2);
        assert!(table.get("Orphan", "").is_none());
    }

    #[test]
    fn test_from_introspection_requires_methods() {
        let err = Capabilities::from_introspection(&json!({"types": {}}), &Weak::new())
            .unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));

        let err = Capabilities::from_introspection(&json!("OK"), &Weak::new()).unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
    }

    #[test]
    fn test_handle_without_dispatcher_is_not_connected() {
        let handle = MethodHandle::new("Player.Stop", Weak::new());
        assert!(matches!(handle.call(None), Err(Error::NotConnected)));
    }

    #[test]
    fn test_empty_table() {
        let table = Capabilities::default();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert_eq!(table.iter().count(), 0);
    }
}
