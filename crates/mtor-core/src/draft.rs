use std::cell::{Cell, RefCell};
use std::rc::Weak;

use serde::de::DeserializeOwned;

use crate::error::{MtorError, Result};
use crate::registry::{Registry, RegistryInner};
use crate::value::{Fields, Value, assign, differs};

/// Mutable working copy of one namespace's state.
///
/// Methods run against the draft. Single-field writes through [`Draft::set`]
/// are coalesced: the first change queues one commit on the scheduler's
/// microtask queue and later changes ride along with it. Bulk writes through
/// [`Draft::set_data`] commit immediately.
pub struct Draft {
    ns: String,
    registry: Weak<RegistryInner>,
    backing: RefCell<Fields>,
    syncing: Cell<bool>,
}

impl Draft {
    pub(crate) fn new(ns: &str, registry: Weak<RegistryInner>) -> Self {
        Self {
            ns: ns.to_string(),
            registry,
            backing: RefCell::new(Fields::new()),
            syncing: Cell::new(false),
        }
    }

    fn registry(&self) -> Result<Registry> {
        self.registry
            .upgrade()
            .map(Registry::from_inner)
            .ok_or_else(|| MtorError::NamespaceNotFound(self.ns.clone()))
    }

    pub fn namespace(&self) -> &str {
        &self.ns
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.backing.borrow().get(key).cloned()
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn fields(&self) -> Fields {
        self.backing.borrow().clone()
    }

    /// True while a coalesced commit is queued but has not run yet.
    pub fn is_syncing(&self) -> bool {
        self.syncing.get()
    }

    /// Writes one field. Returns false, and schedules nothing, if the value
    /// is unchanged.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        {
            let mut backing = self.backing.borrow_mut();
            if backing.get(key) == Some(&value) {
                return false;
            }
            backing.insert(key.to_string(), value);
        }
        self.schedule_commit();
        true
    }

    /// Writes several fields and commits right away if any of them changed.
    pub fn set_data(&self, props: Fields) -> bool {
        {
            let mut backing = self.backing.borrow_mut();
            if !differs(&backing, &props) {
                return false;
            }
            assign(&mut backing, &props);
        }
        match self.registry() {
            Ok(registry) => {
                let snapshot = registry.store(&self.ns, self.fields());
                registry.publish(&snapshot);
            }
            Err(_) => log::warn!("set_data on `{}` after its registry was dropped", self.ns),
        }
        true
    }

    /// Calls a method of this module through the bus.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.registry()?.invoke(&self.ns, method, args)
    }

    pub fn reset(&self) -> Result<()> {
        self.registry()?.reset(&self.ns)
    }

    pub(crate) fn reseed(&self, fields: Fields) {
        *self.backing.borrow_mut() = fields;
    }

    /// Queues a commit unless one is already pending.
    pub(crate) fn schedule_commit(&self) {
        if self.syncing.get() {
            return;
        }
        let Ok(registry) = self.registry() else {
            log::warn!("write to `{}` after its registry was dropped", self.ns);
            return;
        };
        self.syncing.set(true);
        let weak = self.registry.clone();
        let ns = self.ns.clone();
        registry.scheduler().queue_microtask(move || {
            if let Some(inner) = weak.upgrade() {
                Registry::from_inner(inner).commit_pending(&ns);
            }
        });
    }

    pub(crate) fn finish_sync(&self) {
        self.syncing.set(false);
    }
}

impl std::fmt::Debug for Draft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Draft")
            .field("ns", &self.ns)
            .field("fields", &self.backing.borrow())
            .field("syncing", &self.syncing.get())
            .finish()
    }
}
