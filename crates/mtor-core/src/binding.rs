//! Consumer bindings.
//!
//! A [`Binding`] is a view-local, observable copy of one module's state. It is
//! seeded from the canonical snapshot, follows every state the namespace
//! publishes, and forwards its owner's edits back into the synchronizer.
//!
//! ```rust
//! use mtor_core::*;
//!
//! let registry = Registry::new();
//! let todo = registry.register("todo", ModelDef::new().field("title", ""));
//!
//! let a = registry.bind(&todo).unwrap();
//! let b = registry.bind(&todo).unwrap();
//! a.set("title", "write docs");
//! assert_eq!(b.get("title"), Some(json!("write docs")));
//!
//! a.unbind();
//! b.unbind();
//! ```

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::de::DeserializeOwned;

use crate::bus::{HandlerId, Payload};
use crate::error::{MtorError, Result};
use crate::model::Namespaced;
use crate::registry::Registry;
use crate::signal::{Signal, SubId, signal};
use crate::state::{Prototype, Snapshot};
use crate::value::{Fields, Value, assign};

#[derive(Clone)]
pub struct Binding {
    inner: Rc<BindingInner>,
}

struct BindingInner {
    registry: Registry,
    ns: String,
    proto: RefCell<Rc<Prototype>>,
    proxy: Signal<Fields>,
    bus_sub: Cell<Option<HandlerId>>,
    watch_sub: Cell<Option<SubId>>,
    // Set while an incoming state is being applied, so the change watcher
    // doesn't send it back as a local edit.
    applying_remote: Cell<bool>,
    // Proxy contents as of the last sync in either direction.
    synced: RefCell<Fields>,
    teardown: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl BindingInner {
    fn apply_remote(&self, state: &Snapshot) {
        if let Some(current) = self.registry.prototype(&self.ns) {
            let stale = !Rc::ptr_eq(&current, &self.proto.borrow());
            if stale {
                log::debug!(
                    "binding `{}`: prototype generation {} -> {}",
                    self.ns,
                    self.proto.borrow().generation(),
                    current.generation()
                );
                *self.proto.borrow_mut() = current;
            }
        }
        self.applying_remote.set(true);
        self.proxy.update(|fields| assign(fields, state.fields()));
        self.applying_remote.set(false);
        *self.synced.borrow_mut() = self.proxy.get();
    }

    /// Forwards only the fields the owner changed, so a stale proxy can't
    /// roll back writes still pending in the draft.
    fn forward_local(&self, fields: &Fields) {
        if self.applying_remote.get() {
            return;
        }
        let changed: Fields = {
            let synced = self.synced.borrow();
            fields
                .iter()
                .filter(|(key, value)| synced.get(*key) != Some(*value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };
        *self.synced.borrow_mut() = fields.clone();
        if changed.is_empty() {
            return;
        }
        if let Err(err) = self.registry.set_data(&self.ns, changed) {
            log::warn!("binding `{}`: dropped local edit: {err}", self.ns);
        }
    }
}

impl Registry {
    /// Binds a consumer to a registered module.
    ///
    /// The namespace must already be registered; otherwise this fails with
    /// [`MtorError::NamespaceNotFound`]. Call [`Binding::unbind`] when the
    /// consumer goes away, or use [`crate::use_model`] inside a setup scope.
    pub fn bind(&self, model: impl Namespaced) -> Result<Binding> {
        let ns = model.namespace().to_string();
        let (Some(proto), Some(state)) = (self.prototype(&ns), self.state(&ns)) else {
            return Err(MtorError::NamespaceNotFound(ns));
        };

        let inner = Rc::new(BindingInner {
            registry: self.clone(),
            ns: ns.clone(),
            proto: RefCell::new(proto),
            proxy: signal(state.fields().clone()),
            bus_sub: Cell::new(None),
            watch_sub: Cell::new(None),
            applying_remote: Cell::new(false),
            synced: RefCell::new(state.fields().clone()),
            teardown: RefCell::new(Vec::new()),
        });

        let weak: Weak<BindingInner> = Rc::downgrade(&inner);
        let bus_sub = self.bus().on(
            &self.topics().update(&ns),
            Rc::new(move |payload: &Payload| {
                if let Payload::State(state) = payload
                    && let Some(binding) = weak.upgrade()
                {
                    binding.apply_remote(state);
                }
            }),
        );
        inner.bus_sub.set(Some(bus_sub));

        let weak = Rc::downgrade(&inner);
        let watch_sub = inner.proxy.subscribe(move |fields| {
            if let Some(binding) = weak.upgrade() {
                binding.forward_local(fields);
            }
        });
        inner.watch_sub.set(Some(watch_sub));

        log::debug!("bound `{ns}` at revision {}", state.revision());
        Ok(Binding { inner })
    }

    /// Binds like [`Registry::bind`], with init and delayed reset.
    ///
    /// `init` runs unless this bind resumes a namespace whose delayed reset is
    /// still pending, in which case the pending reset is cancelled instead.
    /// Unbinding schedules a reset (when `auto_reset` is set) after the
    /// configured grace window, so a quick remount keeps its state.
    pub fn bind_with_init(
        &self,
        model: impl Namespaced,
        init: impl FnOnce(&Binding),
        auto_reset: bool,
    ) -> Result<Binding> {
        let binding = self.bind(model)?;
        let ns = binding.namespace().to_string();

        let pending = self.pending_resets().borrow_mut().remove(&ns);
        match pending {
            Some(timer) => {
                self.scheduler().clear_timeout(timer);
                log::debug!("bind `{ns}`: remounted within grace window, reset cancelled");
            }
            None => init(&binding),
        }

        let weak = self.downgrade();
        binding.on_unbind(move || {
            let Some(inner) = weak.upgrade() else { return };
            let registry = Registry::from_inner(inner);
            let timer = registry.scheduler().set_timeout(registry.config().reset_grace(), {
                let weak = registry.downgrade();
                let ns = ns.clone();
                move || {
                    let Some(inner) = weak.upgrade() else { return };
                    let registry = Registry::from_inner(inner);
                    registry.pending_resets().borrow_mut().remove(&ns);
                    if auto_reset && let Err(err) = registry.reset(&ns) {
                        log::warn!("delayed reset of `{ns}` failed: {err}");
                    }
                }
            });
            let replaced = registry
                .pending_resets()
                .borrow_mut()
                .insert(ns.clone(), timer);
            if let Some(old) = replaced {
                registry.scheduler().clear_timeout(old);
            }
        });

        Ok(binding)
    }
}

impl Binding {
    pub fn namespace(&self) -> &str {
        &self.inner.ns
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.proxy.with(|f| f.get(key).cloned())
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn fields(&self) -> Fields {
        self.inner.proxy.get()
    }

    /// Generation of the prototype this binding currently routes through.
    pub fn generation(&self) -> u64 {
        self.inner.proto.borrow().generation()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.bus_sub.get().is_some()
    }

    /// Local edit of one field; forwarded to the synchronizer if it changed.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        self.inner.proxy.update(|fields| {
            fields.insert(key.to_string(), value);
        })
    }

    /// Local edit of any number of fields, forwarded as one bulk write.
    pub fn update(&self, f: impl FnOnce(&mut Fields)) -> bool {
        self.inner.proxy.update(f)
    }

    /// Calls a module method through the bus.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        if !self.inner.proto.borrow().has_method(method) {
            return Err(MtorError::MethodNotFound {
                namespace: self.inner.ns.clone(),
                method: method.to_string(),
            });
        }
        self.inner.registry.invoke(&self.inner.ns, method, args)
    }

    pub fn set_data(&self, props: Fields) -> Result<bool> {
        self.inner.registry.set_data(&self.inner.ns, props)
    }

    pub fn reset(&self) -> Result<()> {
        self.inner.registry.reset(&self.inner.ns)
    }

    /// Re-render hook: called with the proxy's fields after every change.
    pub fn subscribe(&self, f: impl Fn(&Fields) + 'static) -> SubId {
        self.inner.proxy.subscribe(f)
    }

    pub fn unsubscribe(&self, id: SubId) -> bool {
        self.inner.proxy.unsubscribe(id)
    }

    /// Extra work for [`Binding::unbind`], run after the subscriptions are
    /// gone.
    pub fn on_unbind(&self, f: impl FnOnce() + 'static) {
        self.inner.teardown.borrow_mut().push(Box::new(f));
    }

    /// Stops following the namespace and stops forwarding edits. Calling it
    /// again is a no-op.
    pub fn unbind(&self) {
        let Some(bus_sub) = self.inner.bus_sub.take() else {
            log::warn!("binding `{}` unbound twice", self.inner.ns);
            return;
        };
        let registry = &self.inner.registry;
        registry
            .bus()
            .off(&registry.topics().update(&self.inner.ns), bus_sub);
        if let Some(watch) = self.inner.watch_sub.take() {
            self.inner.proxy.unsubscribe(watch);
        }
        let teardown = std::mem::take(&mut *self.inner.teardown.borrow_mut());
        for f in teardown {
            f();
        }
        log::debug!("unbound `{}`", self.inner.ns);
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("ns", &self.inner.ns)
            .field("generation", &self.generation())
            .field("bound", &self.is_bound())
            .field("fields", &self.fields())
            .finish()
    }
}
