//! Module definitions.
//!
//! A [`ModelDef`] plays the part of a module "class": default fields, methods
//! that run against the module's [`Draft`], field-level dependency wiring,
//! lifecycle hooks and static members. Registering it under a namespace
//! yields a [`ModelClass`].
//!
//! ```rust
//! use mtor_core::*;
//!
//! let def = ModelDef::new()
//!     .field("count", 0)
//!     .method("increment", |this, _args| {
//!         let count = this.get_as::<i64>("count").unwrap_or(0);
//!         this.set("count", count + 1);
//!         Value::Null
//!     });
//!
//! let registry = Registry::new();
//! let counter = registry.register("counter", def);
//! assert_eq!(counter.ns(), "counter");
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::draft::Draft;
use crate::value::{Fields, Value, assign};

pub type Method = Rc<dyn Fn(&Draft, &[Value]) -> Value>;
pub type Hook = Rc<dyn Fn(&Draft)>;

/// Anything that names a module: a registered class or a bare namespace.
pub trait Namespaced {
    fn namespace(&self) -> &str;
}

impl Namespaced for str {
    fn namespace(&self) -> &str {
        self
    }
}

impl Namespaced for String {
    fn namespace(&self) -> &str {
        self
    }
}

impl Namespaced for ModelClass {
    fn namespace(&self) -> &str {
        &self.ns
    }
}

impl<T: Namespaced + ?Sized> Namespaced for &T {
    fn namespace(&self) -> &str {
        (**self).namespace()
    }
}

/// `field` on the consumer always mirrors `provider`'s canonical state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Wire {
    pub field: String,
    pub provider: String,
}

#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) on_created: Option<Hook>,
    pub(crate) on_before_reset: Option<Hook>,
    pub(crate) on_before_clean: Option<Hook>,
}

#[derive(Clone, Default)]
pub struct ModelDef {
    defaults: Fields,
    init: Option<Rc<dyn Fn() -> Fields>>,
    pub(crate) methods: BTreeMap<String, Method>,
    pub(crate) wiring: Vec<Wire>,
    pub(crate) hooks: Hooks,
    pub(crate) statics: Fields,
}

impl ModelDef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Constructor run once per registration; its fields win over `field`.
    pub fn fields_with(mut self, init: impl Fn() -> Fields + 'static) -> Self {
        self.init = Some(Rc::new(init));
        self
    }

    pub fn method(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Draft, &[Value]) -> Value + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Rc::new(f));
        self
    }

    /// Declares that `field` mirrors the canonical state of `provider`.
    ///
    /// A later declaration for the same field replaces the earlier one.
    pub fn inject<P: Namespaced + ?Sized>(mut self, field: impl Into<String>, provider: &P) -> Self {
        let field = field.into();
        self.wiring.retain(|w| w.field != field);
        self.wiring.push(Wire {
            field,
            provider: provider.namespace().to_string(),
        });
        self
    }

    /// Runs once, after the first registration of a namespace. Hot reloads
    /// skip it.
    pub fn on_created(mut self, f: impl Fn(&Draft) + 'static) -> Self {
        self.hooks.on_created = Some(Rc::new(f));
        self
    }

    pub fn on_before_reset(mut self, f: impl Fn(&Draft) + 'static) -> Self {
        self.hooks.on_before_reset = Some(Rc::new(f));
        self
    }

    pub fn on_before_clean(mut self, f: impl Fn(&Draft) + 'static) -> Self {
        self.hooks.on_before_clean = Some(Rc::new(f));
        self
    }

    /// Class-level member; survives hot reloads of the namespace.
    pub fn static_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.statics.insert(key.into(), value.into());
        self
    }

    pub fn wiring(&self) -> &[Wire] {
        &self.wiring
    }

    /// Builds a fresh instance's own fields.
    pub(crate) fn instantiate(&self) -> Fields {
        let mut fields = self.defaults.clone();
        if let Some(init) = &self.init {
            assign(&mut fields, &init());
        }
        fields
    }
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("defaults", &self.defaults)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("wiring", &self.wiring)
            .field("statics", &self.statics)
            .finish()
    }
}

/// A registered module: its namespace plus its static members.
///
/// Static members are shared with the registry, so values written through
/// any handle are what the next hot reload restores.
#[derive(Clone)]
pub struct ModelClass {
    ns: Rc<str>,
    statics: Rc<RefCell<Fields>>,
}

impl ModelClass {
    pub(crate) fn new(ns: &str, statics: Rc<RefCell<Fields>>) -> Self {
        Self {
            ns: Rc::from(ns),
            statics,
        }
    }

    pub fn ns(&self) -> &str {
        &self.ns
    }

    pub fn statics(&self) -> Fields {
        self.statics.borrow().clone()
    }

    pub fn get_static(&self, key: &str) -> Option<Value> {
        self.statics.borrow().get(key).cloned()
    }

    pub fn set_static(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.statics.borrow_mut().insert(key.into(), value.into());
    }
}

impl fmt::Debug for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClass")
            .field("ns", &self.ns)
            .field("statics", &self.statics.borrow())
            .finish()
    }
}
