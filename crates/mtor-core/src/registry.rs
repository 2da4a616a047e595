//! The module registry.
//!
//! A [`Registry`] owns every per-namespace table: the prototype (method
//! surface and defaults), the canonical [`Snapshot`], the static members, the
//! [`Draft`] and the wiring subscriptions. Everything else (bindings, wired
//! consumers, devtools) talks to it through the bus.
//!
//! Registration is idempotent by replacement. Registering a namespace a second
//! time is a hot reload: behaviour is swapped out, state and static members
//! are kept, and every bus subscription the previous registration installed is
//! removed before its replacement goes in.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::{Rc, Weak};

use crate::bus::{EventBus, HandlerId, Invocation, LocalBus, Payload, Reply, Subscription, Topics};
use crate::config::RegistryConfig;
use crate::draft::Draft;
use crate::error::{MtorError, Result};
use crate::model::{ModelClass, ModelDef, Namespaced, Wire};
use crate::scheduler::{Scheduler, TimerId};
use crate::state::{Prototype, Snapshot};
use crate::value::{Fields, Value, assign};

struct WiringSub {
    topic: String,
    id: HandlerId,
}

pub(crate) struct RegistryInner {
    config: RegistryConfig,
    topics: Topics,
    bus: Rc<dyn EventBus>,
    scheduler: Rc<Scheduler>,
    protos: RefCell<HashMap<String, Rc<Prototype>>>,
    states: RefCell<HashMap<String, Snapshot>>,
    statics: RefCell<HashMap<String, Rc<RefCell<Fields>>>>,
    // consumer namespace -> consumer field -> subscription on the provider
    wiring: RefCell<HashMap<String, HashMap<String, WiringSub>>>,
    drafts: RefCell<HashMap<String, Rc<Draft>>>,
    pending_resets: RefCell<HashMap<String, TimerId>>,
    next_generation: Cell<u64>,
}

/// Cloneable handle on one registry. Clones share the same tables.
#[derive(Clone)]
pub struct Registry {
    inner: Rc<RegistryInner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self::with_parts(config, Rc::new(LocalBus::new()), Rc::new(Scheduler::new()))
    }

    /// Builds a registry on a host-supplied bus and scheduler.
    pub fn with_parts(
        config: RegistryConfig,
        bus: Rc<dyn EventBus>,
        scheduler: Rc<Scheduler>,
    ) -> Self {
        let topics = Topics::new(config.topic_prefix.clone());
        Self {
            inner: Rc::new(RegistryInner {
                config,
                topics,
                bus,
                scheduler,
                protos: RefCell::new(HashMap::new()),
                states: RefCell::new(HashMap::new()),
                statics: RefCell::new(HashMap::new()),
                wiring: RefCell::new(HashMap::new()),
                drafts: RefCell::new(HashMap::new()),
                pending_resets: RefCell::new(HashMap::new()),
                next_generation: Cell::new(1),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<RegistryInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<RegistryInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn pending_resets(&self) -> &RefCell<HashMap<String, TimerId>> {
        &self.inner.pending_resets
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn topics(&self) -> &Topics {
        &self.inner.topics
    }

    pub fn bus(&self) -> Rc<dyn EventBus> {
        self.inner.bus.clone()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Microtask checkpoint: runs every queued commit. Returns how many tasks
    /// ran.
    pub fn flush(&self) -> usize {
        self.inner.scheduler.run_microtasks()
    }

    /// Fires due timers, then drains microtasks.
    pub fn tick(&self) -> usize {
        self.inner.scheduler.run_due_timers() + self.inner.scheduler.run_microtasks()
    }

    /// Registers `def` under `ns`, or hot-reloads it if `ns` is taken.
    pub fn register(&self, ns: impl Into<String>, def: ModelDef) -> ModelClass {
        let ns = ns.into();
        let instance = def.instantiate();
        let generation = self.inner.next_generation.get();
        self.inner.next_generation.set(generation + 1);

        let wiring: Vec<Wire> = def
            .wiring
            .iter()
            .filter(|w| {
                if w.provider == ns {
                    log::warn!("register `{ns}`: field `{}` wires the module to itself; ignored", w.field);
                    false
                } else {
                    true
                }
            })
            .cloned()
            .collect();

        let proto = Rc::new(Prototype {
            generation,
            methods: def.methods.clone(),
            origin: instance.clone(),
            hooks: def.hooks.clone(),
            wiring,
        });

        let previous = self.prototype(&ns);
        let is_hot_reload = previous.is_some();

        self.route_methods(&ns, &proto, previous.as_deref());

        let draft = self.draft_or_create(&ns);
        let wired = self.resolve_wiring(&proto.wiring);

        if is_hot_reload {
            // Keep every current value; only fields new to this definition
            // take their defaults.
            let mut fields = self
                .state(&ns)
                .map(|s| s.fields().clone())
                .unwrap_or_default();
            for (key, value) in &instance {
                if !fields.contains_key(key) {
                    fields.insert(key.clone(), value.clone());
                }
            }
            assign(&mut fields, &wired);
            draft.reseed(fields);
            // Forced pass so every consumer picks up the new generation.
            draft.schedule_commit();
        } else {
            let mut fields = instance;
            assign(&mut fields, &wired);
            let snapshot = Snapshot::new(&ns, 0, generation, fields.clone());
            self.inner.states.borrow_mut().insert(ns.clone(), snapshot);
            draft.reseed(fields);
        }

        let statics = {
            let mut all = self.inner.statics.borrow_mut();
            let store = all
                .entry(ns.clone())
                .or_insert_with(|| Rc::new(RefCell::new(Fields::new())))
                .clone();
            let mut current = store.borrow_mut();
            for (key, value) in &def.statics {
                if !current.contains_key(key) {
                    current.insert(key.clone(), value.clone());
                }
            }
            drop(current);
            store
        };

        self.install_wiring(&ns, &proto.wiring);
        self.inner.protos.borrow_mut().insert(ns.clone(), proto.clone());

        if is_hot_reload {
            log::debug!(
                "hot reload `{ns}`: generation {generation}, methods [{}]",
                proto.method_names().collect::<Vec<_>>().join(", ")
            );
        } else {
            log::debug!(
                "registered `{ns}`: {} fields, {} methods, {} wires",
                proto.origin.len(),
                proto.methods.len(),
                proto.wiring.len()
            );
            if let Some(on_created) = &proto.hooks.on_created {
                on_created(&draft);
            }
        }

        ModelClass::new(&ns, statics)
    }

    /// Clean-then-subscribe for every method topic of `ns`.
    fn route_methods(&self, ns: &str, proto: &Prototype, previous: Option<&Prototype>) {
        let bus = &self.inner.bus;
        let mut stale: BTreeSet<&str> = proto.method_names().collect();
        if let Some(prev) = previous {
            stale.extend(prev.method_names());
        }
        for name in stale {
            bus.clean(&self.inner.topics.method(ns, name));
        }

        for (name, method) in &proto.methods {
            let weak = self.downgrade();
            let ns_owned = ns.to_string();
            let method = method.clone();
            bus.on(
                &self.inner.topics.method(ns, name),
                Rc::new(move |payload: &Payload| {
                    let Payload::Invoke(call) = payload else { return };
                    let Some(draft) = weak
                        .upgrade()
                        .and_then(|inner| Registry::from_inner(inner).draft(&ns_owned))
                    else {
                        return;
                    };
                    let result = method(&draft, &call.args);
                    call.reply.resolve(result);
                }),
            );
        }
    }

    /// Current canonical state of each wired provider, keyed by consumer
    /// field. Providers that are not registered yet resolve to null.
    fn resolve_wiring(&self, wiring: &[Wire]) -> Fields {
        let states = self.inner.states.borrow();
        wiring
            .iter()
            .map(|w| {
                let value = states
                    .get(&w.provider)
                    .map_or(Value::Null, Snapshot::to_value);
                (w.field.clone(), value)
            })
            .collect()
    }

    /// Removes every wiring subscription `ns` holds, then installs one per
    /// declared wire.
    fn install_wiring(&self, ns: &str, wiring: &[Wire]) {
        let old = self.inner.wiring.borrow_mut().remove(ns).unwrap_or_default();
        for sub in old.into_values() {
            self.inner.bus.off(&sub.topic, sub.id);
        }

        let mut table = HashMap::with_capacity(wiring.len());
        for wire in wiring {
            let topic = self.inner.topics.update(&wire.provider);
            let weak = self.downgrade();
            let consumer = ns.to_string();
            let field = wire.field.clone();
            let id = self.inner.bus.on(
                &topic,
                Rc::new(move |payload: &Payload| {
                    let Payload::State(provider_state) = payload else {
                        return;
                    };
                    if let Some(draft) = weak
                        .upgrade()
                        .and_then(|inner| Registry::from_inner(inner).draft(&consumer))
                    {
                        draft.set(&field, provider_state.to_value());
                    }
                }),
            );
            table.insert(wire.field.clone(), WiringSub { topic, id });
        }
        self.inner.wiring.borrow_mut().insert(ns.to_string(), table);
    }

    fn draft_or_create(&self, ns: &str) -> Rc<Draft> {
        self.inner
            .drafts
            .borrow_mut()
            .entry(ns.to_string())
            .or_insert_with(|| Rc::new(Draft::new(ns, self.downgrade())))
            .clone()
    }

    pub fn is_registered(&self, ns: &str) -> bool {
        self.inner.protos.borrow().contains_key(ns)
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.protos.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn prototype(&self, ns: &str) -> Option<Rc<Prototype>> {
        self.inner.protos.borrow().get(ns).cloned()
    }

    /// Last committed state of `ns`.
    pub fn state(&self, ns: &str) -> Option<Snapshot> {
        self.inner.states.borrow().get(ns).cloned()
    }

    pub fn draft(&self, ns: &str) -> Option<Rc<Draft>> {
        self.inner.drafts.borrow().get(ns).cloned()
    }

    /// Every namespace's canonical state. The snapshots are immutable; edit
    /// through a draft or a binding.
    pub fn get_all(&self) -> BTreeMap<String, Snapshot> {
        self.inner
            .states
            .borrow()
            .iter()
            .map(|(ns, state)| (ns.clone(), state.clone()))
            .collect()
    }

    fn require_draft(&self, ns: &str) -> Result<Rc<Draft>> {
        self.draft(ns)
            .ok_or_else(|| MtorError::NamespaceNotFound(ns.to_string()))
    }

    /// Coalesced single-field write.
    pub fn set_field(&self, ns: &str, key: &str, value: impl Into<Value>) -> Result<bool> {
        Ok(self.require_draft(ns)?.set(key, value))
    }

    /// Immediate bulk write; commits only if something changed.
    pub fn set_data(&self, ns: &str, props: Fields) -> Result<bool> {
        Ok(self.require_draft(ns)?.set_data(props))
    }

    /// Routes a method call through the bus and returns its result.
    pub fn invoke(&self, ns: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let proto = self
            .prototype(ns)
            .ok_or_else(|| MtorError::NamespaceNotFound(ns.to_string()))?;
        if !proto.has_method(method) {
            return Err(MtorError::MethodNotFound {
                namespace: ns.to_string(),
                method: method.to_string(),
            });
        }
        let reply = Reply::default();
        let payload = Payload::Invoke(Invocation {
            args,
            reply: reply.clone(),
        });
        self.inner
            .bus
            .emit(&self.inner.topics.method(ns, method), &payload);
        reply.take().ok_or_else(|| MtorError::Unrouted {
            namespace: ns.to_string(),
            method: method.to_string(),
        })
    }

    /// Rebuilds `ns` from its definition's defaults plus fresh wired values
    /// and publishes the result.
    pub fn reset(&self, ns: &str) -> Result<()> {
        let proto = self
            .prototype(ns)
            .ok_or_else(|| MtorError::NamespaceNotFound(ns.to_string()))?;
        let draft = self.require_draft(ns)?;

        if let Some(on_before_clean) = &proto.hooks.on_before_clean {
            on_before_clean(&draft);
        }
        if let Some(on_before_reset) = &proto.hooks.on_before_reset {
            on_before_reset(&draft);
        }
        if let Some(previous) = self.state(ns) {
            self.inner
                .bus
                .emit(&self.inner.topics.reset(ns), &Payload::Reset(previous));
        }

        let mut fields = proto.origin.clone();
        assign(&mut fields, &self.resolve_wiring(&proto.wiring));
        draft.reseed(fields.clone());
        let snapshot = self.store(ns, fields);
        log::debug!("reset `{ns}` to defaults (revision {})", snapshot.revision());
        self.publish(&snapshot);
        Ok(())
    }

    /// One-shot listener for the next reset of `ns`; receives the state being
    /// discarded.
    pub fn on_before_reset(&self, ns: &str, f: impl Fn(&Snapshot) + 'static) -> HandlerId {
        self.inner.bus.once(
            &self.inner.topics.reset(ns),
            Rc::new(move |payload: &Payload| {
                if let Payload::Reset(previous) = payload {
                    f(previous);
                }
            }),
        )
    }

    /// Listens to every state `ns` publishes.
    pub fn subscribe(
        &self,
        model: impl Namespaced,
        f: impl Fn(&Snapshot) + 'static,
    ) -> Subscription {
        let topic = self.inner.topics.update(model.namespace());
        let id = self.inner.bus.on(
            &topic,
            Rc::new(move |payload: &Payload| {
                if let Payload::State(state) = payload {
                    f(state);
                }
            }),
        );
        Subscription::new(self.inner.bus.clone(), topic, id)
    }

    /// Runs the queued commit for `ns`.
    pub(crate) fn commit_pending(&self, ns: &str) {
        let Some(draft) = self.draft(ns) else { return };
        let snapshot = self.store(ns, draft.fields());
        draft.finish_sync();
        self.publish(&snapshot);
    }

    /// Swaps in a new canonical state for `ns`.
    pub(crate) fn store(&self, ns: &str, fields: Fields) -> Snapshot {
        let revision = self
            .inner
            .states
            .borrow()
            .get(ns)
            .map_or(0, |s| s.revision() + 1);
        let generation = self
            .inner
            .protos
            .borrow()
            .get(ns)
            .map_or(0, |p| p.generation);
        let snapshot = Snapshot::new(ns, revision, generation, fields);
        self.inner
            .states
            .borrow_mut()
            .insert(ns.to_string(), snapshot.clone());
        snapshot
    }

    pub(crate) fn publish(&self, snapshot: &Snapshot) {
        let ns = snapshot.namespace();
        if self.inner.config.trace_commits {
            log::debug!("commit `{ns}` revision {}", snapshot.revision());
        } else {
            log::trace!("commit `{ns}` revision {}", snapshot.revision());
        }
        self.inner.bus.emit(
            &self.inner.topics.update(ns),
            &Payload::State(snapshot.clone()),
        );
    }
}
