//! Publish/subscribe bus.
//!
//! Every interaction between the registry's mutation machinery and its
//! consumers travels over a bus: committed states, routed method calls and
//! reset notifications. The registry only depends on the [`EventBus`] trait;
//! [`LocalBus`] is the in-process implementation it uses by default.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::state::Snapshot;
use crate::value::Value;

new_key_type! {
    pub struct HandlerId;
}

pub enum Payload {
    /// A freshly committed canonical state.
    State(Snapshot),
    /// A routed method call.
    Invoke(Invocation),
    /// The state about to be discarded by a reset.
    Reset(Snapshot),
}

pub struct Invocation {
    pub args: Vec<Value>,
    pub reply: Reply,
}

/// Completion slot for a routed call. The first resolution wins.
#[derive(Clone, Default)]
pub struct Reply(Rc<RefCell<Option<Value>>>);

impl Reply {
    pub fn resolve(&self, value: Value) {
        let mut slot = self.0.borrow_mut();
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    pub fn take(&self) -> Option<Value> {
        self.0.borrow_mut().take()
    }
}

pub type Handler = Rc<dyn Fn(&Payload)>;

pub trait EventBus {
    fn on(&self, topic: &str, handler: Handler) -> HandlerId;
    /// Returns false if the handler was not subscribed to `topic`.
    fn off(&self, topic: &str, id: HandlerId) -> bool;
    fn once(&self, topic: &str, handler: Handler) -> HandlerId;
    /// Delivers synchronously; returns how many handlers ran.
    fn emit(&self, topic: &str, payload: &Payload) -> usize;
    /// Removes every handler on `topic`; returns how many were removed.
    fn clean(&self, topic: &str) -> usize;
    fn listener_count(&self, topic: &str) -> usize;
}

struct Entry {
    handler: Handler,
    once: bool,
}

#[derive(Default)]
struct BusInner {
    handlers: SlotMap<HandlerId, Entry>,
    topics: HashMap<String, SmallVec<[HandlerId; 4]>>,
}

impl BusInner {
    fn add(&mut self, topic: &str, handler: Handler, once: bool) -> HandlerId {
        let id = self.handlers.insert(Entry { handler, once });
        self.topics.entry(topic.to_string()).or_default().push(id);
        id
    }

    fn detach(&mut self, topic: &str, id: HandlerId) -> bool {
        let Some(list) = self.topics.get_mut(topic) else {
            return false;
        };
        let Some(pos) = list.iter().position(|h| *h == id) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.topics.remove(topic);
        }
        self.handlers.remove(id).is_some()
    }
}

/// Single-threaded bus; handlers run in subscription order.
#[derive(Default)]
pub struct LocalBus {
    inner: RefCell<BusInner>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventBus for LocalBus {
    fn on(&self, topic: &str, handler: Handler) -> HandlerId {
        self.inner.borrow_mut().add(topic, handler, false)
    }

    fn off(&self, topic: &str, id: HandlerId) -> bool {
        self.inner.borrow_mut().detach(topic, id)
    }

    fn once(&self, topic: &str, handler: Handler) -> HandlerId {
        self.inner.borrow_mut().add(topic, handler, true)
    }

    fn emit(&self, topic: &str, payload: &Payload) -> usize {
        let targets: SmallVec<[(HandlerId, Handler, bool); 4]> = {
            let mut inner = self.inner.borrow_mut();
            let ids = inner.topics.get(topic).cloned().unwrap_or_default();
            let targets = ids
                .iter()
                .filter_map(|id| {
                    inner
                        .handlers
                        .get(*id)
                        .map(|e| (*id, e.handler.clone(), e.once))
                })
                .collect();
            // One-shot handlers leave before running so a nested emit can't
            // reach them again.
            for id in ids {
                if inner.handlers.get(id).is_some_and(|e| e.once) {
                    inner.detach(topic, id);
                }
            }
            targets
        };

        let mut delivered = 0;
        for (id, handler, once) in targets {
            // Skip handlers an earlier handler in this emit unsubscribed.
            if !once && !self.inner.borrow().handlers.contains_key(id) {
                continue;
            }
            handler(payload);
            delivered += 1;
        }
        delivered
    }

    fn clean(&self, topic: &str) -> usize {
        let mut inner = self.inner.borrow_mut();
        let Some(ids) = inner.topics.remove(topic) else {
            return 0;
        };
        for id in &ids {
            inner.handlers.remove(*id);
        }
        ids.len()
    }

    fn listener_count(&self, topic: &str) -> usize {
        self.inner
            .borrow()
            .topics
            .get(topic)
            .map_or(0, |list| list.len())
    }
}

/// Topic naming for one registry.
#[derive(Clone, Debug)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn update(&self, ns: &str) -> String {
        format!("{}{ns}", self.prefix)
    }

    pub fn method(&self, ns: &str, method: &str) -> String {
        format!("{}{ns}-function-{method}", self.prefix)
    }

    pub fn reset(&self, ns: &str) -> String {
        format!("{}{ns}-reset", self.prefix)
    }
}

/// Unsubscribes from the bus when dropped.
pub struct Subscription {
    bus: Rc<dyn EventBus>,
    topic: String,
    id: Option<HandlerId>,
}

impl Subscription {
    pub(crate) fn new(bus: Rc<dyn EventBus>, topic: String, id: HandlerId) -> Self {
        Self {
            bus,
            topic,
            id: Some(id),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(id) = self.id.take() {
            self.bus.off(&self.topic, id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
