use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use web_time::Instant;

use mtor_core::{Registry, Snapshot, Subscription, Value};

/// Every namespace's canonical state as compact JSON, keyed by namespace.
pub fn dump(registry: &Registry) -> String {
    let all: serde_json::Map<String, Value> = registry
        .get_all()
        .into_iter()
        .map(|(ns, state)| (ns, state.to_value()))
        .collect();
    Value::Object(all).to_string()
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommitRecord {
    pub namespace: String,
    pub revision: u64,
    pub generation: u64,
    pub fields: usize,
    pub at: Instant,
}

impl CommitRecord {
    fn from_snapshot(state: &Snapshot) -> Self {
        Self {
            namespace: state.namespace().to_string(),
            revision: state.revision(),
            generation: state.generation(),
            fields: state.fields().len(),
            at: Instant::now(),
        }
    }
}

struct Stats {
    capacity: usize,
    history: VecDeque<CommitRecord>,
    commits: u64,
    last: Option<Instant>,
    rate_smooth: f32,
}

impl Stats {
    fn record(&mut self, rec: CommitRecord) {
        self.commits += 1;
        if let Some(prev) = self.last.replace(rec.at) {
            let dt = (rec.at - prev).as_secs_f32();
            if dt > 0.0 {
                let rate = 1.0 / dt;
                // simple EMA
                let a = 0.2;
                self.rate_smooth = if self.rate_smooth == 0.0 {
                    rate
                } else {
                    (1.0 - a) * self.rate_smooth + a * rate
                };
            }
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(rec);
    }
}

/// Records the commits of the namespaces it watches.
///
/// Dropping the inspector detaches it from the bus.
pub struct Inspector {
    registry: Registry,
    stats: Rc<RefCell<Stats>>,
    subs: BTreeMap<String, Subscription>,
}

impl Inspector {
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Watches every namespace registered so far.
    pub fn attach(registry: &Registry) -> Self {
        Self::with_capacity(registry, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(registry: &Registry, capacity: usize) -> Self {
        let mut inspector = Self {
            registry: registry.clone(),
            stats: Rc::new(RefCell::new(Stats {
                capacity: capacity.max(1),
                history: VecDeque::new(),
                commits: 0,
                last: None,
                rate_smooth: 0.0,
            })),
            subs: BTreeMap::new(),
        };
        for ns in registry.namespaces() {
            inspector.watch(&ns);
        }
        inspector
    }

    /// Starts recording `ns`. Returns false if it is already watched or not
    /// registered.
    pub fn watch(&mut self, ns: &str) -> bool {
        if self.subs.contains_key(ns) {
            return false;
        }
        if !self.registry.is_registered(ns) {
            log::warn!("inspector: `{ns}` is not registered");
            return false;
        }
        let stats = self.stats.clone();
        let sub = self.registry.subscribe(ns, move |state| {
            stats.borrow_mut().record(CommitRecord::from_snapshot(state));
        });
        self.subs.insert(ns.to_string(), sub);
        log::debug!("inspector: watching `{ns}`");
        true
    }

    pub fn unwatch(&mut self, ns: &str) -> bool {
        self.subs.remove(ns).is_some()
    }

    pub fn watched(&self) -> impl Iterator<Item = &str> {
        self.subs.keys().map(String::as_str)
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<CommitRecord> {
        self.stats.borrow().history.iter().cloned().collect()
    }

    pub fn commit_count(&self) -> u64 {
        self.stats.borrow().commits
    }

    pub fn clear(&self) {
        let mut stats = self.stats.borrow_mut();
        stats.history.clear();
        stats.commits = 0;
        stats.last = None;
        stats.rate_smooth = 0.0;
    }

    /// A header line, then one line per watched namespace.
    pub fn summary_lines(&self) -> Vec<String> {
        let (commits, rate) = {
            let stats = self.stats.borrow();
            (stats.commits, stats.rate_smooth)
        };
        let mut lines = vec![format!("commits: {commits}  |  rate: {rate:.1}/s")];
        for ns in self.subs.keys() {
            match self.registry.state(ns) {
                Some(state) => lines.push(format!(
                    "{ns}: rev {}  gen {}  {} fields",
                    state.revision(),
                    state.generation(),
                    state.fields().len()
                )),
                None => lines.push(format!("{ns}: <no state>")),
            }
        }
        lines
    }
}
