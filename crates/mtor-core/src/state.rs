use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

use crate::model::{Hooks, Method, Wire};
use crate::value::{Fields, Value};

/// Per-namespace method surface, rebuilt on every registration.
///
/// A binding holds the record it was seeded with and compares it by pointer
/// against the registry's current one to notice a hot reload.
pub struct Prototype {
    pub(crate) generation: u64,
    pub(crate) methods: BTreeMap<String, Method>,
    /// Defaults of the registered definition; `reset` rebuilds from these.
    pub(crate) origin: Fields,
    pub(crate) hooks: Hooks,
    pub(crate) wiring: Vec<Wire>,
}

impl Prototype {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn origin(&self) -> &Fields {
        &self.origin
    }

    pub fn wiring(&self) -> &[Wire] {
        &self.wiring
    }
}

impl fmt::Debug for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prototype")
            .field("generation", &self.generation)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("origin", &self.origin)
            .field("wiring", &self.wiring)
            .finish()
    }
}

/// Canonical state of one namespace: immutable once published.
///
/// Every commit builds a new snapshot; cloning only bumps a refcount.
#[derive(Clone)]
pub struct Snapshot(Rc<SnapshotInner>);

struct SnapshotInner {
    namespace: String,
    revision: u64,
    generation: u64,
    fields: Fields,
}

impl Snapshot {
    pub(crate) fn new(namespace: &str, revision: u64, generation: u64, fields: Fields) -> Self {
        Self(Rc::new(SnapshotInner {
            namespace: namespace.to_string(),
            revision,
            generation,
            fields,
        }))
    }

    pub fn namespace(&self) -> &str {
        &self.0.namespace
    }

    /// Zero for the state seeded at first registration, then +1 per commit.
    pub fn revision(&self) -> u64 {
        self.0.revision
    }

    /// Generation of the prototype that was current when this was committed.
    pub fn generation(&self) -> u64 {
        self.0.generation
    }

    pub fn fields(&self) -> &Fields {
        &self.0.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.fields.get(key)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// The fields as a JSON object, which is what a wired field receives.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.fields.clone())
    }

    pub fn ptr_eq(a: &Snapshot, b: &Snapshot) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("namespace", &self.0.namespace)
            .field("revision", &self.0.revision)
            .field("generation", &self.0.generation)
            .field("fields", &self.0.fields)
            .finish()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.fields.serialize(serializer)
    }
}
