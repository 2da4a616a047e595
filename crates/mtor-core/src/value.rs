//! Dynamic field values.
//!
//! Module state is a flat, ordered map of field name to JSON value. Ordering
//! follows first insertion, so coalesced commits keep earlier keys ahead of
//! later ones.

pub use serde_json::{Map, Value, json};

/// One module's fields.
pub type Fields = Map<String, Value>;

/// Converts a JSON object into a field map.
///
/// Anything other than an object yields an empty map.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        Value::Null => Fields::new(),
        other => {
            log::warn!("fields: expected a JSON object, got {other}; using an empty map");
            Fields::new()
        }
    }
}

/// Overlays every field of `from` onto `target`.
pub fn assign(target: &mut Fields, from: &Fields) {
    for (key, value) in from {
        target.insert(key.clone(), value.clone());
    }
}

/// True if applying `props` to `current` would change at least one field.
pub(crate) fn differs(current: &Fields, props: &Fields) -> bool {
    props
        .iter()
        .any(|(key, value)| current.get(key) != Some(value))
}
