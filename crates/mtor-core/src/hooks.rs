//! Setup-phase entry points for host view layers.
//!
//! ```rust
//! use mtor_core::*;
//!
//! let registry = Registry::new();
//! let counter = registry.register("counter", ModelDef::new().field("count", 0));
//!
//! let mounted = Scope::new();
//! let binding = mounted.run(|| use_model(&registry, &counter)).unwrap();
//! assert!(binding.is_bound());
//!
//! mounted.dispose(); // consumer unmounted
//! assert!(!binding.is_bound());
//! ```

use crate::binding::Binding;
use crate::effects::{effect, on_unmount};
use crate::error::{MtorError, Result};
use crate::model::Namespaced;
use crate::registry::Registry;
use crate::scope::current_scope;

fn require_scope(model: &impl Namespaced) -> Result<()> {
    match current_scope() {
        Some(_) => Ok(()),
        None => Err(MtorError::NoSetupScope(model.namespace().to_string())),
    }
}

/// Binds inside the current setup scope; the binding is released when the
/// scope is disposed.
pub fn use_model(registry: &Registry, model: impl Namespaced) -> Result<Binding> {
    require_scope(&model)?;
    let binding = registry.bind(model)?;
    effect(|| {
        let binding = binding.clone();
        on_unmount(move || binding.unbind())
    });
    Ok(binding)
}

/// [`use_model`] with an init callback and a delayed reset on unmount.
///
/// See [`Registry::bind_with_init`] for the grace-window rules.
pub fn use_init_model(
    registry: &Registry,
    model: impl Namespaced,
    init: impl FnOnce(&Binding),
    auto_reset: bool,
) -> Result<Binding> {
    require_scope(&model)?;
    let binding = registry.bind_with_init(model, init, auto_reset)?;
    effect(|| {
        let binding = binding.clone();
        on_unmount(move || binding.unbind())
    });
    Ok(binding)
}
