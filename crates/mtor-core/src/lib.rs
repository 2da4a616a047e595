//! # Modules, Drafts, and Bindings
//!
//! mtor turns plain module definitions into shared, observable singletons.
//! There are four main pieces:
//!
//! - `Registry`: owns every module's canonical state, methods and wiring.
//! - `Draft`: the mutable working copy methods write to; writes are
//!   coalesced into one commit per microtask checkpoint.
//! - `Binding`: a consumer's observable copy of a module's state.
//! - `EventBus`: the only channel between the three.
//!
//! ## Defining and registering a module
//!
//! ```rust
//! use mtor_core::*;
//!
//! let registry = Registry::new();
//! let counter = registry.register(
//!     "counter",
//!     ModelDef::new()
//!         .field("count", 0)
//!         .method("increment", |this, _| {
//!             let n = this.get_as::<i64>("count").unwrap_or(0);
//!             this.set("count", n + 1);
//!             Value::Null
//!         }),
//! );
//!
//! let view = registry.bind(&counter).unwrap();
//! view.call("increment", vec![]).unwrap();
//! view.call("increment", vec![]).unwrap();
//!
//! // Nothing is published until the checkpoint, and then only once.
//! assert_eq!(view.get("count"), Some(json!(0)));
//! registry.flush();
//! assert_eq!(view.get("count"), Some(json!(2)));
//! ```
//!
//! ## Wiring one module into another
//!
//! `inject` keeps a field mirrored to another module's canonical state:
//!
//! ```rust
//! use mtor_core::*;
//!
//! let registry = Registry::new();
//! let user = registry.register("user", ModelDef::new().field("name", "ann"));
//! registry.register("greeting", ModelDef::new().inject("user", &user));
//!
//! registry.set_field("user", "name", "bob").unwrap();
//! registry.flush();
//! let greeting = registry.state("greeting").unwrap();
//! assert_eq!(greeting.get("user"), Some(&json!({"name": "bob"})));
//! ```
//!
//! ## Hot reload
//!
//! Registering a namespace again swaps its methods, hooks and wiring while
//! keeping its state and static members. Bindings notice the new prototype
//! on the next publish.
//!
//! ## Scheduling
//!
//! The registry never spawns or blocks. Deferred work sits in its
//! `Scheduler`: call `Registry::flush` at the end of a turn and
//! `Registry::tick` from the host's timer loop.

pub mod binding;
pub mod bus;
pub mod config;
pub mod draft;
pub mod effects;
pub mod error;
pub mod hooks;
pub mod model;
pub mod prelude;
pub mod registry;
pub mod scheduler;
pub mod scope;
pub mod signal;
pub mod state;
pub mod value;

mod tests;

pub use binding::*;
pub use bus::*;
pub use config::*;
pub use draft::*;
pub use effects::*;
pub use error::*;
pub use hooks::*;
pub use model::*;
pub use registry::*;
pub use scheduler::*;
pub use scope::*;
pub use signal::*;
pub use state::*;
pub use value::*;
