pub use crate::binding::Binding;
pub use crate::bus::{EventBus, LocalBus, Payload, Subscription};
pub use crate::config::RegistryConfig;
pub use crate::draft::Draft;
pub use crate::effects::{Dispose, effect, on_unmount};
pub use crate::error::{MtorError, Result};
pub use crate::hooks::{use_init_model, use_model};
pub use crate::model::{ModelClass, ModelDef, Namespaced};
pub use crate::registry::Registry;
pub use crate::scheduler::{Clock, ManualClock, Scheduler, SystemClock};
pub use crate::scope::{Scope, current_scope};
pub use crate::signal::{Signal, signal};
pub use crate::state::Snapshot;
pub use crate::value::{Fields, Value, fields, json};
