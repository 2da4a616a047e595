use thiserror::Error;

/// Errors surfaced by the registry's fallible entry points.
///
/// Unchanged writes, missing lifecycle hooks and re-registration of an
/// existing namespace are not errors; those paths are silent no-ops.
#[derive(Debug, Error)]
pub enum MtorError {
    #[error("namespace `{0}` is not registered")]
    NamespaceNotFound(String),

    #[error("module `{namespace}` has no method `{method}`")]
    MethodNotFound { namespace: String, method: String },

    /// The method exists but nothing answered on its topic, usually because
    /// a host cleaned the topic behind the registry's back.
    #[error("call to `{namespace}.{method}` was not answered by any subscriber")]
    Unrouted { namespace: String, method: String },

    #[error("`{0}` must be bound inside a setup scope so its teardown can be registered")]
    NoSetupScope(String),

    #[error("invalid registry config: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T, E = MtorError> = std::result::Result<T, E>;
