use serde::{Deserialize, Serialize};
use web_time::Duration;

use crate::error::Result;

/// Registry-wide settings.
///
/// ```rust
/// use mtor_core::RegistryConfig;
///
/// let cfg = RegistryConfig::from_json(r#"{ "reset_grace_ms": 50 }"#).unwrap();
/// assert_eq!(cfg.topic_prefix, "mtor/");
/// assert_eq!(cfg.reset_grace_ms, 50);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Prepended to every bus topic the registry uses.
    pub topic_prefix: String,
    /// How long `bind_with_init` waits after an unbind before resetting.
    pub reset_grace_ms: u64,
    /// Log every commit at `debug` instead of `trace`.
    pub trace_commits: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "mtor/".to_string(),
            reset_grace_ms: 20,
            trace_commits: false,
        }
    }
}

impl RegistryConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn reset_grace(&self) -> Duration {
        Duration::from_millis(self.reset_grace_ms)
    }
}
