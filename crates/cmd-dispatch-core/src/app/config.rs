//! DispatcherConfig - dispatcher の設定
//!
//! Mailbox の容量は設定できない（常に 1）。背圧の契約を変えてしまうため。

use serde::{Deserialize, Serialize};

/// Default dispatcher name, also the prefix of the loop thread's name.
pub const DEFAULT_DISPATCHER_NAME: &str = "client-command-dispatcher";

/// Settings for one dispatcher instance.
///
/// Every field has a default, so a partial JSON document is enough:
/// ```ignore
/// let config = DispatcherConfig::from_json_str(r#"{ "name": "orders" }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name used in logs.
    pub name: String,

    /// Name of the loop thread. Defaults to `"{name}-thread"`.
    pub thread_name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid dispatcher config: {0}")]
    Json(#[from] serde_json::Error),
}

impl DispatcherConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Effective loop thread name.
    pub fn thread_name(&self) -> String {
        self.thread_name
            .clone()
            .unwrap_or_else(|| format!("{}-thread", self.name))
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DISPATCHER_NAME.to_string(),
            thread_name: None,
        }
    }
}
