use serde::{Deserialize, Serialize};

/// Engine configuration, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rewrite `input()` calls into suspension points. When disabled, scripts
    /// run directly and `input()` is whatever the sandbox provides.
    pub handle_input: bool,
    /// Capability whose presence enables figure capture and clearing.
    pub figure_capability: String,
    /// Debug runs break on the first traced line even without a breakpoint there.
    pub stop_on_entry: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handle_input: true,
            figure_capability: "matplotlib".to_owned(),
            stop_on_entry: false,
        }
    }
}

impl EngineConfig {
    /// Configuration running every script directly, without input handling.
    #[must_use]
    pub fn plain() -> Self {
        Self {
            handle_input: false,
            ..Self::default()
        }
    }
}
