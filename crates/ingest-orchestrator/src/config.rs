use serde::{Deserialize, Serialize};

/// Orchestrator settings. Every field has a default, so `{}` is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
  /// Mirror every execution write into the legacy upload table.
  pub enable_legacy_upload_status: bool,
  /// Input parameter holding the number of fan-out units to expect.
  pub total_units_key: String,
  /// A diagnostic containing this text fails an otherwise finished execution.
  pub error_marker: String,
}

impl Default for OrchestratorConfig {
  fn default() -> Self {
    Self {
      enable_legacy_upload_status: true,
      total_units_key: "total_layers".to_string(),
      error_marker: "ErrorDetail".to_string(),
    }
  }
}
