use serde::{Deserialize, Serialize};

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Maximum number of steps running at once.
  pub concurrency: usize,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self { concurrency: 4 }
  }
}
