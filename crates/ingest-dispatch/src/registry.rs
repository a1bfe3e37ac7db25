use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::step::Step;

/// Process-wide mapping from step identifier to implementation.
///
/// Filled at startup, read-only afterwards.
#[derive(Default, Clone)]
pub struct StepRegistry {
  steps: HashMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `step` under `id`, replacing any previous registration.
  pub fn register(&mut self, id: impl Into<String>, step: Arc<dyn Step>) -> &mut Self {
    self.steps.insert(id.into(), step);
    self
  }

  pub fn get(&self, id: &str) -> Option<Arc<dyn Step>> {
    self.steps.get(id).cloned()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.steps.contains_key(id)
  }

  /// Registered identifiers, sorted.
  pub fn ids(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = self.steps.keys().map(String::as_str).collect();
    ids.sort_unstable();
    ids
  }
}

impl fmt::Debug for StepRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StepRegistry")
      .field("steps", &self.ids())
      .finish()
  }
}
