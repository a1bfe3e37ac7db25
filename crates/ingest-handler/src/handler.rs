use async_trait::async_trait;

use crate::descriptor::InputDescriptor;
use crate::error::HandlerError;

/// Ordered step identifiers for one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSequence(Vec<String>);

impl StepSequence {
  pub fn new<I, S>(steps: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(steps.into_iter().map(Into::into).collect())
  }

  /// The step an execution sits on before anything has run.
  pub fn first(&self) -> Option<&str> {
    self.0.first().map(String::as_str)
  }

  pub fn position(&self, step: &str) -> Option<usize> {
    self.0.iter().position(|s| s == step)
  }

  /// Steps from `index` onwards; empty once past the end.
  pub fn remaining_from(&self, index: usize) -> &[String] {
    self.0.get(index..).unwrap_or(&[])
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// A pluggable description of how one class of input is processed.
///
/// Handlers are stateless. The registry keeps a factory per handler and
/// builds instances on demand.
#[async_trait]
pub trait Handler: Send + Sync {
  /// Stable identifier used to load the handler again in later steps.
  fn id(&self) -> &str;

  /// Whether this handler can process the given input.
  fn can_handle(&self, descriptor: &InputDescriptor) -> bool;

  /// The ordered steps for `action`, or `None` if the action is unsupported.
  fn step_sequence(&self, action: &str) -> Option<StepSequence>;

  /// Actions this handler has a step sequence for.
  fn actions(&self) -> Vec<&'static str>;

  /// Called once every unit of an execution finished successfully.
  async fn on_execution_complete(&self, _execution_id: &str) -> Result<(), HandlerError> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_remaining_from_past_end_is_empty() {
    let sequence = StepSequence::new(["a", "b"]);
    assert_eq!(sequence.remaining_from(1), ["b".to_string()]);
    assert!(sequence.remaining_from(2).is_empty());
    assert!(sequence.remaining_from(5).is_empty());
  }

  #[test]
  fn test_position() {
    let sequence = StepSequence::new(["a", "b", "c"]);
    assert_eq!(sequence.position("c"), Some(2));
    assert_eq!(sequence.position("z"), None);
    assert_eq!(sequence.first(), Some("a"));
  }
}
